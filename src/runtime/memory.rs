use super::{ContainerRuntime, ContainerSpec, ContainerState, RuntimeError, RuntimeStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Adapter verbs, used for call counting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeCall {
    Create,
    Start,
    Stop,
    Remove,
    Inspect,
}

/// One-shot fault consumed by the next matching call.
#[derive(Debug, Clone)]
pub enum Fault {
    Fail(RuntimeError),
    /// Do the work, then report this error anyway.
    FailAfter(RuntimeError),
    /// Sleep before doing the work, to trip the caller's timeout.
    Hang(Duration),
}

#[derive(Debug, Clone)]
struct FakeContainer {
    id: String,
    name: String,
    spec: Option<ContainerSpec>,
    status: RuntimeStatus,
}

#[derive(Default)]
struct Inner {
    containers: Vec<FakeContainer>,
    calls: HashMap<RuntimeCall, usize>,
    faults: HashMap<RuntimeCall, VecDeque<Fault>>,
}

impl Inner {
    fn find(&self, reference: &str) -> Option<&FakeContainer> {
        self.containers
            .iter()
            .find(|c| c.id == reference || c.name == reference)
    }

    fn find_mut(&mut self, reference: &str) -> Option<&mut FakeContainer> {
        self.containers
            .iter_mut()
            .find(|c| c.id == reference || c.name == reference)
    }
}

/// Deterministic in-process engine for tests and dry runs.
#[derive(Default)]
pub struct InMemoryRuntime {
    inner: Mutex<Inner>,
    latency: Mutex<Duration>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay applied to every call.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Queue a fault for the next `call`.
    pub fn inject(&self, call: RuntimeCall, fault: Fault) {
        self.inner
            .lock()
            .faults
            .entry(call)
            .or_default()
            .push_back(fault);
    }

    pub fn calls(&self, call: RuntimeCall) -> usize {
        self.inner.lock().calls.get(&call).copied().unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        self.inner.lock().calls.clear();
    }

    /// Peek at a container without counting an inspect call.
    pub fn container(&self, reference: &str) -> Option<ContainerState> {
        self.inner.lock().find(reference).map(|c| ContainerState {
            id: c.id.clone(),
            name: c.name.clone(),
            status: c.status.clone(),
        })
    }

    /// Spec the container was created from.
    pub fn spec_of(&self, reference: &str) -> Option<ContainerSpec> {
        self.inner.lock().find(reference).and_then(|c| c.spec.clone())
    }

    pub fn container_count(&self) -> usize {
        self.inner.lock().containers.len()
    }

    /// Seed a container as if someone created it outside the engine.
    pub fn seed(&self, name: &str, status: RuntimeStatus) -> String {
        let id = new_id();
        self.inner.lock().containers.push(FakeContainer {
            id: id.clone(),
            name: name.to_string(),
            spec: None,
            status,
        });
        id
    }

    /// Change a container's state behind the engine's back (crash, manual stop).
    pub fn set_status(&self, reference: &str, status: RuntimeStatus) -> bool {
        match self.inner.lock().find_mut(reference) {
            Some(c) => {
                c.status = status;
                true
            }
            None => false,
        }
    }

    /// Count the call and apply any queued fault. `Ok(Some(e))` means the
    /// call should take effect and then fail with `e`.
    async fn enter(&self, call: RuntimeCall) -> Result<Option<RuntimeError>, RuntimeError> {
        let (fault, latency) = {
            let mut inner = self.inner.lock();
            *inner.calls.entry(call).or_insert(0) += 1;
            let fault = inner.faults.get_mut(&call).and_then(|q| q.pop_front());
            (fault, *self.latency.lock())
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match fault {
            Some(Fault::Fail(e)) => Err(e),
            Some(Fault::FailAfter(e)) => Ok(Some(e)),
            Some(Fault::Hang(d)) => {
                tokio::time::sleep(d).await;
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

fn settle<T>(late: Option<RuntimeError>, value: T) -> Result<T, RuntimeError> {
    match late {
        Some(e) => Err(e),
        None => Ok(value),
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ping(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let late = self.enter(RuntimeCall::Create).await?;
        let mut inner = self.inner.lock();
        if inner.find(&spec.name).is_some() {
            return Err(RuntimeError::Engine(format!(
                "container name {} is already in use",
                spec.name
            )));
        }
        let id = new_id();
        inner.containers.push(FakeContainer {
            id: id.clone(),
            name: spec.name.clone(),
            spec: Some(spec.clone()),
            status: RuntimeStatus::Created,
        });
        settle(late, id)
    }

    async fn start(&self, container: &str) -> Result<(), RuntimeError> {
        let late = self.enter(RuntimeCall::Start).await?;
        let mut inner = self.inner.lock();
        let c = inner
            .find_mut(container)
            .ok_or_else(|| RuntimeError::NotFound(container.to_string()))?;
        c.status = RuntimeStatus::Running;
        settle(late, ())
    }

    async fn stop(&self, container: &str) -> Result<(), RuntimeError> {
        let late = self.enter(RuntimeCall::Stop).await?;
        let mut inner = self.inner.lock();
        let c = inner
            .find_mut(container)
            .ok_or_else(|| RuntimeError::NotFound(container.to_string()))?;
        if c.status == RuntimeStatus::Running || c.status == RuntimeStatus::Restarting {
            c.status = RuntimeStatus::Exited;
        }
        settle(late, ())
    }

    async fn remove(&self, container: &str) -> Result<(), RuntimeError> {
        let late = self.enter(RuntimeCall::Remove).await?;
        let mut inner = self.inner.lock();
        let before = inner.containers.len();
        inner
            .containers
            .retain(|c| c.id != container && c.name != container);
        if inner.containers.len() == before {
            return Err(RuntimeError::NotFound(container.to_string()));
        }
        settle(late, ())
    }

    async fn inspect(&self, container: &str) -> Result<ContainerState, RuntimeError> {
        let late = self.enter(RuntimeCall::Inspect).await?;
        let state = self
            .container(container)
            .ok_or_else(|| RuntimeError::NotFound(container.to_string()))?;
        settle(late, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.into(),
            image: "img".into(),
            env: vec![],
            memory_mb: 256,
            cpu_limit: 0.5,
            host_port: None,
            container_port: 8000,
            network: None,
        }
    }

    #[tokio::test]
    async fn test_create_start_stop_remove() {
        let rt = InMemoryRuntime::new();
        let id = rt.create(&spec("acme")).await.unwrap();
        assert_eq!(rt.inspect("acme").await.unwrap().id, id);

        rt.start(&id).await.unwrap();
        assert_eq!(rt.inspect(&id).await.unwrap().status, RuntimeStatus::Running);
        rt.stop("acme").await.unwrap();
        assert_eq!(rt.inspect(&id).await.unwrap().status, RuntimeStatus::Exited);

        rt.remove(&id).await.unwrap();
        assert!(rt.inspect(&id).await.unwrap_err().is_not_found());
        assert!(rt.remove(&id).await.unwrap_err().is_not_found());
        assert_eq!(rt.calls(RuntimeCall::Remove), 2);
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected() {
        let rt = InMemoryRuntime::new();
        rt.create(&spec("acme")).await.unwrap();
        let err = rt.create(&spec("acme")).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Engine(_)));
        assert_eq!(rt.container_count(), 1);
    }

    #[tokio::test]
    async fn test_injected_fault_is_consumed_once() {
        let rt = InMemoryRuntime::new();
        rt.inject(
            RuntimeCall::Inspect,
            Fault::Fail(RuntimeError::Engine("daemon hiccup".into())),
        );
        assert!(rt.inspect("acme").await.unwrap_err().is_transient());
        assert!(rt.inspect("acme").await.unwrap_err().is_not_found());
        assert_eq!(rt.calls(RuntimeCall::Inspect), 2);
    }

    #[tokio::test]
    async fn test_fail_after_applies_the_call() {
        let rt = InMemoryRuntime::new();
        rt.inject(
            RuntimeCall::Create,
            Fault::FailAfter(RuntimeError::Engine("lost response".into())),
        );
        assert!(rt.create(&spec("acme")).await.is_err());
        assert_eq!(
            rt.container("acme").map(|c| c.status),
            Some(RuntimeStatus::Created)
        );
    }
}
