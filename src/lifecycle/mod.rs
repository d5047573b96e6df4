//! Reconciliation engine.
//!
//! Every operation runs under the tenant's operation lock, drives the
//! container runtime, then re-inspects the runtime and stores what it
//! actually reported. The store never records an assumed outcome: a failed
//! adapter step leaves the record in `error` with a readable `last_error`,
//! and `sync` (or the background sweep) brings it back in line later.

pub mod operation;
pub mod retry;

use crate::config::PlatformConfig;
use crate::error::LifecycleError;
use crate::lock::OperationLocks;
use crate::report::Envelope;
use crate::runtime::{ContainerRuntime, ContainerSpec, ContainerState, RuntimeError, RuntimeStatus};
use crate::store::{EventOutcome, OperationEvent, TenantStore};
use crate::tenant::{ContainerRecord, ContainerStatus, Tenant, TenantView};
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use operation::Operation;
pub use retry::RetryPolicy;

/// Result of a completed operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub operation: Operation,
    pub tenant_id: String,
    pub record: ContainerRecord,
    pub message: String,
}

/// Who asked for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Caller,
    Sweep,
}

pub struct ReconciliationEngine {
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<dyn TenantStore>,
    locks: OperationLocks,
    retry: RetryPolicy,
    call_timeout: Duration,
    container_port: u16,
    network: Option<String>,
    access_scheme: String,
    domain: String,
}

/// Map an engine-reported state onto the record's status vocabulary.
pub fn status_from_runtime(status: &RuntimeStatus) -> (ContainerStatus, Option<String>) {
    match status {
        RuntimeStatus::Running => (ContainerStatus::Running, None),
        RuntimeStatus::Created | RuntimeStatus::Exited | RuntimeStatus::Paused => {
            (ContainerStatus::Stopped, None)
        }
        RuntimeStatus::Restarting => (ContainerStatus::Creating, None),
        RuntimeStatus::Removing | RuntimeStatus::Dead | RuntimeStatus::Other(_) => (
            ContainerStatus::Error,
            Some(format!("Container is in state '{}'.", status)),
        ),
    }
}

impl ReconciliationEngine {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, store: Arc<dyn TenantStore>) -> Self {
        Self {
            runtime,
            store,
            locks: OperationLocks::new(),
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(60),
            container_port: 8000,
            network: None,
            access_scheme: "http".into(),
            domain: "localhost".into(),
        }
    }

    pub fn from_config(
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn TenantStore>,
        config: &PlatformConfig,
    ) -> Self {
        Self::new(runtime, store)
            .with_retry(RetryPolicy::from_config(&config.retry))
            .with_call_timeout(config.runtime.call_timeout())
            .with_container_defaults(
                config.runtime.container_port,
                config.runtime.docker_network.clone(),
            )
            .with_access(&config.access_scheme, &config.domain)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_container_defaults(mut self, container_port: u16, network: Option<String>) -> Self {
        self.container_port = container_port;
        self.network = network;
        self
    }

    pub fn with_access(mut self, scheme: &str, domain: &str) -> Self {
        self.access_scheme = scheme.to_string();
        self.domain = domain.to_string();
        self
    }

    pub fn locks(&self) -> &OperationLocks {
        &self.locks
    }

    pub fn store(&self) -> &Arc<dyn TenantStore> {
        &self.store
    }

    pub fn runtime_name(&self) -> &str {
        self.runtime.name()
    }

    pub async fn ping_runtime(&self) -> Result<(), RuntimeError> {
        self.timed("ping", self.runtime.ping()).await
    }

    /// Run `operation` and fold the result into a status envelope.
    pub async fn run(&self, operation: Operation, tenant_id: &str) -> Envelope {
        Envelope::from_result(self.execute(operation, tenant_id).await, |o| {
            o.message.clone()
        })
    }

    pub async fn recreate(&self, tenant_id: &str) -> Result<Outcome, LifecycleError> {
        self.execute(Operation::Recreate, tenant_id).await
    }

    pub async fn sync(&self, tenant_id: &str) -> Result<Outcome, LifecycleError> {
        self.execute(Operation::Sync, tenant_id).await
    }

    pub async fn restart(&self, tenant_id: &str) -> Result<Outcome, LifecycleError> {
        self.execute(Operation::Restart, tenant_id).await
    }

    pub async fn start(&self, tenant_id: &str) -> Result<Outcome, LifecycleError> {
        self.execute(Operation::Start, tenant_id).await
    }

    pub async fn stop(&self, tenant_id: &str) -> Result<Outcome, LifecycleError> {
        self.execute(Operation::Stop, tenant_id).await
    }

    pub async fn delete(&self, tenant_id: &str) -> Result<Outcome, LifecycleError> {
        self.execute(Operation::Delete, tenant_id).await
    }

    /// `sync` issued by the background sweep. Unlike a caller's sync it
    /// leaves no history entry when the record did not change.
    pub async fn sweep_sync(&self, tenant_id: &str) -> Result<Outcome, LifecycleError> {
        self.execute_from(Operation::Sync, tenant_id, Origin::Sweep).await
    }

    pub async fn execute(
        &self,
        operation: Operation,
        tenant_id: &str,
    ) -> Result<Outcome, LifecycleError> {
        self.execute_from(operation, tenant_id, Origin::Caller).await
    }

    async fn execute_from(
        &self,
        operation: Operation,
        tenant_id: &str,
        origin: Origin,
    ) -> Result<Outcome, LifecycleError> {
        let _guard = self
            .locks
            .acquire_guard(tenant_id)
            .ok_or_else(|| LifecycleError::Conflict {
                tenant_id: tenant_id.to_string(),
            })?;
        let tenant = self.load(tenant_id)?;

        tracing::info!(tenant_id, %operation, "operation started");
        let result = match operation {
            Operation::Recreate => self.do_recreate(&tenant).await,
            Operation::Sync => self.do_sync(&tenant).await,
            Operation::Restart => self.do_restart(&tenant).await,
            Operation::Start => self.do_start(&tenant).await,
            Operation::Stop => self.do_stop(&tenant).await,
            Operation::Delete => self.do_delete(&tenant).await,
        };

        let result = match result {
            Ok((record, message)) => {
                tracing::info!(
                    tenant_id,
                    %operation,
                    status = %record.status,
                    "operation finished"
                );
                Ok(Outcome {
                    operation,
                    tenant_id: tenant_id.to_string(),
                    record,
                    message,
                })
            }
            Err(err) => {
                if matches!(err, LifecycleError::Adapter { .. }) {
                    self.mark_error(tenant_id, &err);
                }
                tracing::warn!(tenant_id, %operation, "operation failed: {err}");
                Err(err)
            }
        };

        let unchanged = matches!(&result, Ok(o) if o.record.same_state(&tenant.record));
        if !(origin == Origin::Sweep && unchanged) {
            self.record_event(operation, tenant_id, &result);
        }
        result
    }

    /// Read-only view of a tenant. Takes no lock.
    pub fn status(&self, tenant_id: &str) -> Result<TenantView, LifecycleError> {
        let tenant = self.load(tenant_id)?;
        Ok(TenantView::project(&tenant, &self.access_scheme, &self.domain))
    }

    pub fn list(&self) -> Result<Vec<TenantView>, LifecycleError> {
        Ok(self
            .store
            .list()?
            .iter()
            .map(|t| TenantView::project(t, &self.access_scheme, &self.domain))
            .collect())
    }

    pub fn history(
        &self,
        tenant_id: &str,
        limit: usize,
    ) -> Result<Vec<OperationEvent>, LifecycleError> {
        self.load(tenant_id)?;
        Ok(self.store.events(tenant_id, limit)?)
    }

    fn load(&self, tenant_id: &str) -> Result<Tenant, LifecycleError> {
        self.store
            .get(tenant_id)?
            .ok_or_else(|| LifecycleError::Validation(format!("Unknown tenant {}.", tenant_id)))
    }

    // ── operations ──────────────────────────────────────────────

    async fn do_sync(&self, tenant: &Tenant) -> Result<(ContainerRecord, String), LifecycleError> {
        let observed = self.observe(tenant).await?;
        let record = self.write_observed(&tenant.tenant_id, observed.as_ref())?;
        let message = format!("Container status synced: {}.", record.status);
        Ok((record, message))
    }

    async fn do_start(&self, tenant: &Tenant) -> Result<(ContainerRecord, String), LifecycleError> {
        reject_if_error(tenant)?;
        let tenant_id = tenant.tenant_id.as_str();
        let Some(state) = self.observe(tenant).await? else {
            self.write_observed(tenant_id, None)?;
            return Err(LifecycleError::NotFound {
                tenant_id: tenant_id.to_string(),
            });
        };
        if state.status == RuntimeStatus::Running {
            let record = self.write_observed(tenant_id, Some(&state))?;
            return Ok((record, "Container is already running.".into()));
        }

        self.start_container(tenant_id, &state.id).await?;
        let record = self.confirm_running(tenant_id, &state.id, "start").await?;
        Ok((record, "Container started.".into()))
    }

    async fn do_stop(&self, tenant: &Tenant) -> Result<(ContainerRecord, String), LifecycleError> {
        reject_if_error(tenant)?;
        let tenant_id = tenant.tenant_id.as_str();
        let Some(state) = self.observe(tenant).await? else {
            let record = self.write_observed(tenant_id, None)?;
            return Ok((record, "Tenant has no container; nothing to stop.".into()));
        };
        if status_from_runtime(&state.status).0 == ContainerStatus::Stopped {
            let record = self.write_observed(tenant_id, Some(&state))?;
            return Ok((record, "Container is already stopped.".into()));
        }

        match self.stop_container(tenant_id, &state.id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(LifecycleError::adapter("stop", e)),
        }
        let after = self.inspect(tenant_id, &state.id).await?;
        let record = self.write_observed(tenant_id, after.as_ref())?;
        if record.status == ContainerStatus::Running {
            return Err(LifecycleError::adapter(
                "stop",
                RuntimeError::Engine("container still running after stop".into()),
            ));
        }
        Ok((record, "Container stopped.".into()))
    }

    async fn do_restart(
        &self,
        tenant: &Tenant,
    ) -> Result<(ContainerRecord, String), LifecycleError> {
        reject_if_error(tenant)?;
        let tenant_id = tenant.tenant_id.as_str();
        let Some(state) = self.observe(tenant).await? else {
            self.write_observed(tenant_id, None)?;
            return Err(LifecycleError::NotFound {
                tenant_id: tenant_id.to_string(),
            });
        };

        if let Err(e) = self.stop_container(tenant_id, &state.id).await {
            if e.is_not_found() {
                self.write_observed(tenant_id, None)?;
                return Err(LifecycleError::NotFound {
                    tenant_id: tenant_id.to_string(),
                });
            }
            return Err(LifecycleError::adapter("stop", e));
        }
        self.start_container(tenant_id, &state.id).await?;
        let record = self.confirm_running(tenant_id, &state.id, "restart").await?;
        Ok((record, "Container restarted.".into()))
    }

    async fn do_recreate(
        &self,
        tenant: &Tenant,
    ) -> Result<(ContainerRecord, String), LifecycleError> {
        let tenant_id = tenant.tenant_id.as_str();
        let name = match (tenant.subdomain.as_deref(), tenant.container_name()) {
            (Some(_), Some(name)) => name,
            _ => {
                return Err(LifecycleError::Validation(format!(
                    "Tenant {} has no subdomain; a container cannot be created.",
                    tenant_id
                )))
            }
        };
        if tenant.desired_image.trim().is_empty() {
            return Err(LifecycleError::Validation(format!(
                "Tenant {} has no image configured.",
                tenant_id
            )));
        }

        self.remove_all(tenant).await?;
        self.store.update_record(tenant_id, &mut |r| {
            *r = ContainerRecord {
                status: ContainerStatus::Creating,
                last_synced_at: Some(Utc::now()),
                ..ContainerRecord::default()
            };
        })?;

        let spec = self.build_spec(tenant, name);
        let container_id = match self.timed("create", self.runtime.create(&spec)).await {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(
                    tenant_id,
                    container = name,
                    "create failed, checking runtime: {err}"
                );
                match self.inspect(tenant_id, name).await {
                    Ok(Some(state)) => {
                        tracing::warn!(
                            tenant_id,
                            container_id = %state.id,
                            "container exists despite create failure, adopting it"
                        );
                        state.id
                    }
                    _ => return Err(LifecycleError::adapter("create", err)),
                }
            }
        };
        self.store.update_record(tenant_id, &mut |r| {
            r.container_id = Some(container_id.clone());
        })?;

        self.start_container(tenant_id, &container_id).await?;
        let record = self
            .confirm_running(tenant_id, &container_id, "recreate")
            .await?;
        Ok((record, "Container recreated and running.".into()))
    }

    async fn do_delete(
        &self,
        tenant: &Tenant,
    ) -> Result<(ContainerRecord, String), LifecycleError> {
        let tenant_id = tenant.tenant_id.as_str();
        let removed = self.remove_all(tenant).await?;
        if self.observe(tenant).await?.is_some() {
            return Err(LifecycleError::adapter(
                "remove",
                RuntimeError::Engine("container still present after removal".into()),
            ));
        }
        let record = self.write_observed(tenant_id, None)?;
        let message = if removed > 0 {
            "Container removed."
        } else {
            "No container to remove."
        };
        Ok((record, message.into()))
    }

    // ── adapter helpers ─────────────────────────────────────────

    /// Bound a single adapter call by the configured timeout.
    async fn timed<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = Result<T, RuntimeError>>,
    ) -> Result<T, RuntimeError> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::Timeout {
                op,
                after: self.call_timeout,
            }),
        }
    }

    /// Inspect one reference. `None` means the runtime says it does not exist.
    async fn inspect(
        &self,
        tenant_id: &str,
        container: &str,
    ) -> Result<Option<ContainerState>, LifecycleError> {
        let result = self
            .retry
            .run("inspect", tenant_id, move || {
                self.timed("inspect", self.runtime.inspect(container))
            })
            .await;
        match result {
            Ok(state) => Ok(Some(state)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(LifecycleError::adapter("inspect", e)),
        }
    }

    /// First container found under any of the tenant's references.
    async fn observe(&self, tenant: &Tenant) -> Result<Option<ContainerState>, LifecycleError> {
        for reference in tenant.container_refs() {
            if let Some(state) = self.inspect(&tenant.tenant_id, reference).await? {
                return Ok(Some(state));
            }
        }
        Ok(None)
    }

    /// Every distinct container found under the tenant's references.
    async fn observe_all(&self, tenant: &Tenant) -> Result<Vec<ContainerState>, LifecycleError> {
        let mut found: Vec<ContainerState> = Vec::new();
        for reference in tenant.container_refs() {
            if let Some(state) = self.inspect(&tenant.tenant_id, reference).await? {
                if !found.iter().any(|s| s.id == state.id) {
                    found.push(state);
                }
            }
        }
        Ok(found)
    }

    async fn start_container(
        &self,
        tenant_id: &str,
        container: &str,
    ) -> Result<(), LifecycleError> {
        self.retry
            .run("start", tenant_id, move || {
                self.timed("start", self.runtime.start(container))
            })
            .await
            .map_err(|e| LifecycleError::adapter("start", e))
    }

    async fn stop_container(&self, tenant_id: &str, container: &str) -> Result<(), RuntimeError> {
        self.retry
            .run("stop", tenant_id, move || {
                self.timed("stop", self.runtime.stop(container))
            })
            .await
    }

    /// Remove every container of the tenant, confirming each is gone.
    /// Returns how many containers were found.
    async fn remove_all(&self, tenant: &Tenant) -> Result<usize, LifecycleError> {
        let tenant_id = tenant.tenant_id.as_str();
        let found = self.observe_all(tenant).await?;
        for state in &found {
            let attempt = self.timed("remove", self.runtime.remove(&state.id)).await;
            let still_there = self.inspect(tenant_id, &state.id).await?.is_some();
            match attempt {
                _ if !still_there => {
                    tracing::debug!(tenant_id, container_id = %state.id, "container removed");
                }
                Ok(()) => {
                    return Err(LifecycleError::adapter(
                        "remove",
                        RuntimeError::Engine("container still present after removal".into()),
                    ))
                }
                Err(e) => return Err(LifecycleError::adapter("remove", e)),
            }
        }
        Ok(found.len())
    }

    /// Re-inspect after a start and require the container to be running.
    async fn confirm_running(
        &self,
        tenant_id: &str,
        container: &str,
        step: &'static str,
    ) -> Result<ContainerRecord, LifecycleError> {
        let after = self.inspect(tenant_id, container).await?;
        let record = self.write_observed(tenant_id, after.as_ref())?;
        if record.status != ContainerStatus::Running {
            return Err(LifecycleError::adapter(
                step,
                RuntimeError::Engine(format!("container is {} after {}", record.status, step)),
            ));
        }
        Ok(record)
    }

    // ── store helpers ───────────────────────────────────────────

    /// Overwrite the record with what the runtime reported.
    fn write_observed(
        &self,
        tenant_id: &str,
        observed: Option<&ContainerState>,
    ) -> Result<ContainerRecord, LifecycleError> {
        let now = Utc::now();
        let next = match observed {
            None => ContainerRecord::absent(now),
            Some(state) => {
                let (status, last_error) = status_from_runtime(&state.status);
                ContainerRecord {
                    container_id: Some(state.id.clone()),
                    status,
                    last_synced_at: Some(now),
                    last_error,
                }
            }
        };
        Ok(self
            .store
            .update_record(tenant_id, &mut |r| *r = next.clone())?)
    }

    fn mark_error(&self, tenant_id: &str, err: &LifecycleError) {
        let message = err.user_message();
        let result = self.store.update_record(tenant_id, &mut |r| {
            r.status = ContainerStatus::Error;
            r.last_error = Some(message.clone());
            r.last_synced_at = Some(Utc::now());
        });
        if let Err(e) = result {
            tracing::error!(tenant_id, "failed to record error state: {e}");
        }
    }

    fn record_event(
        &self,
        operation: Operation,
        tenant_id: &str,
        result: &Result<Outcome, LifecycleError>,
    ) {
        let (outcome, message) = match result {
            Ok(o) => (EventOutcome::Success, o.message.clone()),
            Err(e) => (EventOutcome::Error, e.user_message()),
        };
        let event = OperationEvent {
            tenant_id: tenant_id.to_string(),
            operation,
            outcome,
            message: Some(message),
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.store.append_event(&event) {
            tracing::warn!(tenant_id, %operation, "failed to append operation event: {e}");
        }
    }

    fn build_spec(&self, tenant: &Tenant, name: &str) -> ContainerSpec {
        let mut env = vec![
            ("TENANT_ID".to_string(), tenant.tenant_id.clone()),
            ("PORT".to_string(), self.container_port.to_string()),
        ];
        if let Some(subdomain) = &tenant.subdomain {
            env.push(("TENANT_SUBDOMAIN".to_string(), subdomain.clone()));
            env.push((
                "SITE_NAME".to_string(),
                format!("{}.{}", subdomain, self.domain),
            ));
        }
        ContainerSpec {
            name: name.to_string(),
            image: tenant.desired_image.clone(),
            env,
            memory_mb: tenant.resource_limits.memory_mb,
            cpu_limit: tenant.resource_limits.cpu_limit,
            host_port: tenant.host_port,
            container_port: self.container_port,
            network: self.network.clone(),
        }
    }
}

fn reject_if_error(tenant: &Tenant) -> Result<(), LifecycleError> {
    if tenant.record.status == ContainerStatus::Error {
        return Err(LifecycleError::Validation(format!(
            "Tenant {} is in an error state. Run sync or recreate first.",
            tenant.tenant_id
        )));
    }
    Ok(())
}
