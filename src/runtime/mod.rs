//! Container runtime adapter.
//!
//! The reconciliation engine only talks to the container engine through
//! [`ContainerRuntime`]. Implementations report what the engine actually
//! said: a missing container is [`RuntimeError::NotFound`], never a silent
//! success. Deciding that "already gone" is fine for `stop`/`remove` is the
//! caller's job.

pub mod docker;
pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

pub use docker::DockerRuntime;
pub use memory::{Fault, InMemoryRuntime, RuntimeCall};

/// Everything needed to create a tenant container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<(String, String)>,
    pub memory_mb: u32,
    pub cpu_limit: f64,
    /// Loopback port published on the host, if any.
    pub host_port: Option<u16>,
    pub container_port: u16,
    /// Extra network to attach after creation.
    pub network: Option<String>,
}

/// Container state as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    /// Anything the engine reports that we do not recognise.
    Other(String),
}

impl RuntimeStatus {
    /// Parse the docker `State.Status` vocabulary.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Restarting => write!(f, "restarting"),
            Self::Removing => write!(f, "removing"),
            Self::Exited => write!(f, "exited"),
            Self::Dead => write!(f, "dead"),
            Self::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Result of `inspect`.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerState {
    pub id: String,
    pub name: String,
    pub status: RuntimeStatus,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    #[error("no such container: {0}")]
    NotFound(String),
    #[error("{op} timed out after {}ms", .after.as_millis())]
    Timeout { op: &'static str, after: Duration },
    #[error("engine error: {0}")]
    Engine(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// NotFound is a definitive answer from the engine; everything else may
    /// succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        !self.is_not_found()
    }
}

/// Abstract container engine. `container` arguments accept an id or a name.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &str;

    /// Check the engine is reachable.
    async fn ping(&self) -> Result<(), RuntimeError>;

    /// Create (but do not start) a container. Returns the container id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start(&self, container: &str) -> Result<(), RuntimeError>;

    async fn stop(&self, container: &str) -> Result<(), RuntimeError>;

    /// Force-remove a container, running or not.
    async fn remove(&self, container: &str) -> Result<(), RuntimeError>;

    async fn inspect(&self, container: &str) -> Result<ContainerState, RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_docker_states() {
        assert_eq!(RuntimeStatus::parse("running"), RuntimeStatus::Running);
        assert_eq!(RuntimeStatus::parse("Exited\n"), RuntimeStatus::Exited);
        assert_eq!(
            RuntimeStatus::parse("hibernating"),
            RuntimeStatus::Other("hibernating".into())
        );
    }

    #[test]
    fn test_not_found_is_not_transient() {
        assert!(!RuntimeError::NotFound("x".into()).is_transient());
        assert!(RuntimeError::Engine("boom".into()).is_transient());
        let timeout = RuntimeError::Timeout {
            op: "create",
            after: Duration::from_millis(1500),
        };
        assert!(timeout.is_transient());
        assert_eq!(timeout.to_string(), "create timed out after 1500ms");
    }
}
