//! Durable tenant state.
//!
//! The store is the only place container records live. Record updates are
//! atomic read-modify-write cycles over a single tenant, so concurrent
//! operations on different tenants never clobber each other.

pub mod memory;
pub mod sqlite;

use crate::lifecycle::Operation;
use crate::tenant::{ContainerRecord, Tenant, TenantDraft};
use chrono::{DateTime, Utc};
use serde::Serialize;

pub use memory::MemoryTenantStore;
pub use sqlite::SqliteTenantStore;

/// Events kept per tenant; older ones are dropped on append.
pub const DEFAULT_EVENT_CAP: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("subdomain {0} is already in use")]
    SubdomainTaken(String),
    #[error("tenant {0} already exists")]
    TenantExists(String),
    #[error("unknown tenant {0}")]
    UnknownTenant(String),
    #[error("no available port in range {low}..={high}")]
    NoFreePort { low: u16, high: u16 },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    /// Recover a typed error raised inside a database closure.
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        match err.downcast::<StoreError>() {
            Ok(typed) => typed,
            Err(other) => StoreError::Backend(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOutcome {
    Success,
    Error,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// One completed operation, kept for the tenant's history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationEvent {
    pub tenant_id: String,
    pub operation: Operation,
    pub outcome: EventOutcome,
    pub message: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

pub trait TenantStore: Send + Sync {
    fn get(&self, tenant_id: &str) -> Result<Option<Tenant>, StoreError>;

    fn list(&self) -> Result<Vec<Tenant>, StoreError>;

    /// Insert a new tenant, assigning its host port in the same transaction.
    fn insert(&self, draft: TenantDraft) -> Result<Tenant, StoreError>;

    /// Apply `update` to the tenant's record and persist the result atomically.
    fn update_record(
        &self,
        tenant_id: &str,
        update: &mut dyn FnMut(&mut ContainerRecord),
    ) -> Result<ContainerRecord, StoreError>;

    /// Append an event, dropping the tenant's oldest events beyond the cap.
    fn append_event(&self, event: &OperationEvent) -> Result<(), StoreError>;

    /// Most recent events first.
    fn events(&self, tenant_id: &str, limit: usize) -> Result<Vec<OperationEvent>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_errors_survive_anyhow() {
        let err: anyhow::Error = StoreError::SubdomainTaken("acme".into()).into();
        assert!(matches!(
            StoreError::from_anyhow(err),
            StoreError::SubdomainTaken(s) if s == "acme"
        ));

        let err = anyhow::anyhow!("disk I/O error");
        assert!(matches!(StoreError::from_anyhow(err), StoreError::Backend(_)));
    }
}
