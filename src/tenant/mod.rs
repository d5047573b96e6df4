pub mod allocator;
pub mod registry;
pub mod subdomain;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use registry::{register, NewTenant};

/// Container status as recorded for a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    #[default]
    Absent,
    Creating,
    Running,
    Stopped,
    Error,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "absent" => Some(Self::Absent),
            "creating" => Some(Self::Creating),
            "running" => Some(Self::Running),
            "stopped" => Some(Self::Stopped),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the store knows about a tenant's container.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub container_id: Option<String>,
    pub status: ContainerStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl ContainerRecord {
    /// Record for a container confirmed absent at `at`.
    pub fn absent(at: DateTime<Utc>) -> Self {
        Self {
            last_synced_at: Some(at),
            ..Self::default()
        }
    }

    pub fn is_absent(&self) -> bool {
        self.status == ContainerStatus::Absent
    }

    /// Compare everything except the sync timestamp.
    pub fn same_state(&self, other: &ContainerRecord) -> bool {
        self.container_id == other.container_id
            && self.status == other.status
            && self.last_error == other.last_error
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub memory_mb: u32,
    pub cpu_limit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tenant {
    pub tenant_id: String,
    /// Also the container name. Unique across tenants.
    pub subdomain: Option<String>,
    pub desired_image: String,
    pub resource_limits: ResourceLimits,
    pub plan: String,
    pub host_port: Option<u16>,
    pub created_at: DateTime<Utc>,
    pub record: ContainerRecord,
}

impl Tenant {
    /// Containers are named after the tenant's subdomain, so names never
    /// overlap between tenants.
    pub fn container_name(&self) -> Option<&str> {
        self.subdomain.as_deref()
    }

    /// References under which the tenant's container may exist, recorded id
    /// first and without duplicates.
    pub fn container_refs(&self) -> Vec<&str> {
        let mut refs = Vec::with_capacity(2);
        if let Some(id) = self.record.container_id.as_deref() {
            refs.push(id);
        }
        if let Some(name) = self.container_name() {
            if !refs.contains(&name) {
                refs.push(name);
            }
        }
        refs
    }

    pub fn access_url(&self, scheme: &str, domain: &str) -> Option<String> {
        let subdomain = self.subdomain.as_deref()?;
        Some(match self.host_port {
            Some(port) => format!("{}://{}.{}:{}", scheme, subdomain, domain, port),
            None => format!("{}://{}.{}", scheme, subdomain, domain),
        })
    }
}

/// Validated registration, ready for the store. The store assigns the port.
#[derive(Debug, Clone)]
pub struct TenantDraft {
    pub tenant_id: String,
    pub subdomain: Option<String>,
    pub desired_image: String,
    pub resource_limits: ResourceLimits,
    pub plan: String,
}

impl TenantDraft {
    pub fn into_tenant(self, host_port: Option<u16>, created_at: DateTime<Utc>) -> Tenant {
        Tenant {
            tenant_id: self.tenant_id,
            subdomain: self.subdomain,
            desired_image: self.desired_image,
            resource_limits: self.resource_limits,
            plan: self.plan,
            host_port,
            created_at,
            record: ContainerRecord::default(),
        }
    }
}

/// Read-only projection consumed by the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TenantView {
    pub tenant_id: String,
    pub subdomain: Option<String>,
    pub container_name: Option<String>,
    pub container_status: ContainerStatus,
    pub container_id: Option<String>,
    pub access_url: Option<String>,
    pub last_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub plan: String,
}

impl TenantView {
    pub fn project(tenant: &Tenant, scheme: &str, domain: &str) -> Self {
        Self {
            tenant_id: tenant.tenant_id.clone(),
            subdomain: tenant.subdomain.clone(),
            container_name: tenant.container_name().map(str::to_string),
            container_status: tenant.record.status,
            container_id: tenant.record.container_id.clone(),
            access_url: tenant.access_url(scheme, domain),
            last_error: tenant.record.last_error.clone(),
            last_synced_at: tenant.record.last_synced_at,
            plan: tenant.plan.clone(),
        }
    }
}
