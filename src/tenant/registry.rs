use super::{subdomain, ResourceLimits, Tenant, TenantDraft};
use crate::config::PlatformConfig;
use crate::error::LifecycleError;
use crate::store::{StoreError, TenantStore};
use serde::Deserialize;

/// Registration request. Missing fields fall back to configuration defaults.
///
/// The container name is not part of the request: it is always the
/// subdomain, so one tenant can never address another tenant's container.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewTenant {
    pub tenant_id: Option<String>,
    pub subdomain: Option<String>,
    pub plan: Option<String>,
    pub image: Option<String>,
}

/// Validate `request` and insert the tenant, allocating its host port.
pub fn register(
    store: &dyn TenantStore,
    config: &PlatformConfig,
    request: NewTenant,
) -> Result<Tenant, LifecycleError> {
    let subdomain = request
        .subdomain
        .as_deref()
        .map(subdomain::validate)
        .transpose()?;

    let plan = request.plan.unwrap_or_else(|| "basic".to_string());
    let limits = config.plan(&plan).ok_or_else(|| {
        LifecycleError::Validation(format!("Plan '{}' does not exist.", plan))
    })?;

    let tenant_id = match request.tenant_id {
        Some(id) if id.trim().is_empty() => {
            return Err(LifecycleError::Validation(
                "Tenant id must not be empty.".into(),
            ))
        }
        Some(id) => id.trim().to_string(),
        None => uuid::Uuid::new_v4().to_string(),
    };

    let draft = TenantDraft {
        tenant_id,
        subdomain,
        desired_image: request
            .image
            .filter(|i| !i.trim().is_empty())
            .unwrap_or_else(|| config.runtime.default_image.clone()),
        resource_limits: ResourceLimits {
            memory_mb: limits.memory_mb,
            cpu_limit: limits.cpu_limit,
        },
        plan,
    };

    let tenant = store.insert(draft).map_err(|e| match e {
        StoreError::SubdomainTaken(s) => {
            LifecycleError::Validation(format!("Subdomain '{}' is already in use.", s))
        }
        StoreError::TenantExists(id) => {
            LifecycleError::Validation(format!("Tenant {} already exists.", id))
        }
        StoreError::NoFreePort { .. } => {
            LifecycleError::Validation("No host port is available for a new tenant.".into())
        }
        other => LifecycleError::Store(other),
    })?;

    tracing::info!(
        tenant_id = %tenant.tenant_id,
        subdomain = ?tenant.subdomain,
        host_port = ?tenant.host_port,
        plan = %tenant.plan,
        "registered tenant"
    );
    Ok(tenant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::MemoryTenantStore;

    fn request(subdomain: &str) -> NewTenant {
        NewTenant {
            subdomain: Some(subdomain.into()),
            ..NewTenant::default()
        }
    }

    #[test]
    fn test_registers_with_plan_limits_and_port() {
        let store = MemoryTenantStore::default();
        let cfg = PlatformConfig::default();
        let t = register(
            &store,
            &cfg,
            NewTenant {
                plan: Some("pro".into()),
                ..request("Acme Shop")
            },
        )
        .unwrap();
        assert_eq!(t.subdomain.as_deref(), Some("acmeshop"));
        assert_eq!(t.container_name(), Some("acmeshop"));
        assert_eq!(t.resource_limits.memory_mb, 1024);
        assert_eq!(t.desired_image, cfg.runtime.default_image);
        assert_eq!(t.host_port, Some(8001));
        assert!(uuid::Uuid::parse_str(&t.tenant_id).is_ok());
    }

    #[test]
    fn test_rejects_short_subdomain() {
        let store = MemoryTenantStore::default();
        let err = register(&store, &PlatformConfig::default(), request("a!")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_duplicate_subdomain_after_normalization() {
        let store = MemoryTenantStore::default();
        let cfg = PlatformConfig::default();
        register(&store, &cfg, request("acme")).unwrap();
        let err = register(&store, &cfg, request("ACME")).unwrap_err();
        assert_eq!(err.user_message(), "Subdomain 'acme' is already in use.");
    }

    #[test]
    fn test_rejects_unknown_plan() {
        let store = MemoryTenantStore::default();
        let err = register(
            &store,
            &PlatformConfig::default(),
            NewTenant {
                plan: Some("platinum".into()),
                ..request("acme")
            },
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_subdomain_is_optional() {
        let store = MemoryTenantStore::default();
        let t = register(
            &store,
            &PlatformConfig::default(),
            NewTenant {
                tenant_id: Some("t1".into()),
                ..NewTenant::default()
            },
        )
        .unwrap();
        assert_eq!(t.tenant_id, "t1");
        assert!(t.subdomain.is_none());
        assert!(t.container_name().is_none());
    }

    #[test]
    fn test_request_cannot_name_a_container() {
        let parsed = serde_json::from_str::<NewTenant>(
            r#"{"subdomain":"bravo","container_name":"alpha"}"#,
        );
        assert!(parsed.is_err());

        let store = MemoryTenantStore::default();
        let cfg = PlatformConfig::default();
        let a = register(&store, &cfg, request("alpha")).unwrap();
        let b = register(&store, &cfg, request("bravo")).unwrap();
        assert!(!b.container_refs().iter().any(|r| a.container_refs().contains(r)));
    }
}
