use super::{OperationEvent, StoreError, TenantStore, DEFAULT_EVENT_CAP};
use crate::config::PortsConfig;
use crate::tenant::allocator::first_free;
use crate::tenant::{ContainerRecord, Tenant, TenantDraft};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};

#[derive(Default)]
struct Inner {
    tenants: BTreeMap<String, Tenant>,
    events: HashMap<String, VecDeque<OperationEvent>>,
}

/// Process-local store for tests and dry runs.
pub struct MemoryTenantStore {
    inner: Mutex<Inner>,
    ports: PortsConfig,
    event_cap: usize,
}

impl MemoryTenantStore {
    pub fn new(ports: PortsConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            ports,
            event_cap: DEFAULT_EVENT_CAP,
        }
    }

    pub fn with_event_cap(mut self, cap: usize) -> Self {
        self.event_cap = cap.max(1);
        self
    }
}

impl Default for MemoryTenantStore {
    fn default() -> Self {
        Self::new(PortsConfig::default())
    }
}

impl TenantStore for MemoryTenantStore {
    fn get(&self, tenant_id: &str) -> Result<Option<Tenant>, StoreError> {
        Ok(self.inner.lock().tenants.get(tenant_id).cloned())
    }

    fn list(&self) -> Result<Vec<Tenant>, StoreError> {
        let mut tenants: Vec<Tenant> = self.inner.lock().tenants.values().cloned().collect();
        tenants.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.tenant_id.cmp(&b.tenant_id)));
        Ok(tenants)
    }

    fn insert(&self, draft: TenantDraft) -> Result<Tenant, StoreError> {
        let mut inner = self.inner.lock();
        if inner.tenants.contains_key(&draft.tenant_id) {
            return Err(StoreError::TenantExists(draft.tenant_id));
        }
        if let Some(subdomain) = &draft.subdomain {
            if inner
                .tenants
                .values()
                .any(|t| t.subdomain.as_ref() == Some(subdomain))
            {
                return Err(StoreError::SubdomainTaken(subdomain.clone()));
            }
        }

        let used: Vec<u16> = inner.tenants.values().filter_map(|t| t.host_port).collect();
        let port = first_free(&used, &self.ports).ok_or(StoreError::NoFreePort {
            low: self.ports.range[0],
            high: self.ports.range[1],
        })?;
        let tenant = draft.into_tenant(Some(port), Utc::now());
        inner
            .tenants
            .insert(tenant.tenant_id.clone(), tenant.clone());
        Ok(tenant)
    }

    fn update_record(
        &self,
        tenant_id: &str,
        update: &mut dyn FnMut(&mut ContainerRecord),
    ) -> Result<ContainerRecord, StoreError> {
        let mut inner = self.inner.lock();
        let tenant = inner
            .tenants
            .get_mut(tenant_id)
            .ok_or_else(|| StoreError::UnknownTenant(tenant_id.to_string()))?;
        update(&mut tenant.record);
        Ok(tenant.record.clone())
    }

    fn append_event(&self, event: &OperationEvent) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let events = inner.events.entry(event.tenant_id.clone()).or_default();
        events.push_back(event.clone());
        while events.len() > self.event_cap {
            events.pop_front();
        }
        Ok(())
    }

    fn events(&self, tenant_id: &str, limit: usize) -> Result<Vec<OperationEvent>, StoreError> {
        Ok(self
            .inner
            .lock()
            .events
            .get(tenant_id)
            .map(|events| events.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
