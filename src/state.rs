use crate::config::PlatformConfig;
use crate::lifecycle::ReconciliationEngine;
use crate::store::TenantStore;
use std::sync::Arc;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: PlatformConfig,
    pub engine: Arc<ReconciliationEngine>,
}

impl AppState {
    pub fn new(config: PlatformConfig, engine: Arc<ReconciliationEngine>) -> SharedState {
        Arc::new(Self { config, engine })
    }

    pub fn store(&self) -> &dyn TenantStore {
        self.engine.store().as_ref()
    }
}
