use crate::error::LifecycleError;
use crate::lifecycle::ReconciliationEngine;
use crate::tenant::Tenant;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Tally of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub async fn run(
    engine: Arc<ReconciliationEngine>,
    every: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = sweep_once(&engine).await;
                debug!(?report, "sync_sweeper: sweep finished");
            }
            _ = shutdown_rx.recv() => {
                info!("sync_sweeper: shutdown signal received");
                break;
            }
        }
    }
}

/// Tenants that could own a container.
fn needs_sync(tenant: &Tenant) -> bool {
    tenant.subdomain.is_some() || !tenant.record.is_absent()
}

/// Sync every tenant once. Tenants with an operation in flight are skipped,
/// and syncs that change nothing are not added to the tenant's history.
pub async fn sweep_once(engine: &ReconciliationEngine) -> SweepReport {
    let tenants = match engine.store().list() {
        Ok(t) => t,
        Err(e) => {
            error!("sync_sweeper: failed to list tenants: {}", e);
            return SweepReport::default();
        }
    };

    let mut report = SweepReport::default();
    for tenant in tenants.iter().filter(|t| needs_sync(t)) {
        match engine.sweep_sync(&tenant.tenant_id).await {
            Ok(outcome) => {
                if !outcome.record.same_state(&tenant.record) {
                    info!(
                        tenant_id = %tenant.tenant_id,
                        from = %tenant.record.status,
                        to = %outcome.record.status,
                        "sync_sweeper: record corrected"
                    );
                }
                report.synced += 1;
            }
            Err(LifecycleError::Conflict { .. }) => report.skipped += 1,
            Err(e) => {
                warn!(tenant_id = %tenant.tenant_id, "sync_sweeper: sync failed: {}", e);
                report.failed += 1;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::BackgroundCoordinator;
    use crate::config::PlatformConfig;
    use crate::runtime::{InMemoryRuntime, RuntimeStatus};
    use crate::store::{MemoryTenantStore, TenantStore};
    use crate::tenant::{register, ContainerStatus, NewTenant};

    fn setup() -> (Arc<InMemoryRuntime>, Arc<ReconciliationEngine>) {
        let runtime = Arc::new(InMemoryRuntime::new());
        let store = Arc::new(MemoryTenantStore::default());
        for (id, sub) in [("t1", Some("alpha")), ("t2", Some("beta")), ("t3", None)] {
            register(
                store.as_ref(),
                &PlatformConfig::default(),
                NewTenant {
                    tenant_id: Some(id.into()),
                    subdomain: sub.map(str::to_string),
                    ..NewTenant::default()
                },
            )
            .unwrap();
        }
        let engine = Arc::new(ReconciliationEngine::new(runtime.clone(), store));
        (runtime, engine)
    }

    #[tokio::test]
    async fn test_sweep_syncs_tenants_with_subdomain() {
        let (runtime, engine) = setup();
        runtime.seed("alpha", RuntimeStatus::Running);

        let report = sweep_once(&engine).await;
        assert_eq!(
            report,
            SweepReport {
                synced: 2,
                skipped: 0,
                failed: 0
            }
        );
        let t1 = engine.store().get("t1").unwrap().unwrap();
        assert_eq!(t1.record.status, ContainerStatus::Running);
        let t3 = engine.store().get("t3").unwrap().unwrap();
        assert!(t3.record.last_synced_at.is_none());
    }

    #[tokio::test]
    async fn test_sweep_skips_locked_tenant() {
        let (_runtime, engine) = setup();
        let _held = engine.locks().acquire_guard("t1").unwrap();
        let report = sweep_once(&engine).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.synced, 1);
    }

    #[tokio::test]
    async fn test_unchanged_sweeps_leave_no_history() {
        let (runtime, engine) = setup();
        let id = runtime.seed("alpha", RuntimeStatus::Running);
        for _ in 0..50 {
            sweep_once(&engine).await;
        }
        // only the first sweep changed t1's record
        let events = engine.history("t1", 100).unwrap();
        assert_eq!(events.len(), 1);
        assert!(engine.history("t2", 100).unwrap().is_empty());

        runtime.set_status(&id, RuntimeStatus::Exited);
        sweep_once(&engine).await;
        sweep_once(&engine).await;
        let events = engine.history("t1", 100).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].message.as_deref(),
            Some("Container status synced: stopped.")
        );
    }

    #[tokio::test]
    async fn test_caller_sync_is_always_recorded() {
        let (_runtime, engine) = setup();
        engine.sync("t2").await.unwrap();
        engine.sync("t2").await.unwrap();
        assert_eq!(engine.history("t2", 10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_lets_in_flight_sweep_finish() {
        let (runtime, engine) = setup();
        runtime.seed("alpha", RuntimeStatus::Running);
        runtime.set_latency(Duration::from_millis(40));

        let coordinator = BackgroundCoordinator::new();
        let sweep_engine = engine.clone();
        coordinator.spawn("sync_sweeper", move |rx| {
            run(sweep_engine, Duration::from_secs(3600), rx)
        });
        // first tick fires at once; the sweep is now inside an inspect call
        tokio::time::sleep(Duration::from_millis(10)).await;
        coordinator.shutdown().await;

        let t1 = engine.store().get("t1").unwrap().unwrap();
        assert_eq!(t1.record.status, ContainerStatus::Running);
        assert!(!engine.locks().is_held("t1"));
        assert!(!engine.locks().is_held("t2"));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (_runtime, engine) = setup();
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(run(engine, Duration::from_millis(5), rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }
}
