//! Per-tenant operation locks.
//!
//! Acquisition never blocks: a second request for a tenant that already has
//! an operation in flight is refused immediately. Locks live only in this
//! process, so a crash drops all of them and the next `sync` repairs whatever
//! state the interrupted operation left behind.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct OperationLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl OperationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `tenant_id`. Returns `false` if it is already held.
    pub fn try_acquire(&self, tenant_id: &str) -> bool {
        self.held.lock().insert(tenant_id.to_string())
    }

    pub fn release(&self, tenant_id: &str) {
        self.held.lock().remove(tenant_id);
    }

    /// Like [`try_acquire`](Self::try_acquire), but the lock is released when
    /// the returned guard is dropped.
    pub fn acquire_guard(&self, tenant_id: &str) -> Option<OperationGuard> {
        if !self.try_acquire(tenant_id) {
            return None;
        }
        Some(OperationGuard {
            locks: self.clone(),
            tenant_id: tenant_id.to_string(),
        })
    }

    pub fn is_held(&self, tenant_id: &str) -> bool {
        self.held.lock().contains(tenant_id)
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }
}

pub struct OperationGuard {
    locks: OperationLocks,
    tenant_id: String,
}

impl OperationGuard {
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.locks.release(&self.tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_tenant_is_exclusive() {
        let locks = OperationLocks::new();
        assert!(locks.try_acquire("t1"));
        assert!(!locks.try_acquire("t1"));
        locks.release("t1");
        assert!(locks.try_acquire("t1"));
    }

    #[test]
    fn test_different_tenants_do_not_contend() {
        let locks = OperationLocks::new();
        assert!(locks.try_acquire("t1"));
        assert!(locks.try_acquire("t2"));
        assert_eq!(locks.held_count(), 2);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let locks = OperationLocks::new();
        {
            let guard = locks.acquire_guard("t1").unwrap();
            assert_eq!(guard.tenant_id(), "t1");
            assert!(locks.acquire_guard("t1").is_none());
        }
        assert!(!locks.is_held("t1"));
    }

    #[test]
    fn test_guard_releases_on_panic() {
        let locks = OperationLocks::new();
        let cloned = locks.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = cloned.acquire_guard("t1").unwrap();
            panic!("operation blew up");
        }));
        assert!(result.is_err());
        assert!(!locks.is_held("t1"));
    }

    #[test]
    fn test_release_of_unheld_lock_is_noop() {
        let locks = OperationLocks::new();
        locks.release("nobody");
        assert_eq!(locks.held_count(), 0);
    }

    #[test]
    fn test_concurrent_acquire_has_single_winner() {
        let locks = OperationLocks::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                std::thread::spawn(move || locks.try_acquire("t1"))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
