//! Per-instance exclusive locks.
//!
//! Every mutation of an instance runs while holding its slot's mutex. Slots
//! are created lazily and dropped when the last guard or waiter lets go, so
//! failed operations on unknown ids leave nothing behind.

use crate::error::{EngineError, EngineResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

struct InstanceSlot {
    lock: Arc<tokio::sync::Mutex<()>>,
    /// Raised by `delete` so an in-flight run stops at the next token boundary.
    cancel: AtomicBool,
}

type SlotMap = Arc<Mutex<HashMap<Uuid, Arc<InstanceSlot>>>>;

pub struct InstanceLocks {
    slots: SlotMap,
    timeout: Duration,
}

/// Held for the duration of one engine operation.
pub struct InstanceGuard {
    _guard: OwnedMutexGuard<()>,
    slot: Arc<InstanceSlot>,
    slots: SlotMap,
    instance_id: Uuid,
}

impl InstanceGuard {
    pub fn cancel_flag(&self) -> &AtomicBool {
        &self.slot.cancel
    }

    pub fn clear_cancel(&self) {
        self.slot.cancel.store(false, Ordering::Release);
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        release_idle(&self.slots, self.instance_id, &self.slot);
    }
}

/// Remove the slot if `held` is the only handle left outside the map.
fn release_idle(slots: &SlotMap, instance_id: Uuid, held: &Arc<InstanceSlot>) {
    let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
    let idle = slots
        .get(&instance_id)
        .is_some_and(|slot| Arc::ptr_eq(slot, held) && Arc::strong_count(held) == 2);
    if idle {
        slots.remove(&instance_id);
    }
}

impl InstanceLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    fn slot(&self, instance_id: Uuid) -> Arc<InstanceSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(instance_id)
            .or_insert_with(|| {
                Arc::new(InstanceSlot {
                    lock: Arc::new(tokio::sync::Mutex::new(())),
                    cancel: AtomicBool::new(false),
                })
            })
            .clone()
    }

    fn guard(
        &self,
        instance_id: Uuid,
        slot: Arc<InstanceSlot>,
        guard: OwnedMutexGuard<()>,
    ) -> InstanceGuard {
        InstanceGuard {
            _guard: guard,
            slot,
            slots: Arc::clone(&self.slots),
            instance_id,
        }
    }

    /// Wait up to the configured timeout, then fail with `InstanceBusy`.
    pub async fn acquire(&self, instance_id: Uuid) -> EngineResult<InstanceGuard> {
        let slot = self.slot(instance_id);
        match tokio::time::timeout(self.timeout, slot.lock.clone().lock_owned()).await {
            Ok(guard) => Ok(self.guard(instance_id, slot, guard)),
            Err(_) => {
                release_idle(&self.slots, instance_id, &slot);
                tracing::warn!("InstanceLocks: {} busy after {:?}", instance_id, self.timeout);
                Err(EngineError::InstanceBusy {
                    instance_id,
                    waited_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Raise the cancellation flag, then wait for the lock without a timeout.
    /// The current holder stops at its next token boundary.
    pub async fn acquire_for_cancel(&self, instance_id: Uuid) -> InstanceGuard {
        let slot = self.slot(instance_id);
        slot.cancel.store(true, Ordering::Release);
        let guard = slot.lock.clone().lock_owned().await;
        self.guard(instance_id, slot, guard)
    }

    /// Number of instances with a live guard or waiter.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_acquire_times_out() {
        let locks = InstanceLocks::new(Duration::from_millis(20));
        let id = Uuid::now_v7();

        let held = locks.acquire(id).await.unwrap();
        match locks.acquire(id).await {
            Err(EngineError::InstanceBusy { instance_id, waited_ms }) => {
                assert_eq!(instance_id, id);
                assert_eq!(waited_ms, 20);
            }
            other => panic!("expected InstanceBusy, got {:?}", other.err()),
        }

        // Other instances are independent
        assert!(locks.acquire(Uuid::now_v7()).await.is_ok());

        drop(held);
        assert!(locks.acquire(id).await.is_ok());
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_slot_kept_while_waiter_queued() {
        let locks = Arc::new(InstanceLocks::new(Duration::from_secs(5)));
        let id = Uuid::now_v7();
        let held = locks.acquire(id).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire(id).await.map(|_| ()) })
        };
        tokio::task::yield_now().await;
        drop(held);

        waiter.await.unwrap().unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_flag_visible_to_holder() {
        let locks = Arc::new(InstanceLocks::new(Duration::from_millis(20)));
        let id = Uuid::now_v7();
        let held = locks.acquire(id).await.unwrap();
        assert!(!held.cancel_flag().load(Ordering::Acquire));

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire_for_cancel(id).await })
        };
        while !held.cancel_flag().load(Ordering::Acquire) {
            tokio::task::yield_now().await;
        }
        drop(held);

        let guard = waiter.await.unwrap();
        assert!(guard.cancel_flag().load(Ordering::Acquire));
        guard.clear_cancel();
        assert!(!guard.cancel_flag().load(Ordering::Acquire));
        drop(guard);
        assert!(locks.is_empty());
    }
}
