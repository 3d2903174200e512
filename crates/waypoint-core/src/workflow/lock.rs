//! In-process instance locks.
//!
//! Keeps the host from handing the same workflow instance to two workers at
//! once, and lets the controller wait out a running worker before writing a
//! status change. Single-node only.

use std::pin::pin;
use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct InstanceLocks {
    held: DashSet<String>,
    released: Notify,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `id`, or `None` if someone else holds it.
    pub fn try_acquire(self: &Arc<Self>, id: &str) -> Option<InstanceLockGuard> {
        if self.held.insert(id.to_string()) {
            Some(InstanceLockGuard {
                locks: Arc::clone(self),
                id: id.to_string(),
            })
        } else {
            None
        }
    }

    /// Wait until the lock for `id` is free, then take it.
    pub async fn acquire(self: &Arc<Self>, id: &str) -> InstanceLockGuard {
        loop {
            // Register for the wakeup before checking, so a release between
            // the check and the await is not missed.
            let mut released = pin!(self.released.notified());
            released.as_mut().enable();
            if let Some(guard) = self.try_acquire(id) {
                return guard;
            }
            released.await;
        }
    }

    pub fn is_locked(&self, id: &str) -> bool {
        self.held.contains(id)
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}

/// Releases the instance lock on drop.
#[derive(Debug)]
pub struct InstanceLockGuard {
    locks: Arc<InstanceLocks>,
    id: String,
}

impl InstanceLockGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for InstanceLockGuard {
    fn drop(&mut self) {
        self.locks.held.remove(&self.id);
        self.locks.released.notify_waiters();
    }
}
