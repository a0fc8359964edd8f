/*
 * Copyright (C) 2025 The Polycloud Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::polycloud::common::error::{OpError, OpResult};

/// At most this many driver requests run concurrently per connection.
const CONNECTION_CONCURRENCY_CAP: usize = 10;
/// Submissions queued beyond the cap before new ones are rejected outright.
const CONNECTION_QUEUE_LIMIT: usize = 32;

/// Serializes operations on a single entity. Acquisition is non-reentrant:
/// a second acquire on a held key fails immediately with `Busy`.
#[derive(Clone, Default)]
pub struct EntityLockTable {
    held: Arc<Mutex<HashSet<String>>>,
}

impl EntityLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, key: &str) -> OpResult<EntityGuard> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| OpError::internal("entity lock table poisoned"))?;
        if !held.insert(key.to_string()) {
            return Err(OpError::Busy(format!(
                "another operation is in flight for '{}'",
                key
            )));
        }
        Ok(EntityGuard {
            held: Arc::clone(&self.held),
            key: key.to_string(),
        })
    }
}

pub struct EntityGuard {
    held: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for EntityGuard {
    fn drop(&mut self) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(&self.key);
        }
    }
}

pub fn resource_lock_key(ns_id: &str, kind: &str, id: &str) -> String {
    format!("{}/{}/{}", ns_id, kind, id)
}

pub fn vm_lock_key(ns_id: &str, mcis_id: &str, vm_id: &str) -> String {
    format!("{}/mcis/{}/vm/{}", ns_id, mcis_id, vm_id)
}

pub fn cluster_lock_key(ns_id: &str, cluster_id: &str) -> String {
    format!("{}/cluster/{}", ns_id, cluster_id)
}

struct ConnectionSlots {
    permits: Arc<Semaphore>,
    waiting: AtomicUsize,
}

/// Rate-limits driver traffic per connection to avoid provider throttling.
/// Saturated connections queue submissions up to a bound; overflow returns
/// `Busy` immediately rather than stacking unbounded waiters.
pub struct ConnectionLimiter {
    slots: Mutex<HashMap<String, Arc<ConnectionSlots>>>,
    cap: usize,
    queue_limit: usize,
}

impl ConnectionLimiter {
    pub fn new() -> Self {
        Self::with_limits(CONNECTION_CONCURRENCY_CAP, CONNECTION_QUEUE_LIMIT)
    }

    pub fn with_limits(cap: usize, queue_limit: usize) -> Self {
        ConnectionLimiter {
            slots: Mutex::new(HashMap::new()),
            cap,
            queue_limit,
        }
    }

    fn slots_for(&self, connection_name: &str) -> OpResult<Arc<ConnectionSlots>> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| OpError::internal("connection limiter poisoned"))?;
        Ok(Arc::clone(slots.entry(connection_name.to_string()).or_insert_with(
            || {
                Arc::new(ConnectionSlots {
                    permits: Arc::new(Semaphore::new(self.cap)),
                    waiting: AtomicUsize::new(0),
                })
            },
        )))
    }

    pub async fn acquire(&self, connection_name: &str) -> OpResult<ConnectionPermit> {
        let slots = self.slots_for(connection_name)?;

        if slots.permits.available_permits() == 0
            && slots.waiting.load(Ordering::SeqCst) >= self.queue_limit
        {
            return Err(OpError::Busy(format!(
                "connection '{}' request queue is full",
                connection_name
            )));
        }

        let _waiting = WaitingGuard::enter(&slots);
        let permit = Arc::clone(&slots.permits)
            .acquire_owned()
            .await
            .map_err(|_| OpError::internal("connection limiter semaphore closed"))?;

        Ok(ConnectionPermit { _permit: permit })
    }
}

impl Default for ConnectionLimiter {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

struct WaitingGuard {
    slots: Arc<ConnectionSlots>,
}

impl WaitingGuard {
    fn enter(slots: &Arc<ConnectionSlots>) -> Self {
        slots.waiting.fetch_add(1, Ordering::SeqCst);
        WaitingGuard {
            slots: Arc::clone(slots),
        }
    }
}

impl Drop for WaitingGuard {
    fn drop(&mut self) {
        self.slots.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_on_held_key_is_busy() {
        let table = EntityLockTable::new();
        let key = vm_lock_key("ns-a", "m1", "vm-1");
        let guard = table.try_acquire(&key).expect("first acquire");
        let second = table.try_acquire(&key);
        assert!(matches!(second, Err(OpError::Busy(_))));
        drop(guard);
        assert!(table.try_acquire(&key).is_ok());
    }

    #[test]
    fn distinct_keys_do_not_contend() {
        let table = EntityLockTable::new();
        let first = table.try_acquire(&vm_lock_key("ns-a", "m1", "vm-1"));
        let second = table.try_acquire(&vm_lock_key("ns-a", "m1", "vm-2"));
        assert!(first.is_ok());
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn limiter_caps_concurrency_per_connection() {
        let limiter = ConnectionLimiter::with_limits(2, 8);
        let first = limiter.acquire("aws-1").await.expect("permit 1");
        let _second = limiter.acquire("aws-1").await.expect("permit 2");

        // The cap applies per connection; a different connection is unaffected.
        let _other = limiter.acquire("gcp-1").await.expect("other connection");

        drop(first);
        let _third = limiter.acquire("aws-1").await.expect("freed permit");
    }

    #[tokio::test]
    async fn saturated_queue_returns_busy() {
        let limiter = ConnectionLimiter::with_limits(1, 0);
        let _held = limiter.acquire("azure-1").await.expect("permit");
        let overflow = limiter.acquire("azure-1").await;
        assert!(matches!(overflow, Err(OpError::Busy(_))));
    }
}
