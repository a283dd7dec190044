//! Entity registry
//!
//! Holds the live entity set as a copy-on-write snapshot: readers clone an
//! `Arc` of the current list and iterate it without holding a lock, so an
//! add or remove never disturbs a broadcast in progress. Each mutation copies
//! the list, which is linear in the entity count; a satellite carries about a
//! dozen entities.
//!
//! Every registration gets its own id, so an entity removed and replaced
//! under the same key is a different registration to the state forwarder.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::entities::Entity;
use crate::proto::{ListEntitiesDoneResponse, ProtocolMessage};
use crate::{Error, Result};

#[derive(Clone)]
struct Registration {
    id: u64,
    entity: Arc<dyn Entity>,
}

type Entries = Arc<Vec<Registration>>;

/// Ordered, concurrently mutable set of entities
pub struct EntityRegistry {
    entries: RwLock<Entries>,
    next_id: AtomicU64,
    membership: watch::Sender<u64>,
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityRegistry {
    #[must_use]
    pub fn new() -> Self {
        let (membership, _) = watch::channel(0);
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(0),
            membership,
        }
    }

    fn entries(&self) -> Entries {
        self.entries
            .read()
            .map(|guard| Arc::clone(&guard))
            .unwrap_or_else(|poisoned| Arc::clone(&poisoned.into_inner()))
    }

    /// Current entities, in insertion order
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<dyn Entity>> {
        self.entries()
            .iter()
            .map(|entry| Arc::clone(&entry.entity))
            .collect()
    }

    /// Whether an entity is registered under `key`
    #[must_use]
    pub fn contains(&self, key: u32) -> bool {
        self.entries().iter().any(|entry| entry.entity.key() == key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn update(&self, f: impl FnOnce(&mut Vec<Registration>) -> Result<bool>) -> Result<bool> {
        let mut guard = self
            .entries
            .write()
            .map_err(|_| Error::Entity("registry lock poisoned".to_string()))?;
        let mut next = guard.as_ref().clone();
        let changed = f(&mut next)?;
        if changed {
            *guard = Arc::new(next);
            drop(guard);
            self.membership.send_modify(|generation| *generation += 1);
        }
        Ok(changed)
    }

    /// Register an entity at the end of the list
    ///
    /// # Errors
    ///
    /// Returns error if another entity already uses the same key
    pub fn add(&self, entity: Arc<dyn Entity>) -> Result<()> {
        let key = entity.key();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.update(|entries| {
            if entries.iter().any(|e| e.entity.key() == key) {
                return Err(Error::Entity(format!("duplicate entity key {key}")));
            }
            entries.push(Registration { id, entity });
            Ok(true)
        })?;
        tracing::debug!(key, "entity registered");
        Ok(())
    }

    /// Unregister the entity with `key`; returns whether one was removed
    pub fn remove(&self, key: u32) -> bool {
        let removed = self
            .update(|entries| {
                let before = entries.len();
                entries.retain(|e| e.entity.key() != key);
                Ok(entries.len() != before)
            })
            .unwrap_or(false);
        if removed {
            tracing::debug!(key, "entity removed");
        }
        removed
    }

    /// Descriptors of every entity followed by the done marker
    #[must_use]
    pub fn list_entities(&self) -> Vec<ProtocolMessage> {
        self.entries()
            .iter()
            .map(|entry| entry.entity.describe())
            .chain(std::iter::once(ListEntitiesDoneResponse {}.into()))
            .collect()
    }

    /// Offer `message` to every entity and collect their responses
    ///
    /// A handler returning an error is logged and skipped; the remaining
    /// entities still see the message. Panics are caught the same way only
    /// where they unwind: the release profile aborts on panic.
    pub async fn dispatch(&self, message: &ProtocolMessage) -> Vec<ProtocolMessage> {
        let mut responses = Vec::new();
        for entry in self.entries().iter() {
            let entity = &entry.entity;
            match AssertUnwindSafe(entity.handle(message)).catch_unwind().await {
                Ok(Ok(mut replies)) => responses.append(&mut replies),
                Ok(Err(e)) => {
                    tracing::warn!(key = entity.key(), error = %e, "entity handler failed");
                }
                Err(_) => {
                    tracing::error!(key = entity.key(), "entity handler panicked");
                }
            }
        }
        responses
    }

    /// Forward every entity's state updates into `out` until cancelled
    ///
    /// One task per registration keeps each entity's updates in order.
    /// Entities added later are picked up, removed ones stop forwarding.
    pub async fn forward_states(&self, out: mpsc::Sender<ProtocolMessage>, cancel: CancellationToken) {
        let mut membership = self.membership.subscribe();
        let mut tasks = JoinSet::new();
        let mut running: HashMap<u64, AbortHandle> = HashMap::new();

        loop {
            membership.borrow_and_update();
            let entries = self.entries();

            running.retain(|id, handle| {
                let keep = entries.iter().any(|e| e.id == *id);
                if !keep {
                    handle.abort();
                }
                keep
            });

            for entry in entries.iter() {
                if running.contains_key(&entry.id) {
                    continue;
                }
                let mut updates = entry.entity.subscribe();
                let out = out.clone();
                let handle = tasks.spawn(async move {
                    while let Some(update) = updates.next().await {
                        if out.send(update).await.is_err() {
                            break;
                        }
                    }
                });
                running.insert(entry.id, handle);
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = out.closed() => break,
                changed = membership.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!("entity state stream panicked");
                        }
                    }
                }
            }
        }

        tasks.abort_all();
        tracing::debug!("state forwarding stopped");
    }
}
