//! Observable item registry.
//!
//! The registry is the single authoritative, ordered collection of items. It
//! is held in a `watch` channel: every transition is a read-modify-write
//! closure keyed by item id and applied against the latest snapshot, and
//! subscribers are notified only when a transition actually changed
//! something. Transitions for ids that are gone, or items that are no longer
//! in the expected state, are silent no-ops.

use crate::config::TargetFormat;
use crate::item::{ConvertedOutput, Item, ItemId, ItemState, ItemStatus};
use crate::preview::PreviewStore;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Aggregates derived from a registry snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub queued: usize,
    pub converting: usize,
    /// Items in `Success`
    pub ready: usize,
    /// Items in `Queued` or `Converting`
    pub pending: usize,
    pub failed: usize,
    pub has_success: bool,
    pub has_items: bool,
}

impl BatchSummary {
    pub fn from_items(items: &[Item]) -> Self {
        let mut summary = BatchSummary {
            total: items.len(),
            has_items: !items.is_empty(),
            ..Default::default()
        };
        for item in items {
            match item.status() {
                ItemStatus::Queued => summary.queued += 1,
                ItemStatus::Converting => summary.converting += 1,
                ItemStatus::Success => summary.ready += 1,
                ItemStatus::Failed => summary.failed += 1,
            }
        }
        summary.pending = summary.queued + summary.converting;
        summary.has_success = summary.ready > 0;
        summary
    }

    /// True when nothing is queued or converting
    pub fn is_idle(&self) -> bool {
        self.pending == 0
    }
}

/// Identity-keyed item registry that owns the preview handles of its items.
pub struct Registry {
    tx: watch::Sender<Vec<Item>>,
    previews: Arc<dyn PreviewStore>,
}

impl Registry {
    pub fn new(previews: Arc<dyn PreviewStore>) -> Self {
        let (tx, _rx) = watch::channel(Vec::new());
        Self { tx, previews }
    }

    /// Append a batch of queued items in one notification.
    pub fn insert_queued(&self, batch: Vec<Item>) {
        if batch.is_empty() {
            return;
        }
        self.tx.send_modify(|items| items.extend(batch));
    }

    /// `Queued -> Converting`. Returns false when the item is gone or not queued.
    pub fn mark_converting(&self, id: ItemId) -> bool {
        let applied = self.tx.send_if_modified(|items| match find_mut(items, id) {
            Some(item) if item.status() == ItemStatus::Queued => {
                item.transition(ItemState::Converting);
                true
            }
            _ => false,
        });
        if applied {
            debug!(%id, "item converting");
        }
        applied
    }

    /// `Converting -> Success`, allocating the preview for `bytes`.
    ///
    /// A preview allocated for an item that disappeared (or was failed by its
    /// deadline) in the meantime is revoked immediately. A failed allocation
    /// fails the item instead.
    pub fn complete(&self, id: ItemId, bytes: Vec<u8>, name: String, format: TargetFormat) -> bool {
        if self.status(id) != Some(ItemStatus::Converting) {
            debug!(%id, "discarding result for item that is no longer converting");
            return false;
        }

        let preview = match self.previews.allocate(&bytes, format) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(%id, error = %e, "failed to allocate preview");
                return self.fail(id, format!("Failed to create preview: {}", e));
            }
        };

        let output = ConvertedOutput {
            bytes: Bytes::from(bytes),
            name,
            preview: preview.clone(),
        };
        let applied = self.tx.send_if_modified(|items| match find_mut(items, id) {
            Some(item) if item.status() == ItemStatus::Converting => {
                item.transition(ItemState::Success(output));
                true
            }
            _ => false,
        });

        if applied {
            debug!(%id, "item succeeded");
        } else {
            self.previews.revoke(&preview);
        }
        applied
    }

    /// `Converting -> Failed`. Terminal states are never overwritten.
    pub fn fail(&self, id: ItemId, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let applied = self.tx.send_if_modified(|items| match find_mut(items, id) {
            Some(item) if item.status() == ItemStatus::Converting => {
                item.transition(ItemState::Failed(reason.clone()));
                true
            }
            _ => false,
        });
        if applied {
            debug!(%id, %reason, "item failed");
        }
        applied
    }

    /// Remove an item in any state and revoke its preview.
    pub fn remove(&self, id: ItemId) -> Option<Item> {
        let mut removed = None;
        self.tx.send_if_modified(|items| {
            match items.iter().position(|item| item.id == id) {
                Some(pos) => {
                    removed = Some(items.remove(pos));
                    true
                }
                None => false,
            }
        });

        if let Some(preview) = removed.as_ref().and_then(Item::preview) {
            self.previews.revoke(preview);
        }
        removed
    }

    /// Remove every item and revoke every preview. Returns the removed count.
    pub fn clear(&self) -> usize {
        self.drain().len()
    }

    /// Remove every item and revoke every preview. Returns the removed ids,
    /// so callers can release per-item resources for exactly those items.
    pub fn drain(&self) -> Vec<ItemId> {
        let mut drained = Vec::new();
        self.tx.send_if_modified(|items| {
            drained = std::mem::take(items);
            !drained.is_empty()
        });
        self.revoke_all(&drained);
        drained.iter().map(|item| item.id).collect()
    }

    fn revoke_all(&self, items: &[Item]) {
        for preview in items.iter().filter_map(Item::preview) {
            self.previews.revoke(preview);
        }
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.tx.borrow().iter().any(|item| item.id == id)
    }

    pub fn get(&self, id: ItemId) -> Option<Item> {
        self.tx.borrow().iter().find(|item| item.id == id).cloned()
    }

    pub fn status(&self, id: ItemId) -> Option<ItemStatus> {
        self.tx
            .borrow()
            .iter()
            .find(|item| item.id == id)
            .map(Item::status)
    }

    /// Receiver notified after every effective transition
    pub fn subscribe(&self) -> watch::Receiver<Vec<Item>> {
        self.tx.subscribe()
    }

    /// Clone of the current ordered item list
    pub fn snapshot(&self) -> Vec<Item> {
        self.tx.borrow().clone()
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary::from_items(&self.tx.borrow())
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.clear();
    }
}

fn find_mut(items: &mut [Item], id: ItemId) -> Option<&mut Item> {
    items.iter_mut().find(|item| item.id == id)
}
