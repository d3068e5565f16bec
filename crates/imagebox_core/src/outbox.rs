//! Outbox bookkeeping policy.
//!
//! The manager sits between the transfer store and the delivery paths:
//! the push engine drains entries through it, and the poll service deletes
//! entries through it on behalf of pulling peers. Both paths converge on
//! [`OutboxManager::acknowledge_delivered`], which is where transaction
//! completion is detected and announced.

use std::sync::Arc;

use tracing::{debug, info};

use imagebox_protocol::{
    BoxId, ImageId, ImageTagValues, OutboxEntry, TagValue, TransactionId,
};

use crate::error::StoreResult;
use crate::events::{BoxEvent, EventFeed};
use crate::store::TransferStore;

/// Creates, advances, and removes outbox entries.
pub struct OutboxManager {
    store: Arc<TransferStore>,
    feed: Arc<EventFeed>,
}

impl OutboxManager {
    /// Creates a manager over the shared store and event feed.
    pub fn new(store: Arc<TransferStore>, feed: Arc<EventFeed>) -> Self {
        Self { store, feed }
    }

    /// Queues a transfer of the given images to a peer, in the supplied
    /// order. Mints and returns the transaction id. All-or-nothing.
    pub fn enqueue_transfer(
        &self,
        box_id: BoxId,
        images: &[ImageTagValues],
    ) -> StoreResult<TransactionId> {
        let transaction_id = TransactionId::generate();
        let rows = self.store.insert_transaction(box_id, transaction_id, images)?;
        info!(
            "queued {} for {}: {} images",
            transaction_id,
            box_id,
            rows.len()
        );
        Ok(transaction_id)
    }

    /// Returns the entry the given box should attempt next, if any.
    pub fn next_pending(&self, box_id: BoxId) -> Option<OutboxEntry> {
        self.store.next_pending(box_id)
    }

    /// Records a confirmed transfer: the row is deleted, and when it was
    /// the last sequence of its transaction a transfer-complete event is
    /// emitted and the transaction's tag overrides are dropped.
    ///
    /// Idempotent: acknowledging an already-removed entry does nothing.
    pub fn acknowledge_delivered(&self, entry: &OutboxEntry) {
        if self.store.remove_outbox_entry(entry.id).is_none() {
            return;
        }
        debug!(
            "delivered {} {}/{} for {}",
            entry.transaction_id, entry.sequence_number, entry.total_image_count, entry.remote_box_id
        );

        if entry.is_last() {
            self.store.remove_transaction_tag_values(entry.transaction_id);
            if let Some(peer) = self.store.box_by_id(entry.remote_box_id) {
                info!(
                    "transfer {} to {} complete: {} images",
                    entry.transaction_id, peer.name, entry.total_image_count
                );
                self.feed.emit(BoxEvent::TransferCompleted {
                    box_id: peer.id,
                    box_name: peer.name,
                    transaction_id: entry.transaction_id,
                    image_count: entry.total_image_count,
                });
            }
        }
    }

    /// Clears the failed marker, making the transaction eligible for
    /// delivery again. Doubles as the operator reset for hard-failed
    /// transactions. Returns the number of rows touched.
    pub fn mark_transaction_waiting(&self, box_id: BoxId, transaction_id: TransactionId) -> usize {
        self.store.set_transaction_failed(box_id, transaction_id, false)
    }

    /// Sets the failed marker on all remaining rows of a transaction.
    /// Rows are never deleted on failure; the images stay queued for
    /// operator-driven resend. Returns the number of rows touched.
    pub fn mark_transaction_failed(&self, box_id: BoxId, transaction_id: TransactionId) -> usize {
        self.store.set_transaction_failed(box_id, transaction_id, true)
    }

    /// Removes one entry by row id, without completion bookkeeping.
    pub fn remove_entry(&self, entry_id: u64) -> Option<OutboxEntry> {
        self.store.remove_outbox_entry(entry_id)
    }

    /// Looks up one entry by its transfer coordinates.
    pub fn entry_by(
        &self,
        box_id: BoxId,
        transaction_id: TransactionId,
        sequence_number: u32,
    ) -> Option<OutboxEntry> {
        self.store.outbox_entry(box_id, transaction_id, sequence_number)
    }

    /// Returns every queued entry, across all boxes.
    pub fn entries(&self) -> Vec<OutboxEntry> {
        self.store.list_outbox()
    }

    /// Returns the tag overrides for one image of a transaction.
    pub fn tag_values_for(&self, transaction_id: TransactionId, image_id: ImageId) -> Vec<TagValue> {
        self.store.tag_values_for(transaction_id, image_id)
    }
}
