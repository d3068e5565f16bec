//! Inbox bookkeeping policy.

use std::sync::Arc;

use tracing::info;

use imagebox_protocol::{BoxId, InboxEntry, TransactionId};

use crate::error::StoreResult;
use crate::events::{BoxEvent, EventFeed};
use crate::store::TransferStore;

/// Records incoming-transfer progress.
///
/// Shared by the poll service (push intake and progress reports from
/// peers) and the poll fetch engine (images this node pulled itself).
pub struct InboxLog {
    store: Arc<TransferStore>,
    feed: Arc<EventFeed>,
}

impl InboxLog {
    /// Creates an inbox log over the shared store and event feed.
    pub fn new(store: Arc<TransferStore>, feed: Arc<EventFeed>) -> Self {
        Self { store, feed }
    }

    /// Upserts the progress row for (box, transaction) with the latest
    /// sequence number.
    ///
    /// Exactly on the transition to `received == total` a receive-complete
    /// event is emitted; repeating the final report does not emit a
    /// duplicate. The row is retained after completion as history.
    pub fn record_progress(
        &self,
        box_id: BoxId,
        transaction_id: TransactionId,
        sequence_number: u32,
        total_image_count: u32,
    ) -> StoreResult<InboxEntry> {
        let upsert =
            self.store
                .upsert_inbox(box_id, transaction_id, sequence_number, total_image_count)?;

        let was_complete = upsert
            .previous
            .map_or(false, |received| received >= total_image_count);
        if upsert.entry.is_complete() && !was_complete {
            if let Some(peer) = self.store.box_by_id(box_id) {
                info!(
                    "receive {} from {} complete: {} images",
                    transaction_id, peer.name, total_image_count
                );
                self.feed.emit(BoxEvent::ReceiveCompleted {
                    box_id: peer.id,
                    box_name: peer.name,
                    transaction_id,
                    image_count: total_image_count,
                });
            }
        }
        Ok(upsert.entry)
    }

    /// Returns every inbox row, across all boxes.
    pub fn entries(&self) -> Vec<InboxEntry> {
        self.store.list_inbox()
    }
}
