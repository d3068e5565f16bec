//! In-memory transfer store.
//!
//! The store is the source of truth for transfer state: registered boxes,
//! queued outbox entries, inbox progress rows, and per-transaction tag
//! overrides. All tables live behind a single write lock so that bulk
//! inserts and cascading removals are atomic, and every delete is
//! idempotent. Persistence mechanics beyond this logical schema are out of
//! scope; workers, handlers, and the coordinator all share one instance.

use std::collections::HashMap;

use parking_lot::RwLock;

use imagebox_protocol::{
    BoxId, BoxMode, ImageId, ImageTagValues, InboxEntry, OutboxEntry, PeerBox, TagValue,
    TransactionId,
};

use crate::error::{StoreError, StoreResult};

/// Parameters for registering a peer box.
#[derive(Debug, Clone)]
pub struct NewPeerBox {
    /// Operator-chosen display name.
    pub name: String,
    /// Credential embedded in the box URL.
    pub token: String,
    /// Peer base URL, ending in the token segment.
    pub base_url: String,
    /// How images queued for this peer leave this node.
    pub mode: BoxMode,
}

/// Result of an inbox upsert, exposing the prior progress value so callers
/// can detect the completion transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxUpsert {
    /// The row after the upsert.
    pub entry: InboxEntry,
    /// The previously recorded sequence number, if the row existed.
    pub previous: Option<u32>,
}

struct Tables {
    boxes: Vec<PeerBox>,
    outbox: Vec<OutboxEntry>,
    inbox: Vec<InboxEntry>,
    tag_values: HashMap<(TransactionId, ImageId), Vec<TagValue>>,
    next_box_id: u64,
    next_entry_id: u64,
}

/// Durable mapping of boxes, outbox entries, and inbox entries.
pub struct TransferStore {
    tables: RwLock<Tables>,
}

impl TransferStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables {
                boxes: Vec::new(),
                outbox: Vec::new(),
                inbox: Vec::new(),
                tag_values: HashMap::new(),
                next_box_id: 1,
                next_entry_id: 1,
            }),
        }
    }

    // ---- boxes ----

    /// Registers a peer box, assigning it a fresh id.
    ///
    /// Fails when the name or token is already taken.
    pub fn insert_box(&self, new: NewPeerBox) -> StoreResult<PeerBox> {
        let mut tables = self.tables.write();
        if tables.boxes.iter().any(|b| b.name == new.name) {
            return Err(StoreError::BoxExists(new.name));
        }
        if tables.boxes.iter().any(|b| b.token == new.token) {
            return Err(StoreError::TokenExists);
        }

        let id = BoxId::new(tables.next_box_id);
        tables.next_box_id += 1;
        let peer = PeerBox {
            id,
            name: new.name,
            token: new.token,
            base_url: new.base_url,
            mode: new.mode,
            online: false,
        };
        tables.boxes.push(peer.clone());
        Ok(peer)
    }

    /// Looks up a box by id.
    pub fn box_by_id(&self, id: BoxId) -> Option<PeerBox> {
        self.tables.read().boxes.iter().find(|b| b.id == id).cloned()
    }

    /// Looks up a box by its token credential.
    pub fn box_by_token(&self, token: &str) -> Option<PeerBox> {
        self.tables
            .read()
            .boxes
            .iter()
            .find(|b| b.token == token)
            .cloned()
    }

    /// Returns all registered boxes.
    pub fn list_boxes(&self) -> Vec<PeerBox> {
        self.tables.read().boxes.clone()
    }

    /// Updates a box's advisory online flag. Returns false if the box is
    /// unknown.
    pub fn set_box_online(&self, id: BoxId, online: bool) -> bool {
        let mut tables = self.tables.write();
        match tables.boxes.iter_mut().find(|b| b.id == id) {
            Some(peer) => {
                peer.online = online;
                true
            }
            None => false,
        }
    }

    /// Removes a box and cascades: its outbox entries, inbox entries, and
    /// the tag values of its transactions are purged in the same critical
    /// section. Returns the removed box, or `None` if the id was unknown.
    pub fn remove_box(&self, id: BoxId) -> Option<PeerBox> {
        let mut tables = self.tables.write();
        let position = tables.boxes.iter().position(|b| b.id == id)?;
        let peer = tables.boxes.remove(position);

        let transactions: Vec<TransactionId> = tables
            .outbox
            .iter()
            .filter(|e| e.remote_box_id == id)
            .map(|e| e.transaction_id)
            .collect();
        tables
            .tag_values
            .retain(|(tid, _), _| !transactions.contains(tid));
        tables.outbox.retain(|e| e.remote_box_id != id);
        tables.inbox.retain(|e| e.remote_box_id != id);
        Some(peer)
    }

    // ---- outbox ----

    /// Inserts one outbox entry per image plus the images' tag overrides,
    /// all-or-nothing.
    ///
    /// Sequence numbers are the 1-based positions of the supplied images;
    /// this caller-supplied order is the delivery-order contract.
    pub fn insert_transaction(
        &self,
        box_id: BoxId,
        transaction_id: TransactionId,
        images: &[ImageTagValues],
    ) -> StoreResult<Vec<OutboxEntry>> {
        if images.is_empty() {
            return Err(StoreError::EmptyTransfer);
        }

        let mut tables = self.tables.write();
        if !tables.boxes.iter().any(|b| b.id == box_id) {
            return Err(StoreError::UnknownBox(box_id));
        }

        let total = images.len() as u32;
        let mut inserted = Vec::with_capacity(images.len());
        for (position, image) in images.iter().enumerate() {
            let entry = OutboxEntry {
                id: tables.next_entry_id,
                remote_box_id: box_id,
                transaction_id,
                sequence_number: position as u32 + 1,
                total_image_count: total,
                image_id: image.image_id,
                failed: false,
            };
            tables.next_entry_id += 1;
            tables.outbox.push(entry.clone());
            if !image.tag_values.is_empty() {
                tables
                    .tag_values
                    .insert((transaction_id, image.image_id), image.tag_values.clone());
            }
            inserted.push(entry);
        }
        Ok(inserted)
    }

    /// Returns the entry the given box should attempt next.
    ///
    /// Row ids are assigned in enqueue order, so the first not-failed row
    /// is the lowest remaining sequence number of the earliest transaction.
    /// Transaction ids are random and carry no temporal order.
    pub fn next_pending(&self, box_id: BoxId) -> Option<OutboxEntry> {
        self.tables
            .read()
            .outbox
            .iter()
            .find(|e| e.remote_box_id == box_id && !e.failed)
            .cloned()
    }

    /// Looks up one outbox entry by its transfer coordinates.
    pub fn outbox_entry(
        &self,
        box_id: BoxId,
        transaction_id: TransactionId,
        sequence_number: u32,
    ) -> Option<OutboxEntry> {
        self.tables
            .read()
            .outbox
            .iter()
            .find(|e| {
                e.remote_box_id == box_id
                    && e.transaction_id == transaction_id
                    && e.sequence_number == sequence_number
            })
            .cloned()
    }

    /// Removes an outbox entry by row id. Idempotent: removing an absent
    /// row returns `None` rather than an error.
    pub fn remove_outbox_entry(&self, entry_id: u64) -> Option<OutboxEntry> {
        let mut tables = self.tables.write();
        let position = tables.outbox.iter().position(|e| e.id == entry_id)?;
        Some(tables.outbox.remove(position))
    }

    /// Returns every queued outbox entry, across all boxes.
    pub fn list_outbox(&self) -> Vec<OutboxEntry> {
        self.tables.read().outbox.clone()
    }

    /// Flips the failed marker on all remaining rows of a transaction.
    /// Returns the number of rows touched.
    pub fn set_transaction_failed(
        &self,
        box_id: BoxId,
        transaction_id: TransactionId,
        failed: bool,
    ) -> usize {
        let mut tables = self.tables.write();
        let mut touched = 0;
        for entry in tables
            .outbox
            .iter_mut()
            .filter(|e| e.remote_box_id == box_id && e.transaction_id == transaction_id)
        {
            entry.failed = failed;
            touched += 1;
        }
        touched
    }

    // ---- inbox ----

    /// Upserts the inbox row for (box, transaction) with the latest
    /// reported sequence number.
    pub fn upsert_inbox(
        &self,
        box_id: BoxId,
        transaction_id: TransactionId,
        sequence_number: u32,
        total_image_count: u32,
    ) -> StoreResult<InboxUpsert> {
        let mut tables = self.tables.write();
        if !tables.boxes.iter().any(|b| b.id == box_id) {
            return Err(StoreError::UnknownBox(box_id));
        }

        let existing = tables
            .inbox
            .iter_mut()
            .find(|e| e.remote_box_id == box_id && e.transaction_id == transaction_id);
        match existing {
            Some(row) => {
                let previous = row.received_image_count;
                row.received_image_count = sequence_number;
                row.total_image_count = total_image_count;
                Ok(InboxUpsert {
                    entry: row.clone(),
                    previous: Some(previous),
                })
            }
            None => {
                let row = InboxEntry {
                    remote_box_id: box_id,
                    transaction_id,
                    received_image_count: sequence_number,
                    total_image_count,
                };
                tables.inbox.push(row.clone());
                Ok(InboxUpsert {
                    entry: row,
                    previous: None,
                })
            }
        }
    }

    /// Returns every inbox row, across all boxes.
    pub fn list_inbox(&self) -> Vec<InboxEntry> {
        self.tables.read().inbox.clone()
    }

    // ---- tag values ----

    /// Returns the tag overrides recorded for one image of a transaction.
    pub fn tag_values_for(&self, transaction_id: TransactionId, image_id: ImageId) -> Vec<TagValue> {
        self.tables
            .read()
            .tag_values
            .get(&(transaction_id, image_id))
            .cloned()
            .unwrap_or_default()
    }

    /// Drops all tag overrides of a completed transaction. Returns the
    /// number of images whose overrides were removed.
    pub fn remove_transaction_tag_values(&self, transaction_id: TransactionId) -> usize {
        let mut tables = self.tables.write();
        let before = tables.tag_values.len();
        tables.tag_values.retain(|(tid, _), _| *tid != transaction_id);
        before - tables.tag_values.len()
    }
}

impl Default for TransferStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_box(store: &TransferStore, name: &str) -> PeerBox {
        store
            .insert_box(NewPeerBox {
                name: name.into(),
                token: format!("{:032x}", name.len()),
                base_url: format!("http://{name}/box/{:032x}", name.len()),
                mode: BoxMode::Push,
            })
            .unwrap()
    }

    fn images(ids: &[u64]) -> Vec<ImageTagValues> {
        ids.iter()
            .map(|id| ImageTagValues::new(ImageId::new(*id)))
            .collect()
    }

    #[test]
    fn boxes_get_sequential_ids() {
        let store = TransferStore::new();
        let a = push_box(&store, "a");
        let b = push_box(&store, "bb");
        assert_eq!(a.id, BoxId::new(1));
        assert_eq!(b.id, BoxId::new(2));
        assert!(!a.online);
    }

    #[test]
    fn duplicate_name_and_token_rejected() {
        let store = TransferStore::new();
        push_box(&store, "a");

        let err = store
            .insert_box(NewPeerBox {
                name: "a".into(),
                token: "f".repeat(32),
                base_url: "http://x/box/t".into(),
                mode: BoxMode::Poll,
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::BoxExists(_)));

        let err = store
            .insert_box(NewPeerBox {
                name: "other".into(),
                token: format!("{:032x}", 1), // same token as box "a"
                base_url: "http://x/box/t".into(),
                mode: BoxMode::Poll,
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::TokenExists));
    }

    #[test]
    fn token_lookup() {
        let store = TransferStore::new();
        let a = push_box(&store, "a");
        assert_eq!(store.box_by_token(&a.token).unwrap().id, a.id);
        assert!(store.box_by_token("missing").is_none());
    }

    #[test]
    fn transaction_rows_are_contiguous_from_one() {
        let store = TransferStore::new();
        let peer = push_box(&store, "a");
        let tid = TransactionId::new(40);

        let rows = store
            .insert_transaction(peer.id, tid, &images(&[5, 6, 7]))
            .unwrap();

        let seqs: Vec<u32> = rows.iter().map(|e| e.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(rows.iter().all(|e| e.total_image_count == 3));
        assert_eq!(rows[0].image_id, ImageId::new(5));
        assert_eq!(rows[2].image_id, ImageId::new(7));
    }

    #[test]
    fn insert_transaction_validates_input() {
        let store = TransferStore::new();
        let peer = push_box(&store, "a");

        let err = store
            .insert_transaction(BoxId::new(99), TransactionId::new(1), &images(&[1]))
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownBox(_)));

        let err = store
            .insert_transaction(peer.id, TransactionId::new(1), &[])
            .unwrap_err();
        assert!(matches!(err, StoreError::EmptyTransfer));
        assert!(store.list_outbox().is_empty());
    }

    #[test]
    fn next_pending_follows_insertion_order_not_transaction_id_order() {
        let store = TransferStore::new();
        let peer = push_box(&store, "a");

        // The later transaction gets the numerically smaller id.
        store
            .insert_transaction(peer.id, TransactionId::new(900), &images(&[1, 2]))
            .unwrap();
        store
            .insert_transaction(peer.id, TransactionId::new(100), &images(&[3]))
            .unwrap();

        let next = store.next_pending(peer.id).unwrap();
        assert_eq!(next.transaction_id, TransactionId::new(900));
        assert_eq!(next.sequence_number, 1);
    }

    #[test]
    fn next_pending_skips_failed_transactions() {
        let store = TransferStore::new();
        let peer = push_box(&store, "a");
        let first = TransactionId::new(10);
        let second = TransactionId::new(20);
        store
            .insert_transaction(peer.id, first, &images(&[1]))
            .unwrap();
        store
            .insert_transaction(peer.id, second, &images(&[2]))
            .unwrap();

        assert_eq!(store.set_transaction_failed(peer.id, first, true), 1);
        let next = store.next_pending(peer.id).unwrap();
        assert_eq!(next.transaction_id, second);

        // Resetting the marker makes the earlier transaction pending again.
        store.set_transaction_failed(peer.id, first, false);
        let next = store.next_pending(peer.id).unwrap();
        assert_eq!(next.transaction_id, first);
    }

    #[test]
    fn entry_removal_is_idempotent() {
        let store = TransferStore::new();
        let peer = push_box(&store, "a");
        let rows = store
            .insert_transaction(peer.id, TransactionId::new(1), &images(&[1]))
            .unwrap();

        assert!(store.remove_outbox_entry(rows[0].id).is_some());
        assert!(store.remove_outbox_entry(rows[0].id).is_none());
    }

    #[test]
    fn remove_box_cascades() {
        let store = TransferStore::new();
        let peer = push_box(&store, "a");
        let other = push_box(&store, "bb");
        let tid = TransactionId::new(7);

        let imgs = vec![ImageTagValues::new(ImageId::new(1)).with_tag(0x0010_0010, "ANON")];
        store.insert_transaction(peer.id, tid, &imgs).unwrap();
        store
            .insert_transaction(other.id, TransactionId::new(8), &images(&[2]))
            .unwrap();
        store.upsert_inbox(peer.id, TransactionId::new(9), 1, 2).unwrap();

        assert!(store.remove_box(peer.id).is_some());
        assert!(store.box_by_id(peer.id).is_none());
        assert!(store.next_pending(peer.id).is_none());
        assert!(store.list_inbox().is_empty());
        assert!(store.tag_values_for(tid, ImageId::new(1)).is_empty());
        // The other box's queue is untouched.
        assert_eq!(store.list_outbox().len(), 1);

        // Removing again is a no-op.
        assert!(store.remove_box(peer.id).is_none());
    }

    #[test]
    fn inbox_upsert_reports_previous_value() {
        let store = TransferStore::new();
        let peer = push_box(&store, "a");
        let tid = TransactionId::new(3);

        let first = store.upsert_inbox(peer.id, tid, 1, 3).unwrap();
        assert_eq!(first.previous, None);
        assert_eq!(first.entry.received_image_count, 1);

        let second = store.upsert_inbox(peer.id, tid, 3, 3).unwrap();
        assert_eq!(second.previous, Some(1));
        assert!(second.entry.is_complete());
        assert_eq!(store.list_inbox().len(), 1);
    }

    #[test]
    fn inbox_upsert_requires_known_box() {
        let store = TransferStore::new();
        let err = store
            .upsert_inbox(BoxId::new(4), TransactionId::new(1), 1, 1)
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownBox(_)));
    }

    #[test]
    fn tag_values_follow_their_transaction() {
        let store = TransferStore::new();
        let peer = push_box(&store, "a");
        let tid = TransactionId::new(11);
        let imgs = vec![
            ImageTagValues::new(ImageId::new(1)).with_tag(0x0010_0010, "ANON"),
            ImageTagValues::new(ImageId::new(2)),
        ];
        store.insert_transaction(peer.id, tid, &imgs).unwrap();

        assert_eq!(store.tag_values_for(tid, ImageId::new(1)).len(), 1);
        assert!(store.tag_values_for(tid, ImageId::new(2)).is_empty());

        assert_eq!(store.remove_transaction_tag_values(tid), 1);
        assert!(store.tag_values_for(tid, ImageId::new(1)).is_empty());
    }
}
