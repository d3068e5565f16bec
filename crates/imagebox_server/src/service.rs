//! Request handlers for the token-authenticated peer endpoints.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use imagebox_core::{
    Collaborators, ContactLog, InboxLog, OutboxManager, PrepareError, TransferStore,
};
use imagebox_protocol::{ImageId, OutboxEntry, PeerBox, TransactionId};

use crate::error::{ServerError, ServerResult};

/// Handlers for everything a remote box asks of this node.
///
/// The web layer maps routes onto these methods; they carry all the
/// semantics so they can be exercised directly in tests. Every handler
/// resolves the caller's token before touching state. Only `poll_outbox`
/// records peer contact, so liveness follows the polling loop rather
/// than one-off lookups.
pub struct PollService {
    store: Arc<TransferStore>,
    manager: Arc<OutboxManager>,
    inbox: Arc<InboxLog>,
    contact: Arc<ContactLog>,
    collaborators: Collaborators,
}

impl PollService {
    /// Creates a service over the node's shared state.
    pub fn new(
        store: Arc<TransferStore>,
        manager: Arc<OutboxManager>,
        inbox: Arc<InboxLog>,
        contact: Arc<ContactLog>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            store,
            manager,
            inbox,
            contact,
            collaborators,
        }
    }

    fn resolve(&self, token: &str) -> ServerResult<PeerBox> {
        self.store
            .box_by_token(token)
            .ok_or(ServerError::UnknownToken)
    }

    /// Returns the next entry waiting for the calling peer, if any.
    ///
    /// `None` is the explicit empty signal, not an error. This is the
    /// poll loop's heartbeat, so it is the one handler that feeds the
    /// contact log.
    pub fn poll_outbox(&self, token: &str) -> ServerResult<Option<OutboxEntry>> {
        let peer = self.resolve(token)?;
        self.contact.record(peer.id);
        Ok(self.manager.next_pending(peer.id))
    }

    /// Looks up one outbox entry by its transfer coordinates.
    pub fn fetch_entry(
        &self,
        token: &str,
        transaction_id: TransactionId,
        sequence_number: u32,
    ) -> ServerResult<OutboxEntry> {
        let peer = self.resolve(token)?;
        self.manager
            .entry_by(peer.id, transaction_id, sequence_number)
            .ok_or(ServerError::EntryNotFound {
                transaction_id,
                sequence_number,
            })
    }

    /// Prepares and returns the payload bytes for one outbox entry.
    ///
    /// The dataset is read, anonymized with the transaction's overrides
    /// and compressed on every call, so a peer that re-fetches after a
    /// dropped response gets equivalent bytes.
    pub fn fetch_entry_payload(
        &self,
        token: &str,
        transaction_id: TransactionId,
        sequence_number: u32,
    ) -> ServerResult<Bytes> {
        let entry = self.fetch_entry(token, transaction_id, sequence_number)?;
        let overrides = self.manager.tag_values_for(transaction_id, entry.image_id);
        match self.collaborators.prepare_payload(entry.image_id, &overrides) {
            Ok(bytes) => Ok(bytes),
            Err(PrepareError::Missing(image_id)) => Err(ServerError::DatasetMissing(image_id)),
            Err(err @ PrepareError::Stage { .. }) => Err(ServerError::Internal(err.to_string())),
        }
    }

    /// Confirms one entry as delivered and removes it from the outbox.
    ///
    /// Idempotent: confirming an entry that is already gone succeeds, so
    /// a peer can safely repeat the call after a dropped response.
    /// Confirming the last entry of a transaction emits the completion
    /// event, exactly as push-mode delivery does.
    pub fn delete_entry(
        &self,
        token: &str,
        transaction_id: TransactionId,
        sequence_number: u32,
    ) -> ServerResult<()> {
        let peer = self.resolve(token)?;
        match self.manager.entry_by(peer.id, transaction_id, sequence_number) {
            Some(entry) => {
                self.manager.acknowledge_delivered(&entry);
                Ok(())
            }
            None => {
                debug!(
                    "confirm of already removed entry {} seq {} from {}",
                    transaction_id, sequence_number, peer.name
                );
                Ok(())
            }
        }
    }

    /// Accepts one pushed image: lands it in storage, then records
    /// transfer progress.
    ///
    /// The dataset is stored before the inbox row moves, so a progress
    /// count never gets ahead of the images actually on disk.
    pub fn receive_image(
        &self,
        token: &str,
        transaction_id: TransactionId,
        sequence_number: u32,
        total_image_count: u32,
        body: Bytes,
    ) -> ServerResult<ImageId> {
        let peer = self.resolve(token)?;
        if sequence_number == 0 || total_image_count == 0 || sequence_number > total_image_count {
            return Err(ServerError::InvalidRequest(format!(
                "sequence {sequence_number} of {total_image_count} is out of range"
            )));
        }
        let dataset = self
            .collaborators
            .decode_payload(body)
            .map_err(ServerError::InvalidRequest)?;
        let image_id = self
            .collaborators
            .storage
            .store_dataset(dataset)
            .map_err(ServerError::Internal)?;
        debug!(
            "received image {} of {} for {} from {}",
            sequence_number, total_image_count, transaction_id, peer.name
        );
        self.report_inbox_progress(token, transaction_id, sequence_number, total_image_count)?;
        Ok(image_id)
    }

    /// Records transfer progress reported by a pushing peer.
    ///
    /// An unknown token is acknowledged with success but mutates
    /// nothing: the report may arrive after the operator removed the
    /// box on this side, and an error would only make the peer retry a
    /// transfer nobody is tracking anymore.
    pub fn report_inbox_progress(
        &self,
        token: &str,
        transaction_id: TransactionId,
        sequence_number: u32,
        total_image_count: u32,
    ) -> ServerResult<()> {
        let Some(peer) = self.store.box_by_token(token) else {
            warn!("progress report with an unknown token, ignoring");
            return Ok(());
        };
        self.inbox
            .record_progress(peer.id, transaction_id, sequence_number, total_image_count)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use imagebox_core::{
        BoxEvent, Dataset, EventFeed, MarkerCompressor, MemoryStorage, NewPeerBox,
        RecordingAnonymizer, COMPRESSION_MARKER,
    };
    use imagebox_protocol::{BoxMode, ImageTagValues, TagValue};

    const TOKEN: &str = "b026324c6904b2a9cb4b88d6d61c81d1";

    struct Fixture {
        service: PollService,
        store: Arc<TransferStore>,
        manager: Arc<OutboxManager>,
        feed: Arc<EventFeed>,
        contact: Arc<ContactLog>,
        storage: Arc<MemoryStorage>,
        anonymizer: Arc<RecordingAnonymizer>,
        peer: PeerBox,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(TransferStore::new());
        let feed = Arc::new(EventFeed::new());
        let manager = Arc::new(OutboxManager::new(Arc::clone(&store), Arc::clone(&feed)));
        let inbox = Arc::new(InboxLog::new(Arc::clone(&store), Arc::clone(&feed)));
        let contact = Arc::new(ContactLog::new());
        let storage = Arc::new(MemoryStorage::new());
        let anonymizer = Arc::new(RecordingAnonymizer::new());
        let collaborators = Collaborators::new(
            Arc::clone(&storage) as _,
            Arc::clone(&anonymizer) as _,
            Arc::new(MarkerCompressor::new()),
        );
        let peer = store
            .insert_box(NewPeerBox {
                name: "ward pacs".into(),
                token: TOKEN.into(),
                base_url: format!("http://ward.example.org/api/box/{TOKEN}"),
                mode: BoxMode::Poll,
            })
            .unwrap();
        let service = PollService::new(
            Arc::clone(&store),
            Arc::clone(&manager),
            inbox,
            Arc::clone(&contact),
            collaborators,
        );
        Fixture {
            service,
            store,
            manager,
            feed,
            contact,
            storage,
            anonymizer,
            peer,
        }
    }

    fn queue_images(fx: &Fixture, count: usize) -> (TransactionId, Vec<ImageId>) {
        let images: Vec<ImageId> = (0..count)
            .map(|i| fx.storage.insert(Dataset::new(vec![i as u8 + 1; 8])))
            .collect();
        let requests: Vec<ImageTagValues> =
            images.iter().map(|id| ImageTagValues::new(*id)).collect();
        let transaction_id = fx.manager.enqueue_transfer(fx.peer.id, &requests).unwrap();
        (transaction_id, images)
    }

    #[test]
    fn unknown_tokens_are_rejected() {
        let fx = fixture();
        let tid = TransactionId::new(7);
        let bad = "ffffffffffffffffffffffffffffffff";

        assert!(matches!(
            fx.service.poll_outbox(bad),
            Err(ServerError::UnknownToken)
        ));
        assert!(matches!(
            fx.service.fetch_entry(bad, tid, 1),
            Err(ServerError::UnknownToken)
        ));
        assert!(matches!(
            fx.service.fetch_entry_payload(bad, tid, 1),
            Err(ServerError::UnknownToken)
        ));
        assert!(matches!(
            fx.service.delete_entry(bad, tid, 1),
            Err(ServerError::UnknownToken)
        ));
        assert!(matches!(
            fx.service.receive_image(bad, tid, 1, 1, Bytes::from_static(b"x")),
            Err(ServerError::UnknownToken)
        ));
    }

    #[test]
    fn poll_returns_the_lowest_pending_entry_and_records_contact() {
        let fx = fixture();
        let (tid, _) = queue_images(&fx, 2);
        assert!(fx.contact.last_contact(fx.peer.id).is_none());

        let entry = fx.service.poll_outbox(TOKEN).unwrap().unwrap();
        assert_eq!(entry.transaction_id, tid);
        assert_eq!(entry.sequence_number, 1);
        assert!(fx.contact.last_contact(fx.peer.id).is_some());

        // Polling does not consume the entry.
        let again = fx.service.poll_outbox(TOKEN).unwrap().unwrap();
        assert_eq!(again.sequence_number, 1);
    }

    #[test]
    fn failed_transactions_are_not_offered() {
        let fx = fixture();
        let (tid, _) = queue_images(&fx, 2);
        fx.manager.mark_transaction_failed(fx.peer.id, tid);

        assert!(fx.service.poll_outbox(TOKEN).unwrap().is_none());
    }

    #[test]
    fn entry_payload_runs_the_prep_pipeline() {
        let fx = fixture();
        let images = vec![ImageTagValues::new(
            fx.storage.insert(Dataset::new(vec![0x11, 0x22])),
        )
        .with_tag(0x0010_0010, "anon")];
        let tid = fx.manager.enqueue_transfer(fx.peer.id, &images).unwrap();

        let payload = fx.service.fetch_entry_payload(TOKEN, tid, 1).unwrap();
        assert_eq!(payload[0], COMPRESSION_MARKER);

        let applied = fx.anonymizer.applied();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].1, vec![TagValue::new(0x0010_0010, "anon")]);
    }

    #[test]
    fn payload_for_a_missing_entry_is_not_found() {
        let fx = fixture();
        let err = fx
            .service
            .fetch_entry_payload(TOKEN, TransactionId::new(99), 1)
            .unwrap_err();
        assert!(matches!(err, ServerError::EntryNotFound { .. }));
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn payload_for_a_vanished_dataset_is_a_server_error() {
        let fx = fixture();
        let (tid, _) = queue_images(&fx, 1);
        fx.storage.set_failure(None);
        // Simulate the dataset disappearing between enqueue and fetch.
        let storage = Arc::new(MemoryStorage::new());
        let fresh = PollService::new(
            Arc::clone(&fx.store),
            Arc::clone(&fx.manager),
            Arc::new(InboxLog::new(Arc::clone(&fx.store), Arc::clone(&fx.feed))),
            Arc::clone(&fx.contact),
            Collaborators::new(
                storage as _,
                Arc::new(RecordingAnonymizer::new()) as _,
                Arc::new(MarkerCompressor::new()),
            ),
        );

        let err = fresh.fetch_entry_payload(TOKEN, tid, 1).unwrap_err();
        assert!(matches!(err, ServerError::DatasetMissing(_)));
        assert!(err.is_server_error());
    }

    #[test]
    fn confirm_removes_the_entry_and_repeats_are_harmless() {
        let fx = fixture();
        let (tid, _) = queue_images(&fx, 2);
        let events = fx.feed.subscribe();

        fx.service.delete_entry(TOKEN, tid, 1).unwrap();
        assert_eq!(fx.manager.entries().len(), 1);

        fx.service.delete_entry(TOKEN, tid, 2).unwrap();
        assert!(fx.manager.entries().is_empty());
        let completed = events.recv().unwrap();
        assert!(matches!(
            completed.event,
            BoxEvent::TransferCompleted { image_count: 2, .. }
        ));

        // A third confirm finds nothing and still succeeds.
        fx.service.delete_entry(TOKEN, tid, 2).unwrap();
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn received_images_land_before_progress_is_recorded() {
        let fx = fixture();
        let tid = TransactionId::generate();
        let events = fx.feed.subscribe();
        let sent = fx
            .service
            .collaborators
            .prepare_payload(fx.storage.insert(Dataset::new(vec![9u8; 4])), &[])
            .unwrap();
        let before = fx.storage.image_count();

        fx.service
            .receive_image(TOKEN, tid, 1, 2, sent.clone())
            .unwrap();
        fx.service.receive_image(TOKEN, tid, 2, 2, sent).unwrap();

        assert_eq!(fx.storage.image_count(), before + 2);
        let rows = fx.store.list_inbox();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].received_image_count, 2);
        assert!(rows[0].is_complete());
        assert!(matches!(
            events.recv().unwrap().event,
            BoxEvent::ReceiveCompleted { image_count: 2, .. }
        ));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn an_undecodable_body_is_rejected_without_side_effects() {
        let fx = fixture();
        let before = fx.storage.image_count();

        let err = fx
            .service
            .receive_image(
                TOKEN,
                TransactionId::generate(),
                1,
                1,
                Bytes::from_static(b"not compressed"),
            )
            .unwrap_err();

        assert!(matches!(err, ServerError::InvalidRequest(_)));
        assert_eq!(fx.storage.image_count(), before);
        assert!(fx.store.list_inbox().is_empty());
    }

    #[test]
    fn out_of_range_sequences_are_rejected() {
        let fx = fixture();
        let body = Bytes::from_static(&[COMPRESSION_MARKER, 1]);

        for (seq, total) in [(0, 1), (1, 0), (3, 2)] {
            let err = fx
                .service
                .receive_image(TOKEN, TransactionId::new(5), seq, total, body.clone())
                .unwrap_err();
            assert!(matches!(err, ServerError::InvalidRequest(_)), "{seq}/{total}");
        }
        assert_eq!(fx.storage.image_count(), 0);
    }

    #[test]
    fn progress_reports_with_unknown_tokens_are_silently_dropped() {
        let fx = fixture();

        fx.service
            .report_inbox_progress(
                "ffffffffffffffffffffffffffffffff",
                TransactionId::new(3),
                1,
                4,
            )
            .unwrap();

        assert!(fx.store.list_inbox().is_empty());
    }

    #[test]
    fn progress_reports_update_the_inbox() {
        let fx = fixture();
        let tid = TransactionId::generate();

        fx.service.report_inbox_progress(TOKEN, tid, 3, 10).unwrap();

        let rows = fx.store.list_inbox();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].received_image_count, 3);
        assert_eq!(rows[0].total_image_count, 10);
        assert!(!rows[0].is_complete());
    }
}
