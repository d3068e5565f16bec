//! Poll fetch engine.
//!
//! The client half of poll mode. An adopted peer queues images for us in
//! its own outbox; this engine asks for the next entry, fetches the
//! payload, lands it in local storage, and confirms receipt with a DELETE
//! so the peer can advance and detect completion. One pass drains the
//! peer until it reports empty.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use imagebox_core::{Collaborators, InboxLog, TransferStore};
use imagebox_protocol::{outbox_entry_url, outbox_poll_url, BoxId, OutboxEntry, PeerBox};

use crate::error::{EngineError, EngineResult};
use crate::http::HttpClient;

/// Drains one peer's outbox into local storage.
pub struct PollEngine {
    box_id: BoxId,
    store: Arc<TransferStore>,
    inbox: Arc<InboxLog>,
    collaborators: Collaborators,
    http: Arc<dyn HttpClient>,
}

impl PollEngine {
    /// Creates a fetch engine for the given adopted box.
    pub fn new(
        box_id: BoxId,
        store: Arc<TransferStore>,
        inbox: Arc<InboxLog>,
        collaborators: Collaborators,
        http: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            box_id,
            store,
            inbox,
            collaborators,
            http,
        }
    }

    /// The box this engine fetches from.
    pub fn box_id(&self) -> BoxId {
        self.box_id
    }

    /// One pass: lands entries until the peer has nothing more for us,
    /// an error ends the pass, or `cancel` flips. Returns how many
    /// images were landed.
    pub fn run_cycle(&self, cancel: &AtomicBool) -> EngineResult<usize> {
        let mut landed = 0usize;
        while !cancel.load(Ordering::Relaxed) {
            match self.fetch_next()? {
                Some(entry) => {
                    debug!(
                        "fetched {} {}/{} from {}",
                        entry.transaction_id,
                        entry.sequence_number,
                        entry.total_image_count,
                        self.box_id
                    );
                    landed += 1;
                }
                None => break,
            }
        }
        Ok(landed)
    }

    /// Fetches and lands the peer's next queued entry, if any.
    fn fetch_next(&self) -> EngineResult<Option<OutboxEntry>> {
        let peer = self.peer()?;

        let reply = self
            .http
            .get(&outbox_poll_url(&peer.base_url))
            .map_err(EngineError::Transport)?;
        if reply.status == 404 || (reply.is_success() && reply.body.is_empty()) {
            return Ok(None);
        }
        if !reply.is_success() {
            return Err(EngineError::peer_status(reply.status, reply.body_snippet()));
        }
        let entry: OutboxEntry = serde_json::from_slice(&reply.body)
            .map_err(|error| EngineError::Codec(error.to_string()))?;

        let url = outbox_entry_url(&peer.base_url, entry.transaction_id, entry.sequence_number);
        let payload = self.http.get(&url).map_err(EngineError::Transport)?;
        if !payload.is_success() {
            return Err(EngineError::peer_status(payload.status, payload.body_snippet()));
        }

        let dataset = self
            .collaborators
            .decode_payload(payload.body)
            .map_err(EngineError::Landing)?;
        self.collaborators
            .storage
            .store_dataset(dataset)
            .map_err(EngineError::Landing)?;

        // The receipt confirmation lets the peer drop the row and run its
        // completion bookkeeping. Confirm only after the image is safe.
        let confirmation = self.http.delete(&url).map_err(EngineError::Transport)?;
        if !confirmation.is_success() {
            return Err(EngineError::peer_status(
                confirmation.status,
                confirmation.body_snippet(),
            ));
        }

        self.inbox
            .record_progress(
                self.box_id,
                entry.transaction_id,
                entry.sequence_number,
                entry.total_image_count,
            )
            .map_err(|error| EngineError::Landing(error.to_string()))?;

        Ok(Some(entry))
    }

    fn peer(&self) -> EngineResult<PeerBox> {
        self.store
            .box_by_id(self.box_id)
            .ok_or_else(|| EngineError::Preparation("peer box no longer exists".into()))
    }
}
