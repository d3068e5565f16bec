//! Node coordinator.
//!
//! The [`Coordinator`] is the operator-facing surface of a transfer
//! node. It owns the store, the event feed, the poll service, the
//! liveness sweep, and one worker pair per adopted peer. A web layer
//! calls into it for box lifecycle, transfers, and reporting; the
//! background machinery runs on its own threads.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use imagebox_core::{
    Collaborators, ContactLog, EventFeed, FeedEvent, InboxLog, NewPeerBox, OutboxManager,
    TransferStore,
};
use imagebox_engine::{HttpClient, PollWorker, PushWorker};
use imagebox_protocol::{
    box_base_url, BoxId, BoxMode, BoxUrl, ImageTagValues, InboxEntry, OutboxEntry, PeerBox,
    TransactionId, TransactionStatus,
};
use imagebox_server::PollService;

use crate::config::NodeConfig;
use crate::error::{NodeError, NodeResult};
use crate::liveness::LivenessTracker;

/// One outbox row denormalized for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntryInfo {
    /// The queued row.
    #[serde(flatten)]
    pub entry: OutboxEntry,
    /// Display name of the destination box.
    pub remote_box_name: String,
    /// Delivery status of the row's transaction.
    pub status: TransactionStatus,
}

/// One inbox row denormalized for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxEntryInfo {
    /// The progress row.
    #[serde(flatten)]
    pub entry: InboxEntry,
    /// Display name of the sending box.
    pub remote_box_name: String,
}

/// The worker pair serving one adopted peer.
struct BoxWorkers {
    push: PushWorker,
    poll: PollWorker,
}

impl BoxWorkers {
    fn stop(&mut self) {
        self.push.stop();
        self.poll.stop();
    }
}

/// Owns and wires together everything a transfer node runs.
pub struct Coordinator {
    config: NodeConfig,
    store: Arc<TransferStore>,
    feed: Arc<EventFeed>,
    manager: Arc<OutboxManager>,
    inbox: Arc<InboxLog>,
    contact: Arc<ContactLog>,
    collaborators: Collaborators,
    http: Arc<dyn HttpClient>,
    service: Arc<PollService>,
    workers: Mutex<HashMap<BoxId, BoxWorkers>>,
    liveness: Mutex<Option<LivenessTracker>>,
}

impl Coordinator {
    /// Starts a node with an empty store.
    pub fn start(
        config: NodeConfig,
        collaborators: Collaborators,
        http: Arc<dyn HttpClient>,
    ) -> NodeResult<Self> {
        Self::restore(config, collaborators, http, Arc::new(TransferStore::new()))
    }

    /// Starts a node over an existing store, restarting the worker pair
    /// for every adopted peer found in it. Pending outbox rows resume
    /// delivery without any operator action.
    pub fn restore(
        config: NodeConfig,
        collaborators: Collaborators,
        http: Arc<dyn HttpClient>,
        store: Arc<TransferStore>,
    ) -> NodeResult<Self> {
        let feed = Arc::new(EventFeed::new());
        let manager = Arc::new(OutboxManager::new(Arc::clone(&store), Arc::clone(&feed)));
        let inbox = Arc::new(InboxLog::new(Arc::clone(&store), Arc::clone(&feed)));
        let contact = Arc::new(ContactLog::new());
        let service = Arc::new(PollService::new(
            Arc::clone(&store),
            Arc::clone(&manager),
            Arc::clone(&inbox),
            Arc::clone(&contact),
            collaborators.clone(),
        ));
        let liveness = LivenessTracker::spawn(
            Arc::clone(&store),
            Arc::clone(&contact),
            config.liveness.clone(),
        )?;
        let coordinator = Self {
            config,
            store,
            feed,
            manager,
            inbox,
            contact,
            collaborators,
            http,
            service,
            workers: Mutex::new(HashMap::new()),
            liveness: Mutex::new(Some(liveness)),
        };
        for peer in coordinator.store.list_boxes() {
            if peer.mode == BoxMode::Push {
                coordinator.start_workers(&peer)?;
            }
        }
        Ok(coordinator)
    }

    /// Mints a URL for a new poll peer and registers the box.
    ///
    /// The returned box carries the URL to hand to the remote operator.
    /// The peer adopting it does all the connecting, so no workers run
    /// on this side.
    pub fn generate_box_url(&self, name: impl Into<String>) -> NodeResult<PeerBox> {
        let token = Uuid::new_v4().simple().to_string();
        let base_url = box_base_url(&self.config.base_url, &token);
        let peer = self.store.insert_box(NewPeerBox {
            name: name.into(),
            token,
            base_url,
            mode: BoxMode::Poll,
        })?;
        info!("issued a box URL for {}", peer.name);
        Ok(peer)
    }

    /// Adopts a URL issued by a remote node, registers the box, and
    /// starts its push and poll workers.
    pub fn adopt_box_url(&self, name: impl Into<String>, url: &str) -> NodeResult<PeerBox> {
        let parsed = BoxUrl::parse(url)?;
        let token = parsed.token().to_string();
        let peer = self.store.insert_box(NewPeerBox {
            name: name.into(),
            token,
            base_url: parsed.into_string(),
            mode: BoxMode::Push,
        })?;
        if let Err(error) = self.start_workers(&peer) {
            self.store.remove_box(peer.id);
            return Err(error);
        }
        info!("adopted the box URL of {}", peer.name);
        Ok(peer)
    }

    /// Removes a box along with its outbox rows, inbox rows, and tag
    /// values. Workers are stopped first so nothing delivers against
    /// vanishing rows.
    pub fn remove_box(&self, id: BoxId) -> NodeResult<PeerBox> {
        let workers = self.workers.lock().remove(&id);
        if let Some(mut workers) = workers {
            workers.stop();
        }
        self.contact.remove(id);
        let peer = self.store.remove_box(id).ok_or(NodeError::UnknownBox(id))?;
        info!("removed box {}", peer.name);
        Ok(peer)
    }

    /// Queues a transfer of the given images to a box. For a push box
    /// the worker is nudged to deliver right away; for a poll box the
    /// rows wait for the peer's next poll.
    pub fn send_images(
        &self,
        box_id: BoxId,
        images: &[ImageTagValues],
    ) -> NodeResult<TransactionId> {
        let transaction_id = self.manager.enqueue_transfer(box_id, images)?;
        self.wake_push_worker(box_id);
        Ok(transaction_id)
    }

    /// Puts a failed transaction back in line for delivery. Returns the
    /// number of rows cleared.
    pub fn retry_transaction(&self, box_id: BoxId, transaction_id: TransactionId) -> usize {
        let cleared = self.manager.mark_transaction_waiting(box_id, transaction_id);
        if cleared > 0 {
            info!("retrying {} to {}", transaction_id, box_id);
            self.wake_push_worker(box_id);
        }
        cleared
    }

    /// All registered boxes.
    pub fn list_boxes(&self) -> Vec<PeerBox> {
        self.store.list_boxes()
    }

    /// Looks up one box.
    pub fn box_by_id(&self, id: BoxId) -> Option<PeerBox> {
        self.store.box_by_id(id)
    }

    /// The outbox, denormalized for display. The status is a transaction
    /// verdict: every row of a transaction with a failed row reads as
    /// failed.
    pub fn outbox(&self) -> Vec<OutboxEntryInfo> {
        let names = self.box_names();
        let entries = self.manager.entries();
        let failed: HashSet<(BoxId, TransactionId)> = entries
            .iter()
            .filter(|entry| entry.failed)
            .map(|entry| (entry.remote_box_id, entry.transaction_id))
            .collect();
        entries
            .into_iter()
            .map(|entry| OutboxEntryInfo {
                remote_box_name: display_name(&names, entry.remote_box_id),
                status: if failed.contains(&(entry.remote_box_id, entry.transaction_id)) {
                    TransactionStatus::Failed
                } else {
                    TransactionStatus::Waiting
                },
                entry,
            })
            .collect()
    }

    /// The inbox, denormalized for display.
    pub fn inbox(&self) -> Vec<InboxEntryInfo> {
        let names = self.box_names();
        self.inbox
            .entries()
            .into_iter()
            .map(|entry| InboxEntryInfo {
                remote_box_name: display_name(&names, entry.remote_box_id),
                entry,
            })
            .collect()
    }

    /// Opens a live event subscription.
    pub fn subscribe(&self) -> Receiver<FeedEvent> {
        self.feed.subscribe()
    }

    /// The peer-facing poll service, for the web layer to route onto.
    pub fn poll_service(&self) -> Arc<PollService> {
        Arc::clone(&self.service)
    }

    /// Stops the liveness sweep and every worker pair. Safe to call
    /// twice; also runs on drop.
    pub fn shutdown(&self) {
        if let Some(mut tracker) = self.liveness.lock().take() {
            tracker.stop();
        }
        let drained: Vec<BoxWorkers> = {
            let mut workers = self.workers.lock();
            workers.drain().map(|(_, pair)| pair).collect()
        };
        for mut pair in drained {
            pair.stop();
        }
    }

    fn wake_push_worker(&self, box_id: BoxId) {
        if let Some(workers) = self.workers.lock().get(&box_id) {
            workers.push.wake();
        }
    }

    fn start_workers(&self, peer: &PeerBox) -> NodeResult<()> {
        let push = PushWorker::spawn(
            peer.id,
            Arc::clone(&self.store),
            Arc::clone(&self.manager),
            Arc::clone(&self.feed),
            self.collaborators.clone(),
            Arc::clone(&self.http),
            self.config.engine.clone(),
        )?;
        let poll = PollWorker::spawn(
            peer.id,
            Arc::clone(&self.store),
            Arc::clone(&self.inbox),
            self.collaborators.clone(),
            Arc::clone(&self.http),
            self.config.engine.clone(),
        )?;
        self.workers
            .lock()
            .insert(peer.id, BoxWorkers { push, poll });
        Ok(())
    }

    fn box_names(&self) -> HashMap<BoxId, String> {
        self.store
            .list_boxes()
            .into_iter()
            .map(|peer| (peer.id, peer.name))
            .collect()
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Rows whose box vanished mid-listing fall back to the raw id.
fn display_name(names: &HashMap<BoxId, String>, id: BoxId) -> String {
    names.get(&id).cloned().unwrap_or_else(|| id.to_string())
}
