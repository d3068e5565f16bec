//! Background workers.
//!
//! One pair of threads per adopted peer: a push worker draining our
//! outbox to the peer, and a poll worker draining the peer's outbox to
//! us. Workers are plain threads with mpsc mailboxes; the mailbox
//! receive timeout doubles as the periodic tick, so there is no separate
//! timer machinery.
//!
//! Delivery attempts run on short-lived threads of their own. The push
//! worker stays responsive to wakes and stop requests while an attempt
//! blocks on the network; a finished attempt reports back through the
//! mailbox, and a report that arrives after the worker is gone lands in
//! a dead channel and is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use imagebox_core::{
    Collaborators, EventFeed, InboxLog, OutboxManager, PrepareError, TransferStore,
};
use imagebox_protocol::{image_push_url, BoxId, OutboxEntry};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::http::HttpClient;
use crate::poll::PollEngine;
use crate::push::{AttemptSpec, PushAction, PushEngine, PushSignal};

/// Mailbox traffic for a push worker.
enum WorkerMsg {
    /// Look for work now.
    Wake,
    /// A delivery thread finished.
    AttemptDone {
        attempt: u64,
        outcome: EngineResult<()>,
    },
    /// Exit the loop.
    Stop,
}

/// What a delivery thread needs to run one attempt.
#[derive(Clone)]
struct DeliveryContext {
    store: Arc<TransferStore>,
    manager: Arc<OutboxManager>,
    collaborators: Collaborators,
    http: Arc<dyn HttpClient>,
}

/// Delivery loop for one push-mode box.
pub struct PushWorker {
    sender: Sender<WorkerMsg>,
    handle: Option<JoinHandle<()>>,
    box_id: BoxId,
}

impl PushWorker {
    /// Spawns the loop thread for the given box.
    pub fn spawn(
        box_id: BoxId,
        store: Arc<TransferStore>,
        manager: Arc<OutboxManager>,
        feed: Arc<EventFeed>,
        collaborators: Collaborators,
        http: Arc<dyn HttpClient>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let results = sender.clone();
        let engine = PushEngine::new(
            box_id,
            Arc::clone(&store),
            Arc::clone(&manager),
            feed,
            config.clone(),
        );
        let ctx = DeliveryContext {
            store,
            manager,
            collaborators,
            http,
        };
        let handle = thread::Builder::new()
            .name(format!("imagebox-push-{}", box_id.as_u64()))
            .spawn(move || push_loop(engine, receiver, results, ctx, config.poll_interval))
            .map_err(|error| EngineError::Worker(error.to_string()))?;
        Ok(Self {
            sender,
            handle: Some(handle),
            box_id,
        })
    }

    /// Nudges the worker to look at its outbox now.
    pub fn wake(&self) {
        let _ = self.sender.send(WorkerMsg::Wake);
    }

    /// Stops the loop and joins the thread. Safe to call twice.
    pub fn stop(&mut self) {
        let _ = self.sender.send(WorkerMsg::Stop);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("push worker for {} panicked", self.box_id);
            }
        }
    }
}

impl Drop for PushWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn push_loop(
    mut engine: PushEngine,
    receiver: Receiver<WorkerMsg>,
    results: Sender<WorkerMsg>,
    ctx: DeliveryContext,
    interval: Duration,
) {
    loop {
        let signal = match receiver.recv_timeout(interval) {
            Ok(WorkerMsg::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(WorkerMsg::Wake) => PushSignal::Wake,
            Ok(WorkerMsg::AttemptDone { attempt, outcome }) => {
                PushSignal::AttemptDone { attempt, outcome }
            }
            Err(RecvTimeoutError::Timeout) => PushSignal::Tick,
        };
        if let PushAction::StartAttempt(spec) = engine.handle(signal, Instant::now()) {
            start_delivery(spec, &ctx, &results);
        }
    }
}

/// Runs one attempt on its own thread so the worker loop stays free for
/// wakes, timeouts, and stop requests.
fn start_delivery(spec: AttemptSpec, ctx: &DeliveryContext, results: &Sender<WorkerMsg>) {
    let AttemptSpec { attempt, entry } = spec;
    let ctx = ctx.clone();
    let results = results.clone();
    let thread_results = results.clone();
    let spawned = thread::Builder::new()
        .name(format!("imagebox-send-{}", entry.remote_box_id.as_u64()))
        .spawn(move || {
            let outcome = deliver_entry(&ctx, &entry);
            // The worker may be gone by now; a dead mailbox is fine.
            let _ = thread_results.send(WorkerMsg::AttemptDone { attempt, outcome });
        });
    if let Err(error) = spawned {
        let _ = results.send(WorkerMsg::AttemptDone {
            attempt,
            outcome: Err(EngineError::Worker(error.to_string())),
        });
    }
}

/// Prepares and posts one image to its peer.
fn deliver_entry(ctx: &DeliveryContext, entry: &OutboxEntry) -> EngineResult<()> {
    let peer = ctx
        .store
        .box_by_id(entry.remote_box_id)
        .ok_or_else(|| EngineError::Preparation("peer box no longer exists".into()))?;
    let overrides = ctx
        .manager
        .tag_values_for(entry.transaction_id, entry.image_id);
    let payload = ctx
        .collaborators
        .prepare_payload(entry.image_id, &overrides)
        .map_err(|error| match error {
            PrepareError::Missing(image_id) => EngineError::DatasetMissing(image_id),
            stage => EngineError::Preparation(stage.to_string()),
        })?;
    let url = image_push_url(
        &peer.base_url,
        entry.transaction_id,
        entry.sequence_number,
        entry.total_image_count,
    );
    debug!(
        "posting {} {}/{} to {}",
        entry.transaction_id, entry.sequence_number, entry.total_image_count, peer.name
    );
    let response = ctx.http.post(&url, payload).map_err(EngineError::Transport)?;
    if response.is_success() {
        Ok(())
    } else {
        Err(EngineError::peer_status(
            response.status,
            response.body_snippet(),
        ))
    }
}

/// Stop signal for a poll worker.
enum PollMsg {
    Stop,
}

/// Fetch loop for one adopted box.
pub struct PollWorker {
    sender: Sender<PollMsg>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    box_id: BoxId,
}

impl PollWorker {
    /// Spawns the loop thread for the given box.
    pub fn spawn(
        box_id: BoxId,
        store: Arc<TransferStore>,
        inbox: Arc<InboxLog>,
        collaborators: Collaborators,
        http: Arc<dyn HttpClient>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let engine = PollEngine::new(box_id, Arc::clone(&store), inbox, collaborators, http);
        let loop_cancel = Arc::clone(&cancel);
        let handle = thread::Builder::new()
            .name(format!("imagebox-poll-{}", box_id.as_u64()))
            .spawn(move || poll_loop(engine, store, receiver, loop_cancel, config.poll_interval))
            .map_err(|error| EngineError::Worker(error.to_string()))?;
        Ok(Self {
            sender,
            cancel,
            handle: Some(handle),
            box_id,
        })
    }

    /// Stops the loop, aborting a pass between entries, and joins the
    /// thread. Safe to call twice.
    pub fn stop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        let _ = self.sender.send(PollMsg::Stop);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("poll worker for {} panicked", self.box_id);
            }
        }
    }
}

impl Drop for PollWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_loop(
    engine: PollEngine,
    store: Arc<TransferStore>,
    receiver: Receiver<PollMsg>,
    cancel: Arc<AtomicBool>,
    interval: Duration,
) {
    loop {
        match receiver.recv_timeout(interval) {
            Ok(PollMsg::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        match engine.run_cycle(&cancel) {
            Ok(landed) => {
                store.set_box_online(engine.box_id(), true);
                if landed > 0 {
                    debug!("landed {} images from {}", landed, engine.box_id());
                }
            }
            Err(error) => {
                // A transport fault means the peer is unreachable; any
                // other failure still proves it answered.
                let reachable = !matches!(error, EngineError::Transport(_));
                store.set_box_online(engine.box_id(), reachable);
                debug!("poll pass against {} failed: {}", engine.box_id(), error);
            }
        }
    }
}
