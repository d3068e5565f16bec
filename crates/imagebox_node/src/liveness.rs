//! Advisory liveness for poll-mode peers.
//!
//! A poll peer never accepts connections from us, so the only sign of
//! life is it calling our poll service. The tracker sweeps the contact
//! log on a timer and flips each poll box online or offline depending on
//! how recently it checked in. Push boxes are not judged here; their
//! own delivery traffic maintains the flag.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use imagebox_core::{ContactLog, TransferStore};
use imagebox_protocol::BoxMode;

use crate::config::LivenessConfig;
use crate::error::{NodeError, NodeResult};

/// Stop signal for the sweep thread.
enum SweepMsg {
    Stop,
}

/// Periodic sweep thread flipping the online flag of poll-mode boxes.
pub struct LivenessTracker {
    sender: Sender<SweepMsg>,
    handle: Option<JoinHandle<()>>,
}

impl LivenessTracker {
    /// Spawns the sweep thread.
    pub fn spawn(
        store: Arc<TransferStore>,
        contact: Arc<ContactLog>,
        config: LivenessConfig,
    ) -> NodeResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("imagebox-liveness".into())
            .spawn(move || sweep_loop(store, contact, receiver, config))
            .map_err(|error| NodeError::Worker(error.to_string()))?;
        Ok(Self {
            sender,
            handle: Some(handle),
        })
    }

    /// Stops the sweep and joins the thread. Safe to call twice.
    pub fn stop(&mut self) {
        let _ = self.sender.send(SweepMsg::Stop);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("liveness sweep panicked");
            }
        }
    }
}

impl Drop for LivenessTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sweep_loop(
    store: Arc<TransferStore>,
    contact: Arc<ContactLog>,
    receiver: Receiver<SweepMsg>,
    config: LivenessConfig,
) {
    // The first wait is short so freshly restored boxes get a verdict
    // soon after startup.
    let mut timeout = config.initial_delay;
    loop {
        match receiver.recv_timeout(timeout) {
            Ok(SweepMsg::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        timeout = config.sweep_interval;
        sweep(&store, &contact, config.offline_threshold);
    }
}

/// One pass over every poll-mode box. A box that has never made contact
/// reads as offline.
fn sweep(store: &TransferStore, contact: &ContactLog, threshold: Duration) {
    let now = Instant::now();
    for peer in store.list_boxes() {
        if peer.mode != BoxMode::Poll {
            continue;
        }
        let online = contact
            .last_contact(peer.id)
            .map_or(false, |last| now.duration_since(last) < threshold);
        if peer.online != online {
            store.set_box_online(peer.id, online);
            if online {
                info!("box {} is online", peer.name);
            } else {
                info!("box {} went offline", peer.name);
            }
        }
    }
}
