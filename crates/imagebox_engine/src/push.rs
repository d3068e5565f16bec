//! Push delivery state machine.
//!
//! One machine per push-mode peer. The machine never blocks and never
//! touches the network: fed with ticks, wakes, and attempt results, it
//! inspects the outbox, decides when an attempt may start, and folds each
//! result back into the store. The worker loop owns the clock and the
//! delivery threads, so every transition here is synchronous and
//! deterministic under test.
//!
//! At most one attempt is outstanding per peer. A running attempt is
//! written off after the receive timeout; a result that arrives later is
//! recognized by its stale attempt number and discarded.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error};

use imagebox_core::{BoxEvent, EventFeed, OutboxManager, TransferStore};
use imagebox_protocol::{BoxId, OutboxEntry};

use crate::config::EngineConfig;
use crate::error::{EngineResult, FailureClass};

/// State of a box's push side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushState {
    /// Nothing in flight.
    Idle,
    /// An attempt is running on a delivery thread.
    Sending {
        /// Attempt counter value, echoed back by the delivery thread.
        attempt: u64,
        /// When the attempt is written off as lost.
        deadline: Instant,
        /// The row being delivered.
        entry: OutboxEntry,
    },
}

/// Inputs the worker feeds into the machine.
#[derive(Debug)]
pub enum PushSignal {
    /// Periodic timer fired.
    Tick,
    /// New work was queued for this box.
    Wake,
    /// A delivery thread finished.
    AttemptDone {
        /// The attempt the result belongs to.
        attempt: u64,
        /// How the attempt ended.
        outcome: EngineResult<()>,
    },
}

/// A unit of work for a delivery thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptSpec {
    /// Attempt counter value to echo back in [`PushSignal::AttemptDone`].
    pub attempt: u64,
    /// The outbox row to deliver.
    pub entry: OutboxEntry,
}

/// What the worker should do after a signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushAction {
    /// Nothing to do.
    None,
    /// Run the attempt on a delivery thread.
    StartAttempt(AttemptSpec),
}

/// Per-peer push delivery machine.
pub struct PushEngine {
    box_id: BoxId,
    store: Arc<TransferStore>,
    manager: Arc<OutboxManager>,
    feed: Arc<EventFeed>,
    config: EngineConfig,
    state: PushState,
    attempts: u64,
}

impl PushEngine {
    /// Creates an idle machine for the given box.
    pub fn new(
        box_id: BoxId,
        store: Arc<TransferStore>,
        manager: Arc<OutboxManager>,
        feed: Arc<EventFeed>,
        config: EngineConfig,
    ) -> Self {
        Self {
            box_id,
            store,
            manager,
            feed,
            config,
            state: PushState::Idle,
            attempts: 0,
        }
    }

    /// The box this machine delivers to.
    pub fn box_id(&self) -> BoxId {
        self.box_id
    }

    /// Current machine state.
    pub fn state(&self) -> PushState {
        self.state.clone()
    }

    /// Feeds one signal through the machine.
    pub fn handle(&mut self, signal: PushSignal, now: Instant) -> PushAction {
        match signal {
            PushSignal::Tick | PushSignal::Wake => self.dispatch(now),
            PushSignal::AttemptDone { attempt, outcome } => self.finish(attempt, outcome, now),
        }
    }

    /// Starts the next attempt if the slot is free and work is queued.
    fn dispatch(&mut self, now: Instant) -> PushAction {
        if let PushState::Sending { attempt, deadline, .. } = &self.state {
            if now < *deadline {
                return PushAction::None;
            }
            // The running attempt is lost. Free the slot; the entry is
            // untouched and a late result is discarded by attempt number.
            error!(
                "attempt {} for {} got no result within {:?}, writing it off",
                attempt, self.box_id, self.config.receive_timeout
            );
            self.state = PushState::Idle;
            return PushAction::None;
        }

        match self.manager.next_pending(self.box_id) {
            Some(entry) => {
                self.attempts += 1;
                let attempt = self.attempts;
                self.state = PushState::Sending {
                    attempt,
                    deadline: now + self.config.receive_timeout,
                    entry: entry.clone(),
                };
                PushAction::StartAttempt(AttemptSpec { attempt, entry })
            }
            None => PushAction::None,
        }
    }

    /// Folds an attempt result back into the store.
    fn finish(&mut self, attempt: u64, outcome: EngineResult<()>, now: Instant) -> PushAction {
        let entry = match &self.state {
            PushState::Sending {
                attempt: current,
                entry,
                ..
            } if *current == attempt => entry.clone(),
            _ => {
                debug!("discarding stale result of attempt {} for {}", attempt, self.box_id);
                return PushAction::None;
            }
        };
        self.state = PushState::Idle;

        match outcome {
            Ok(()) => {
                self.manager.acknowledge_delivered(&entry);
                self.store.set_box_online(self.box_id, true);
                // More of this transaction may be waiting; do not sit out
                // a full tick between images.
                self.dispatch(now)
            }
            Err(error) => {
                self.store.set_box_online(self.box_id, false);
                match error.classify() {
                    FailureClass::Soft => {
                        debug!("delivery to {} failed, will retry: {}", self.box_id, error);
                    }
                    FailureClass::Hard => {
                        error!(
                            "delivery of {} {}/{} to {} failed: {}",
                            entry.transaction_id,
                            entry.sequence_number,
                            entry.total_image_count,
                            self.box_id,
                            error
                        );
                        self.manager
                            .mark_transaction_failed(self.box_id, entry.transaction_id);
                        if let Some(peer) = self.store.box_by_id(self.box_id) {
                            self.feed.emit(BoxEvent::SendFailed {
                                box_id: peer.id,
                                box_name: peer.name,
                                transaction_id: entry.transaction_id,
                                sequence_number: entry.sequence_number,
                                reason: error.to_string(),
                            });
                        }
                    }
                }
                PushAction::None
            }
        }
    }
}
