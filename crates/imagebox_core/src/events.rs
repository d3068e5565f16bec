//! Domain event feed for transfer notifications.
//!
//! The feed distributes transfer-complete, receive-complete, and send-error
//! events to subscribers (logging, notification UIs) without ever blocking
//! the emitting worker. A bounded history supports cursor-based polling for
//! consumers that prefer pull over push.

use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

use imagebox_protocol::{BoxId, TransactionId};

/// Default number of events retained for polling.
const DEFAULT_MAX_HISTORY: usize = 1024;

/// A transfer domain event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoxEvent {
    /// The last image of an outgoing transaction was delivered and removed.
    TransferCompleted {
        /// Destination box.
        box_id: BoxId,
        /// Destination box name, for display.
        box_name: String,
        /// Completed transaction.
        transaction_id: TransactionId,
        /// Number of images the transaction carried.
        image_count: u32,
    },
    /// The last image of an incoming transaction was recorded.
    ReceiveCompleted {
        /// Sending box.
        box_id: BoxId,
        /// Sending box name, for display.
        box_name: String,
        /// Completed transaction.
        transaction_id: TransactionId,
        /// Number of images the transaction carried.
        image_count: u32,
    },
    /// A delivery attempt hard-failed; the transaction awaits operator
    /// action.
    SendFailed {
        /// Destination box.
        box_id: BoxId,
        /// Destination box name, for display.
        box_name: String,
        /// Failed transaction.
        transaction_id: TransactionId,
        /// Sequence number of the image that failed.
        sequence_number: u32,
        /// Human-readable failure reason.
        reason: String,
    },
}

/// A feed event paired with its feed-local sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEvent {
    /// Monotonically increasing position in the feed.
    pub sequence: u64,
    /// The event itself.
    pub event: BoxEvent,
}

/// Fan-out of domain events to subscribers, with bounded history.
pub struct EventFeed {
    subscribers: RwLock<Vec<Sender<FeedEvent>>>,
    history: RwLock<Vec<FeedEvent>>,
    next_sequence: RwLock<u64>,
    max_history: usize,
}

impl EventFeed {
    /// Creates a feed with the default history limit.
    pub fn new() -> Self {
        Self::with_max_history(DEFAULT_MAX_HISTORY)
    }

    /// Creates a feed with a specific history limit.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            next_sequence: RwLock::new(1),
            max_history,
        }
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> Receiver<FeedEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits an event to history and every live subscriber.
    ///
    /// Never blocks; disconnected subscribers are pruned on the way.
    pub fn emit(&self, event: BoxEvent) {
        let sequenced = {
            let mut next = self.next_sequence.write();
            let sequenced = FeedEvent {
                sequence: *next,
                event,
            };
            *next += 1;
            sequenced
        };

        {
            let mut history = self.history.write();
            history.push(sequenced.clone());
            if history.len() > self.max_history {
                let to_remove = history.len() - self.max_history;
                history.drain(0..to_remove);
            }
        }

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(sequenced.clone()).is_ok());
    }

    /// Returns events with sequence > cursor, up to limit.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<FeedEvent> {
        self.history
            .read()
            .iter()
            .filter(|e| e.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the sequence of the newest event, or 0 when empty.
    pub fn latest_sequence(&self) -> u64 {
        self.history.read().last().map(|e| e.sequence).unwrap_or(0)
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for EventFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn completed(n: u64) -> BoxEvent {
        BoxEvent::TransferCompleted {
            box_id: BoxId::new(n),
            box_name: format!("peer-{n}"),
            transaction_id: TransactionId::new(n * 10),
            image_count: 3,
        }
    }

    #[test]
    fn emit_and_receive() {
        let feed = EventFeed::new();
        let rx = feed.subscribe();

        feed.emit(completed(1));
        let received = rx.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(received.sequence, 1);
        assert_eq!(received.event, completed(1));
    }

    #[test]
    fn disconnected_subscribers_are_pruned() {
        let feed = EventFeed::new();
        let rx = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 1);

        drop(rx);
        feed.emit(completed(1));
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[test]
    fn poll_from_cursor() {
        let feed = EventFeed::new();
        for n in 1..=5 {
            feed.emit(completed(n));
        }

        let events = feed.poll(2, 10);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].sequence, 3);
        assert_eq!(feed.latest_sequence(), 5);
    }

    #[test]
    fn history_is_bounded() {
        let feed = EventFeed::with_max_history(3);
        for n in 1..=10 {
            feed.emit(completed(n));
        }

        let events = feed.poll(0, 100);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].sequence, 8);
    }
}
