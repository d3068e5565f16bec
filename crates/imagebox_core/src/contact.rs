//! Last-contact tracking for poll-mode peers.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::RwLock;

use imagebox_protocol::BoxId;

/// In-memory map of box id to last poll-contact time.
///
/// Scoped to the coordinator's lifetime and deliberately not persisted: a
/// peer that has not polled since process start reads as never-contacted,
/// which the liveness sweep reports as offline.
pub struct ContactLog {
    contacts: RwLock<HashMap<BoxId, Instant>>,
}

impl ContactLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self {
            contacts: RwLock::new(HashMap::new()),
        }
    }

    /// Records a contact from the given box at the current time.
    pub fn record(&self, box_id: BoxId) {
        self.contacts.write().insert(box_id, Instant::now());
    }

    /// Returns the last recorded contact time, if any.
    pub fn last_contact(&self, box_id: BoxId) -> Option<Instant> {
        self.contacts.read().get(&box_id).copied()
    }

    /// Forgets a box, e.g. when it is removed.
    pub fn remove(&self, box_id: BoxId) {
        self.contacts.write().remove(&box_id);
    }

    /// Number of boxes that have made contact.
    pub fn len(&self) -> usize {
        self.contacts.read().len()
    }

    /// Returns true if no box has made contact.
    pub fn is_empty(&self) -> bool {
        self.contacts.read().is_empty()
    }
}

impl Default for ContactLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_lookup() {
        let log = ContactLog::new();
        assert!(log.last_contact(BoxId::new(1)).is_none());
        assert!(log.is_empty());

        log.record(BoxId::new(1));
        assert!(log.last_contact(BoxId::new(1)).is_some());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn newer_contact_wins() {
        let log = ContactLog::new();
        log.record(BoxId::new(1));
        let first = log.last_contact(BoxId::new(1)).unwrap();
        log.record(BoxId::new(1));
        let second = log.last_contact(BoxId::new(1)).unwrap();
        assert!(second >= first);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn remove_forgets_the_box() {
        let log = ContactLog::new();
        log.record(BoxId::new(1));
        log.remove(BoxId::new(1));
        assert!(log.last_contact(BoxId::new(1)).is_none());
    }
}
