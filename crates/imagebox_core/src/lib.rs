//! # ImageBox Core
//!
//! Transfer bookkeeping for box-to-box image exchange.
//!
//! This crate provides:
//! - The transfer store: boxes, outbox entries, inbox rows, tag overrides
//! - Outbox manager (enqueue, delivery order, acknowledge, failed markers)
//! - Inbox log (progress upserts, receive-complete detection)
//! - Domain event feed (transfer-complete, receive-complete, send-failed)
//! - Last-contact log feeding peer liveness
//! - Collaborator seams for storage, anonymization, and compression
//!
//! ## Key invariants
//!
//! - Outbox rows of one transaction are a contiguous 1..N sequence in the
//!   order the caller supplied the images
//! - A row is deleted exactly when its image is confirmed transferred;
//!   failures flag rows but never delete them
//! - Deletes are idempotent, so both delivery modes can race harmlessly
//! - Completion is an emitted event, never a stored flag

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collaborators;
mod contact;
mod error;
mod events;
mod inbox;
mod outbox;
mod store;

pub use collaborators::{
    Anonymizer, Collaborators, Compressor, Dataset, ImageStorage, MarkerCompressor,
    MemoryStorage, PrepareError, RecordingAnonymizer, COMPRESSION_MARKER,
};
pub use contact::ContactLog;
pub use error::{StoreError, StoreResult};
pub use events::{BoxEvent, EventFeed, FeedEvent};
pub use inbox::InboxLog;
pub use outbox::OutboxManager;
pub use store::{InboxUpsert, NewPeerBox, TransferStore};
