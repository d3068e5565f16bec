//! # ImageBox Protocol
//!
//! Domain types and wire format for box-to-box image transfer.
//!
//! This crate provides:
//! - Identifier newtypes (`BoxId`, `TransactionId`, `ImageId`)
//! - Box, outbox, and inbox rows shared by both transfer modes
//! - The box URL scheme (token minting rules, validation, endpoint builders)
//! - JSON field naming for everything that crosses the wire
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod ids;
mod model;
mod urls;

pub use error::{ProtocolError, ProtocolResult};
pub use ids::{BoxId, ImageId, TransactionId};
pub use model::{
    BoxMode, ImageTagValues, InboxEntry, OutboxEntry, PeerBox, TagValue, TransactionStatus,
};
pub use urls::{
    box_base_url, image_push_url, inbox_report_url, is_valid_token, outbox_entry_url,
    outbox_poll_url, BoxUrl, TOKEN_LEN,
};
