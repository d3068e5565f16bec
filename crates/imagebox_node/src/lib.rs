//! # ImageBox Node
//!
//! Everything an ImageBox node runs, tied together: box lifecycle,
//! transfer queues, per-peer delivery workers, the peer-facing poll
//! service, and advisory liveness.
//!
//! This crate provides:
//! - [`Coordinator`]: the operator-facing facade for boxes, transfers,
//!   reporting, and events
//! - [`LivenessTracker`]: a periodic online/offline sweep for poll peers
//! - [`NodeConfig`] and [`LivenessConfig`]: tuning knobs
//!
//! ## Usage
//!
//! ```rust,ignore
//! let coordinator = Coordinator::start(
//!     NodeConfig::new("https://imagebox.hospital.example"),
//!     collaborators,
//!     http_client,
//! )?;
//!
//! // Hand this URL to the remote operator; their node adopts it.
//! let clinic = coordinator.generate_box_url("clinic")?;
//!
//! // Or adopt a URL a remote operator handed us, then send.
//! let pacs = coordinator.adopt_box_url("pacs", &url)?;
//! coordinator.send_images(pacs.id, &images)?;
//! ```
//!
//! ## Architecture
//!
//! One store, one event feed, one poll service per node. Each adopted
//! (push-mode) box gets a worker pair: a push worker draining our outbox
//! to the peer and a poll worker draining the peer's outbox to us.
//! Generated (poll-mode) boxes get no workers; the remote peer does all
//! the connecting, and the liveness sweep grades how recently it did.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod error;
mod liveness;

pub use config::{LivenessConfig, NodeConfig};
pub use coordinator::{Coordinator, InboxEntryInfo, OutboxEntryInfo};
pub use error::{NodeError, NodeResult};
pub use liveness::LivenessTracker;
