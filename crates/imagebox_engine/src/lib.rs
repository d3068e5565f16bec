//! # ImageBox Engine
//!
//! Push and poll transfer engines for ImageBox.
//!
//! This crate provides:
//! - Push delivery state machine (idle, sending, back to idle) per peer
//! - Failure classification (soft retry vs hard fail)
//! - Receive-timeout guard for lost delivery attempts
//! - Poll fetch engine draining adopted peers
//! - Per-box worker threads with mailbox signalling
//! - HTTP transport abstraction with mock and loopback clients
//!
//! ## Architecture
//!
//! Every adopted peer gets two plain threads: a push worker draining the
//! local outbox to the peer, and a poll worker draining the peer's
//! outbox into local storage. The push machine itself is pure and
//! synchronous; the worker owns the clock, the mailbox, and the
//! short-lived delivery threads, so a slow peer never wedges a worker.
//!
//! ## Key Invariants
//!
//! - At most one delivery attempt is outstanding per peer
//! - Soft failures (transport, 5xx, local pipeline) leave rows waiting
//!   and are retried on a later tick
//! - Hard failures (other statuses, missing dataset) flag the
//!   transaction failed and keep the rows for operator resend
//! - A timed-out attempt is written off; its late result is discarded

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod http;
mod poll;
mod push;
mod worker;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, FailureClass};
pub use http::{
    HttpClient, HttpResponse, LoopbackClient, LoopbackPeer, MockHttpClient, RecordedRequest,
};
pub use poll::PollEngine;
pub use push::{AttemptSpec, PushAction, PushEngine, PushSignal, PushState};
pub use worker::{PollWorker, PushWorker};
