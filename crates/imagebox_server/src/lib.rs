//! # ImageBox Server
//!
//! Poll service endpoint for ImageBox peers.
//!
//! This crate provides:
//! - Token-authenticated handlers for the peer-facing box endpoints
//! - Outbox polling, payload fetch, and receipt confirmation for pulling
//!   peers
//! - Image intake and inbox progress reports for pushing peers
//! - Error classification the web layer maps onto HTTP statuses
//!
//! The handlers are framework-agnostic: a web layer maps routes onto
//! [`PollService`] methods, and tests exercise them directly without any
//! transport.
//!
//! ## Protocol
//!
//! A peer authenticates every call with the token embedded in its box
//! URL. The pull sequence is:
//!
//! 1. `GET box/{token}/outbox/poll` returns the next queued entry, or empty
//! 2. `GET box/{token}/outbox/{transaction}/{sequence}` returns that
//!    entry's payload
//! 3. `DELETE box/{token}/outbox/{transaction}/{sequence}` confirms receipt
//!
//! Pushing peers land images with `POST box/{token}/image` and may report
//! bare progress with `POST box/{token}/inbox`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod service;

pub use error::{ServerError, ServerResult};
pub use service::PollService;
