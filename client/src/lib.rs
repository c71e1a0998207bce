//! # Tracking Client Library
//!
//! Client side of the grid contact-tracing system: a persistent session
//! to the server exposing typed RPC-style calls, plus the background
//! loops that depend on protocol semantics.
//!
//! ## Module Organization
//!
//! ### Session Module (`session`)
//! Owns the one persistent TCP connection. Every public call serializes
//! through it, one outstanding request at a time, and blocks until the
//! matching response is fully read. Sessions clone cheaply so the
//! background loops can share the connection safely.
//!
//! ### Poller Module (`poller`)
//! The per-login exposure notification poller and the on-demand
//! safe-to-move wait. Both poll on a five second cadence, share the
//! session's request/response turn-taking, and cancel cooperatively
//! between requests.
//!
//! The interactive menu, credential prompts and process bootstrap live
//! outside this library; it exposes exactly the calls those wrappers
//! need.

pub mod poller;
pub mod session;

pub use poller::{ExposureAlert, NotificationPoller, SafeToMoveWait};
pub use session::Session;
