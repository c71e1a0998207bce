//! # Tracking Server Library
//!
//! Authoritative server side of the grid contact-tracing system. It owns
//! all shared state (the user directory and the contact registry), speaks
//! the wire protocol from the `shared` crate, and serves any number of
//! concurrent client connections.
//!
//! ## Module Organization
//!
//! ### Directory Module (`directory`)
//! The authoritative map of registered users: registration, credential
//! checks, location updates, infection marking, occupancy queries, and
//! full grid snapshots. Protected by one coarse reader-writer lock.
//!
//! ### Contacts Module (`contacts`)
//! The contact graph, kept as per-user sets of everyone a user has ever
//! shared a grid cell with. Symmetric by construction; exposure checks
//! consume the infected contacts they report so each exposure is
//! observed exactly once.
//!
//! ### Dispatcher Module (`dispatcher`)
//! The per-connection command loop translating wire requests into
//! directory/registry calls and writing typed responses. Stateless
//! across requests; lock order is fixed directory-then-registry.
//!
//! ### Network Module (`network`)
//! TCP listener that spawns one dispatcher task per accepted connection.
//! Transport faults are fatal to the single session, never the server.
//!
//! ## Concurrency Model
//!
//! Shared state lives behind `Arc<tokio::sync::RwLock<..>>`: mutations
//! take the write lock, consistent reads take the read lock. Every
//! connection runs as its own tokio task, so clients mutate state in true
//! parallel and correctness rests on the lock discipline, not scheduling.

pub mod contacts;
pub mod directory;
pub mod dispatcher;
pub mod network;
