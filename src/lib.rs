//! Keeps a local store of modality worklist entries in sync with a remote information system.
//!
//! A [`scheduler::Orchestrator`] periodically queries the peer with C-FIND through a
//! [`session::ProtocolSession`], parses the responses and reconciles them against a
//! [`store::WorklistStore`]. Outcomes are published as [`events::WorklistEvent`]s.

pub mod config;
pub mod dimse;
pub mod events;
pub mod model;
pub mod parser;
pub mod query;
pub mod reconcile;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;
