//! GARL reputation ledger HTTP service.
//!
//! Wires the pure engine and the storage layer into a running server:
//! request routing, API-key auth, rate limiting, the trace intake
//! pipeline, per-agent write serialisation, and the asynchronous webhook
//! dispatcher.

#![warn(missing_docs)]

pub mod config;
pub mod dispatcher;
pub mod locks;
pub mod pipeline;
pub mod rate_limit;
pub mod server;
