//! Dispatch - scheduled email campaign delivery.
//!
//! This library provides shared modules for the two binaries:
//! - `dispatch-web`: JSON API that creates, lists and deletes campaigns
//! - `dispatch-worker`: the dispatch loop plus the keepalive pinger
//!
//! ## Architecture
//!
//! ```text
//! dispatch-web → SQLite ← dispatch-worker → relay API / SMTP host
//! ```
//!
//! The database is the only state the two processes share.

pub mod attachments;
pub mod clock;
pub mod config;
pub mod db;
pub mod delivery;
pub mod keepalive;
pub mod models;
pub mod pdf;
pub mod scheduler;
pub mod telemetry;
pub mod template;
pub mod web;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use delivery::{Backends, Deliver, DirectBackend, LettreConnector, RelayBackend, SendError};
pub use scheduler::Dispatcher;
pub use web::AppState;
