//! HTTP server for the Vigil audit ledger.
//!
//! Exposes recording, compliance queries, subject export, and integrity
//! verification over a small JSON API. Entries can be appended and read,
//! never changed.

pub mod config;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::AppState;
pub use server::{open_ledger, VigilServer};
