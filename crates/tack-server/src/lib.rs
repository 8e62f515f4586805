//! # tack-server
//!
//! The `tack` binary's building blocks, exposed so an embedding CRUD layer
//! (and the integration tests) can share one hub and store with the
//! realtime endpoint.

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod sweeper;

pub use config::Config;
pub use handlers::{build_router, run_server, AppState};
