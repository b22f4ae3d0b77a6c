//! Crane Daemon - REST API server
//!
//! Serves the stack API over HTTP on the configured address
//! (`0.0.0.0:5013` by default).

mod api;
mod server;

pub use api::{status_for, ApiHandler, ApiResponse, Request};
pub use server::{CraneDaemon, MAX_BODY_BYTES};
