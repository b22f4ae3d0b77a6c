//! Crane - Docker Swarm stack management
//!
//! Crane sits between API clients and a Docker Swarm manager. It provides:
//!
//! - Service spec validation before anything reaches the manager
//! - Stack deployment, inspection, scaling and removal
//! - Permission labels tying stacks to account groups
//! - A closed error taxonomy mapped onto HTTP statuses by the daemon

pub mod auth;
pub mod cluster;
pub mod config;
pub mod context;
pub mod daemon;
pub mod error;
pub mod stack;
pub mod swarm;

pub use error::{CraneError, ErrorKind, Result};
