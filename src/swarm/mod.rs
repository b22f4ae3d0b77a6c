//! Docker Swarm service model and validation
//!
//! Wire types for services and tasks as the Engine API exposes them, plus
//! the pure checks a spec must pass before it is sent to a manager.

pub mod constraint;
pub mod duration;
pub mod reference;
pub mod service;
pub mod task;
pub mod validate;

pub use constraint::{Constraint, ConstraintError, Operator};
pub use duration::{DurationError, SpecDuration};
pub use reference::{Reference, ReferenceError};
pub use service::{Service, ServiceMode, ServiceSpec, ServiceVersion};
pub use task::{Task, TaskState};
pub use validate::{validate_name, validate_service_spec};
