//! Supervised invocation of the external design engine.
//!
//! [`EngineRunner`] is the seam the worker talks to. [`LocalProcessRunner`]
//! runs the engine binary directly; [`ContainerRunner`] runs it inside a
//! long-lived container through the container runtime's `exec`.

pub mod container;
pub mod error;
pub mod local;
pub mod runner;
pub mod subprocess;

pub use container::ContainerRunner;
pub use error::EngineError;
pub use local::LocalProcessRunner;
pub use runner::{EngineRunner, ExecutionResult};
