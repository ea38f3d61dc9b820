//! Pure domain logic for the molecular-design job platform.
//!
//! Nothing in this crate talks to a database or spawns processes. The only
//! filesystem access lives in [`project`] (directory creation and training
//! data uploads); everything else is deterministic and side-effect free.

pub mod config;
pub mod error;
pub mod job;
pub mod naming;
pub mod project;
pub mod request;
pub mod retry;
pub mod types;
