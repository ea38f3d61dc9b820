//! Post-processing of successful sampling runs.
//!
//! The [`ResultCollector`] reads the engine's candidate table, asks a
//! [`DescriptorCalculator`] for per-molecule descriptors and writes the
//! enriched table. Enrichment never changes a job's status; its outcome is
//! reported separately as a [`CollectionOutcome`].

pub mod collector;
pub mod descriptors;

pub use collector::{CollectError, CollectionOutcome, ResultCollector};
pub use descriptors::{DescriptorCalculator, DescriptorError, Descriptors, ScriptDescriptorCalculator};
