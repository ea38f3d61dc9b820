//! Engine configuration documents.
//!
//! [`synthesize`] turns a validated [`JobRequest`](crate::request::JobRequest)
//! into the TOML document the engine reads, plus the set of paths the run
//! will produce. It computes paths but never touches the filesystem.

pub mod document;
pub mod synthesizer;

pub use document::{CandidateOutputs, ConfigDocument, OutputPaths, SynthesizedRun};
pub use synthesizer::synthesize;
