use std::path::PathBuf;

/// A rendered engine configuration document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDocument {
    text: String,
}

impl ConfigDocument {
    pub fn new(text: String) -> Self {
        Self { text }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

/// Paths a run reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    /// Run-scoped directory, created by the engine runner.
    pub run_dir: PathBuf,
    /// Where the document is written before the engine starts.
    pub config_file: PathBuf,
    /// Passed to the engine's log flag.
    pub log_file: PathBuf,
    /// Must exist after a zero exit for the run to count as successful.
    pub primary_artifact: PathBuf,
    /// Present for job types that sample candidate molecules.
    pub candidates: Option<CandidateOutputs>,
}

/// Candidate tables of a sampling run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateOutputs {
    /// Engine output: one SMILES per row.
    pub raw_results: PathBuf,
    /// Enriched table written by the result collector.
    pub results: PathBuf,
    /// Written instead of `results` when enrichment fails entirely.
    pub error_log: PathBuf,
}

/// Output of [`synthesize`](super::synthesize).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedRun {
    pub document: ConfigDocument,
    pub outputs: OutputPaths,
}
