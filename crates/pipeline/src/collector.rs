//! Enriches a sampling run's candidate table.

use std::path::Path;
use std::sync::Arc;

use centella_core::config::CandidateOutputs;
use centella_core::job::EnrichmentStatus;

use crate::descriptors::{DescriptorCalculator, DescriptorError, DESCRIPTOR_COLUMNS};

/// Header of the candidate column in the engine's output (matched
/// case-insensitively).
const SMILES_COLUMN: &str = "SMILES";

/// Result of one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionOutcome {
    /// `results` was written with `rows` enriched candidates; `skipped`
    /// candidates were blank, unreadable or could not be described.
    Enriched { rows: usize, skipped: usize },
    /// Nothing was enriched; `error_log` holds `error`.
    Failed { error: String },
}

impl CollectionOutcome {
    pub fn enrichment_status(&self) -> EnrichmentStatus {
        match self {
            CollectionOutcome::Enriched { skipped: 0, .. } => EnrichmentStatus::Enriched,
            CollectionOutcome::Enriched { .. } => EnrichmentStatus::Partial,
            CollectionOutcome::Failed { .. } => EnrichmentStatus::Failed,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("Failed to read candidates: {0}")]
    Read(#[source] std::io::Error),

    #[error("Candidate table is not valid CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Candidate table has no SMILES column")]
    MissingSmilesColumn,

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error("None of the {0} candidates could be enriched")]
    NothingEnriched(usize),

    #[error("Failed to write results: {0}")]
    Write(#[source] std::io::Error),
}

/// Turns `raw_results` into `results`, or into `error_log` on failure.
pub struct ResultCollector {
    calculator: Arc<dyn DescriptorCalculator>,
}

impl ResultCollector {
    pub fn new(calculator: Arc<dyn DescriptorCalculator>) -> Self {
        Self { calculator }
    }

    /// Collect one run. Never fails: problems are reported in the outcome
    /// and written to the run's error artifact.
    pub async fn collect(&self, outputs: &CandidateOutputs) -> CollectionOutcome {
        match self.try_collect(outputs).await {
            Ok((rows, skipped)) => {
                tracing::info!(
                    results = %outputs.results.display(),
                    rows,
                    skipped,
                    "Candidates enriched",
                );
                CollectionOutcome::Enriched { rows, skipped }
            }
            Err(e) => {
                let error = e.to_string();
                tracing::warn!(error = %error, "Candidate enrichment failed");
                if let Err(write_err) = tokio::fs::write(&outputs.error_log, error.as_bytes()).await {
                    tracing::error!(
                        path = %outputs.error_log.display(),
                        error = %write_err,
                        "Failed to write error log",
                    );
                }
                CollectionOutcome::Failed { error }
            }
        }
    }

    async fn try_collect(&self, outputs: &CandidateOutputs) -> Result<(usize, usize), CollectError> {
        let raw = tokio::fs::read(&outputs.raw_results)
            .await
            .map_err(CollectError::Read)?;
        let (smiles, mut skipped) = read_candidates(&raw)?;

        let described = if smiles.is_empty() {
            Vec::new()
        } else {
            self.calculator.calculate(&smiles).await?
        };

        let mut writer = csv::Writer::from_writer(Vec::new());
        let mut header = vec![SMILES_COLUMN];
        header.extend(DESCRIPTOR_COLUMNS);
        writer.write_record(&header)?;

        let mut rows = 0;
        for (smi, descriptors) in smiles.iter().zip(described) {
            match descriptors {
                Some(d) => {
                    let fields = d.to_fields();
                    writer.write_record(std::iter::once(smi.as_str()).chain(fields.iter().map(String::as_str)))?;
                    rows += 1;
                }
                None => skipped += 1,
            }
        }

        if rows == 0 && skipped > 0 {
            return Err(CollectError::NothingEnriched(skipped));
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| CollectError::Write(std::io::Error::other(e.to_string())))?;
        write_atomically(&outputs.results, &bytes).await?;
        Ok((rows, skipped))
    }
}

/// Extract non-blank SMILES values. Returns the candidates and the number
/// of rows that were blank or unreadable.
fn read_candidates(raw: &[u8]) -> Result<(Vec<String>, usize), CollectError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(raw);
    let column = reader
        .headers()?
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(SMILES_COLUMN))
        .ok_or(CollectError::MissingSmilesColumn)?;

    let mut smiles = Vec::new();
    let mut skipped = 0;
    for record in reader.records() {
        match record.ok().as_ref().and_then(|r| r.get(column)).map(str::trim) {
            Some(value) if !value.is_empty() => smiles.push(value.to_string()),
            _ => skipped += 1,
        }
    }
    Ok((smiles, skipped))
}

/// Write to a sibling temp file and rename, so readers never see a
/// half-written table.
async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), CollectError> {
    let tmp = path.with_extension("csv.tmp");
    tokio::fs::write(&tmp, bytes).await.map_err(CollectError::Write)?;
    tokio::fs::rename(&tmp, path).await.map_err(CollectError::Write)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
