//! Descriptor computation collaborator.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use centella_engine::subprocess::{self, ProcessError, ProcessInput};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// Column names, in output order, following `SMILES`.
pub const DESCRIPTOR_COLUMNS: [&str; 7] = [
    "QED",
    "MolecularWeight",
    "SlogP",
    "TPSA",
    "NumRotatableBonds",
    "NumHDonors",
    "NumHAcceptors",
];

/// Secondary attributes of one molecule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptors {
    #[serde(rename = "QED")]
    pub qed: f64,
    #[serde(rename = "MolecularWeight")]
    pub molecular_weight: f64,
    #[serde(rename = "SlogP")]
    pub slogp: f64,
    #[serde(rename = "TPSA")]
    pub tpsa: f64,
    #[serde(rename = "NumRotatableBonds")]
    pub num_rotatable_bonds: u32,
    #[serde(rename = "NumHDonors")]
    pub num_h_donors: u32,
    #[serde(rename = "NumHAcceptors")]
    pub num_h_acceptors: u32,
}

impl Descriptors {
    /// Values in [`DESCRIPTOR_COLUMNS`] order.
    pub fn to_fields(&self) -> [String; 7] {
        [
            self.qed.to_string(),
            self.molecular_weight.to_string(),
            self.slogp.to_string(),
            self.tpsa.to_string(),
            self.num_rotatable_bonds.to_string(),
            self.num_h_donors.to_string(),
            self.num_h_acceptors.to_string(),
        ]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("Descriptor process failed: {0}")]
    Process(#[from] ProcessError),

    #[error("Descriptor script exited with code {exit_code}: {stderr}")]
    Failed { exit_code: i32, stderr: String },

    #[error("Descriptor script returned invalid output: {0}")]
    InvalidOutput(String),

    #[error("Descriptor script returned {got} results for {expected} molecules")]
    LengthMismatch { expected: usize, got: usize },
}

/// Computes descriptors for a batch of SMILES.
#[async_trait]
pub trait DescriptorCalculator: Send + Sync {
    /// One entry per input, in input order; `None` where the molecule could
    /// not be parsed or described.
    async fn calculate(&self, smiles: &[String]) -> Result<Vec<Option<Descriptors>>, DescriptorError>;
}

/// Runs an external script: a JSON array of SMILES on stdin, a JSON array
/// of descriptor objects (or `null`) on stdout.
#[derive(Debug, Clone)]
pub struct ScriptDescriptorCalculator {
    interpreter: String,
    script: PathBuf,
    timeout: Duration,
}

impl ScriptDescriptorCalculator {
    pub fn new(interpreter: impl Into<String>, script: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
            timeout,
        }
    }
}

#[async_trait]
impl DescriptorCalculator for ScriptDescriptorCalculator {
    async fn calculate(&self, smiles: &[String]) -> Result<Vec<Option<Descriptors>>, DescriptorError> {
        let payload = serde_json::to_vec(smiles)
            .map_err(|e| DescriptorError::InvalidOutput(format!("cannot encode input: {e}")))?;
        let mut input = ProcessInput::with_timeout(self.timeout);
        input.stdin = Some(payload);
        // Stdout is the result; its size grows with the batch.
        input.stdout_limit = None;

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(&self.script);
        let output = subprocess::run_command(&mut cmd, input).await?;

        if output.exit_code != 0 {
            return Err(DescriptorError::Failed {
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        let parsed: Vec<Option<Descriptors>> = serde_json::from_str(output.stdout.trim())
            .map_err(|e| DescriptorError::InvalidOutput(e.to_string()))?;
        if parsed.len() != smiles.len() {
            return Err(DescriptorError::LengthMismatch {
                expected: smiles.len(),
                got: parsed.len(),
            });
        }
        tracing::debug!(
            molecules = smiles.len(),
            described = parsed.iter().filter(|d| d.is_some()).count(),
            duration_ms = output.duration_ms,
            "Descriptors computed",
        );
        Ok(parsed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const ONE: &str = r#"{"QED":0.41,"MolecularWeight":46.07,"SlogP":-0.0014,"TPSA":20.23,"NumRotatableBonds":0,"NumHDonors":1,"NumHAcceptors":1}"#;

    fn calculator(body: &str) -> (tempfile::TempDir, ScriptDescriptorCalculator) {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("descriptors.sh");
        std::fs::write(&script, body).unwrap();
        let calc = ScriptDescriptorCalculator::new("sh", script, Duration::from_secs(10));
        (dir, calc)
    }

    #[test]
    fn parses_script_json() {
        let d: Descriptors = serde_json::from_str(ONE).unwrap();
        assert_eq!(d.num_h_donors, 1);
        assert_eq!(d.to_fields()[0], "0.41");
    }

    #[tokio::test]
    async fn script_results_keep_input_order() {
        let (_dir, calc) = calculator(&format!("cat > /dev/null; echo '[{ONE}, null]'"));
        let out = calc
            .calculate(&["CCO".to_string(), "not-a-smiles".to_string()])
            .await
            .unwrap();
        assert!(out[0].is_some());
        assert!(out[1].is_none());
    }

    #[tokio::test]
    async fn script_sees_smiles_on_stdin() {
        let (_dir, calc) = calculator(
            r#"input=$(cat); case "$input" in *'"CCO"'*) echo '[null]';; *) exit 3;; esac"#,
        );
        let out = calc.calculate(&["CCO".to_string()]).await.unwrap();
        assert_eq!(out, vec![None]);
    }

    #[tokio::test]
    async fn large_batch_output_is_read_whole() {
        // The largest sample count a request may ask for.
        const BATCH: usize = 100_000;
        let (_dir, calc) = calculator(&format!(
            "cat > /dev/null; one='{ONE}'; \
             awk -v one=\"$one\" -v n={BATCH} 'BEGIN {{ printf \"[\"; for (i = 0; i < n; i++) {{ if (i) printf \",\"; printf \"%s\", one }}; print \"]\" }}'"
        ));
        let smiles: Vec<String> = (0..BATCH).map(|i| format!("C{}O", "C".repeat(i % 5))).collect();

        let out = calc.calculate(&smiles).await.unwrap();

        assert_eq!(out.len(), BATCH);
        assert!(out.iter().all(Option::is_some));
        assert!(BATCH * ONE.len() > centella_engine::subprocess::MAX_OUTPUT_BYTES);
    }

    #[tokio::test]
    async fn length_mismatch_is_an_error() {
        let (_dir, calc) = calculator("cat > /dev/null; echo '[]'");
        assert_matches!(
            calc.calculate(&["CCO".to_string()]).await,
            Err(DescriptorError::LengthMismatch { expected: 1, got: 0 })
        );
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let (_dir, calc) = calculator("echo 'No module named rdkit' >&2; exit 1");
        assert_matches!(
            calc.calculate(&["CCO".to_string()]).await,
            Err(DescriptorError::Failed { exit_code: 1, stderr }) if stderr.contains("rdkit")
        );
    }

    #[tokio::test]
    async fn garbage_output_is_an_error() {
        let (_dir, calc) = calculator("cat > /dev/null; echo 'oops'");
        assert_matches!(
            calc.calculate(&["CCO".to_string()]).await,
            Err(DescriptorError::InvalidOutput(_))
        );
    }
}
