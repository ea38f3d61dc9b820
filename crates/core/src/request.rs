//! Typed job requests, validated once at the submission boundary.
//!
//! Every field has a documented default so callers only send what they want
//! to change. The config synthesizer consumes these structs directly.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::job::JobType;

/// Devices the engine accepts.
const CPU_DEVICE: &str = "cpu";
const CUDA_DEVICE: &str = "cuda";

/// Structural alerts applied by the default reinforcement stage.
pub const DEFAULT_ALERT_SMARTS: &[&str] = &[
    "[*;r8]",
    "[*;r9]",
    "[*;r10]",
    "[*;r11]",
    "[*;r12]",
    "[*;r13]",
    "[*;r14]",
    "[*;r15]",
    "[*;r16]",
    "[*;r17]",
    "[#8][#8]",
    "[#6;+]",
    "[#16][#16]",
    "[#7;!n][S;!$(S(=O)=O)]",
    "[#7;!n][#7;!n]",
    "C#C",
    "C(=[O,S])[O,S]",
    "[#7;!n][C;!$(C(=[O,N])[N,O])][#16;!s]",
    "[#7;!n][C;!$(C(=[O,N])[N,O])][#7;!n]",
    "[#7;!n][C;!$(C(=[O,N])[N,O])][#8;!o]",
    "[#8;!o][C;!$(C(=[O,N])[N,O])][#16;!s]",
    "[#8;!o][C;!$(C(=[O,N])[N,O])][#8;!o]",
    "[#16;!s][C;!$(C(=[O,N])[N,O])][#16;!s]",
];

// ---------------------------------------------------------------------------
// JobRequest
// ---------------------------------------------------------------------------

/// A submission for one of the fixed job types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job_type", rename_all = "lowercase")]
pub enum JobRequest {
    Train(TrainParams),
    Reinforce(ReinforceParams),
    Generate(GenerateParams),
    Design(DesignParams),
}

impl JobRequest {
    /// Request with all defaults for `job_type`.
    pub fn with_defaults(job_type: JobType) -> Self {
        match job_type {
            JobType::Train => JobRequest::Train(TrainParams::default()),
            JobType::Reinforce => JobRequest::Reinforce(ReinforceParams::default()),
            JobType::Generate => JobRequest::Generate(GenerateParams::default()),
            JobType::Design => JobRequest::Design(DesignParams::default()),
        }
    }

    pub fn job_type(&self) -> JobType {
        match self {
            JobRequest::Train(_) => JobType::Train,
            JobRequest::Reinforce(_) => JobType::Reinforce,
            JobRequest::Generate(_) => JobType::Generate,
            JobRequest::Design(_) => JobType::Design,
        }
    }

    pub fn device(&self) -> &str {
        match self {
            JobRequest::Train(p) => &p.device,
            JobRequest::Reinforce(p) => &p.device,
            JobRequest::Generate(p) => &p.device,
            JobRequest::Design(p) => &p.device,
        }
    }

    /// Validate ranges and cross-field rules.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_device(self.device())?;
        match self {
            JobRequest::Train(p) => p.validate()?,
            JobRequest::Reinforce(p) => {
                p.validate()?;
                for (i, stage) in p.stages.iter().enumerate() {
                    validate_stage(i + 1, stage)?;
                }
            }
            JobRequest::Generate(p) => p.validate()?,
            JobRequest::Design(p) => p.validate()?,
        }
        Ok(())
    }
}

/// Accept `cpu`, `cuda` or `cuda:<index>`.
fn validate_device(device: &str) -> Result<(), CoreError> {
    let ok = device == CPU_DEVICE
        || device == CUDA_DEVICE
        || device
            .strip_prefix("cuda:")
            .is_some_and(|idx| !idx.is_empty() && idx.chars().all(|c| c.is_ascii_digit()));
    if ok {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Unsupported device \"{device}\" (expected cpu, cuda or cuda:<n>)"
        )))
    }
}

fn default_device() -> String {
    CPU_DEVICE.to_string()
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Train
// ---------------------------------------------------------------------------

/// Transfer learning of the prior on the project's uploaded SMILES.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct TrainParams {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_num_epochs")]
    #[validate(range(min = 1, max = 1000))]
    pub num_epochs: u32,
    #[serde(default = "default_train_batch_size")]
    #[validate(range(min = 1, max = 4096))]
    pub batch_size: u32,
}

fn default_num_epochs() -> u32 {
    10
}

fn default_train_batch_size() -> u32 {
    128
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            device: default_device(),
            num_epochs: default_num_epochs(),
            batch_size: default_train_batch_size(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reinforce
// ---------------------------------------------------------------------------

/// Staged reinforcement learning of the project's agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ReinforceParams {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_rl_batch_size")]
    #[validate(range(min = 1, max = 4096))]
    pub batch_size: u32,
    #[serde(default = "default_true")]
    pub use_checkpoint: bool,
    #[serde(default)]
    #[validate(nested)]
    pub learning_strategy: LearningStrategyParams,
    #[serde(default = "default_stages")]
    #[validate(length(min = 1, max = 16))]
    pub stages: Vec<StageParams>,
}

fn default_rl_batch_size() -> u32 {
    64
}

fn default_stages() -> Vec<StageParams> {
    vec![StageParams::default()]
}

impl Default for ReinforceParams {
    fn default() -> Self {
        Self {
            device: default_device(),
            batch_size: default_rl_batch_size(),
            use_checkpoint: true,
            learning_strategy: LearningStrategyParams::default(),
            stages: default_stages(),
        }
    }
}

/// Policy update strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct LearningStrategyParams {
    #[serde(default = "default_strategy_kind")]
    pub kind: String,
    #[serde(default = "default_sigma")]
    #[validate(range(exclusive_min = 0.0, max = 10000.0))]
    pub sigma: f64,
    #[serde(default = "default_rate")]
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub rate: f64,
}

fn default_strategy_kind() -> String {
    "dap".to_string()
}

fn default_sigma() -> f64 {
    128.0
}

fn default_rate() -> f64 {
    0.0001
}

impl Default for LearningStrategyParams {
    fn default() -> Self {
        Self {
            kind: default_strategy_kind(),
            sigma: default_sigma(),
            rate: default_rate(),
        }
    }
}

/// One stage of a staged-learning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct StageParams {
    /// Stop once the mean score reaches this value.
    #[serde(default = "default_max_score")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub max_score: f64,
    /// Stop after this many steps regardless of score.
    #[serde(default = "default_max_steps")]
    #[validate(range(min = 1, max = 100000))]
    pub max_steps: u32,
    #[serde(default)]
    pub scoring: ScoringParams,
}

fn default_max_score() -> f64 {
    1.0
}

fn default_max_steps() -> u32 {
    300
}

impl Default for StageParams {
    fn default() -> Self {
        Self {
            max_score: default_max_score(),
            max_steps: default_max_steps(),
            scoring: ScoringParams::default(),
        }
    }
}

/// How component scores are combined into one stage score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    GeometricMean,
    ArithmeticMean,
}

impl Aggregation {
    pub fn as_str(self) -> &'static str {
        match self {
            Aggregation::GeometricMean => "geometric_mean",
            Aggregation::ArithmeticMean => "arithmetic_mean",
        }
    }
}

/// Scoring specification: named, independently weighted components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringParams {
    pub aggregation: Aggregation,
    pub components: Vec<ComponentParams>,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            aggregation: Aggregation::GeometricMean,
            components: vec![
                ComponentParams {
                    component: "custom_alerts".to_string(),
                    endpoints: vec![EndpointParams {
                        name: "Alerts".to_string(),
                        weight: None,
                        smarts: DEFAULT_ALERT_SMARTS.iter().map(|s| s.to_string()).collect(),
                        transform: None,
                    }],
                },
                ComponentParams {
                    component: "QED".to_string(),
                    endpoints: vec![EndpointParams {
                        name: "QED".to_string(),
                        weight: Some(0.6),
                        smarts: Vec::new(),
                        transform: None,
                    }],
                },
                ComponentParams {
                    component: "NumAtomStereoCenters".to_string(),
                    endpoints: vec![EndpointParams {
                        name: "Stereo".to_string(),
                        weight: Some(0.4),
                        smarts: Vec::new(),
                        transform: Some(TransformParams {
                            kind: "left_step".to_string(),
                            low: Some(0.0),
                            high: None,
                            k: None,
                        }),
                    }],
                },
            ],
        }
    }
}

/// A scoring component as named by the engine (e.g. `QED`, `custom_alerts`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentParams {
    pub component: String,
    pub endpoints: Vec<EndpointParams>,
}

/// One endpoint of a scoring component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointParams {
    pub name: String,
    #[serde(default)]
    pub weight: Option<f64>,
    /// Substructure patterns, used by alert filtering components.
    #[serde(default)]
    pub smarts: Vec<String>,
    #[serde(default)]
    pub transform: Option<TransformParams>,
}

/// Score transform applied to a raw endpoint value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformParams {
    pub kind: String,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub k: Option<f64>,
}

/// Rules the derive cannot express: component and endpoint naming, weights
/// and alert patterns.
fn validate_stage(index: usize, stage: &StageParams) -> Result<(), CoreError> {
    stage.validate()?;
    if stage.scoring.components.is_empty() {
        return Err(CoreError::Validation(format!(
            "Stage {index} must declare at least one scoring component"
        )));
    }
    for component in &stage.scoring.components {
        if component.component.trim().is_empty() {
            return Err(CoreError::Validation(format!(
                "Stage {index} has a scoring component without a name"
            )));
        }
        if component.endpoints.is_empty() {
            return Err(CoreError::Validation(format!(
                "Component \"{}\" in stage {index} has no endpoints",
                component.component
            )));
        }
        for endpoint in &component.endpoints {
            if endpoint.name.trim().is_empty() {
                return Err(CoreError::Validation(format!(
                    "Component \"{}\" in stage {index} has an endpoint without a name",
                    component.component
                )));
            }
            if let Some(weight) = endpoint.weight {
                if !weight.is_finite() || weight < 0.0 {
                    return Err(CoreError::Validation(format!(
                        "Endpoint \"{}\" weight must be a non-negative number",
                        endpoint.name
                    )));
                }
            }
            if endpoint.smarts.iter().any(|s| s.trim().is_empty()) {
                return Err(CoreError::Validation(format!(
                    "Endpoint \"{}\" contains an empty SMARTS pattern",
                    endpoint.name
                )));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Generate / Design
// ---------------------------------------------------------------------------

/// Sampling from the project's trained agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct GenerateParams {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_generate_num_smiles")]
    #[validate(range(min = 1, max = 100000))]
    pub num_smiles: u32,
    #[serde(default = "default_true")]
    pub unique_molecules: bool,
    #[serde(default = "default_true")]
    pub randomize_smiles: bool,
}

fn default_generate_num_smiles() -> u32 {
    128
}

impl Default for GenerateParams {
    fn default() -> Self {
        Self {
            device: default_device(),
            num_smiles: default_generate_num_smiles(),
            unique_molecules: true,
            randomize_smiles: true,
        }
    }
}

/// De novo design: sampling straight from the prior model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct DesignParams {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_design_num_smiles")]
    #[validate(range(min = 1, max = 100000))]
    pub num_smiles: u32,
    #[serde(default = "default_true")]
    pub unique_molecules: bool,
    #[serde(default = "default_true")]
    pub randomize_smiles: bool,
}

fn default_design_num_smiles() -> u32 {
    157
}

impl Default for DesignParams {
    fn default() -> Self {
        Self {
            device: default_device(),
            num_smiles: default_design_num_smiles(),
            unique_molecules: true,
            randomize_smiles: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn deserializes_with_defaults() {
        let req: JobRequest = serde_json::from_str(r#"{"job_type": "generate"}"#).unwrap();
        assert_eq!(req, JobRequest::Generate(GenerateParams::default()));
        assert_eq!(req.device(), "cpu");
        match req {
            JobRequest::Generate(p) => {
                assert_eq!(p.num_smiles, 128);
                assert!(p.unique_molecules);
                assert!(p.randomize_smiles);
            }
            other => panic!("expected generate, got {other:?}"),
        }
    }

    #[test]
    fn default_num_smiles_per_job_type() {
        assert_eq!(GenerateParams::default().num_smiles, 128);
        assert_eq!(DesignParams::default().num_smiles, 157);
    }

    #[test]
    fn partial_train_overrides() {
        let req: JobRequest =
            serde_json::from_str(r#"{"job_type": "train", "num_epochs": 3}"#).unwrap();
        assert_matches!(
            req,
            JobRequest::Train(TrainParams { num_epochs: 3, batch_size: 128, .. })
        );
    }

    #[test]
    fn unknown_job_type_is_rejected() {
        let res: Result<JobRequest, _> = serde_json::from_str(r#"{"job_type": "sample"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn defaults_validate_for_every_job_type() {
        for job_type in JobType::ALL {
            let req = JobRequest::with_defaults(job_type);
            assert_eq!(req.job_type(), job_type);
            req.validate().unwrap();
        }
    }

    #[test]
    fn rejects_zero_num_smiles() {
        let req = JobRequest::Generate(GenerateParams {
            num_smiles: 0,
            ..Default::default()
        });
        assert_matches!(req.validate(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn rejects_unknown_device() {
        let req = JobRequest::Train(TrainParams {
            device: "tpu".into(),
            ..Default::default()
        });
        assert_matches!(req.validate(), Err(CoreError::Validation(_)));

        let req = JobRequest::Train(TrainParams {
            device: "cuda:1".into(),
            ..Default::default()
        });
        assert!(req.validate().is_ok());
    }

    #[test]
    fn rejects_empty_stage_list() {
        let req = JobRequest::Reinforce(ReinforceParams {
            stages: vec![],
            ..Default::default()
        });
        assert_matches!(req.validate(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn rejects_stage_without_components() {
        let mut params = ReinforceParams::default();
        params.stages[0].scoring.components.clear();
        assert_matches!(
            JobRequest::Reinforce(params).validate(),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn rejects_negative_weight() {
        let mut params = ReinforceParams::default();
        params.stages[0].scoring.components[1].endpoints[0].weight = Some(-0.5);
        assert_matches!(
            JobRequest::Reinforce(params).validate(),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn rejects_out_of_range_max_score() {
        let mut params = ReinforceParams::default();
        params.stages[0].max_score = 1.5;
        assert_matches!(
            JobRequest::Reinforce(params).validate(),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn default_scoring_matches_alert_qed_stereo_recipe() {
        let scoring = ScoringParams::default();
        assert_eq!(scoring.aggregation, Aggregation::GeometricMean);
        let names: Vec<_> = scoring.components.iter().map(|c| c.component.as_str()).collect();
        assert_eq!(names, ["custom_alerts", "QED", "NumAtomStereoCenters"]);
        assert_eq!(scoring.components[0].endpoints[0].smarts.len(), DEFAULT_ALERT_SMARTS.len());
    }
}
