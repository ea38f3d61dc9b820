//! Per-job-type templates rendered through serde into TOML.
//!
//! Field order in the structs below is the order the engine sees. Rendering
//! goes through the `toml` serializer so booleans are always lowercase and
//! strings always quoted.

use std::path::Path;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use super::document::{CandidateOutputs, ConfigDocument, OutputPaths, SynthesizedRun};
use crate::error::CoreError;
use crate::project::{ProjectLayout, RunLayout};
use crate::request::{
    ComponentParams, DesignParams, EndpointParams, GenerateParams, JobRequest, ReinforceParams,
    StageParams, TrainParams,
};

const RUN_TYPE_TRANSFER_LEARNING: &str = "transfer_learning";
const RUN_TYPE_STAGED_LEARNING: &str = "staged_learning";
const RUN_TYPE_SAMPLING: &str = "sampling";

/// Stage scores are combined multiplicatively across components.
const SCORING_FUNCTION: &str = "custom_product";

const SUMMARY_CSV_PREFIX: &str = "stage";

/// Build the engine document and output paths for one run.
///
/// Deterministic: the same request, layout, run id and prior always produce
/// a byte-identical document.
pub fn synthesize(
    request: &JobRequest,
    layout: &ProjectLayout,
    run_id: &str,
    prior_model: &Path,
) -> Result<SynthesizedRun, CoreError> {
    request.validate()?;
    let run = layout.run(run_id)?;
    let job_type = request.job_type();

    let (document, primary_artifact, candidates) = match request {
        JobRequest::Train(params) => (
            render(&transfer_learning(params, layout, prior_model))?,
            layout.agent_model(),
            None,
        ),
        JobRequest::Reinforce(params) => {
            let last_stage = params.stages.len();
            (
                render(&staged_learning(params, layout, &run, prior_model))?,
                run.stage_checkpoint(last_stage),
                None,
            )
        }
        JobRequest::Generate(params) => (
            render(&sampling_from_agent(params, layout, &run))?,
            run.raw_results(),
            Some(candidate_outputs(&run)),
        ),
        JobRequest::Design(params) => (
            render(&sampling_from_prior(params, &run, prior_model))?,
            run.raw_results(),
            Some(candidate_outputs(&run)),
        ),
    };

    Ok(SynthesizedRun {
        document,
        outputs: OutputPaths {
            run_dir: run.dir().to_path_buf(),
            config_file: run.config_file(),
            log_file: run.log_file(job_type),
            primary_artifact,
            candidates,
        },
    })
}

fn candidate_outputs(run: &RunLayout) -> CandidateOutputs {
    CandidateOutputs {
        raw_results: run.raw_results(),
        results: run.results(),
        error_log: run.error_log(),
    }
}

fn render<T: Serialize>(config: &T) -> Result<ConfigDocument, CoreError> {
    toml::to_string(config)
        .map(ConfigDocument::new)
        .map_err(|e| CoreError::Internal(format!("Failed to render engine config: {e}")))
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

// ---------------------------------------------------------------------------
// Transfer learning
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct TransferLearningConfig<'a> {
    run_type: &'static str,
    device: &'a str,
    parameters: TransferLearningParameters,
}

#[derive(Serialize)]
struct TransferLearningParameters {
    input_model_file: String,
    output_model_file: String,
    smiles_file: String,
    num_epochs: u32,
    batch_size: u32,
}

fn transfer_learning<'a>(
    params: &'a TrainParams,
    layout: &ProjectLayout,
    prior_model: &Path,
) -> TransferLearningConfig<'a> {
    TransferLearningConfig {
        run_type: RUN_TYPE_TRANSFER_LEARNING,
        device: &params.device,
        parameters: TransferLearningParameters {
            input_model_file: path_str(prior_model),
            output_model_file: path_str(&layout.agent_model()),
            smiles_file: path_str(&layout.training_data()),
            num_epochs: params.num_epochs,
            batch_size: params.batch_size,
        },
    }
}

// ---------------------------------------------------------------------------
// Staged learning
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct StagedLearningConfig<'a> {
    run_type: &'static str,
    device: &'a str,
    tb_logdir: String,
    json_out_config: String,
    parameters: StagedLearningParameters,
    learning_strategy: LearningStrategySection<'a>,
    stage: Vec<StageSection<'a>>,
}

#[derive(Serialize)]
struct StagedLearningParameters {
    prior_file: String,
    agent_file: String,
    summary_csv_prefix: &'static str,
    batch_size: u32,
    use_checkpoint: bool,
}

#[derive(Serialize)]
struct LearningStrategySection<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    sigma: f64,
    rate: f64,
}

#[derive(Serialize)]
struct StageSection<'a> {
    max_score: f64,
    max_steps: u32,
    chkpt_file: String,
    scoring_function: ScoringFunctionSection,
    scoring: ScoringSection<'a>,
}

#[derive(Serialize)]
struct ScoringFunctionSection {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ScoringSection<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    component: Vec<ComponentSection<'a>>,
}

/// Rendered as a table keyed by the component name:
/// `[stage.scoring.component.QED]` followed by its `endpoint` array.
struct ComponentSection<'a> {
    name: &'a str,
    endpoint: Vec<EndpointSection<'a>>,
}

impl Serialize for ComponentSection<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Endpoints<'b, 'a> {
            endpoint: &'b [EndpointSection<'a>],
        }

        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(
            self.name,
            &Endpoints {
                endpoint: &self.endpoint,
            },
        )?;
        map.end()
    }
}

#[derive(Serialize)]
struct EndpointSection<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<EndpointParamsSection<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transform: Option<TransformSection<'a>>,
}

#[derive(Serialize)]
struct EndpointParamsSection<'a> {
    smarts: &'a [String],
}

#[derive(Serialize)]
struct TransformSection<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    high: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    k: Option<f64>,
}

fn staged_learning<'a>(
    params: &'a ReinforceParams,
    layout: &ProjectLayout,
    run: &RunLayout,
    prior_model: &Path,
) -> StagedLearningConfig<'a> {
    StagedLearningConfig {
        run_type: RUN_TYPE_STAGED_LEARNING,
        device: &params.device,
        tb_logdir: path_str(&run.tensorboard_dir()),
        json_out_config: path_str(&run.json_out()),
        parameters: StagedLearningParameters {
            prior_file: path_str(prior_model),
            agent_file: path_str(&layout.agent_model()),
            summary_csv_prefix: SUMMARY_CSV_PREFIX,
            batch_size: params.batch_size,
            use_checkpoint: params.use_checkpoint,
        },
        learning_strategy: LearningStrategySection {
            kind: &params.learning_strategy.kind,
            sigma: params.learning_strategy.sigma,
            rate: params.learning_strategy.rate,
        },
        stage: params
            .stages
            .iter()
            .enumerate()
            .map(|(i, stage)| stage_section(stage, run.stage_checkpoint(i + 1)))
            .collect(),
    }
}

fn stage_section(stage: &StageParams, checkpoint: std::path::PathBuf) -> StageSection<'_> {
    StageSection {
        max_score: stage.max_score,
        max_steps: stage.max_steps,
        chkpt_file: path_str(&checkpoint),
        scoring_function: ScoringFunctionSection {
            kind: SCORING_FUNCTION,
        },
        scoring: ScoringSection {
            kind: stage.scoring.aggregation.as_str(),
            component: stage.scoring.components.iter().map(component_section).collect(),
        },
    }
}

fn component_section(component: &ComponentParams) -> ComponentSection<'_> {
    ComponentSection {
        name: &component.component,
        endpoint: component.endpoints.iter().map(endpoint_section).collect(),
    }
}

fn endpoint_section(endpoint: &EndpointParams) -> EndpointSection<'_> {
    EndpointSection {
        name: &endpoint.name,
        weight: endpoint.weight,
        params: (!endpoint.smarts.is_empty()).then_some(EndpointParamsSection {
            smarts: &endpoint.smarts,
        }),
        transform: endpoint.transform.as_ref().map(|t| TransformSection {
            kind: &t.kind,
            low: t.low,
            high: t.high,
            k: t.k,
        }),
    }
}

// ---------------------------------------------------------------------------
// Sampling
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SamplingConfig<'a> {
    run_type: &'static str,
    device: &'a str,
    json_out_config: String,
    parameters: SamplingParameters,
}

#[derive(Serialize)]
struct SamplingParameters {
    model_file: String,
    output_file: String,
    num_smiles: u32,
    unique_molecules: bool,
    randomize_smiles: bool,
}

fn sampling_from_agent<'a>(
    params: &'a GenerateParams,
    layout: &ProjectLayout,
    run: &RunLayout,
) -> SamplingConfig<'a> {
    SamplingConfig {
        run_type: RUN_TYPE_SAMPLING,
        device: &params.device,
        json_out_config: path_str(&run.json_out()),
        parameters: SamplingParameters {
            model_file: path_str(&layout.agent_model()),
            output_file: path_str(&run.raw_results()),
            num_smiles: params.num_smiles,
            unique_molecules: params.unique_molecules,
            randomize_smiles: params.randomize_smiles,
        },
    }
}

fn sampling_from_prior<'a>(
    params: &'a DesignParams,
    run: &RunLayout,
    prior_model: &Path,
) -> SamplingConfig<'a> {
    SamplingConfig {
        run_type: RUN_TYPE_SAMPLING,
        device: &params.device,
        json_out_config: path_str(&run.json_out()),
        parameters: SamplingParameters {
            model_file: path_str(prior_model),
            output_file: path_str(&run.raw_results()),
            num_smiles: params.num_smiles,
            unique_molecules: params.unique_molecules,
            randomize_smiles: params.randomize_smiles,
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use assert_matches::assert_matches;

    use super::*;
    use crate::job::JobType;
    use crate::request::{Aggregation, ComponentParams, ScoringParams};

    const PRIOR: &str = "/opt/priors/reinvent.prior";

    fn layout() -> ProjectLayout {
        ProjectLayout::new("/app/projects", "p1").unwrap()
    }

    fn parse(run: &SynthesizedRun) -> toml::Table {
        toml::from_str(run.document.as_str()).unwrap()
    }

    #[test]
    fn identical_inputs_give_identical_documents() {
        for job_type in JobType::ALL {
            let req = JobRequest::with_defaults(job_type);
            let a = synthesize(&req, &layout(), "run_1", Path::new(PRIOR)).unwrap();
            let b = synthesize(&req, &layout(), "run_1", Path::new(PRIOR)).unwrap();
            assert_eq!(a.document.as_bytes(), b.document.as_bytes(), "{job_type}");
            assert_eq!(a.outputs, b.outputs);
        }
    }

    #[test]
    fn train_document() {
        let req = JobRequest::with_defaults(JobType::Train);
        let run = synthesize(&req, &layout(), "run_1", Path::new(PRIOR)).unwrap();
        let doc = parse(&run);

        assert_eq!(doc["run_type"].as_str(), Some("transfer_learning"));
        assert_eq!(doc["device"].as_str(), Some("cpu"));
        let params = &doc["parameters"];
        assert_eq!(params["input_model_file"].as_str(), Some(PRIOR));
        assert_eq!(
            params["output_model_file"].as_str(),
            Some("/app/projects/p1/models/agent.pt")
        );
        assert_eq!(
            params["smiles_file"].as_str(),
            Some("/app/projects/p1/input/train.csv")
        );
        assert_eq!(params["num_epochs"].as_integer(), Some(10));
        assert_eq!(params["batch_size"].as_integer(), Some(128));

        assert_eq!(
            run.outputs.primary_artifact,
            PathBuf::from("/app/projects/p1/models/agent.pt")
        );
        assert_eq!(
            run.outputs.log_file,
            PathBuf::from("/app/projects/p1/runs/run_1/train.log")
        );
        assert!(run.outputs.candidates.is_none());
    }

    #[test]
    fn generate_document_uses_lowercase_booleans() {
        let req = JobRequest::Generate(GenerateParams {
            unique_molecules: false,
            ..Default::default()
        });
        let run = synthesize(&req, &layout(), "run_2", Path::new(PRIOR)).unwrap();
        let text = run.document.as_str();

        assert!(text.contains("unique_molecules = false"), "{text}");
        assert!(text.contains("randomize_smiles = true"), "{text}");
        assert!(!text.contains("True") && !text.contains("False"));

        let doc = parse(&run);
        assert_eq!(doc["run_type"].as_str(), Some("sampling"));
        assert_eq!(
            doc["parameters"]["model_file"].as_str(),
            Some("/app/projects/p1/models/agent.pt")
        );
        assert_eq!(doc["parameters"]["num_smiles"].as_integer(), Some(128));

        let candidates = run.outputs.candidates.unwrap();
        assert_eq!(run.outputs.primary_artifact, candidates.raw_results);
        assert_eq!(
            doc["parameters"]["output_file"].as_str(),
            candidates.raw_results.to_str()
        );
    }

    #[test]
    fn design_samples_from_prior() {
        let req = JobRequest::with_defaults(JobType::Design);
        let run = synthesize(&req, &layout(), "run_3", Path::new(PRIOR)).unwrap();
        let doc = parse(&run);

        assert_eq!(doc["parameters"]["model_file"].as_str(), Some(PRIOR));
        assert_eq!(doc["parameters"]["num_smiles"].as_integer(), Some(157));
        assert!(run.outputs.candidates.is_some());
    }

    #[test]
    fn reinforce_document_structure() {
        let req = JobRequest::with_defaults(JobType::Reinforce);
        let run = synthesize(&req, &layout(), "run_4", Path::new(PRIOR)).unwrap();
        let doc = parse(&run);

        assert_eq!(doc["run_type"].as_str(), Some("staged_learning"));
        assert_eq!(
            doc["tb_logdir"].as_str(),
            Some("/app/projects/p1/runs/run_4/tb")
        );
        assert_eq!(doc["parameters"]["prior_file"].as_str(), Some(PRIOR));
        assert_eq!(doc["parameters"]["use_checkpoint"].as_bool(), Some(true));
        assert_eq!(doc["learning_strategy"]["type"].as_str(), Some("dap"));
        assert_eq!(doc["learning_strategy"]["sigma"].as_float(), Some(128.0));

        let stages = doc["stage"].as_array().unwrap();
        assert_eq!(stages.len(), 1);
        let stage = &stages[0];
        assert_eq!(stage["max_steps"].as_integer(), Some(300));
        assert_eq!(stage["scoring_function"]["type"].as_str(), Some("custom_product"));
        assert_eq!(
            stage["chkpt_file"].as_str(),
            Some("/app/projects/p1/runs/run_4/stage1.chkpt")
        );
        assert_eq!(stage["scoring"]["type"].as_str(), Some("geometric_mean"));

        let components = stage["scoring"]["component"].as_array().unwrap();
        assert_eq!(components.len(), 3);
        let alerts = &components[0]["custom_alerts"]["endpoint"][0];
        assert_eq!(alerts["name"].as_str(), Some("Alerts"));
        assert_eq!(alerts["params"]["smarts"].as_array().unwrap().len(), 23);
        let qed = &components[1]["QED"]["endpoint"][0];
        assert_eq!(qed["weight"].as_float(), Some(0.6));
        let stereo = &components[2]["NumAtomStereoCenters"]["endpoint"][0];
        assert_eq!(stereo["transform"]["type"].as_str(), Some("left_step"));
        assert_eq!(stereo["transform"]["low"].as_float(), Some(0.0));

        assert_eq!(
            run.outputs.primary_artifact,
            PathBuf::from("/app/projects/p1/runs/run_4/stage1.chkpt")
        );
    }

    #[test]
    fn reinforce_stages_keep_order_and_checkpoints() {
        let second = StageParams {
            max_score: 0.8,
            max_steps: 50,
            scoring: ScoringParams {
                aggregation: Aggregation::ArithmeticMean,
                components: vec![ComponentParams {
                    component: "QED".into(),
                    endpoints: vec![EndpointParams {
                        name: "QED".into(),
                        weight: Some(1.0),
                        smarts: vec![],
                        transform: None,
                    }],
                }],
            },
        };
        let req = JobRequest::Reinforce(ReinforceParams {
            stages: vec![StageParams::default(), second],
            ..Default::default()
        });
        let run = synthesize(&req, &layout(), "run_5", Path::new(PRIOR)).unwrap();
        let doc = parse(&run);
        let stages = doc["stage"].as_array().unwrap();

        assert_eq!(stages.len(), 2);
        assert_eq!(stages[1]["max_steps"].as_integer(), Some(50));
        assert_eq!(stages[1]["scoring"]["type"].as_str(), Some("arithmetic_mean"));
        assert!(stages[1]["chkpt_file"]
            .as_str()
            .unwrap()
            .ends_with("stage2.chkpt"));
        assert!(run
            .outputs
            .primary_artifact
            .ends_with("stage2.chkpt"));
    }

    #[test]
    fn rejects_invalid_run_id() {
        let req = JobRequest::with_defaults(JobType::Generate);
        assert_matches!(
            synthesize(&req, &layout(), "../escape", Path::new(PRIOR)),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn rejects_invalid_request() {
        let req = JobRequest::Train(TrainParams {
            num_epochs: 0,
            ..Default::default()
        });
        assert_matches!(
            synthesize(&req, &layout(), "run_1", Path::new(PRIOR)),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn distinct_runs_get_distinct_directories() {
        let req = JobRequest::with_defaults(JobType::Generate);
        let a = synthesize(&req, &layout(), "run_a", Path::new(PRIOR)).unwrap();
        let b = synthesize(&req, &layout(), "run_b", Path::new(PRIOR)).unwrap();
        assert_ne!(a.outputs.run_dir, b.outputs.run_dir);
        assert_ne!(a.document, b.document);
    }
}
