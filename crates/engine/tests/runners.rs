//! End-to-end runner behaviour against stand-in engine scripts.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use assert_matches::assert_matches;
use centella_core::config::{synthesize, SynthesizedRun};
use centella_core::job::JobType;
use centella_core::project::ProjectLayout;
use centella_core::request::JobRequest;
use centella_core::retry::FailureClass;
use centella_engine::{ContainerRunner, EngineError, EngineRunner, LocalProcessRunner};

const TIMEOUT: Duration = Duration::from_secs(20);

/// Write an executable shell script.
fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn generate_run(root: &Path, run_id: &str) -> SynthesizedRun {
    let layout = ProjectLayout::new(root.join("projects"), "p1").unwrap();
    layout.create_dirs().unwrap();
    synthesize(
        &JobRequest::with_defaults(JobType::Generate),
        &layout,
        run_id,
        Path::new("/priors/reinvent.prior"),
    )
    .unwrap()
}

/// Fake engine: `-l <log> <config>`. Logs, then writes a two-row CSV next
/// to the config.
const WRITES_RESULTS: &str = r#"
echo "sampling" > "$2"
dir=$(dirname "$3")
printf 'SMILES,NLL\nCCO,1.0\nc1ccccc1,2.0\n' > "$dir/raw_results.csv"
"#;

#[tokio::test]
async fn local_runner_success() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = script(tmp.path(), "engine", WRITES_RESULTS);
    let run = generate_run(tmp.path(), "run_ok");

    let runner = LocalProcessRunner::new(&engine, TIMEOUT);
    let result = runner.execute(&run.document, &run.outputs).await.unwrap();

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.primary_artifact, run.outputs.primary_artifact);
    let written = std::fs::read_to_string(&run.outputs.config_file).unwrap();
    assert_eq!(written, run.document.as_str());
    assert!(run.outputs.log_file.exists());
}

#[tokio::test]
async fn zero_exit_without_artifact_is_missing_output() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = script(tmp.path(), "engine", "exit 0");
    let run = generate_run(tmp.path(), "run_missing");

    let err = LocalProcessRunner::new(&engine, TIMEOUT)
        .execute(&run.document, &run.outputs)
        .await
        .unwrap_err();
    assert_matches!(err, EngineError::MissingOutput { .. });
    assert_eq!(err.classify(), FailureClass::Permanent);
}

/// Backdate `path` so it predates any run started now.
fn backdate(path: &Path) {
    std::fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(3600))
        .unwrap();
}

#[tokio::test]
async fn existing_model_does_not_count_as_training_output() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = script(tmp.path(), "engine", "exit 0");
    let layout = ProjectLayout::new(tmp.path().join("projects"), "p1").unwrap();
    layout.create_dirs().unwrap();
    layout.save_training_data(b"SMILES\nCCO\n").unwrap();
    std::fs::write(layout.agent_model(), b"weights from an earlier job").unwrap();
    backdate(&layout.agent_model());
    let run = synthesize(
        &JobRequest::with_defaults(JobType::Train),
        &layout,
        "run_train",
        Path::new("/priors/reinvent.prior"),
    )
    .unwrap();
    assert_eq!(run.outputs.primary_artifact, layout.agent_model());

    let err = LocalProcessRunner::new(&engine, TIMEOUT)
        .execute(&run.document, &run.outputs)
        .await
        .unwrap_err();
    assert_matches!(err, EngineError::MissingOutput { .. });
}

#[tokio::test]
async fn leftover_results_from_earlier_attempt_are_not_output() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = script(tmp.path(), "engine", "exit 0");
    let run = generate_run(tmp.path(), "run_retry");
    std::fs::create_dir_all(&run.outputs.run_dir).unwrap();
    std::fs::write(&run.outputs.primary_artifact, "SMILES\nCC").unwrap();
    backdate(&run.outputs.primary_artifact);

    let err = LocalProcessRunner::new(&engine, TIMEOUT)
        .execute(&run.document, &run.outputs)
        .await
        .unwrap_err();
    assert_matches!(err, EngineError::MissingOutput { .. });
}

#[tokio::test]
async fn rewritten_artifact_counts_as_output() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = script(tmp.path(), "engine", WRITES_RESULTS);
    let run = generate_run(tmp.path(), "run_rewrite");
    std::fs::create_dir_all(&run.outputs.run_dir).unwrap();
    std::fs::write(&run.outputs.primary_artifact, "SMILES\nCC").unwrap();
    backdate(&run.outputs.primary_artifact);

    let result = LocalProcessRunner::new(&engine, TIMEOUT)
        .execute(&run.document, &run.outputs)
        .await
        .unwrap();
    assert_eq!(result.primary_artifact, run.outputs.primary_artifact);
}

#[tokio::test]
async fn non_zero_exit_keeps_stderr() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = script(tmp.path(), "engine", "echo 'CUDA busy' >&2; exit 1");
    let run = generate_run(tmp.path(), "run_fail");

    let err = LocalProcessRunner::new(&engine, TIMEOUT)
        .execute(&run.document, &run.outputs)
        .await
        .unwrap_err();
    assert_matches!(
        &err,
        EngineError::NonZeroExit { exit_code: 1, stderr } if stderr.contains("CUDA busy")
    );
    assert_eq!(err.classify(), FailureClass::Transient);
}

#[tokio::test]
async fn missing_binary_is_spawn_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let run = generate_run(tmp.path(), "run_nobin");

    let err = LocalProcessRunner::new(tmp.path().join("not-there"), TIMEOUT)
        .execute(&run.document, &run.outputs)
        .await
        .unwrap_err();
    assert_matches!(err, EngineError::Spawn(_));
    assert!(!run.outputs.candidates.as_ref().unwrap().results.exists());
}

#[tokio::test]
async fn binary_on_path_that_does_not_exist_is_spawn_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let run = generate_run(tmp.path(), "run_nopath");

    let err = LocalProcessRunner::new("centella-no-such-engine", TIMEOUT)
        .execute(&run.document, &run.outputs)
        .await
        .unwrap_err();
    assert_matches!(err, EngineError::Spawn(_));
}

#[tokio::test]
async fn watchdog_timeout() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = script(tmp.path(), "engine", "sleep 10");
    let run = generate_run(tmp.path(), "run_slow");

    let err = LocalProcessRunner::new(&engine, Duration::from_millis(200))
        .execute(&run.document, &run.outputs)
        .await
        .unwrap_err();
    assert_matches!(err, EngineError::Timeout { .. });
}

#[tokio::test]
async fn unwritable_run_dir_is_config_write_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = script(tmp.path(), "engine", WRITES_RESULTS);
    let mut run = generate_run(tmp.path(), "run_blocked");
    // A regular file where the run directory should be.
    let blocker = tmp.path().join("blocker");
    std::fs::write(&blocker, b"").unwrap();
    run.outputs.run_dir = blocker.join("run");
    run.outputs.config_file = run.outputs.run_dir.join("config.toml");

    let err = LocalProcessRunner::new(&engine, TIMEOUT)
        .execute(&run.document, &run.outputs)
        .await
        .unwrap_err();
    assert_matches!(err, EngineError::ConfigWrite { .. });
    assert_eq!(err.classify(), FailureClass::Permanent);
}

#[tokio::test]
async fn container_runner_passes_engine_command_through_exec() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = script(tmp.path(), "engine", WRITES_RESULTS);
    // Stand-in runtime: `exec <container> <cmd...>` runs `<cmd...>`.
    let runtime = script(
        tmp.path(),
        "runtime",
        r#"[ "$1" = "exec" ] || exit 125
[ "$2" = "engine-box" ] || exit 125
shift 2
exec "$@""#,
    );
    let run = generate_run(tmp.path(), "run_ctr");

    let runner = ContainerRunner::new(
        runtime.to_string_lossy(),
        "engine-box",
        engine.to_string_lossy(),
        TIMEOUT,
    );
    let result = runner.execute(&run.document, &run.outputs).await.unwrap();
    assert!(result.primary_artifact.exists());
}

#[tokio::test]
async fn container_runtime_failure_is_spawn_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = script(
        tmp.path(),
        "runtime",
        "echo 'Error: No such container: engine-box' >&2; exit 125",
    );
    let run = generate_run(tmp.path(), "run_noctr");

    let err = ContainerRunner::new(runtime.to_string_lossy(), "engine-box", "reinvent", TIMEOUT)
        .execute(&run.document, &run.outputs)
        .await
        .unwrap_err();
    assert_matches!(&err, EngineError::Spawn(msg) if msg.contains("No such container"));
    assert_eq!(err.classify(), FailureClass::Transient);
}
