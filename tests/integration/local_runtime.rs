//! YAML pipelines executed on the host shell.
//!
//! These tests run real commands through `LocalRuntime`, so they only use
//! POSIX shell builtins and coreutils.

use std::sync::Arc;
use tempfile::TempDir;
use vessel::config::{PipelineConfigBuilder, RuntimeConfig, Settings, YamlLoader};
use vessel::pipeline::{PipelineRunner, PublishRequest};
use vessel::{
    Destination, Environment, LocalPublisher, ParameterSet, PipelineError, TaskFailure, TaskId,
};

const PIPELINE: &str = r#"
id: words
params:
  sentence: string
  repeat: number
tasks:
  - id: split
    command: "for w in {sentence}; do echo $w; done > words.txt"
    image: unused
    inputs:
      - { slot: sentence, type: string, param: sentence }
    outputs:
      - { name: words, kind: file, path: words.txt }
  - id: shout
    image: unused
    command: "mkdir -p loud && for i in $(seq {n}); do tr a-z A-Z < {words}; done > loud/words.txt && echo \"$GREETING $TARGET\" > banner.txt"
    inputs:
      - { slot: words, type: file, artifact: split.words }
      - { slot: n, type: number, param: repeat }
    outputs:
      - { name: banner, kind: file, path: banner.txt }
      - { name: loud, kind: dir, path: loud }
    environment:
      TARGET: world
"#;

fn runner(tmp: &TempDir) -> PipelineRunner {
    let settings = Settings {
        workspace: tmp.path().join("runs"),
        runtime: RuntimeConfig::Local,
        environment: Environment::new()
            .with_var("GREETING", "hello")
            .with_var("TARGET", "nobody"),
        ..Default::default()
    };
    PipelineRunner::new(settings.graph_executor().unwrap(), Arc::new(LocalPublisher::new()))
}

fn params(graph: &vessel::TaskGraph, sentence: &str) -> ParameterSet {
    ParameterSet::from_assignments(
        graph.params(),
        [format!("sentence={}", sentence), "repeat=2".to_string()],
    )
    .unwrap()
}

#[cfg(unix)]
#[tokio::test]
async fn test_yaml_pipeline_on_host_shell() {
    let tmp = TempDir::new().unwrap();
    let graph = PipelineConfigBuilder::build(&YamlLoader::parse_pipeline(PIPELINE).unwrap()).unwrap();
    let params = params(&graph, "hello pipeline");
    let request = PublishRequest::new(
        "shout",
        "banner",
        Destination::new(format!("{}/out/", tmp.path().display()), "banner.txt").unwrap(),
    );

    let summary = runner(&tmp)
        .run(Arc::new(graph), &params, Some(&request))
        .await
        .unwrap();

    assert_eq!(summary.tasks.len(), 2);
    assert_eq!(summary.tasks[1].exit_code, Some(0));

    let loud = summary
        .artifacts
        .iter()
        .find(|a| a.name == "loud")
        .unwrap();
    assert_eq!(
        std::fs::read_to_string(loud.path.join("words.txt")).unwrap(),
        "HELLO PIPELINE\nHELLO PIPELINE\n"
    );

    // Task variables override global ones.
    assert_eq!(
        std::fs::read_to_string(tmp.path().join("out/banner.txt")).unwrap(),
        "hello world\n"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_substituted_values_are_shell_quoted() {
    let tmp = TempDir::new().unwrap();
    let graph = PipelineConfigBuilder::build(&YamlLoader::parse_pipeline(PIPELINE).unwrap()).unwrap();
    // Quoted as one word, the sentence yields a single line and runs nothing.
    let params = params(&graph, "two; touch injected");

    let summary = runner(&tmp)
        .run(Arc::new(graph), &params, None)
        .await
        .unwrap();

    let words = summary
        .artifacts
        .iter()
        .find(|a| a.name == "words")
        .unwrap();
    assert_eq!(
        std::fs::read_to_string(&words.path).unwrap(),
        "two; touch injected\n"
    );
    assert!(!summary.workspace.join("split").join("injected").exists());
    assert!(summary.published.is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn test_non_zero_exit_reports_status_and_stderr() {
    let tmp = TempDir::new().unwrap();
    let yaml = r#"
id: broken
tasks:
  - id: fail
    image: unused
    command: "echo boom >&2; exit 7"
"#;
    let graph = PipelineConfigBuilder::build(&YamlLoader::parse_pipeline(yaml).unwrap()).unwrap();

    let err = runner(&tmp)
        .run(Arc::new(graph), &ParameterSet::new(), None)
        .await
        .unwrap_err();

    match err {
        PipelineError::TaskExecutionFailed {
            task_id,
            exit_status,
            cause: TaskFailure::NonZeroExit { stderr, .. },
        } => {
            assert_eq!(task_id, TaskId::new("fail"));
            assert_eq!(exit_status, Some(7));
            assert_eq!(stderr.trim(), "boom");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_wrong_output_kind_is_missing_output() {
    let tmp = TempDir::new().unwrap();
    let yaml = r#"
id: kinds
tasks:
  - id: mislabel
    image: unused
    command: "echo data > result"
    outputs:
      - { name: result, kind: dir, path: result }
"#;
    let graph = PipelineConfigBuilder::build(&YamlLoader::parse_pipeline(yaml).unwrap()).unwrap();

    let err = runner(&tmp)
        .run(Arc::new(graph), &ParameterSet::new(), None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::TaskExecutionFailed {
            cause: TaskFailure::MissingOutput { .. },
            ..
        }
    ));
}
