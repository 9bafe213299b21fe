//! End-to-end builds of a small workspace with the real action runner:
//! workspace config, a workspace pipeline file, external commands and the
//! document checks.

use ietfpaper_core::error::{PaperError, PipelineError};
use ietfpaper_core::pipeline::ExecutorOptions;
use ietfpaper_core::{
    DefaultActionRunner, PipelineExecutor, PipelineSource, RuleOutcome, Target, load_config,
    load_pipeline,
};
use std::path::Path;
use std::sync::Arc;

const PIPELINE: &str = r#"
name: small-paper
rules:
  - id: sizes
    stage: transform
    inputs: [data/raw.txt]
    outputs: [out/sizes.txt]
    action:
      type: command
      program: sh
      args: ["-c", "wc -l < {{ input }} > {{ output }}"]

  - id: check-paper
    stage: transform
    inputs: [paper.tex]
    outputs: [out/paper-checks.txt]
    action: { type: document_checks }

  - id: paper
    stage: compile
    inputs: [paper.tex, out/sizes.txt, out/paper-checks.txt]
    outputs: [paper.pdf]
    action:
      type: command
      program: cp
      args: ["{{ inputs.0 }}", "{{ output }}"]
"#;

fn workspace(config: &str, paper: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join(".ietfpaper")).unwrap();
    std::fs::write(root.join(".ietfpaper/config.toml"), config).unwrap();
    std::fs::write(root.join("paper.yaml"), PIPELINE).unwrap();
    std::fs::create_dir_all(root.join("data")).unwrap();
    std::fs::write(root.join("data/raw.txt"), "a\nb\nc\n").unwrap();
    std::fs::write(root.join("paper.tex"), paper).unwrap();
    dir
}

fn executor(root: &Path) -> PipelineExecutor {
    let config = load_config(Some(root), None).unwrap();
    let (definition, source) = load_pipeline(root, &config, None).unwrap();
    assert!(matches!(source, PipelineSource::File(_)));
    let runner = Arc::new(DefaultActionRunner::new(&config).unwrap());
    PipelineExecutor::new(definition, root, runner).with_options(ExecutorOptions {
        jobs: config.build.jobs,
        ..ExecutorOptions::default()
    })
}

#[tokio::test]
async fn test_workspace_builds_with_commands_and_checks() {
    let ws = workspace("[build]\njobs = 2\n", "\\section{Data}\nWe count lines.\n");
    let root = ws.path();

    let report = executor(root).run(Target::All).await.unwrap();
    assert_eq!(report.outcome("paper"), Some(RuleOutcome::Built));
    assert_eq!(
        std::fs::read_to_string(root.join("out/sizes.txt")).unwrap().trim(),
        "3"
    );
    assert_eq!(
        std::fs::read_to_string(root.join("paper.pdf")).unwrap(),
        "\\section{Data}\nWe count lines.\n"
    );
    assert!(
        std::fs::read_to_string(root.join("out/paper-checks.txt"))
            .unwrap()
            .ends_with("1 file(s) checked, 0 error(s), 0 warning(s)\n")
    );

    let again = executor(root).run(Target::All).await.unwrap();
    assert!(again.built().is_empty());
}

#[tokio::test]
async fn test_failed_check_blocks_compile() {
    let ws = workspace("", "It is is broken.\n");
    let root = ws.path();

    let err = executor(root).run(Target::All).await.unwrap_err();
    match err {
        PaperError::Pipeline(PipelineError::RuleFailed { rule, message }) => {
            assert_eq!(rule, "check-paper");
            assert!(message.contains("1"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!root.join("paper.pdf").exists());
    assert!(!root.join("out/paper-checks.txt").exists());
}

#[tokio::test]
async fn test_anonymous_flag_comes_from_workspace_config() {
    let paper = "Text.\n\\section*{Acknowledgements}\nThanks.\n";

    let ws = workspace("", paper);
    executor(ws.path()).run(Target::All).await.unwrap();

    let ws = workspace("[document]\nanonymous = true\n", paper);
    let err = executor(ws.path()).run(Target::All).await.unwrap_err();
    assert!(err.to_string().contains("check-paper"), "{err}");
}

#[tokio::test]
async fn test_clean_keeps_sources() {
    let ws = workspace("", "Fine.\n");
    let root = ws.path();
    executor(root).run(Target::All).await.unwrap();

    let report = executor(root).run(Target::Clean).await.unwrap();
    assert_eq!(report.removed.len(), 3);
    assert!(!root.join("paper.pdf").exists());
    assert!(!root.join("out/sizes.txt").exists());
    assert!(root.join("paper.tex").exists());
    assert!(root.join("data/raw.txt").exists());
}
