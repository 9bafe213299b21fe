//! Pipeline executor: resolves a target to a rule set, decides which rules
//! are stale and runs them level by level.

use crate::artifact::remove_temp_siblings;
use crate::error::{PaperError, PipelineError};
use crate::pipeline::expand::{expand_foreach, read_manifest};
use crate::pipeline::freshness::{Staleness, check_freshness, mtime};
use crate::pipeline::graph::RuleGraph;
use crate::pipeline::parser::validate_pipeline;
use crate::pipeline::templates::{TemplateContext, substitute_item};
use crate::pipeline::types::{BuildReport, PipelineDefinition, Rule, RuleOutcome, Stage, Target};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A stale rule handed to the [`ActionRunner`].
#[derive(Debug, Clone)]
pub struct RuleJob {
    pub rule: Rule,
    /// Workspace root every rule path is relative to.
    pub root: PathBuf,
    pub staleness: Staleness,
}

impl RuleJob {
    pub fn input_paths(&self) -> Vec<PathBuf> {
        self.rule.file_inputs().map(|p| self.root.join(p)).collect()
    }

    pub fn output_paths(&self) -> Vec<PathBuf> {
        self.rule.outputs.iter().map(|p| self.root.join(p)).collect()
    }

    /// Template values with workspace-relative paths, for commands that run
    /// with the workspace as their working directory.
    pub fn template_context(&self) -> TemplateContext {
        TemplateContext::new(self.rule.file_inputs().collect(), self.rule.outputs.clone())
    }
}

/// Runs the action of a single rule.
/// Abstracts over the real fetchers and transforms for testability.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    /// Produce the rule's outputs. Returns `Unchanged` when the action
    /// confirmed that existing outputs are current.
    async fn run(&self, job: &RuleJob) -> Result<RuleOutcome, PaperError>;
}

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Maximum number of rules running at once.
    pub jobs: usize,
    /// Treat every rule as stale.
    pub force: bool,
    /// Report what would run without running it.
    pub dry_run: bool,
    /// Cache window for datatracker listings without their own.
    pub default_max_age: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            force: false,
            dry_run: false,
            default_max_age: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Outcomes collected across the phases of one build.
#[derive(Default)]
struct RunState {
    outcomes: Vec<(String, RuleOutcome)>,
    /// Rules whose dependents must rebuild.
    changed: HashSet<String>,
}

impl RunState {
    fn record(&mut self, id: &str, outcome: RuleOutcome, propagate: bool) {
        if propagate {
            self.changed.insert(id.to_string());
        }
        self.outcomes.push((id.to_string(), outcome));
    }

    fn contains(&self, id: &str) -> bool {
        self.outcomes.iter().any(|(r, _)| r == id)
    }
}

pub struct PipelineExecutor {
    definition: PipelineDefinition,
    root: PathBuf,
    runner: Arc<dyn ActionRunner>,
    options: ExecutorOptions,
    download_lock: Arc<Mutex<()>>,
}

impl PipelineExecutor {
    pub fn new(
        definition: PipelineDefinition,
        root: impl Into<PathBuf>,
        runner: Arc<dyn ActionRunner>,
    ) -> Self {
        Self {
            definition,
            root: root.into(),
            runner,
            options: ExecutorOptions::default(),
            download_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build or clean `target`.
    pub async fn run(&self, target: Target) -> Result<BuildReport, PaperError> {
        if target.is_clean() {
            self.clean(target).await
        } else {
            self.build(target).await
        }
    }

    /// Bring every rule needed by `target` up to date.
    pub async fn build(&self, target: Target) -> Result<BuildReport, PaperError> {
        let started = Instant::now();
        validate_pipeline(&self.definition)?;
        info!(
            pipeline = %self.definition.name,
            target = %target,
            dry_run = self.options.dry_run,
            "Starting build"
        );

        let mut state = RunState::default();

        // Phase 1: manifests of the foreach templates the target needs.
        let raw = RuleGraph::build(&self.definition)?;
        let needed = raw.upstream_closure(&self.roots(&self.definition, target));
        let templates: Vec<&Rule> = self
            .definition
            .rules
            .iter()
            .filter(|r| r.foreach.is_some() && needed.contains(&r.id))
            .collect();
        if !templates.is_empty() {
            let producers: Vec<String> = templates
                .iter()
                .filter_map(|r| r.foreach.as_ref())
                .filter_map(|f| raw.producer_of(&f.manifest))
                .map(str::to_string)
                .collect();
            let manifest_set = raw.upstream_closure(&producers);
            if let Some(nested) = templates.iter().find(|t| manifest_set.contains(&t.id)) {
                return Err(PipelineError::ValidationFailed {
                    message: format!(
                        "The manifest of a foreach rule depends on foreach rule '{}'",
                        nested.id
                    ),
                }
                .into());
            }
            self.run_set(&self.definition, &raw, &manifest_set, &mut state)
                .await?;
        }

        // Phase 2: everything else, with templates expanded.
        let expansion = expand_foreach(&self.definition, &self.root)?;
        if !self.options.dry_run
            && let Some(id) = expansion.pending.iter().find(|id| needed.contains(*id))
        {
            let manifest = self
                .definition
                .rule(id)
                .and_then(|r| r.foreach.as_ref())
                .map(|f| f.manifest.clone())
                .unwrap_or_default();
            return Err(PipelineError::InvalidManifest {
                path: manifest,
                message: format!("no rule created it for foreach rule '{id}'"),
            }
            .into());
        }
        let graph = RuleGraph::build(&expansion.definition)?;
        let mut set = graph.upstream_closure(&self.roots(&expansion.definition, target));
        set.retain(|id| !state.contains(id));
        self.run_set(&expansion.definition, &graph, &set, &mut state)
            .await?;

        let report = BuildReport {
            target,
            outcomes: state.outcomes,
            removed: Vec::new(),
            elapsed: started.elapsed(),
        };
        info!(
            target = %target,
            rules = report.outcomes.len(),
            built = report.built().len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Build finished"
        );
        Ok(report)
    }

    /// Delete the artifacts of the stages `target` cleans. Missing files
    /// are ignored; in a dry run nothing is deleted.
    pub async fn clean(&self, target: Target) -> Result<BuildReport, PaperError> {
        let started = Instant::now();
        let stages = target.stages();
        let mut paths: Vec<PathBuf> = Vec::new();

        // Collect everything first: a manifest may itself be cleaned.
        for rule in self.definition.rules.iter().filter(|r| stages.contains(&r.stage)) {
            match &rule.foreach {
                None => {
                    paths.extend(rule.outputs.iter().cloned());
                    paths.extend(rule.byproducts.iter().cloned());
                }
                Some(foreach) => {
                    let manifest = self.root.join(&foreach.manifest);
                    if !manifest.exists() {
                        continue;
                    }
                    for item in read_manifest(&manifest, &foreach.key)? {
                        for p in rule.outputs.iter().chain(&rule.byproducts) {
                            paths.push(PathBuf::from(substitute_item(&p.to_string_lossy(), &item)));
                        }
                    }
                }
            }
        }

        let mut removed = Vec::new();
        for rel in paths {
            let path = self.root.join(&rel);
            let Ok(meta) = tokio::fs::symlink_metadata(&path).await else {
                continue;
            };
            if !self.options.dry_run {
                if meta.is_dir() {
                    tokio::fs::remove_dir_all(&path).await?;
                } else {
                    tokio::fs::remove_file(&path).await?;
                }
                remove_temp_siblings(&path);
            }
            debug!(path = %rel.display(), "Removed artifact");
            removed.push(rel);
        }

        info!(target = %target, removed = removed.len(), "Clean finished");
        Ok(BuildReport {
            target,
            outcomes: Vec::new(),
            removed,
            elapsed: started.elapsed(),
        })
    }

    /// Ids of the rules a target asks for directly.
    fn roots(&self, def: &PipelineDefinition, target: Target) -> Vec<String> {
        let stages = target.stages();
        def.rules
            .iter()
            .filter(|r| stages.contains(&r.stage))
            .map(|r| r.id.clone())
            .collect()
    }

    async fn run_set(
        &self,
        def: &PipelineDefinition,
        graph: &RuleGraph,
        ids: &HashSet<String>,
        state: &mut RunState,
    ) -> Result<(), PaperError> {
        let rules: HashMap<&str, &Rule> = def.rules.iter().map(|r| (r.id.as_str(), r)).collect();
        let now = SystemTime::now();

        for level in graph.levels(ids) {
            let mut jobs = Vec::new();
            for id in &level {
                let Some(rule) = rules.get(id.as_str()) else {
                    return Err(PipelineError::UnknownRule { rule: id.clone() }.into());
                };
                let mut staleness = check_freshness(
                    rule,
                    &self.root,
                    |p| graph.producer_of(p).is_some(),
                    self.options.default_max_age,
                    now,
                    self.options.force,
                )?;
                if !staleness.is_stale()
                    && let Some(dep) = graph
                        .dependencies(id)
                        .into_iter()
                        .find(|d| state.changed.contains(*d))
                {
                    staleness = Staleness::UpstreamChanged(dep.to_string());
                }
                debug!(rule = %id, decision = %staleness, "Freshness checked");

                if !staleness.is_stale() {
                    state.record(id, RuleOutcome::UpToDate, false);
                } else if self.options.dry_run {
                    let propagate = staleness != Staleness::RemoteCheck;
                    state.record(id, RuleOutcome::WouldBuild, propagate);
                } else {
                    jobs.push(RuleJob {
                        rule: (*rule).clone(),
                        root: self.root.clone(),
                        staleness,
                    });
                }
            }
            if jobs.is_empty() {
                continue;
            }

            let abort = AtomicBool::new(false);
            let mut results = futures::stream::iter(jobs)
                .map(|job| self.execute(job, &abort))
                .buffer_unordered(self.options.jobs.max(1));

            let mut first_error = None;
            while let Some((id, result)) = results.next().await {
                match result {
                    Ok(Some(outcome)) => state.record(&id, outcome, outcome.changed()),
                    Ok(None) => debug!(rule = %id, "Skipped after an earlier failure"),
                    Err(e) => {
                        abort.store(true, Ordering::SeqCst);
                        first_error.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = first_error {
                return Err(e);
            }
        }
        Ok(())
    }

    /// Run one job. `Ok(None)` means it was not started because another
    /// rule had already failed.
    async fn execute(
        &self,
        job: RuleJob,
        abort: &AtomicBool,
    ) -> (String, Result<Option<RuleOutcome>, PaperError>) {
        let id = job.rule.id.clone();
        if abort.load(Ordering::SeqCst) {
            return (id, Ok(None));
        }
        let _download = match job.rule.stage {
            Stage::Download => Some(self.download_lock.lock().await),
            _ => None,
        };
        if abort.load(Ordering::SeqCst) {
            return (id, Ok(None));
        }

        let outputs = job.output_paths();
        let before: Vec<(PathBuf, Option<SystemTime>)> =
            outputs.iter().map(|p| (p.clone(), mtime(p))).collect();
        for path in &outputs {
            if let Some(parent) = path.parent()
                && let Err(e) = tokio::fs::create_dir_all(parent).await
            {
                return (id, Err(e.into()));
            }
        }

        info!(
            rule = %id,
            stage = %job.rule.stage,
            action = job.rule.action.kind(),
            reason = %job.staleness,
            "Running rule"
        );
        let started = Instant::now();
        let result = match self.runner.run(&job).await {
            Ok(outcome) => match outputs.iter().find(|p| !p.exists()) {
                Some(missing) => Err(PipelineError::RuleFailed {
                    rule: id.clone(),
                    message: format!("finished without creating {}", missing.display()),
                }
                .into()),
                None => Ok(outcome),
            },
            Err(e) => Err(name_rule(&id, e)),
        };

        match result {
            Ok(outcome) => {
                info!(
                    rule = %id,
                    outcome = %outcome,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Rule finished"
                );
                (id, Ok(Some(outcome)))
            }
            Err(e) => {
                let removed = discard_partial_outputs(&before);
                if !removed.is_empty() {
                    warn!(rule = %id, removed = ?removed, "Discarded partial output");
                }
                (id, Err(e))
            }
        }
    }
}

/// Make sure a rule failure names the rule.
fn name_rule(id: &str, error: PaperError) -> PaperError {
    match error {
        PaperError::Pipeline(
            e @ (PipelineError::RuleFailed { .. } | PipelineError::Timeout { .. }),
        ) => e.into(),
        other => PipelineError::RuleFailed {
            rule: id.to_string(),
            message: other.to_string(),
        }
        .into(),
    }
}

/// Delete outputs that were created or rewritten during a failed attempt,
/// plus leftover temporary siblings. Untouched outputs are kept.
fn discard_partial_outputs(before: &[(PathBuf, Option<SystemTime>)]) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    for (path, previous) in before {
        let current = mtime(path);
        if current.is_some() && current != *previous && std::fs::remove_file(path).is_ok() {
            removed.push(path.clone());
        }
        removed.extend(remove_temp_siblings(path));
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::parser::parse_pipeline;
    use std::sync::Mutex as StdMutex;

    /// Writes every output and records the order rules ran in.
    struct MockRunner {
        ran: StdMutex<Vec<String>>,
        fail: Option<String>,
    }

    impl MockRunner {
        fn new() -> Self {
            Self {
                ran: StdMutex::new(Vec::new()),
                fail: None,
            }
        }

        fn failing(rule: &str) -> Self {
            Self {
                ran: StdMutex::new(Vec::new()),
                fail: Some(rule.to_string()),
            }
        }

        fn ran(&self) -> Vec<String> {
            self.ran.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ActionRunner for MockRunner {
        async fn run(&self, job: &RuleJob) -> Result<RuleOutcome, PaperError> {
            self.ran.lock().unwrap().push(job.rule.id.clone());
            for out in job.output_paths() {
                std::fs::write(&out, job.rule.id.as_bytes())?;
            }
            if self.fail.as_deref() == Some(job.rule.id.as_str()) {
                return Err(std::io::Error::other("boom").into());
            }
            Ok(RuleOutcome::Built)
        }
    }

    const YAML: &str = r#"
name: small
rules:
  - id: fetch
    stage: download
    outputs: [downloads/index.xml]
    action: { type: download, url: "https://example.org/index.xml" }
  - id: table
    stage: transform
    inputs: [downloads/index.xml]
    outputs: [results/table.csv]
    action: { type: rfcs_by_year }
  - id: plot
    stage: plot
    inputs: [results/table.csv]
    outputs: [figures/table.pdf]
    action: { type: command, program: "true" }
"#;

    fn executor(dir: &Path, runner: Arc<MockRunner>) -> PipelineExecutor {
        PipelineExecutor::new(parse_pipeline(YAML).unwrap(), dir, runner)
    }

    #[tokio::test]
    async fn test_build_all_runs_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockRunner::new());
        let report = executor(dir.path(), runner.clone())
            .build(Target::All)
            .await
            .unwrap();
        assert_eq!(runner.ran(), vec!["fetch", "table", "plot"]);
        assert_eq!(report.built(), vec!["fetch", "table", "plot"]);
        assert!(dir.path().join("figures/table.pdf").exists());
    }

    #[tokio::test]
    async fn test_target_includes_upstream_only() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockRunner::new());
        executor(dir.path(), runner.clone())
            .build(Target::GenerateResults)
            .await
            .unwrap();
        assert_eq!(runner.ran(), vec!["fetch", "table"]);
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockRunner::new());
        let report = executor(dir.path(), runner.clone())
            .with_options(ExecutorOptions {
                dry_run: true,
                ..Default::default()
            })
            .build(Target::All)
            .await
            .unwrap();
        assert!(runner.ran().is_empty());
        assert_eq!(report.outcome("plot"), Some(RuleOutcome::WouldBuild));
        assert!(!dir.path().join("downloads").exists());
    }

    #[tokio::test]
    async fn test_failure_removes_partial_output_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockRunner::failing("table"));
        let err = executor(dir.path(), runner.clone())
            .build(Target::All)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'table'"));
        assert_eq!(runner.ran(), vec!["fetch", "table"]);
        assert!(dir.path().join("downloads/index.xml").exists());
        assert!(!dir.path().join("results/table.csv").exists());
    }

    #[tokio::test]
    async fn test_clean_keeps_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockRunner::new());
        let exec = executor(dir.path(), runner);
        exec.build(Target::All).await.unwrap();

        let report = exec.clean(Target::Clean).await.unwrap();
        assert_eq!(report.removed.len(), 2);
        assert!(dir.path().join("downloads/index.xml").exists());
        assert!(!dir.path().join("results/table.csv").exists());

        let report = exec.clean(Target::CleanData).await.unwrap();
        assert_eq!(report.removed, vec![PathBuf::from("downloads/index.xml")]);
    }

    #[test]
    fn test_name_rule_wraps_other_errors() {
        let err = name_rule("plot", std::io::Error::other("exit 1").into());
        assert_eq!(err.to_string(), "Pipeline error: Rule 'plot' failed: IO error: exit 1");
        let timeout: PaperError = PipelineError::Timeout {
            rule: "compile".into(),
            timeout_secs: 5,
        }
        .into();
        assert!(name_rule("x", timeout).to_string().contains("'compile'"));
    }
}
