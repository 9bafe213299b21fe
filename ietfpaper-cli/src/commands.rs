//! CLI command handlers.

use crate::{Commands, ConfigAction};
use ietfpaper_core::artifact::write_atomic_sync;
use ietfpaper_core::config::{PaperConfig, load_config};
use ietfpaper_core::document::{CheckOptions, check_document};
use ietfpaper_core::pipeline::ExecutorOptions;
use ietfpaper_core::transform::dump_mail_database;
use ietfpaper_core::{
    BuildReport, DefaultActionRunner, PipelineExecutor, RuleOutcome, Stage, Target, load_pipeline,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Build flags shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct BuildFlags {
    pub pipeline: Option<PathBuf>,
    pub jobs: Option<usize>,
    pub force: bool,
    pub dry_run: bool,
}

fn load_workspace_config(workspace: &Path, flags: &BuildFlags) -> anyhow::Result<PaperConfig> {
    let mut config = load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if let Some(jobs) = flags.jobs {
        config.build.jobs = jobs;
    }
    for warning in config.validate() {
        tracing::warn!(%warning, "Configuration problem");
    }
    Ok(config)
}

/// Run a build or clean target.
pub async fn build(target: Target, flags: &BuildFlags, workspace: &Path) -> anyhow::Result<()> {
    let config = load_workspace_config(workspace, flags)?;
    let (definition, source) = load_pipeline(workspace, &config, flags.pipeline.as_deref())?;
    tracing::debug!(pipeline = %source, "Using pipeline");

    let runner = Arc::new(DefaultActionRunner::new(&config)?);
    let executor = PipelineExecutor::new(definition, workspace, runner).with_options(ExecutorOptions {
        jobs: config.build.jobs.max(1),
        force: flags.force,
        dry_run: flags.dry_run,
        default_max_age: Duration::from_secs(config.datatracker.cache_max_age_secs),
    });

    let report = executor.run(target).await?;
    print_report(&report, flags.dry_run);
    Ok(())
}

fn print_report(report: &BuildReport, dry_run: bool) {
    if report.target.is_clean() {
        let verb = if dry_run { "Would remove" } else { "Removed" };
        for path in &report.removed {
            println!("{verb} {}", path.display());
        }
        println!("{}: {} file(s) removed", report.target, report.removed.len());
        return;
    }

    let pending: Vec<&str> = report
        .outcomes
        .iter()
        .filter(|(_, o)| *o == RuleOutcome::WouldBuild)
        .map(|(id, _)| id.as_str())
        .collect();
    for id in &pending {
        println!("Would build {id}");
    }
    let up_to_date = report
        .outcomes
        .iter()
        .filter(|(_, o)| matches!(o, RuleOutcome::UpToDate | RuleOutcome::Unchanged))
        .count();
    println!(
        "{}: {} built, {} up to date, {} pending ({:.1}s)",
        report.target,
        report.built().len(),
        up_to_date,
        pending.len(),
        report.elapsed.as_secs_f64()
    );
}

/// Handle a non-build subcommand.
pub async fn handle_command(
    command: Commands,
    flags: &BuildFlags,
    workspace: &Path,
) -> anyhow::Result<()> {
    match command {
        Commands::Targets => handle_targets(flags, workspace),
        Commands::Check { anonymous } => handle_check(anonymous, flags, workspace),
        Commands::MailDump { db, out } => handle_mail_dump(&db, &out, workspace),
        Commands::Config { action } => handle_config(action, flags, workspace),
        other => anyhow::bail!("{other:?} is a build target"),
    }
}

fn handle_targets(flags: &BuildFlags, workspace: &Path) -> anyhow::Result<()> {
    let config = load_workspace_config(workspace, flags)?;
    let (definition, source) = load_pipeline(workspace, &config, flags.pipeline.as_deref())?;
    println!("Pipeline {} ({source})", definition.name);
    for stage in Stage::ALL {
        let rules: Vec<_> = definition.rules.iter().filter(|r| r.stage == stage).collect();
        if rules.is_empty() {
            continue;
        }
        println!("\n{stage}:");
        for rule in rules {
            let foreach = rule
                .foreach
                .as_ref()
                .map(|f| format!(" [foreach {}]", f.manifest.display()))
                .unwrap_or_default();
            let outputs: Vec<String> = rule
                .outputs
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            println!(
                "  {:<24} {:<16} -> {}{}",
                rule.id,
                rule.action.kind(),
                outputs.join(", "),
                foreach
            );
        }
    }
    Ok(())
}

fn handle_check(anonymous: bool, flags: &BuildFlags, workspace: &Path) -> anyhow::Result<()> {
    let config = load_workspace_config(workspace, flags)?;
    let options = CheckOptions {
        anonymous: anonymous || config.document.anonymous,
    };
    let report = check_document(workspace, &config.document.sources, options)?;
    let rendered = report.render();
    write_atomic_sync(&workspace.join(&config.document.report), &rendered)?;
    print!("{rendered}");
    if report.has_errors() {
        anyhow::bail!("{} document check error(s)", report.error_count());
    }
    Ok(())
}

fn handle_mail_dump(db: &Path, out: &Path, workspace: &Path) -> anyhow::Result<()> {
    let rows = dump_mail_database(&workspace.join(db), &workspace.join(out))?;
    println!("Wrote {rows} row(s) to {}", out.display());
    Ok(())
}

fn handle_config(action: ConfigAction, flags: &BuildFlags, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let mut config = load_workspace_config(workspace, flags)?;
            if !config.mail.password.is_empty() {
                config.mail.password = "********".to_string();
            }
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}
