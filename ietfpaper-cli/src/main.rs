//! ietfpaper CLI: build driver for the IETF data paper.
//!
//! Every build target brings the requested part of the pipeline up to date;
//! the remaining subcommands inspect the pipeline or run single steps.

mod commands;

use clap::Parser;
use ietfpaper_core::Target;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Download IETF data, derive the results and figures, compile the paper
#[derive(Parser, Debug)]
#[command(name = "ietfpaper", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Pipeline file, relative to the workspace (default: configured file or built-in)
    #[arg(short, long, global = true)]
    pipeline: Option<PathBuf>,

    /// Maximum number of rules running at once
    #[arg(short, long, global = true)]
    jobs: Option<usize>,

    /// Rebuild every rule regardless of freshness
    #[arg(short = 'B', long, global = true)]
    force: bool,

    /// Show what would run without running it
    #[arg(short = 'n', long, global = true)]
    dry_run: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only report errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Build everything up to the compiled paper (default)
    All,
    /// Download the raw data
    FetchData,
    /// Derive the result tables and the mail database
    GenerateResults,
    /// Plot the figures
    GenerateFigures,
    /// Remove results, figures and the compiled paper; keep downloads
    Clean,
    /// Remove every artifact, downloads included
    CleanData,
    /// List the pipeline's rules per stage
    Targets,
    /// Run the document checks on the configured sources
    Check {
        /// Flag acknowledgement sections (overrides document.anonymous)
        #[arg(long)]
        anonymous: bool,
    },
    /// Dump a mail archive database as text
    MailDump {
        /// SQLite database built by the mail_database rule
        db: PathBuf,
        /// Output text file
        out: PathBuf,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
}

impl Commands {
    /// The pipeline target behind a build subcommand.
    fn target(&self) -> Option<Target> {
        match self {
            Commands::All => Some(Target::All),
            Commands::FetchData => Some(Target::FetchData),
            Commands::GenerateResults => Some(Target::GenerateResults),
            Commands::GenerateFigures => Some(Target::GenerateFigures),
            Commands::Clean => Some(Target::Clean),
            Commands::CleanData => Some(Target::CleanData),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("org", "ietfpaper", "ietfpaper")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "ietfpaper.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .map_err(|e| anyhow::anyhow!("Workspace {}: {}", cli.workspace.display(), e))?;

    let options = commands::BuildFlags {
        pipeline: cli.pipeline,
        jobs: cli.jobs,
        force: cli.force,
        dry_run: cli.dry_run,
    };

    let command = cli.command.unwrap_or(Commands::All);
    if let Some(target) = command.target() {
        return commands::build(target, &options, &workspace).await;
    }
    commands::handle_command(command, &options, &workspace).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_command_is_all() {
        let cli = Cli::parse_from(["ietfpaper"]);
        assert!(cli.command.is_none());
        assert_eq!(Commands::All.target(), Some(Target::All));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["ietfpaper", "generate-figures", "-B", "-n", "-j", "2"]);
        assert!(cli.force);
        assert!(cli.dry_run);
        assert_eq!(cli.jobs, Some(2));
        assert_eq!(
            cli.command.and_then(|c| c.target()),
            Some(Target::GenerateFigures)
        );
    }

    #[test]
    fn test_mail_dump_arguments() {
        let cli = Cli::parse_from(["ietfpaper", "mail-dump", "results/ma.sqlite", "ma.txt"]);
        match cli.command {
            Some(Commands::MailDump { db, out }) => {
                assert_eq!(db, PathBuf::from("results/ma.sqlite"));
                assert_eq!(out, PathBuf::from("ma.txt"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_non_build_commands_have_no_target() {
        assert_eq!(Commands::Targets.target(), None);
        assert_eq!(
            Commands::Config {
                action: ConfigAction::Show
            }
            .target(),
            None
        );
    }
}
