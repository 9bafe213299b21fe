//! The [`ActionRunner`] behind real builds: HTTP and IMAP fetchers, the
//! transforms, document checks and external commands.

use crate::config::PaperConfig;
use crate::document::{CheckOptions, run_document_checks};
use crate::error::{PaperError, PipelineError, TransformError};
use crate::fetch::{
    DatatrackerClient, HttpFetcher, HttpPageSource, ImapArchive, MailArchive, mirror_folder,
    mirror_folder_list,
};
use crate::pipeline::executor::{ActionRunner, RuleJob};
use crate::pipeline::freshness::refresh_policy;
use crate::pipeline::templates::{render_args, render_string};
use crate::pipeline::types::{Action, RuleOutcome};
use crate::transform;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Lines of stderr quoted when a command fails.
const STDERR_TAIL_LINES: usize = 20;

pub struct DefaultActionRunner {
    http: HttpFetcher,
    datatracker: DatatrackerClient<HttpPageSource>,
    mail: Arc<dyn MailArchive>,
    default_max_age: Duration,
    command_timeout: Duration,
    anonymous: bool,
}

impl DefaultActionRunner {
    pub fn new(config: &PaperConfig) -> Result<Self, PaperError> {
        let http = HttpFetcher::new(&config.http)?;
        let datatracker = DatatrackerClient::new(
            &config.datatracker.base_url,
            HttpPageSource::new(http.client().clone()),
        )?;
        Ok(Self {
            http,
            datatracker,
            mail: Arc::new(ImapArchive::new(&config.mail)),
            default_max_age: Duration::from_secs(config.datatracker.cache_max_age_secs),
            command_timeout: Duration::from_secs(config.build.command_timeout_secs),
            anonymous: config.document.anonymous,
        })
    }

    /// Use a different mail archive (a local mirror, or a mock in tests).
    pub fn with_mail_archive(mut self, archive: Arc<dyn MailArchive>) -> Self {
        self.mail = archive;
        self
    }

    async fn run_command(
        &self,
        job: &RuleJob,
        program: &str,
        args: &[String],
        timeout_secs: Option<u64>,
    ) -> Result<RuleOutcome, PaperError> {
        let ctx = job.template_context();
        let program = render_string(program, &ctx)?;
        let args = render_args(args, &ctx)?;
        let timeout = timeout_secs.map_or(self.command_timeout, Duration::from_secs);
        let rule = job.rule.id.clone();

        debug!(command = %program, args = ?args, cwd = %job.root.display(), "Executing command");
        let child = tokio::process::Command::new(&program)
            .args(&args)
            .current_dir(&job.root)
            .kill_on_drop(true)
            .output();
        let output = match tokio::time::timeout(timeout, child).await {
            Err(_) => {
                return Err(PipelineError::Timeout {
                    rule,
                    timeout_secs: timeout.as_secs(),
                }
                .into());
            }
            Ok(Err(e)) => {
                return Err(PipelineError::RuleFailed {
                    rule,
                    message: format!("failed to start {program}: {e}"),
                }
                .into());
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            warn!(command = %program, exit_code, "Command exited with non-zero status");
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::RuleFailed {
                rule,
                message: format!(
                    "{program} exited with status {exit_code}\n{}",
                    tail(&stderr, STDERR_TAIL_LINES)
                ),
            }
            .into());
        }
        Ok(RuleOutcome::Built)
    }
}

#[async_trait]
impl ActionRunner for DefaultActionRunner {
    async fn run(&self, job: &RuleJob) -> Result<RuleOutcome, PaperError> {
        let rule = &job.rule;
        let inputs = job.input_paths();
        let output = job
            .output_paths()
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::RuleFailed {
                rule: rule.id.clone(),
                message: "rule has no outputs".to_string(),
            })?;

        match &rule.action {
            Action::Download { url, .. } => {
                let refresh = refresh_policy(&rule.action, self.default_max_age);
                Ok(self.http.conditional_download(url, &output, &refresh).await?)
            }
            Action::Datatracker {
                prefix, order_by, ..
            } => {
                self.datatracker
                    .download(prefix, order_by.as_deref(), &output)
                    .await?;
                Ok(RuleOutcome::Built)
            }
            Action::MailFolders => {
                mirror_folder_list(self.mail.as_ref(), &output).await?;
                Ok(RuleOutcome::Built)
            }
            Action::MailFolder { folder } => {
                mirror_folder(self.mail.as_ref(), folder, &output).await?;
                Ok(RuleOutcome::Built)
            }
            Action::MailDatabase => {
                expect_inputs(&rule.id, &inputs, 1, true)?;
                let (lists, folders) = (inputs[0].clone(), inputs[1..].to_vec());
                blocking(&rule.id, move || {
                    transform::build_mail_database(&lists, &folders, &output).map(|_| ())
                })
                .await
            }
            Action::RfcsByYear => {
                expect_inputs(&rule.id, &inputs, 1, false)?;
                let input = inputs[0].clone();
                blocking(&rule.id, move || {
                    transform::write_rfcs_by_year(&input, &output).map(|_| ())
                })
                .await
            }
            Action::DraftHistory => {
                expect_inputs(&rule.id, &inputs, 1, false)?;
                let input = inputs[0].clone();
                blocking(&rule.id, move || {
                    transform::write_draft_history(&input, &output).map(|_| ())
                })
                .await
            }
            Action::DraftsByDate => {
                expect_inputs(&rule.id, &inputs, 1, false)?;
                let input = inputs[0].clone();
                let today = chrono::Local::now().date_naive();
                blocking(&rule.id, move || {
                    transform::write_drafts_by_date(&input, &output, today)
                })
                .await
            }
            Action::DraftIndex => {
                expect_inputs(&rule.id, &inputs, 3, false)?;
                let [documents, groups, streams] =
                    [inputs[0].clone(), inputs[1].clone(), inputs[2].clone()];
                blocking(&rule.id, move || {
                    transform::write_draft_index(&documents, &groups, &streams, &output)
                        .map(|_| ())
                })
                .await
            }
            Action::DocumentChecks { anonymous } => {
                let options = CheckOptions {
                    anonymous: anonymous.unwrap_or(self.anonymous),
                };
                let sources: Vec<PathBuf> = rule.file_inputs().collect();
                let root = job.root.clone();
                blocking(&rule.id, move || {
                    run_document_checks(&root, &sources, options, &output).map(|_| ())
                })
                .await
            }
            Action::Command {
                program,
                args,
                timeout_secs,
            } => self.run_command(job, program, args, *timeout_secs).await,
        }
    }
}

/// Run a synchronous transform on the blocking pool.
async fn blocking<F>(rule: &str, f: F) -> Result<RuleOutcome, PaperError>
where
    F: FnOnce() -> Result<(), PaperError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::RuleFailed {
            rule: rule.to_string(),
            message: format!("transform task failed: {e}"),
        })??;
    Ok(RuleOutcome::Built)
}

fn expect_inputs(
    rule: &str,
    inputs: &[PathBuf],
    expected: usize,
    at_least: bool,
) -> Result<(), TransformError> {
    let ok = if at_least {
        inputs.len() >= expected
    } else {
        inputs.len() == expected
    };
    if ok {
        Ok(())
    } else {
        Err(TransformError::InputCount {
            rule: rule.to_string(),
            expected,
            found: inputs.len(),
        })
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
