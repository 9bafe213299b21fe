//! Modification-time freshness checks.
//!
//! A derived artifact is valid only while none of its declared inputs is
//! newer than it. Download rules have no inputs; their refresh policy says
//! when the cached copy must be fetched again.

use crate::error::PipelineError;
use crate::pipeline::types::{Action, Refresh, Rule, Stage};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Why a rule has to run, or that it does not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    MissingOutput(PathBuf),
    /// An input is produced by another rule that has not run yet.
    MissingInput(PathBuf),
    NewerInput { input: PathBuf, output: PathBuf },
    Expired { output: PathBuf },
    /// An upstream rule rebuilt its outputs during this run.
    UpstreamChanged(String),
    /// The cached output exists; the server decides whether it changed.
    RemoteCheck,
    Forced,
    UpToDate,
}

impl Staleness {
    pub fn is_stale(&self) -> bool {
        !matches!(self, Staleness::UpToDate)
    }
}

impl std::fmt::Display for Staleness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Staleness::MissingOutput(p) => write!(f, "output {} is missing", p.display()),
            Staleness::MissingInput(p) => write!(f, "input {} is not built yet", p.display()),
            Staleness::NewerInput { input, output } => write!(
                f,
                "{} is newer than {}",
                input.display(),
                output.display()
            ),
            Staleness::Expired { output } => write!(f, "{} is past its max age", output.display()),
            Staleness::UpstreamChanged(rule) => write!(f, "{rule} was rebuilt"),
            Staleness::RemoteCheck => write!(f, "asking the server for changes"),
            Staleness::Forced => write!(f, "forced"),
            Staleness::UpToDate => write!(f, "up to date"),
        }
    }
}

/// The refresh policy a download-stage rule follows.
pub fn refresh_policy(action: &Action, default_max_age: Duration) -> Refresh {
    match action {
        Action::Download { refresh, .. } => refresh.clone(),
        Action::Datatracker { max_age_secs, .. } => Refresh::MaxAge {
            secs: max_age_secs.unwrap_or(default_max_age.as_secs()),
        },
        _ => Refresh::Missing,
    }
}

/// Decide whether `rule` must run.
///
/// Paths are resolved against `root`. `has_producer` tells whether some
/// other rule builds a given input; inputs nobody builds must exist.
pub fn check_freshness(
    rule: &Rule,
    root: &Path,
    has_producer: impl Fn(&Path) -> bool,
    default_max_age: Duration,
    now: SystemTime,
    force: bool,
) -> Result<Staleness, PipelineError> {
    let mut newest_input: Option<(SystemTime, PathBuf)> = None;
    let mut missing_input = None;
    for input in rule.file_inputs() {
        match mtime(&root.join(&input)) {
            Some(t) => {
                if newest_input.as_ref().is_none_or(|(n, _)| t > *n) {
                    newest_input = Some((t, input));
                }
            }
            None if has_producer(&input) => {
                missing_input.get_or_insert(input);
            }
            None => {
                return Err(PipelineError::MissingSource {
                    rule: rule.id.clone(),
                    path: input,
                });
            }
        }
    }

    if force {
        return Ok(Staleness::Forced);
    }

    let mut oldest_output: Option<(SystemTime, PathBuf)> = None;
    for output in &rule.outputs {
        match mtime(&root.join(output)) {
            Some(t) => {
                if oldest_output.as_ref().is_none_or(|(o, _)| t < *o) {
                    oldest_output = Some((t, output.clone()));
                }
            }
            None => return Ok(Staleness::MissingOutput(output.clone())),
        }
    }

    if let Some(input) = missing_input {
        return Ok(Staleness::MissingInput(input));
    }

    let Some((oldest, output)) = oldest_output else {
        return Ok(Staleness::UpToDate);
    };

    if let Some((newest, input)) = newest_input
        && newest > oldest
    {
        return Ok(Staleness::NewerInput { input, output });
    }

    if rule.stage == Stage::Download {
        match refresh_policy(&rule.action, default_max_age) {
            Refresh::Missing => {}
            Refresh::Conditional => return Ok(Staleness::RemoteCheck),
            Refresh::MaxAge { secs } => {
                let age = now.duration_since(oldest).unwrap_or_default();
                if age > Duration::from_secs(secs) {
                    return Ok(Staleness::Expired { output });
                }
            }
        }
    }

    Ok(Staleness::UpToDate)
}

/// Modification time of `path`, or `None` when it does not exist.
pub fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Set the modification time of an existing file.
pub fn set_mtime(path: &Path, time: SystemTime) -> std::io::Result<()> {
    std::fs::File::options()
        .write(true)
        .open(path)?
        .set_modified(time)
}
