//! Pipeline type definitions.
//!
//! Defines the declarative rule model: pipeline definitions, rules, stages,
//! actions, and the outcome types reported by the executor.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// A complete pipeline definition parsed from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub rules: Vec<Rule>,
}

impl PipelineDefinition {
    pub fn rule(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }
}

/// One node of the dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub stage: Stage,
    #[serde(default)]
    pub description: String,
    /// Files read by the action. `@<id>` names every output of a foreach rule.
    #[serde(default)]
    pub inputs: Vec<String>,
    pub outputs: Vec<PathBuf>,
    /// Files the action leaves behind that are removed by `clean` but never
    /// take part in freshness checks (compiler aux files and the like).
    #[serde(default)]
    pub byproducts: Vec<PathBuf>,
    pub action: Action,
    #[serde(default)]
    pub foreach: Option<ForEach>,
}

impl Rule {
    /// Inputs that name files directly (everything but `@` references).
    pub fn file_inputs(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.inputs
            .iter()
            .filter(|i| !i.starts_with('@'))
            .map(PathBuf::from)
    }

    /// Ids of foreach templates this rule depends on through `@` inputs.
    pub fn group_inputs(&self) -> impl Iterator<Item = &str> + '_ {
        self.inputs.iter().filter_map(|i| i.strip_prefix('@'))
    }
}

/// Expansion of a rule template over the items of a JSON manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForEach {
    pub manifest: PathBuf,
    pub key: String,
}

/// Pipeline stage a rule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Transform,
    Plot,
    Compile,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Download, Stage::Transform, Stage::Plot, Stage::Compile];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Download => write!(f, "download"),
            Stage::Transform => write!(f, "transform"),
            Stage::Plot => write!(f, "plot"),
            Stage::Compile => write!(f, "compile"),
        }
    }
}

/// How a download rule decides that its cached output needs refreshing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum Refresh {
    /// Fetch only when the output is missing.
    #[default]
    Missing,
    /// Always ask the server, sending the cached file's mtime as
    /// `If-Modified-Since`.
    Conditional,
    /// Fetch again once the cached copy is older than `secs`.
    MaxAge { secs: u64 },
}

/// What a rule does when it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Action {
    /// Plain HTTP download of a single resource.
    Download {
        url: String,
        #[serde(default)]
        refresh: Refresh,
    },
    /// Paged datatracker API listing.
    Datatracker {
        prefix: String,
        #[serde(default)]
        order_by: Option<String>,
        #[serde(default)]
        max_age_secs: Option<u64>,
    },
    /// Folder list of the IMAP mail archive.
    MailFolders,
    /// Every message in one mail archive folder.
    MailFolder { folder: String },
    /// SQLite database built from the mirrored mail archive.
    MailDatabase,
    RfcsByYear,
    DraftHistory,
    DraftsByDate,
    DraftIndex,
    /// LaTeX lint passes over the document sources.
    DocumentChecks {
        #[serde(default)]
        anonymous: Option<bool>,
    },
    /// Opaque external command (plot scripts, the document compiler).
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

impl Action {
    /// Short name used in logs and listings.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Download { .. } => "download",
            Action::Datatracker { .. } => "datatracker",
            Action::MailFolders => "mail_folders",
            Action::MailFolder { .. } => "mail_folder",
            Action::MailDatabase => "mail_database",
            Action::RfcsByYear => "rfcs_by_year",
            Action::DraftHistory => "draft_history",
            Action::DraftsByDate => "drafts_by_date",
            Action::DraftIndex => "draft_index",
            Action::DocumentChecks { .. } => "document_checks",
            Action::Command { .. } => "command",
        }
    }
}

/// Named build targets exposed on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Target {
    #[default]
    All,
    FetchData,
    GenerateResults,
    GenerateFigures,
    Clean,
    CleanData,
}

impl Target {
    /// Stages whose rules are the roots of this target. Cleaning targets
    /// return the stages whose artifacts they delete.
    pub fn stages(&self) -> &'static [Stage] {
        match self {
            Target::All => &Stage::ALL,
            Target::FetchData => &[Stage::Download],
            Target::GenerateResults => &[Stage::Transform],
            Target::GenerateFigures => &[Stage::Plot],
            Target::Clean => &[Stage::Transform, Stage::Plot, Stage::Compile],
            Target::CleanData => &Stage::ALL,
        }
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, Target::Clean | Target::CleanData)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::All => write!(f, "all"),
            Target::FetchData => write!(f, "fetch-data"),
            Target::GenerateResults => write!(f, "generate-results"),
            Target::GenerateFigures => write!(f, "generate-figures"),
            Target::Clean => write!(f, "clean"),
            Target::CleanData => write!(f, "clean-data"),
        }
    }
}

impl std::str::FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Target::All),
            "fetch-data" => Ok(Target::FetchData),
            "generate-results" => Ok(Target::GenerateResults),
            "generate-figures" => Ok(Target::GenerateFigures),
            "clean" => Ok(Target::Clean),
            "clean-data" => Ok(Target::CleanData),
            other => Err(format!("unknown target '{other}'")),
        }
    }
}

/// What happened to a rule during a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOutcome {
    /// The action ran and (re)wrote its outputs.
    Built,
    /// The action ran but the outputs were already current (HTTP 304).
    Unchanged,
    /// Nothing to do.
    UpToDate,
    /// Stale, but the build was a dry run.
    WouldBuild,
}

impl RuleOutcome {
    /// Whether downstream rules must treat this rule's outputs as new.
    pub fn changed(&self) -> bool {
        matches!(self, RuleOutcome::Built | RuleOutcome::WouldBuild)
    }
}

impl fmt::Display for RuleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleOutcome::Built => write!(f, "built"),
            RuleOutcome::Unchanged => write!(f, "unchanged"),
            RuleOutcome::UpToDate => write!(f, "up to date"),
            RuleOutcome::WouldBuild => write!(f, "would build"),
        }
    }
}

/// Summary of a build or clean run.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub target: Target,
    pub outcomes: Vec<(String, RuleOutcome)>,
    pub removed: Vec<PathBuf>,
    pub elapsed: Duration,
}

impl BuildReport {
    pub fn outcome(&self, rule: &str) -> Option<RuleOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == rule)
            .map(|(_, o)| *o)
    }

    /// Ids of rules whose action actually ran and produced new output.
    pub fn built(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == RuleOutcome::Built)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}
