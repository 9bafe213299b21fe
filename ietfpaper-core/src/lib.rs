//! # ietfpaper core
//!
//! Build engine for a research paper on IETF activity. Rules declared in a
//! YAML pipeline download the raw data (RFC index, datatracker listings,
//! the IMAP mail archive), transform it into tables and a SQLite database,
//! plot figures and compile the paper, rebuilding only what is stale.

pub mod artifact;
pub mod config;
pub mod document;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod runner;
pub mod transform;

// Re-export commonly used types at the crate root.
pub use config::{PaperConfig, load_config};
pub use document::{CheckOptions, CheckReport, check_document};
pub use error::{PaperError, Result};
pub use pipeline::{
    ActionRunner, BuildReport, PipelineDefinition, PipelineExecutor, PipelineSource, Rule,
    RuleOutcome, Stage, Target, load_pipeline,
};
pub use runner::DefaultActionRunner;
