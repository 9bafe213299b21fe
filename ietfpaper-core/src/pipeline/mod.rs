//! Pipeline engine for ietfpaper.
//!
//! Provides a declarative YAML DSL for file-based build rules, a petgraph
//! dependency graph, modification-time freshness checks, foreach expansion
//! over JSON manifests, and a level-by-level executor.

pub mod builtins;
pub mod executor;
pub mod expand;
pub mod freshness;
pub mod graph;
pub mod parser;
pub mod templates;
pub mod types;

pub use builtins::{PipelineSource, builtin_pipeline, load_pipeline};
pub use executor::{ActionRunner, ExecutorOptions, PipelineExecutor, RuleJob};
pub use expand::{Expansion, expand_foreach, read_manifest};
pub use freshness::{Staleness, check_freshness};
pub use graph::RuleGraph;
pub use parser::{parse_pipeline, validate_pipeline};
pub use types::{
    Action, BuildReport, ForEach, PipelineDefinition, Refresh, Rule, RuleOutcome, Stage, Target,
};
