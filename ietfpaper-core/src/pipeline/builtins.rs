//! Built-in IETF paper pipeline and pipeline loading.
//!
//! The embedded definition uses `$downloads`, `$results` and `$figures` as
//! directory placeholders, `$rfc_index_url` for the index location, and
//! `$document_sources`, `$document_report` and `$jobname` for the LaTeX
//! side. All are filled in from [`PaperConfig`]. A pipeline file in the
//! workspace replaces the built-in one entirely.

use crate::config::PaperConfig;
use crate::error::{ConfigError, PaperError, PipelineError};
use crate::pipeline::parser::{parse_pipeline, validate_pipeline};
use crate::pipeline::types::PipelineDefinition;
use std::path::{Path, PathBuf};

/// Where a loaded pipeline came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineSource {
    Builtin,
    File(PathBuf),
}

impl std::fmt::Display for PipelineSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineSource::Builtin => write!(f, "built-in"),
            PipelineSource::File(p) => write!(f, "{}", p.display()),
        }
    }
}

/// The built-in pipeline with directories and URLs taken from `config`.
pub fn builtin_pipeline(config: &PaperConfig) -> Result<PipelineDefinition, PipelineError> {
    let paths = &config.paths;
    let document = &config.document;
    if document.sources.is_empty() {
        return Err(PipelineError::ValidationFailed {
            message: "document.sources is empty; the paper has no main file".to_string(),
        });
    }
    // The first source is the file handed to the compiler, and names the
    // files it writes into the workspace.
    let jobname = document.sources[0]
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "paper".to_string());
    let sources = document
        .sources
        .iter()
        .map(|p| yaml_string(&p.to_string_lossy()))
        .collect::<Vec<_>>()
        .join(", ");
    let yaml = IETF_PAPER_PIPELINE
        .replace("$document_sources", &sources)
        .replace("$document_report", &yaml_string(&document.report.to_string_lossy()))
        .replace("$jobname", &jobname)
        .replace("$rfc_index_url", &config.rfc_index.url)
        .replace("$downloads", &dir_string(&paths.downloads_dir))
        .replace("$results", &dir_string(&paths.results_dir))
        .replace("$figures", &dir_string(&paths.figures_dir));
    parse_pipeline(&yaml)
}

/// Load the pipeline for a workspace.
///
/// `explicit` (from the command line) must exist. Otherwise the configured
/// pipeline file is used when present, and the built-in pipeline when not.
pub fn load_pipeline(
    root: &Path,
    config: &PaperConfig,
    explicit: Option<&Path>,
) -> Result<(PipelineDefinition, PipelineSource), PaperError> {
    let file = match explicit {
        Some(p) => {
            let path = root.join(p);
            if !path.exists() {
                return Err(ConfigError::FileNotFound { path }.into());
            }
            Some(path)
        }
        None => Some(root.join(&config.paths.pipeline_file)).filter(|p| p.exists()),
    };

    let (def, source) = match file {
        Some(path) => {
            let yaml = std::fs::read_to_string(&path)?;
            (parse_pipeline(&yaml)?, PipelineSource::File(path))
        }
        None => (builtin_pipeline(config)?, PipelineSource::Builtin),
    };
    validate_pipeline(&def)?;
    tracing::debug!(source = %source, rules = def.rules.len(), "Loaded pipeline");
    Ok((def, source))
}

/// A double-quoted YAML scalar (JSON strings are valid YAML).
fn yaml_string(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

fn dir_string(p: &Path) -> String {
    p.to_string_lossy().trim_end_matches('/').to_string()
}

const IETF_PAPER_PIPELINE: &str = r#"
name: ietf-paper
description: Datasets, figures and the compiled paper on IETF activity
rules:
  - id: rfc-index
    stage: download
    description: RFC Editor index of every published RFC
    outputs: [$downloads/rfc-index.xml]
    action:
      type: download
      url: "$rfc_index_url"
      refresh: { mode: conditional }

  - id: dt-documents
    stage: download
    description: Datatracker document listing
    outputs: [$downloads/datatracker/doc-document.json]
    action: { type: datatracker, prefix: api/v1/doc/document/, order_by: id }

  - id: dt-groups
    stage: download
    outputs: [$downloads/datatracker/group-group.json]
    action: { type: datatracker, prefix: api/v1/group/group/, order_by: id }

  - id: dt-streams
    stage: download
    outputs: [$downloads/datatracker/name-streamname.json]
    action: { type: datatracker, prefix: api/v1/name/streamname/ }

  - id: dt-revisions
    stage: download
    description: New-revision events for every document
    outputs: [$downloads/datatracker/doc-newrevisiondocevent.json]
    action: { type: datatracker, prefix: api/v1/doc/newrevisiondocevent/, order_by: id }

  - id: mail-lists
    stage: download
    description: Folder list of the IETF mail archive
    outputs: [$downloads/ietf-ma/lists.json]
    action: { type: mail_folders }

  - id: mail-folder
    stage: download
    outputs: ["$downloads/ietf-ma/lists/{{ item }}.json"]
    action: { type: mail_folder, folder: "{{ item }}" }
    foreach: { manifest: $downloads/ietf-ma/lists.json, key: folders }

  - id: rfcs-by-year
    stage: transform
    inputs: [$downloads/rfc-index.xml]
    outputs: [$results/rfcs-by-year.csv]
    action: { type: rfcs_by_year }

  - id: draft-history
    stage: transform
    inputs: [$downloads/datatracker/doc-newrevisiondocevent.json]
    outputs: [$results/draft-history.json]
    action: { type: draft_history }

  - id: drafts-by-date
    stage: transform
    inputs: [$results/draft-history.json]
    outputs: [$results/drafts-by-date.csv]
    action: { type: drafts_by_date }

  - id: draft-index
    stage: transform
    inputs:
      - $downloads/datatracker/doc-document.json
      - $downloads/datatracker/group-group.json
      - $downloads/datatracker/name-streamname.json
    outputs: [$results/ietf-drafts.json]
    action: { type: draft_index }

  - id: mail-database
    stage: transform
    inputs: [$downloads/ietf-ma/lists.json, "@mail-folder"]
    outputs: [$results/ietf-ma.sqlite]
    action: { type: mail_database }

  - id: plot-rfcs-by-year
    stage: plot
    inputs: [$results/rfcs-by-year.csv, scripts/plot-rfcs-by-year.py]
    outputs: [$figures/rfcs-by-year.pdf]
    action:
      type: command
      program: python3
      args: ["{{ inputs.1 }}", "{{ input }}", "{{ output }}"]

  - id: plot-drafts-by-date
    stage: plot
    inputs: [$results/drafts-by-date.csv, scripts/plot-drafts-by-date.py]
    outputs: [$figures/drafts-by-date.pdf]
    action:
      type: command
      program: python3
      args: ["{{ inputs.1 }}", "{{ input }}", "{{ output }}"]

  - id: check-paper
    stage: compile
    description: Duplicate words, leftover TODOs and acknowledgements
    inputs: [$document_sources]
    outputs: [$document_report]
    action: { type: document_checks }

  - id: paper
    stage: compile
    inputs:
      [$document_sources, $document_report, $figures/rfcs-by-year.pdf, $figures/drafts-by-date.pdf]
    outputs: [$jobname.pdf]
    byproducts:
      - $jobname.aux
      - $jobname.bbl
      - $jobname.blg
      - $jobname.fdb_latexmk
      - $jobname.fls
      - $jobname.log
      - $jobname.out
    action:
      type: command
      program: latexmk
      args: ["-pdf", "-interaction=nonstopmode", "{{ input }}"]
"#;
