//! Template expression engine for rule arguments.
//!
//! Supports `{{ input }}`, `{{ inputs }}`, `{{ inputs.N }}`, `{{ output }}`,
//! `{{ outputs }}`, `{{ outputs.N }}` and `{{ item }}` (foreach rules).

use crate::error::PipelineError;
use std::path::{Path, PathBuf};

/// Values available to a rule's templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    pub item: Option<String>,
}

impl TemplateContext {
    pub fn new(inputs: Vec<PathBuf>, outputs: Vec<PathBuf>) -> Self {
        Self {
            inputs,
            outputs,
            item: None,
        }
    }

    pub fn with_item(mut self, item: impl Into<String>) -> Self {
        self.item = Some(item.into());
        self
    }
}

/// Render template expressions in a string, replacing `{{ ... }}` patterns.
pub fn render_string(template: &str, ctx: &TemplateContext) -> Result<String, PipelineError> {
    let mut result = String::new();
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let end = after_open
            .find("}}")
            .ok_or_else(|| PipelineError::TemplateError {
                message: format!("Unclosed template expression in: {}", template),
            })?;
        let expr = after_open[..end].trim();
        result.push_str(&resolve_expression(expr, ctx)?);
        rest = &after_open[end + 2..];
    }
    result.push_str(rest);

    Ok(result)
}

/// Render a list of arguments. An argument that is exactly `{{ inputs }}`
/// or `{{ outputs }}` expands to one argument per path.
pub fn render_args(args: &[String], ctx: &TemplateContext) -> Result<Vec<String>, PipelineError> {
    let mut rendered = Vec::with_capacity(args.len());
    for arg in args {
        match whole_expression(arg) {
            Some("inputs") => rendered.extend(ctx.inputs.iter().map(path_string)),
            Some("outputs") => rendered.extend(ctx.outputs.iter().map(path_string)),
            _ => rendered.push(render_string(arg, ctx)?),
        }
    }
    Ok(rendered)
}

/// Substitute `{{ item }}` only, leaving every other expression in place.
/// Used when expanding foreach templates, before inputs are known.
pub fn substitute_item(template: &str, item: &str) -> String {
    let mut out = template.to_string();
    for pattern in ["{{ item }}", "{{item}}"] {
        out = out.replace(pattern, item);
    }
    out
}

/// The expression name if `arg` consists of a single template expression.
fn whole_expression(arg: &str) -> Option<&str> {
    let trimmed = arg.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

fn resolve_expression(expr: &str, ctx: &TemplateContext) -> Result<String, PipelineError> {
    let (name, index) = match expr.split_once('.') {
        Some((name, idx)) => {
            let idx: usize = idx.parse().map_err(|_| PipelineError::TemplateError {
                message: format!("Invalid index in expression: {}", expr),
            })?;
            (name, Some(idx))
        }
        None => (expr, None),
    };

    match (name, index) {
        ("input", None) => first(&ctx.inputs, "input"),
        ("output", None) => first(&ctx.outputs, "output"),
        ("inputs", None) => Ok(join(&ctx.inputs)),
        ("outputs", None) => Ok(join(&ctx.outputs)),
        ("inputs", Some(i)) => nth(&ctx.inputs, i, "inputs"),
        ("outputs", Some(i)) => nth(&ctx.outputs, i, "outputs"),
        ("item", None) => ctx
            .item
            .clone()
            .ok_or_else(|| PipelineError::TemplateError {
                message: "'item' is only available in foreach rules".to_string(),
            }),
        _ => Err(PipelineError::TemplateError {
            message: format!("Unknown template variable: {}", expr),
        }),
    }
}

fn first(paths: &[PathBuf], what: &str) -> Result<String, PipelineError> {
    paths
        .first()
        .map(path_string)
        .ok_or_else(|| PipelineError::TemplateError {
            message: format!("Rule has no {}", what),
        })
}

fn nth(paths: &[PathBuf], i: usize, what: &str) -> Result<String, PipelineError> {
    paths
        .get(i)
        .map(path_string)
        .ok_or_else(|| PipelineError::TemplateError {
            message: format!("{}.{} is out of range ({} available)", what, i, paths.len()),
        })
}

fn join(paths: &[PathBuf]) -> String {
    paths.iter().map(path_string).collect::<Vec<_>>().join(" ")
}

fn path_string(p: impl AsRef<Path>) -> String {
    p.as_ref().to_string_lossy().into_owned()
}
