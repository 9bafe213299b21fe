//! Foreach expansion.
//!
//! A foreach rule is a template: once its manifest exists, it is replaced
//! by one concrete rule per manifest item, and `@<template>` inputs are
//! replaced by the concrete outputs.

use crate::error::PipelineError;
use crate::pipeline::templates::substitute_item;
use crate::pipeline::types::{Action, PipelineDefinition, Rule};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Result of expanding a definition against the workspace.
#[derive(Debug, Clone)]
pub struct Expansion {
    /// The definition with every expandable template replaced.
    pub definition: PipelineDefinition,
    /// Templates whose manifest does not exist yet. They stay in
    /// `definition` unexpanded.
    pub pending: Vec<String>,
}

/// Read the string items stored at `key` in a JSON manifest.
pub fn read_manifest(path: &Path, key: &str) -> Result<Vec<String>, PipelineError> {
    let invalid = |message: String| PipelineError::InvalidManifest {
        path: path.to_path_buf(),
        message,
    };
    let text = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
    let value: Value = serde_json::from_str(&text).map_err(|e| invalid(e.to_string()))?;
    let items = value
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| invalid(format!("no array at key '{key}'")))?;

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let Some(s) = item.as_str() else {
            return Err(invalid(format!("non-string item {item}")));
        };
        if s.is_empty() || s == "." || s == ".." || s.contains('/') || s.contains('\\') {
            return Err(invalid(format!("item '{s}' is not usable in a file name")));
        }
        out.push(s.to_string());
    }
    Ok(out)
}

/// Expand every foreach template whose manifest exists under `root`.
pub fn expand_foreach(def: &PipelineDefinition, root: &Path) -> Result<Expansion, PipelineError> {
    let mut pending = Vec::new();
    let mut groups: HashMap<String, Vec<String>> = HashMap::new();
    let mut rules = Vec::with_capacity(def.rules.len());

    for rule in &def.rules {
        let Some(foreach) = &rule.foreach else {
            rules.push(rule.clone());
            continue;
        };
        let manifest = root.join(&foreach.manifest);
        if !manifest.exists() {
            pending.push(rule.id.clone());
            rules.push(rule.clone());
            continue;
        }

        let items = read_manifest(&manifest, &foreach.key)?;
        let mut outputs = Vec::new();
        for item in &items {
            let concrete = instantiate(rule, item)?;
            outputs.extend(
                concrete
                    .outputs
                    .iter()
                    .map(|p| p.to_string_lossy().into_owned()),
            );
            rules.push(concrete);
        }
        tracing::debug!(template = %rule.id, items = items.len(), "Expanded foreach rule");
        groups.insert(rule.id.clone(), outputs);
    }

    for rule in &mut rules {
        if rule.group_inputs().all(|g| !groups.contains_key(g)) {
            continue;
        }
        let mut inputs = Vec::with_capacity(rule.inputs.len());
        for input in &rule.inputs {
            match input.strip_prefix('@').and_then(|g| groups.get(g)) {
                Some(expanded) => inputs.extend(expanded.iter().cloned()),
                None => inputs.push(input.clone()),
            }
        }
        rule.inputs = inputs;
    }

    Ok(Expansion {
        definition: PipelineDefinition {
            name: def.name.clone(),
            description: def.description.clone(),
            rules,
        },
        pending,
    })
}

/// Id of the concrete rule for `item` of template `template`.
pub fn expanded_id(template: &str, item: &str) -> String {
    format!("{template}/{item}")
}

/// The template an expanded rule id came from.
pub fn template_of(id: &str) -> Option<&str> {
    id.split_once('/').map(|(t, _)| t)
}

fn instantiate(rule: &Rule, item: &str) -> Result<Rule, PipelineError> {
    Ok(Rule {
        id: expanded_id(&rule.id, item),
        stage: rule.stage,
        description: substitute_item(&rule.description, item),
        inputs: rule.inputs.iter().map(|i| substitute_item(i, item)).collect(),
        outputs: substitute_paths(&rule.outputs, item),
        byproducts: substitute_paths(&rule.byproducts, item),
        action: substitute_action(&rule.action, item)?,
        foreach: None,
    })
}

fn substitute_paths(paths: &[PathBuf], item: &str) -> Vec<PathBuf> {
    paths
        .iter()
        .map(|p| PathBuf::from(substitute_item(&p.to_string_lossy(), item)))
        .collect()
}

/// Substitute `{{ item }}` in every string field of an action.
fn substitute_action(action: &Action, item: &str) -> Result<Action, PipelineError> {
    let template_error = |e: serde_json::Error| PipelineError::TemplateError {
        message: e.to_string(),
    };
    let mut value = serde_json::to_value(action).map_err(template_error)?;
    substitute_value(&mut value, item);
    serde_json::from_value(value).map_err(template_error)
}

fn substitute_value(value: &mut Value, item: &str) {
    match value {
        Value::String(s) => *s = substitute_item(s, item),
        Value::Array(items) => items.iter_mut().for_each(|v| substitute_value(v, item)),
        Value::Object(map) => map.values_mut().for_each(|v| substitute_value(v, item)),
        _ => {}
    }
}
