//! YAML parser and validator for pipeline definitions.

use crate::error::PipelineError;
use crate::pipeline::graph::RuleGraph;
use crate::pipeline::types::{Action, PipelineDefinition, Stage};
use std::collections::HashSet;

/// Parse a pipeline definition from a YAML string.
pub fn parse_pipeline(yaml: &str) -> Result<PipelineDefinition, PipelineError> {
    serde_yaml::from_str::<PipelineDefinition>(yaml).map_err(|e| PipelineError::ParseError {
        message: e.to_string(),
    })
}

/// Validate a parsed pipeline definition for structural correctness.
///
/// Checks:
/// - At least one rule exists
/// - No duplicate rule IDs and every rule has an output
/// - No rule reads its own output
/// - `@` references name foreach rules
/// - Download rules read nothing
/// - Every output has a single producer and the graph is acyclic
pub fn validate_pipeline(def: &PipelineDefinition) -> Result<(), PipelineError> {
    if def.rules.is_empty() {
        return Err(PipelineError::ValidationFailed {
            message: "Pipeline must have at least one rule".to_string(),
        });
    }

    let mut seen_ids = HashSet::new();
    for rule in &def.rules {
        if !seen_ids.insert(rule.id.as_str()) {
            return Err(PipelineError::ValidationFailed {
                message: format!("Duplicate rule ID: '{}'", rule.id),
            });
        }
        if rule.id.contains('/') {
            return Err(PipelineError::ValidationFailed {
                message: format!(
                    "Rule ID '{}' must not contain '/' (reserved for foreach expansions)",
                    rule.id
                ),
            });
        }
        if rule.outputs.is_empty() {
            return Err(PipelineError::ValidationFailed {
                message: format!("Rule '{}' declares no outputs", rule.id),
            });
        }
    }

    for rule in &def.rules {
        for input in rule.file_inputs() {
            if rule.outputs.contains(&input) {
                return Err(PipelineError::ValidationFailed {
                    message: format!(
                        "Rule '{}' lists its own output '{}' as an input",
                        rule.id,
                        input.display()
                    ),
                });
            }
        }

        for group in rule.group_inputs() {
            match def.rule(group) {
                Some(target) if target.foreach.is_some() => {}
                Some(_) => {
                    return Err(PipelineError::ValidationFailed {
                        message: format!(
                            "Rule '{}' uses '@{}' but '{}' is not a foreach rule",
                            rule.id, group, group
                        ),
                    });
                }
                None => {
                    return Err(PipelineError::ValidationFailed {
                        message: format!(
                            "Rule '{}' references unknown foreach rule '@{}'",
                            rule.id, group
                        ),
                    });
                }
            }
        }

        if rule.stage == Stage::Download && !rule.inputs.is_empty() {
            let reads_manifest_only = matches!(rule.action, Action::MailFolder { .. })
                && rule.foreach.is_some();
            if !reads_manifest_only {
                return Err(PipelineError::ValidationFailed {
                    message: format!("Download rule '{}' must not declare inputs", rule.id),
                });
            }
        }

        if let Some(foreach) = &rule.foreach {
            if foreach.key.is_empty() {
                return Err(PipelineError::ValidationFailed {
                    message: format!("Foreach rule '{}' has an empty manifest key", rule.id),
                });
            }
            let templated = rule
                .outputs
                .iter()
                .all(|o| o.to_string_lossy().contains("{{"));
            if !templated {
                return Err(PipelineError::ValidationFailed {
                    message: format!(
                        "Foreach rule '{}' outputs must use '{{{{ item }}}}'",
                        rule.id
                    ),
                });
            }
        }
    }

    // Producer uniqueness and cycles are checked while building the graph.
    RuleGraph::build(def).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Refresh;
    use std::path::PathBuf;

    #[test]
    fn test_parse_minimal_pipeline() {
        let yaml = r#"
name: minimal
rules:
  - id: rfc-index
    stage: download
    outputs: [downloads/rfc-index.xml]
    action:
      type: download
      url: https://www.rfc-editor.org/rfc-index.xml
      refresh: { mode: conditional }
"#;
        let def = parse_pipeline(yaml).unwrap();
        assert_eq!(def.name, "minimal");
        assert_eq!(def.rules.len(), 1);
        assert_eq!(def.rules[0].outputs, vec![PathBuf::from("downloads/rfc-index.xml")]);
        match &def.rules[0].action {
            Action::Download { refresh, .. } => assert_eq!(*refresh, Refresh::Conditional),
            other => panic!("Expected download action, got {:?}", other),
        }
        validate_pipeline(&def).unwrap();
    }

    #[test]
    fn test_parse_foreach_rule() {
        let yaml = r#"
name: mail
rules:
  - id: lists
    stage: download
    outputs: [downloads/ietf-ma/lists.json]
    action: { type: mail_folders }
  - id: folder
    stage: download
    inputs: [downloads/ietf-ma/lists.json]
    outputs: ["downloads/ietf-ma/lists/{{ item }}.json"]
    action: { type: mail_folder, folder: "{{ item }}" }
    foreach: { manifest: downloads/ietf-ma/lists.json, key: folders }
  - id: db
    stage: transform
    inputs: [downloads/ietf-ma/lists.json, "@folder"]
    outputs: [results/ietf-ma.sqlite]
    action: { type: mail_database }
"#;
        let def = parse_pipeline(yaml).unwrap();
        validate_pipeline(&def).unwrap();
        let foreach = def.rules[1].foreach.as_ref().unwrap();
        assert_eq!(foreach.key, "folders");
    }

    #[test]
    fn test_parse_invalid_yaml_returns_error() {
        let result = parse_pipeline("this is not: valid: yaml: {{{}}}");
        match result.unwrap_err() {
            PipelineError::ParseError { .. } => {}
            other => panic!("Expected ParseError, got: {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown_action_type() {
        let yaml = r#"
name: bad
rules:
  - id: x
    stage: transform
    outputs: [x]
    action: { type: teleport }
"#;
        assert!(matches!(
            parse_pipeline(yaml),
            Err(PipelineError::ParseError { .. })
        ));
    }

    #[test]
    fn test_validate_empty_pipeline() {
        let def = parse_pipeline("name: empty\nrules: []\n").unwrap();
        let err = validate_pipeline(&def).unwrap_err();
        assert!(err.to_string().contains("at least one rule"));
    }

    #[test]
    fn test_validate_duplicate_ids() {
        let yaml = r#"
name: dupes
rules:
  - id: a
    stage: transform
    outputs: [a.csv]
    action: { type: rfcs_by_year }
  - id: a
    stage: transform
    outputs: [b.csv]
    action: { type: rfcs_by_year }
"#;
        let err = validate_pipeline(&parse_pipeline(yaml).unwrap()).unwrap_err();
        assert!(err.to_string().contains("Duplicate rule ID"));
    }

    #[test]
    fn test_validate_self_input() {
        let yaml = r#"
name: selfref
rules:
  - id: a
    stage: transform
    inputs: [a.csv]
    outputs: [a.csv]
    action: { type: rfcs_by_year }
"#;
        let err = validate_pipeline(&parse_pipeline(yaml).unwrap()).unwrap_err();
        assert!(err.to_string().contains("its own output"));
    }

    #[test]
    fn test_validate_unknown_group_reference() {
        let yaml = r#"
name: badgroup
rules:
  - id: a
    stage: transform
    inputs: ["@missing"]
    outputs: [a.csv]
    action: { type: rfcs_by_year }
"#;
        let err = validate_pipeline(&parse_pipeline(yaml).unwrap()).unwrap_err();
        assert!(err.to_string().contains("unknown foreach rule"));
    }

    #[test]
    fn test_validate_download_with_inputs() {
        let yaml = r#"
name: dl
rules:
  - id: a
    stage: download
    inputs: [x.txt]
    outputs: [a.xml]
    action: { type: download, url: "https://example.org/a.xml" }
"#;
        let err = validate_pipeline(&parse_pipeline(yaml).unwrap()).unwrap_err();
        assert!(err.to_string().contains("must not declare inputs"));
    }

    #[test]
    fn test_validate_foreach_outputs_need_item() {
        let yaml = r#"
name: fe
rules:
  - id: lists
    stage: download
    outputs: [lists.json]
    action: { type: mail_folders }
  - id: folder
    stage: download
    inputs: [lists.json]
    outputs: [fixed.json]
    action: { type: mail_folder, folder: "{{ item }}" }
    foreach: { manifest: lists.json, key: folders }
"#;
        let err = validate_pipeline(&parse_pipeline(yaml).unwrap()).unwrap_err();
        assert!(err.to_string().contains("item"));
    }
}
