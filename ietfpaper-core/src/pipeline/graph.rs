//! Rule dependency graph.
//!
//! An edge runs from the rule producing a file to every rule that reads it.
//! Foreach templates are connected to the producer of their manifest and to
//! every rule naming them through an `@` input.

use crate::error::PipelineError;
use crate::pipeline::types::PipelineDefinition;
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

pub struct RuleGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
    producers: HashMap<PathBuf, String>,
    order: Vec<String>,
}

impl RuleGraph {
    /// Build the graph for a (validated) pipeline definition.
    pub fn build(def: &PipelineDefinition) -> Result<Self, PipelineError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        let mut producers: HashMap<PathBuf, String> = HashMap::new();

        for rule in &def.rules {
            if index.contains_key(&rule.id) {
                return Err(PipelineError::ValidationFailed {
                    message: format!("Duplicate rule ID: '{}'", rule.id),
                });
            }
            let idx = graph.add_node(rule.id.clone());
            index.insert(rule.id.clone(), idx);
            for output in &rule.outputs {
                if let Some(other) = producers.insert(output.clone(), rule.id.clone()) {
                    return Err(PipelineError::ValidationFailed {
                        message: format!(
                            "Output '{}' is produced by both '{}' and '{}'",
                            output.display(),
                            other,
                            rule.id
                        ),
                    });
                }
            }
        }

        for rule in &def.rules {
            let to = index[&rule.id];
            let mut deps: Vec<&str> = Vec::new();
            for input in rule.file_inputs() {
                if let Some(producer) = producers.get(&input) {
                    deps.push(producer);
                }
            }
            for group in rule.group_inputs() {
                if !index.contains_key(group) {
                    return Err(PipelineError::ValidationFailed {
                        message: format!(
                            "Rule '{}' references unknown foreach rule '@{}'",
                            rule.id, group
                        ),
                    });
                }
                deps.push(group);
            }
            if let Some(foreach) = &rule.foreach
                && let Some(producer) = producers.get(&foreach.manifest)
            {
                deps.push(producer);
            }
            for dep in deps {
                if dep == rule.id {
                    return Err(PipelineError::Cycle {
                        rule: rule.id.clone(),
                    });
                }
                let from = index[dep];
                if !graph.contains_edge(from, to) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        let order = toposort(&graph, None)
            .map_err(|cycle| PipelineError::Cycle {
                rule: graph[cycle.node_id()].clone(),
            })?
            .into_iter()
            .map(|idx| graph[idx].clone())
            .collect();

        Ok(Self {
            graph,
            index,
            producers,
            order,
        })
    }

    /// The rule producing `path`, if any.
    pub fn producer_of(&self, path: &Path) -> Option<&str> {
        self.producers.get(path).map(String::as_str)
    }

    /// Every rule, dependencies before dependents.
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    /// Rules `id` reads from directly.
    pub fn dependencies(&self, id: &str) -> Vec<&str> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Rules reading `id`'s outputs directly.
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// The given rules plus everything they transitively depend on.
    pub fn upstream_closure<S: AsRef<str>>(&self, roots: &[S]) -> HashSet<String> {
        self.closure(roots, Direction::Incoming)
    }

    /// Everything that transitively depends on `id`, excluding `id` itself.
    pub fn downstream_closure(&self, id: &str) -> HashSet<String> {
        let mut set = self.closure(&[id], Direction::Outgoing);
        set.remove(id);
        set
    }

    /// Group `ids` into levels: every rule's dependencies inside the set sit
    /// in an earlier level. Rules within a level keep topological order.
    pub fn levels(&self, ids: &HashSet<String>) -> Vec<Vec<String>> {
        let mut depth: HashMap<&str, usize> = HashMap::new();
        let mut levels: Vec<Vec<String>> = Vec::new();
        for id in self.order.iter().filter(|id| ids.contains(*id)) {
            let d = self
                .dependencies(id)
                .into_iter()
                .filter_map(|dep| depth.get(dep))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(id.as_str(), d);
            if levels.len() <= d {
                levels.resize_with(d + 1, Vec::new);
            }
            levels[d].push(id.clone());
        }
        levels
    }

    pub fn rule_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn neighbors(&self, id: &str, dir: Direction) -> Vec<&str> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<&str> = self
            .graph
            .neighbors_directed(idx, dir)
            .map(|n| self.graph[n].as_str())
            .collect();
        out.sort_unstable();
        out
    }

    fn closure<S: AsRef<str>>(&self, roots: &[S], dir: Direction) -> HashSet<String> {
        let mut visited = HashSet::new();
        let mut stack: Vec<NodeIndex> = roots
            .iter()
            .filter_map(|r| self.index.get(r.as_ref()).copied())
            .collect();

        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            for neighbor in self.graph.neighbors_directed(node, dir) {
                stack.push(neighbor);
            }
        }

        visited.into_iter().map(|n| self.graph[n].clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::parser::parse_pipeline;

    const CHAIN: &str = r#"
name: chain
rules:
  - id: fetch
    stage: download
    outputs: [downloads/rfc-index.xml]
    action: { type: download, url: "https://example.org/rfc-index.xml" }
  - id: table
    stage: transform
    inputs: [downloads/rfc-index.xml]
    outputs: [results/rfcs-by-year.csv]
    action: { type: rfcs_by_year }
  - id: plot
    stage: plot
    inputs: [results/rfcs-by-year.csv, scripts/plot.py]
    outputs: [figures/rfcs-by-year.pdf]
    action: { type: command, program: python3, args: ["{{ inputs.1 }}", "{{ input }}", "{{ output }}"] }
  - id: other
    stage: transform
    inputs: [downloads/rfc-index.xml]
    outputs: [results/other.csv]
    action: { type: rfcs_by_year }
"#;

    fn graph() -> RuleGraph {
        RuleGraph::build(&parse_pipeline(CHAIN).unwrap()).unwrap()
    }

    #[test]
    fn test_edges_follow_files() {
        let g = graph();
        assert_eq!(g.rule_count(), 4);
        assert_eq!(g.edge_count(), 3);
        assert_eq!(g.dependencies("plot"), vec!["table"]);
        assert_eq!(g.dependents("fetch"), vec!["other", "table"]);
        assert_eq!(g.producer_of(Path::new("results/rfcs-by-year.csv")), Some("table"));
        assert_eq!(g.producer_of(Path::new("scripts/plot.py")), None);
    }

    #[test]
    fn test_topological_order() {
        let g = graph();
        let order = g.topological_order();
        let pos = |id: &str| order.iter().position(|r| r == id).unwrap();
        assert!(pos("fetch") < pos("table"));
        assert!(pos("table") < pos("plot"));
    }

    #[test]
    fn test_closures() {
        let g = graph();
        let up = g.upstream_closure(&["plot"]);
        assert_eq!(up.len(), 3);
        assert!(!up.contains("other"));

        let down = g.downstream_closure("table");
        assert_eq!(down, HashSet::from(["plot".to_string()]));
    }

    #[test]
    fn test_levels() {
        let g = graph();
        let all: HashSet<String> = g.topological_order().iter().cloned().collect();
        let levels = g.levels(&all);
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0], vec!["fetch"]);
        assert_eq!(levels[1].len(), 2);
        assert_eq!(levels[2], vec!["plot"]);
    }

    #[test]
    fn test_cycle_detected() {
        let yaml = r#"
name: cyclic
rules:
  - id: a
    stage: transform
    inputs: [b.csv]
    outputs: [a.csv]
    action: { type: rfcs_by_year }
  - id: b
    stage: transform
    inputs: [a.csv]
    outputs: [b.csv]
    action: { type: rfcs_by_year }
"#;
        let err = RuleGraph::build(&parse_pipeline(yaml).unwrap()).err().unwrap();
        assert!(matches!(err, PipelineError::Cycle { .. }));
    }

    #[test]
    fn test_duplicate_producer_rejected() {
        let yaml = r#"
name: dup
rules:
  - id: a
    stage: transform
    outputs: [x.csv]
    action: { type: rfcs_by_year }
  - id: b
    stage: transform
    outputs: [x.csv]
    action: { type: rfcs_by_year }
"#;
        let err = RuleGraph::build(&parse_pipeline(yaml).unwrap()).err().unwrap();
        assert!(err.to_string().contains("produced by both"));
    }
}
