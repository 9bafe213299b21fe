//! Property-based tests for the pipeline engine and transforms using proptest.

use proptest::prelude::*;

use ietfpaper_core::pipeline::expand::read_manifest;
use ietfpaper_core::pipeline::graph::RuleGraph;
use ietfpaper_core::pipeline::templates::substitute_item;
use ietfpaper_core::pipeline::types::{Action, PipelineDefinition, Rule, Stage};
use ietfpaper_core::transform::csv;
use ietfpaper_core::transform::parse_date;
use std::collections::HashSet;
use std::path::PathBuf;

fn chain(len: usize) -> PipelineDefinition {
    let rules = (0..len)
        .map(|i| Rule {
            id: format!("r{i}"),
            stage: if i == 0 { Stage::Download } else { Stage::Transform },
            description: String::new(),
            inputs: if i == 0 {
                vec![]
            } else {
                vec![format!("out/{}.txt", i - 1)]
            },
            outputs: vec![PathBuf::from(format!("out/{i}.txt"))],
            byproducts: vec![],
            action: Action::RfcsByYear,
            foreach: None,
        })
        .collect();
    PipelineDefinition {
        name: "chain".into(),
        description: String::new(),
        rules,
    }
}

// --- CSV quoting ---

proptest! {
    #[test]
    fn csv_field_unquotes_to_original(value in ".{0,40}") {
        let quoted = csv::field(&value);
        if value.contains([',', '"', '\n', '\r']) {
            prop_assert!(quoted.starts_with('"') && quoted.ends_with('"'));
            let inner = &quoted[1..quoted.len() - 1];
            prop_assert_eq!(inner.replace("\"\"", "\""), value);
        } else {
            prop_assert_eq!(quoted, value);
        }
    }

    #[test]
    fn csv_render_has_one_line_per_row(rows in proptest::collection::vec(0u32..10_000, 0..20)) {
        let out = csv::render(None, rows.iter().map(|n| vec![*n, n + 1]));
        prop_assert_eq!(out.lines().count(), rows.len());
    }
}

// --- Foreach manifests ---

proptest! {
    #[test]
    fn manifest_rejects_path_separators(
        head in "[a-z]{1,8}",
        tail in "[a-z]{1,8}",
        sep in prop_oneof![Just('/'), Just('\\')],
    ) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lists.json");
        let bad = format!("{head}{sep}{tail}");
        std::fs::write(&path, serde_json::json!({ "folders": [head.clone(), bad] }).to_string()).unwrap();
        prop_assert!(read_manifest(&path, "folders").is_err());
    }

    #[test]
    fn manifest_keeps_item_order(items in proptest::collection::vec("[a-z0-9-]{1,12}", 0..10)) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lists.json");
        std::fs::write(&path, serde_json::json!({ "folders": items }).to_string()).unwrap();
        prop_assert_eq!(read_manifest(&path, "folders").unwrap(), items);
    }

    #[test]
    fn substitute_item_replaces_every_placeholder(item in "[a-z]{1,10}", prefix in "[a-z/]{0,10}") {
        let out = substitute_item(&format!("{prefix}{{{{ item }}}}/{{{{item}}}}.json"), &item);
        prop_assert!(!out.contains("{{"));
        prop_assert_eq!(out, format!("{prefix}{item}/{item}.json"));
    }
}

// --- Dependency graph ---

proptest! {
    #[test]
    fn chain_levels_follow_dependencies(len in 1usize..12) {
        let def = chain(len);
        let graph = RuleGraph::build(&def).unwrap();
        let all: HashSet<String> = def.rules.iter().map(|r| r.id.clone()).collect();
        let levels = graph.levels(&all);
        prop_assert_eq!(levels.len(), len);
        for (i, level) in levels.iter().enumerate() {
            prop_assert_eq!(level, &vec![format!("r{i}")]);
        }
    }

    #[test]
    fn upstream_closure_of_chain_tail_is_everything(len in 1usize..12) {
        let def = chain(len);
        let graph = RuleGraph::build(&def).unwrap();
        let closure = graph.upstream_closure(&[format!("r{}", len - 1)]);
        prop_assert_eq!(closure.len(), len);
    }
}

// --- Mail dates ---

proptest! {
    #[test]
    fn parse_date_never_panics(value in ".{0,60}") {
        let _ = parse_date(&value);
    }

    #[test]
    fn parse_date_output_is_normalized(
        day in 1u32..29,
        month in 0usize..12,
        year in 1990i32..2030,
        hour in 0u32..24,
        minute in 0u32..60,
        offset in -12i32..13,
    ) {
        const MONTHS: [&str; 12] = [
            "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
        ];
        let sign = if offset < 0 { '-' } else { '+' };
        let value = format!(
            "{day} {} {year} {hour:02}:{minute:02}:00 {sign}{:02}00",
            MONTHS[month],
            offset.abs()
        );
        let parsed = parse_date(&value);
        prop_assert!(parsed.is_some(), "{}", value);
        let parsed = parsed.unwrap();
        prop_assert!(
            chrono::NaiveDateTime::parse_from_str(&parsed, "%Y-%m-%d %H:%M:%S").is_ok(),
            "{}",
            parsed
        );
    }
}
