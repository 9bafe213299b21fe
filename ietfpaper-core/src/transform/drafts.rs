//! Internet-Draft tables built from datatracker listings: revision history,
//! daily counts of active drafts, and the draft index.

use crate::artifact::write_atomic_sync;
use crate::error::{PaperError, TransformError};
use crate::transform::csv;
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// How long the latest revision of a draft counts as active.
pub const LATEST_REVISION_WEEKS: i64 = 24;

/// First day counted by [`drafts_by_date`].
pub fn counting_origin() -> NaiveDate {
    NaiveDate::from_ymd_opt(1969, 1, 1).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftRevision {
    pub draft: String,
    pub revision: String,
    pub date: NaiveDate,
}

/// Revision history of one draft, newest revision first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftHistory {
    pub name: String,
    pub history: Vec<DraftRevision>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftIndexEntry {
    pub name: String,
    pub title: Option<String>,
    pub pages: Option<u64>,
    pub rev: Option<String>,
    pub group: Option<String>,
    pub stream: Option<String>,
    pub path: String,
}

/// Group datatracker new-revision events by draft.
///
/// Events name their document by resource URI
/// (`/api/v1/doc/document/<name>/`); only `draft-*` documents are kept.
/// Drafts come out sorted by name, each history newest first.
pub fn draft_history(events: &[Value]) -> Result<Vec<DraftHistory>, String> {
    let mut by_draft: BTreeMap<String, Vec<(String, DraftRevision)>> = BTreeMap::new();
    for event in events {
        let Some(doc) = event.get("doc").and_then(Value::as_str) else {
            continue;
        };
        let name = last_segment(doc);
        if !name.starts_with("draft-") {
            continue;
        }
        let revision = event
            .get("rev")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("{name}: revision event without 'rev'"))?;
        let time = event
            .get("time")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("{name}: revision event without 'time'"))?;
        let date = time
            .get(..10)
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .ok_or_else(|| format!("{name}: invalid time '{time}'"))?;
        by_draft.entry(name.to_string()).or_default().push((
            time.to_string(),
            DraftRevision {
                draft: name.to_string(),
                revision: revision.to_string(),
                date,
            },
        ));
    }

    Ok(by_draft
        .into_iter()
        .map(|(name, mut revisions)| {
            revisions.sort_by(|(ta, a), (tb, b)| {
                tb.cmp(ta).then_with(|| b.revision.cmp(&a.revision))
            });
            DraftHistory {
                name,
                history: revisions.into_iter().map(|(_, r)| r).collect(),
            }
        })
        .collect())
}

/// Yearly minimum, mean and maximum of the number of active drafts.
///
/// A revision is active from its date up to and including the date of the
/// next newer revision; the newest revision stays active for
/// [`LATEST_REVISION_WEEKS`]. Every day from 1969-01-01 up to but excluding
/// `today` is counted. Output lines are `year,min,avg,max` without a header,
/// `avg` being the floor of the daily mean.
pub fn drafts_by_date(drafts: &[DraftHistory], today: NaiveDate) -> String {
    let origin = counting_origin();
    let days = (today - origin).num_days();
    if days <= 0 {
        return String::new();
    }

    // Keyed by "<draft>-<rev>" so a repeated revision keeps its last span.
    let mut spans: HashMap<String, (NaiveDate, NaiveDate)> = HashMap::new();
    for draft in drafts {
        let mut newer_start: Option<NaiveDate> = None;
        for rev in &draft.history {
            let start = rev.date;
            let until = newer_start.unwrap_or(start + Duration::weeks(LATEST_REVISION_WEEKS));
            spans.insert(format!("{}-{}", rev.draft, rev.revision), (start, until));
            newer_start = Some(start);
        }
    }

    let mut delta = vec![0i64; days as usize + 1];
    for (start, until) in spans.values() {
        let first = (*start - origin).num_days().max(0);
        let last = (*until - origin).num_days().min(days - 1);
        if first <= last {
            delta[first as usize] += 1;
            delta[last as usize + 1] -= 1;
        }
    }

    // year -> (min, max, total, days)
    let mut years: BTreeMap<i32, (i64, i64, i64, i64)> = BTreeMap::new();
    let mut active = 0i64;
    for (offset, change) in delta.iter().take(days as usize).enumerate() {
        active += change;
        let year = (origin + Duration::days(offset as i64)).year();
        let stats = years.entry(year).or_insert((i64::MAX, 0, 0, 0));
        stats.0 = stats.0.min(active);
        stats.1 = stats.1.max(active);
        stats.2 += active;
        stats.3 += 1;
    }

    csv::render::<_, i64>(
        None,
        years
            .into_iter()
            .map(|(year, (min, max, total, n))| vec![year as i64, min, total / n, max]),
    )
}

/// Archive directory for a draft, derived from its name.
pub fn draft_path(name: &str) -> String {
    let parts: Vec<&str> = name.split('-').collect();
    if parts.len() < 3 {
        "data/ietf/drafts/unknown".to_string()
    } else if name.starts_with("draft-ietf-") {
        format!("data/ietf/drafts/ietf/{}", parts[2])
    } else if name.starts_with("draft-irtf-") {
        format!("data/ietf/drafts/irtf/{}", parts[2])
    } else if name.starts_with("draft-iab-") {
        "data/ietf/drafts/iab".to_string()
    } else {
        format!("data/ietf/drafts/individual/{}", parts[1])
    }
}

/// Join the document, group and stream listings into the draft index.
pub fn draft_index(documents: &[Value], groups: &[Value], streams: &[Value]) -> Vec<DraftIndexEntry> {
    let group_acronyms = by_resource_uri(groups, "acronym");
    let stream_slugs = by_resource_uri(streams, "slug");

    let mut entries: Vec<DraftIndexEntry> = documents
        .iter()
        .filter(|doc| is_draft(doc))
        .filter_map(|doc| {
            let name = doc.get("name")?.as_str()?.to_string();
            let group = doc
                .get("group")
                .and_then(Value::as_str)
                .map(|uri| {
                    group_acronyms
                        .get(uri)
                        .cloned()
                        .unwrap_or_else(|| last_segment(uri).to_string())
                })
                .filter(|acronym| acronym != "none");
            let stream = doc.get("stream").and_then(Value::as_str).map(|uri| {
                stream_slugs
                    .get(uri)
                    .cloned()
                    .unwrap_or_else(|| last_segment(uri).to_string())
            });
            Some(DraftIndexEntry {
                path: draft_path(&name),
                title: string_field(doc, "title"),
                pages: doc.get("pages").and_then(Value::as_u64),
                rev: string_field(doc, "rev"),
                group,
                stream,
                name,
            })
        })
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

pub fn write_draft_history(input: &Path, output: &Path) -> Result<usize, PaperError> {
    let events = read_array(input)?;
    let history = draft_history(&events).map_err(|message| invalid(input, message))?;
    write_atomic_sync(output, serde_json::to_vec_pretty(&history)?)?;
    Ok(history.len())
}

pub fn write_drafts_by_date(input: &Path, output: &Path, today: NaiveDate) -> Result<(), PaperError> {
    let text = std::fs::read_to_string(input)?;
    let drafts: Vec<DraftHistory> =
        serde_json::from_str(&text).map_err(|e| invalid(input, e.to_string()))?;
    write_atomic_sync(output, drafts_by_date(&drafts, today))?;
    Ok(())
}

pub fn write_draft_index(
    documents: &Path,
    groups: &Path,
    streams: &Path,
    output: &Path,
) -> Result<usize, PaperError> {
    let index = draft_index(
        &read_array(documents)?,
        &read_array(groups)?,
        &read_array(streams)?,
    );
    write_atomic_sync(output, serde_json::to_vec_pretty(&index)?)?;
    Ok(index.len())
}

/// Read a JSON file holding an array of objects.
pub fn read_array(path: &Path) -> Result<Vec<Value>, PaperError> {
    let text = std::fs::read_to_string(path)?;
    match serde_json::from_str::<Value>(&text).map_err(|e| invalid(path, e.to_string()))? {
        Value::Array(items) => Ok(items),
        _ => Err(invalid(path, "expected a JSON array".to_string()).into()),
    }
}

fn invalid(path: &Path, message: String) -> TransformError {
    TransformError::InvalidInput {
        path: path.to_path_buf(),
        message,
    }
}

fn is_draft(doc: &Value) -> bool {
    match doc.get("type").and_then(Value::as_str) {
        Some(t) => t.trim_end_matches('/').ends_with("/draft"),
        None => doc
            .get("name")
            .and_then(Value::as_str)
            .is_some_and(|n| n.starts_with("draft-")),
    }
}

fn string_field(doc: &Value, key: &str) -> Option<String> {
    doc.get(key).and_then(Value::as_str).map(str::to_string)
}

fn by_resource_uri(objects: &[Value], field: &str) -> HashMap<String, String> {
    objects
        .iter()
        .filter_map(|o| {
            let uri = o.get("resource_uri")?.as_str()?;
            let value = o.get(field)?.as_str()?;
            Some((uri.to_string(), value.to_string()))
        })
        .collect()
}

/// `draft-foo` from `/api/v1/doc/document/draft-foo/`.
fn last_segment(uri: &str) -> &str {
    uri.trim_end_matches('/').rsplit('/').next().unwrap_or(uri)
}
