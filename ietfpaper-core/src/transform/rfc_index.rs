//! RFC Editor index parsing and the RFCs-per-year table.

use crate::error::TransformError;
use crate::transform::csv;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// The fields of an `<rfc-entry>` the tables need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RfcEntry {
    pub doc_id: String,
    pub year: u32,
    pub stream: String,
    pub area: Option<String>,
}

/// Parse every `<rfc-entry>` in an RFC index document.
pub fn parse_rfc_index(xml: &str) -> Result<Vec<RfcEntry>, String> {
    let mut entries = Vec::new();
    for block in extract_blocks(xml, "rfc-entry") {
        let doc_id = extract_tag_text(block, "doc-id")
            .ok_or_else(|| "rfc-entry without doc-id".to_string())?;
        let year = extract_tag_text(block, "year")
            .and_then(|y| y.parse().ok())
            .ok_or_else(|| format!("{doc_id}: missing or invalid year"))?;
        let stream = extract_tag_text(block, "stream")
            .ok_or_else(|| format!("{doc_id}: missing stream"))?;
        let area = extract_tag_text(block, "area").filter(|a| !a.is_empty());
        entries.push(RfcEntry {
            doc_id,
            year,
            stream,
            area,
        });
    }
    Ok(entries)
}

/// Count RFCs per year, in total, per stream and per area.
///
/// Columns are `Year,Total`, then the streams, then the areas, each group
/// sorted by name. Years with no RFC in a column get a zero.
pub fn rfcs_by_year(entries: &[RfcEntry]) -> String {
    let streams: BTreeSet<&str> = entries.iter().map(|e| e.stream.as_str()).collect();
    let areas: BTreeSet<&str> = entries.iter().filter_map(|e| e.area.as_deref()).collect();

    let mut years: BTreeMap<u32, (usize, BTreeMap<&str, usize>, BTreeMap<&str, usize>)> =
        BTreeMap::new();
    for e in entries {
        let (total, by_stream, by_area) = years.entry(e.year).or_default();
        *total += 1;
        *by_stream.entry(e.stream.as_str()).or_default() += 1;
        if let Some(area) = e.area.as_deref() {
            *by_area.entry(area).or_default() += 1;
        }
    }

    let header: Vec<String> = ["Year", "Total"]
        .into_iter()
        .chain(streams.iter().copied())
        .chain(areas.iter().copied())
        .map(str::to_string)
        .collect();
    let rows = years.iter().map(|(year, (total, by_stream, by_area))| {
        let mut row = vec![year.to_string(), total.to_string()];
        row.extend(streams.iter().map(|s| by_stream.get(s).copied().unwrap_or(0).to_string()));
        row.extend(areas.iter().map(|a| by_area.get(a).copied().unwrap_or(0).to_string()));
        row
    });
    csv::render(Some(header.as_slice()), rows)
}

/// Read an RFC index file and write the per-year table.
pub fn write_rfcs_by_year(input: &Path, output: &Path) -> Result<usize, crate::error::PaperError> {
    let xml = std::fs::read_to_string(input)?;
    let entries = parse_rfc_index(&xml).map_err(|message| TransformError::InvalidInput {
        path: input.to_path_buf(),
        message,
    })?;
    crate::artifact::write_atomic_sync(output, rfcs_by_year(&entries))?;
    Ok(entries.len())
}

/// All `<tag>...</tag>` blocks, in document order.
fn extract_blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let start_tag = format!("<{tag}>");
    let end_tag = format!("</{tag}>");
    let mut blocks = Vec::new();
    let mut search_from = 0;

    while let Some(pos) = xml[search_from..].find(&start_tag) {
        let start = search_from + pos;
        let Some(end) = xml[start..].find(&end_tag) else {
            break;
        };
        let end = start + end + end_tag.len();
        blocks.push(&xml[start..end]);
        search_from = end;
    }
    blocks
}

/// Text of the first `<tag>` element, which may carry attributes.
fn extract_tag_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut from = 0;
    loop {
        let start_pos = xml[from..].find(&open)? + from;
        let after = &xml[start_pos + open.len()..];
        // Skip tags that only share the prefix (`<area` vs `<areas>`).
        if !after.starts_with(['>', ' ', '\t', '\n', '\r']) {
            from = start_pos + open.len();
            continue;
        }
        let content_start = xml[start_pos..].find('>')? + start_pos + 1;
        let content_end = xml[content_start..].find(&close)? + content_start;
        return Some(decode_entities(xml[content_start..content_end].trim()));
    }
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const INDEX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rfc-index xmlns="http://www.rfc-editor.org/rfc-index">
  <bcp-entry><doc-id>BCP0001</doc-id></bcp-entry>
  <rfc-entry>
    <doc-id>RFC0001</doc-id>
    <title>Host Software</title>
    <date><month>April</month><year>1969</year></date>
    <current-status>UNKNOWN</current-status>
    <stream>Legacy</stream>
  </rfc-entry>
  <rfc-entry>
    <doc-id>RFC8999</doc-id>
    <title>Version-Independent Properties of QUIC</title>
    <date><month>May</month><year>2021</year></date>
    <obsoleted-by><doc-id>RFC9999</doc-id></obsoleted-by>
    <stream>IETF</stream>
    <area>tsv</area>
    <wg_acronym>quic</wg_acronym>
  </rfc-entry>
  <rfc-entry>
    <doc-id>RFC9000</doc-id>
    <title>QUIC &amp; friends</title>
    <date><month>May</month><year>2021</year></date>
    <stream>IETF</stream>
    <area>tsv</area>
  </rfc-entry>
  <rfc-entry>
    <doc-id>RFC9001</doc-id>
    <date><month>May</month><year>2021</year></date>
    <stream>IRTF</stream>
  </rfc-entry>
</rfc-index>
"#;

    #[test]
    fn test_parse_entries() {
        let entries = parse_rfc_index(INDEX).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].doc_id, "RFC0001");
        assert_eq!(entries[0].year, 1969);
        assert_eq!(entries[0].area, None);
        assert_eq!(entries[1].doc_id, "RFC8999");
        assert_eq!(entries[1].area.as_deref(), Some("tsv"));
    }

    #[test]
    fn test_rfcs_by_year_zero_fills() {
        let entries = parse_rfc_index(INDEX).unwrap();
        assert_eq!(
            rfcs_by_year(&entries),
            "Year,Total,IETF,IRTF,Legacy,tsv\n1969,1,0,0,1,0\n2021,3,2,1,0,2\n"
        );
    }

    #[test]
    fn test_missing_year_is_error() {
        let xml = "<rfc-entry><doc-id>RFC1</doc-id><stream>IETF</stream></rfc-entry>";
        assert!(parse_rfc_index(xml).unwrap_err().contains("RFC1"));
    }

    #[test]
    fn test_tag_prefix_not_confused() {
        let xml = "<x><areas>a</areas><area>b</area></x>";
        assert_eq!(extract_tag_text(xml, "area").as_deref(), Some("b"));
        assert_eq!(decode_entities("a &amp;lt; b"), "a &lt; b");
    }

    #[test]
    fn test_write_table() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("rfc-index.xml");
        let output = dir.path().join("rfcs-by-year.csv");
        std::fs::write(&input, INDEX).unwrap();
        assert_eq!(write_rfcs_by_year(&input, &output).unwrap(), 4);
        assert!(std::fs::read_to_string(&output).unwrap().starts_with("Year,Total,"));
    }
}
