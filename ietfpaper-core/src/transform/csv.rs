//! Minimal CSV output for the result tables.

use std::fmt::Write;

/// Quote a field when it contains a delimiter, quote or line break.
pub fn field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Render rows as CSV lines terminated by `\n`. `header` is optional.
pub fn render<R, F>(header: Option<&[String]>, rows: R) -> String
where
    R: IntoIterator<Item = Vec<F>>,
    F: ToString,
{
    let mut out = String::new();
    if let Some(header) = header {
        push_line(&mut out, header.iter().map(|h| field(h)));
    }
    for row in rows {
        push_line(&mut out, row.iter().map(|v| field(&v.to_string())));
    }
    out
}

fn push_line(out: &mut String, fields: impl Iterator<Item = String>) {
    let line = fields.collect::<Vec<_>>().join(",");
    let _ = writeln!(out, "{line}");
}
