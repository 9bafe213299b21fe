//! Pre-submission checks on the LaTeX sources: duplicated words, leftover
//! TODO markers, and acknowledgements in anonymous submissions.

use crate::artifact::write_atomic_sync;
use crate::error::{CheckError, PaperError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    DuplicateWord,
    TodoMarker,
    Acknowledgements,
}

impl FindingKind {
    /// Duplicated words and acknowledgements block the build; TODO markers
    /// only warn so drafts still compile.
    pub fn severity(&self) -> Severity {
        match self {
            FindingKind::DuplicateWord | FindingKind::Acknowledgements => Severity::Error,
            FindingKind::TodoMarker => Severity::Warning,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub file: PathBuf,
    /// 1-indexed.
    pub line: usize,
    pub kind: FindingKind,
    pub message: String,
}

impl Finding {
    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {}: {}",
            self.file.display(),
            self.line,
            self.severity().as_str(),
            self.message
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckOptions {
    /// Flag acknowledgement sections.
    pub anonymous: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReport {
    pub files_checked: usize,
    pub findings: Vec<Finding>,
}

impl CheckReport {
    pub fn error_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity() == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.findings.len() - self.error_count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// Plain-text report: one finding per line, then a summary line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for finding in &self.findings {
            out.push_str(&finding.to_string());
            out.push('\n');
        }
        out.push_str(&format!(
            "{} file(s) checked, {} error(s), {} warning(s)\n",
            self.files_checked,
            self.error_count(),
            self.warning_count()
        ));
        out
    }
}

/// Compiled check patterns.
pub struct DocumentChecker {
    todo: Regex,
    acknowledgements: Regex,
    options: CheckOptions,
}

impl DocumentChecker {
    pub fn new(options: CheckOptions) -> Result<Self, CheckError> {
        Ok(Self {
            todo: Regex::new(r"\\todo\b|\b(?:TODO|FIXME|XXX)\b")?,
            acknowledgements: Regex::new(
                r"\\section\*?\{\s*Acknowledge?ments\s*\}|\\begin\{acks\}",
            )?,
            options,
        })
    }

    /// Check one source file's text. `file` is only used for reporting.
    pub fn check_source(&self, source: &str, file: &Path) -> Vec<Finding> {
        let mut findings = Vec::new();
        let finding = |line: usize, kind: FindingKind, message: String| Finding {
            file: file.to_path_buf(),
            line,
            kind,
            message,
        };

        let mut previous: Option<String> = None;
        for (index, raw_line) in source.lines().enumerate() {
            let line_no = index + 1;

            // Markers count even inside comments.
            if let Some(m) = self.todo.find(raw_line) {
                findings.push(finding(
                    line_no,
                    FindingKind::TodoMarker,
                    format!("leftover {} marker", m.as_str().trim_start_matches('\\')),
                ));
            }

            let text = strip_comment(raw_line);
            if self.options.anonymous && self.acknowledgements.is_match(text) {
                findings.push(finding(
                    line_no,
                    FindingKind::Acknowledgements,
                    "acknowledgements section in an anonymous submission".to_string(),
                ));
            }

            for word in duplicate_words(text, &mut previous) {
                findings.push(finding(
                    line_no,
                    FindingKind::DuplicateWord,
                    format!("duplicate word \"{word}\""),
                ));
            }
        }
        findings
    }
}

/// Run the checks over `sources` (relative to `root`). A directory stands
/// for every `.tex` file below it.
pub fn check_document(
    root: &Path,
    sources: &[PathBuf],
    options: CheckOptions,
) -> Result<CheckReport, PaperError> {
    if sources.is_empty() {
        return Err(CheckError::NoSources {
            pattern: "document.sources".to_string(),
        }
        .into());
    }
    let checker = DocumentChecker::new(options)?;
    let mut report = CheckReport::default();
    for source in collect_sources(root, sources) {
        let text = std::fs::read_to_string(root.join(&source))?;
        report.findings.extend(checker.check_source(&text, &source));
        report.files_checked += 1;
    }
    Ok(report)
}

/// Expand directory entries into the `.tex` files below them, keeping
/// paths relative to `root`.
fn collect_sources(root: &Path, sources: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for source in sources {
        let path = root.join(source);
        if !path.is_dir() {
            files.push(source.clone());
            continue;
        }
        let mut found: Vec<PathBuf> = walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tex"))
            .filter_map(|e| e.path().strip_prefix(root).ok().map(Path::to_path_buf))
            .collect();
        found.sort();
        files.extend(found);
    }
    files
}

/// Run the checks, write the report to `output` and fail when it holds
/// errors.
pub fn run_document_checks(
    root: &Path,
    sources: &[PathBuf],
    options: CheckOptions,
    output: &Path,
) -> Result<CheckReport, PaperError> {
    let report = check_document(root, sources, options)?;
    write_atomic_sync(output, report.render())?;
    for finding in &report.findings {
        match finding.severity() {
            Severity::Error => warn!(%finding, "Document check failed"),
            Severity::Warning => info!(%finding, "Document check warning"),
        }
    }
    if report.has_errors() {
        return Err(CheckError::Findings {
            count: report.error_count(),
        }
        .into());
    }
    Ok(report)
}

/// The line up to its first unescaped `%`.
fn strip_comment(line: &str) -> &str {
    let mut backslashes = 0;
    for (i, c) in line.char_indices() {
        match c {
            '%' if backslashes % 2 == 0 => return &line[..i],
            '\\' => {
                backslashes += 1;
                continue;
            }
            _ => {}
        }
        backslashes = 0;
    }
    line
}

/// Words repeated with only whitespace between them. `previous` carries
/// the last word across lines; commands and any other character break
/// the sequence.
fn duplicate_words(text: &str, previous: &mut Option<String>) -> Vec<String> {
    let mut found = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        if c == '\\' {
            // `\command` or an escaped character
            if chars.next_if(|(_, d)| d.is_alphabetic()).is_some() {
                while chars.next_if(|(_, d)| d.is_alphabetic()).is_some() {}
            } else {
                chars.next();
            }
            *previous = None;
            continue;
        }
        if c.is_alphabetic() {
            let mut end = start + c.len_utf8();
            while let Some((i, d)) = chars.next_if(|(_, d)| d.is_alphabetic()) {
                end = i + d.len_utf8();
            }
            let word = &text[start..end];
            let lower = word.to_lowercase();
            if previous.as_deref() == Some(lower.as_str()) {
                found.push(word.to_string());
            }
            *previous = Some(lower);
            continue;
        }
        if !c.is_whitespace() {
            *previous = None;
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn check(source: &str, anonymous: bool) -> Vec<Finding> {
        DocumentChecker::new(CheckOptions { anonymous })
            .unwrap()
            .check_source(source, Path::new("paper.tex"))
    }

    fn kinds(findings: &[Finding]) -> Vec<(usize, FindingKind)> {
        findings.iter().map(|f| (f.line, f.kind)).collect()
    }

    #[test]
    fn test_duplicate_words_across_lines_and_case() {
        let findings = check("We measure the\nThe growth of drafts.\n", false);
        assert_eq!(kinds(&findings), vec![(2, FindingKind::DuplicateWord)]);
        assert_eq!(findings[0].message, "duplicate word \"The\"");
    }

    #[test]
    fn test_duplicates_ignore_commands_and_comments() {
        let source = "\\emph{the} the\n\\section{Data} data\nthe % the\nthe\n";
        // `the the` in the first line is split by a brace; `Data} data` by
        // the brace; only `the % the` / `the` survives comment stripping.
        assert_eq!(kinds(&check(source, false)), vec![(4, FindingKind::DuplicateWord)]);
        assert!(check("\\input \\input\n", false).is_empty());
        assert!(check("100\\% of of\n", false).len() == 1);
    }

    #[test]
    fn test_todo_markers() {
        let findings = check("Results \\todo{cite}.\n% FIXME: numbers\nXXXL is fine\n", false);
        assert_eq!(
            kinds(&findings),
            vec![(1, FindingKind::TodoMarker), (2, FindingKind::TodoMarker)]
        );
        assert_eq!(findings[0].message, "leftover todo marker");
        assert!(findings.iter().all(|f| f.severity() == Severity::Warning));
    }

    #[test]
    fn test_acknowledgements_only_when_anonymous() {
        let source = "\\section*{Acknowledgements}\nThanks.\n\\begin{acks}\n";
        assert!(check(source, false).is_empty());
        let findings = check(source, true);
        assert_eq!(
            kinds(&findings),
            vec![
                (1, FindingKind::Acknowledgements),
                (3, FindingKind::Acknowledgements)
            ]
        );
        assert_eq!(kinds(&check("\\section*{Acknowledgments}\n", true)).len(), 1);
        assert!(check("% \\section*{Acknowledgements}\n", true).is_empty());
    }

    #[test]
    fn test_strip_comment_respects_escapes() {
        assert_eq!(strip_comment("50\\% done % note"), "50\\% done ");
        assert_eq!(strip_comment("line \\\\% comment"), "line \\\\");
        assert_eq!(strip_comment("no comment"), "no comment");
    }

    #[test]
    fn test_report_render() {
        let report = CheckReport {
            files_checked: 1,
            findings: check("a a\nTODO\n", false),
        };
        assert_eq!(
            report.render(),
            "paper.tex:1: error: duplicate word \"a\"\n\
             paper.tex:2: warning: leftover TODO marker\n\
             1 file(s) checked, 1 error(s), 1 warning(s)\n"
        );
    }

    #[test]
    fn test_run_document_checks_writes_report_and_fails_on_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("paper.tex"), "fine text\n% TODO later\n").unwrap();
        let out = dir.path().join("results/paper-checks.txt");
        let sources = vec![PathBuf::from("paper.tex")];

        let report = run_document_checks(dir.path(), &sources, CheckOptions::default(), &out).unwrap();
        assert_eq!(report.warning_count(), 1);
        assert!(std::fs::read_to_string(&out).unwrap().ends_with("1 warning(s)\n"));

        std::fs::write(dir.path().join("paper.tex"), "the the end\n").unwrap();
        let err = run_document_checks(dir.path(), &sources, CheckOptions::default(), &out).unwrap_err();
        assert!(matches!(err, PaperError::Check(CheckError::Findings { count: 1 })));
    }

    #[test]
    fn test_directory_sources_are_walked() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sections/appendix")).unwrap();
        std::fs::write(dir.path().join("paper.tex"), "Main.\n").unwrap();
        std::fs::write(dir.path().join("sections/intro.tex"), "An an intro.\n").unwrap();
        std::fs::write(dir.path().join("sections/appendix/data.tex"), "Data.\n").unwrap();
        std::fs::write(dir.path().join("sections/notes.txt"), "the the\n").unwrap();

        let sources = vec![PathBuf::from("paper.tex"), PathBuf::from("sections")];
        let report = check_document(dir.path(), &sources, CheckOptions::default()).unwrap();
        assert_eq!(report.files_checked, 3);
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.findings[0].file, PathBuf::from("sections/intro.tex"));
    }

    #[test]
    fn test_no_sources_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_document(dir.path(), &[], CheckOptions::default()).unwrap_err();
        assert!(matches!(err, PaperError::Check(CheckError::NoSources { .. })));
    }
}
