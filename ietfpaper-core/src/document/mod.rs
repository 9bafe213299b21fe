//! Checks on the paper's LaTeX sources.

pub mod checks;

pub use checks::{
    CheckOptions, CheckReport, DocumentChecker, Finding, FindingKind, Severity, check_document,
    run_document_checks,
};
