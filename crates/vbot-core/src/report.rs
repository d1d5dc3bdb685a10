//! Test-runner output parsing.
//!
//! Each machine leaves one `test-<branch>.py<N>.out` file per interpreter
//! variant. The parser pulls out the coverage total, the unittest summary
//! line, and the individual ERROR/FAIL/SKIP lines so they can be rendered
//! into a chat message.

use regex::Regex;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

/// Rendered in place of a log block when a machine has no output files.
pub const NO_LOG_AVAILABLE: &str = "*No log available*";

static FILE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^test-(.+)\.py(\d)\.out$").expect("valid regex"));
static COVERAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"---+\nTOTAL +(.+)\n---+").expect("valid regex"));
static SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^((?:OK|FAILED)(?: +\([^)]+\))?)").expect("valid regex")
});
static ERROR_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^ERROR: .*$").expect("valid regex"));
static FAIL_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^FAIL: .*$").expect("valid regex"));
static SKIP_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)\.\.\. SKIP: (.*)$").expect("valid regex"));

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("not a test output file: {}", .0.display())]
    MalformedName(PathBuf),
    #[error("failed to read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ReportError>;

/// Parsed summary of one test-runner output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Branch (or variant) label taken from the file name.
    pub branch: String,
    /// Interpreter major version taken from the file name.
    pub runtime_variant: String,
    pub coverage: Option<String>,
    /// `OK` or `FAILED`, with the parenthesized detail when present.
    pub summary: Option<String>,
    pub errors: Vec<String>,
    pub failures: Vec<String>,
    /// Skip reason to occurrence count; only filled when requested.
    pub skips: Option<BTreeMap<String, usize>>,
}

/// Extract `(branch, runtime_variant)` from an output file name.
pub fn parse_file_name(path: &Path) -> Option<(String, String)> {
    let name = path.file_name()?.to_str()?;
    let caps = FILE_NAME.captures(name)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// Whether `path` names a test-runner output file.
pub fn is_output_file(path: &Path) -> bool {
    parse_file_name(path).is_some()
}

impl Report {
    /// Read and parse a test output file.
    pub fn parse(path: &Path, include_skips: bool) -> Result<Self> {
        let (branch, runtime_variant) =
            parse_file_name(path).ok_or_else(|| ReportError::MalformedName(path.to_path_buf()))?;

        let bytes = std::fs::read(path).map_err(|source| ReportError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let text = String::from_utf8_lossy(&bytes);

        Ok(Self::from_contents(
            branch,
            runtime_variant,
            &text,
            include_skips,
        ))
    }

    /// Build a report from already-loaded file contents.
    pub fn from_contents(
        branch: String,
        runtime_variant: String,
        text: &str,
        include_skips: bool,
    ) -> Self {
        let coverage = COVERAGE.captures(text).map(|c| c[1].to_string());
        let summary = SUMMARY.captures(text).map(|c| c[1].to_string());

        let errors = ERROR_LINE
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect();
        let failures = FAIL_LINE
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect();

        let skips = include_skips.then(|| {
            let mut counts = BTreeMap::new();
            for caps in SKIP_LINE.captures_iter(text) {
                *counts.entry(caps[1].to_string()).or_insert(0) += 1;
            }
            counts
        });

        Self {
            branch,
            runtime_variant,
            coverage,
            summary,
            errors,
            failures,
            skips,
        }
    }

    /// Whether the summary line reports success.
    pub fn passed(&self) -> bool {
        self.summary.as_deref().is_some_and(|s| s.starts_with("OK"))
    }

    /// Render the report as plain lines, ready to be placed in a code fence.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "python: {}", self.runtime_variant);
        let _ = writeln!(out, "branch: {}", self.branch);
        if let Some(coverage) = &self.coverage {
            let _ = writeln!(out, "coverage: {coverage}");
        }
        if let Some(summary) = &self.summary {
            let _ = writeln!(out, "tests: {summary}");
        }
        if let Some(skips) = &self.skips {
            for (reason, count) in skips {
                let _ = writeln!(out, "   skip: {reason} ({count}x)");
            }
        }
        for line in self.errors.iter().chain(&self.failures) {
            let _ = writeln!(out, "   {line}");
        }
        out
    }
}
