// src/repo_status.rs
use std::path::PathBuf;

const INDENT: &str = "    ";

/// Problems found in one repository. No findings means healthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoReport {
    pub path: PathBuf,
    pub findings: Vec<String>,
}

impl RepoReport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            findings: vec![],
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn push(&mut self, finding: impl Into<String>) {
        self.findings.push(finding.into());
    }

    pub fn extend<I>(&mut self, findings: I)
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.findings.extend(findings.into_iter().map(Into::into));
    }

    /// The path line followed by indented findings, or nothing when healthy.
    pub fn lines(&self) -> Vec<String> {
        if self.is_healthy() {
            return vec![];
        }
        let mut lines = Vec::with_capacity(self.findings.len() + 1);
        lines.push(self.path.display().to_string());
        lines.extend(
            self.findings
                .iter()
                .map(|finding| format!("{INDENT}{}", finding.trim_start())),
        );
        lines
    }
}
