use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Placeholder shown for diagnostics the linter reports without a rule code
pub const UNKNOWN_CODE: &str = "?";

/// 1-indexed position in a source file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub row: u32,
    pub column: u32,
}

/// A lint violation left over after the autofix pass, as reported by
/// `ruff check --output-format json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Rule code (e.g. F841), missing for syntax errors
    #[serde(default)]
    pub code: Option<String>,
    /// Violation message
    pub message: String,
    /// File path
    pub filename: String,
    /// Start location
    #[serde(default)]
    pub location: Location,
    /// End location
    #[serde(default)]
    pub end_location: Option<Location>,
    /// Rule documentation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Violation {
    pub fn code_or_unknown(&self) -> &str {
        self.code.as_deref().unwrap_or(UNKNOWN_CODE)
    }
}

/// Outcome of the autofix pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FixOutcome {
    /// Number of violations the autofixer resolved
    pub fixed: usize,
    /// Violations the autofixer could not resolve
    pub remaining: Vec<Violation>,
}

/// Scope name for code outside any function or class
pub const MODULE_SCOPE: &str = "<module>";

/// A batch of violations handed to one droid
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkUnit {
    pub id: usize,
    pub file: String,
    /// Dotted name of the enclosing function or class, when grouped by scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub violations: Vec<Violation>,
}

impl WorkUnit {
    /// Sorted, de-duplicated rule codes covered by this unit
    pub fn codes(&self) -> Vec<String> {
        self.violations
            .iter()
            .map(|v| v.code_or_unknown().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn description(&self) -> String {
        let mut description = format!(
            "Fix {} violation(s) [{}] in {}",
            self.violations.len(),
            self.codes().join(", "),
            self.file
        );
        if let Some(scope) = &self.scope {
            description.push(':');
            description.push_str(scope);
        }
        description
    }
}
