use crate::types::{FixOutcome, Violation};
use anyhow::{Context, bail};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, trace};

/// Runs a linter's autofix pass and reports what it could not fix
#[async_trait]
pub trait Autofixer: Send + Sync {
    async fn fix(&self, path: &Path) -> anyhow::Result<FixOutcome>;
}

/// Autofixer backed by `ruff check`
pub struct RuffAutofixer {
    /// Program and leading arguments, e.g. `uvx ruff`
    command: Vec<String>,
}

impl RuffAutofixer {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    /// Run `ruff check` once and parse the violations it prints.
    ///
    /// `--exit-zero` keeps the exit status for real failures (missing binary,
    /// bad configuration) rather than "violations found".
    async fn check(&self, path: &Path, fix: bool) -> anyhow::Result<Vec<Violation>> {
        let Some((program, leading)) = self.command.split_first() else {
            bail!("Linter command is empty");
        };
        let display = self.command.join(" ");

        let mut cmd = Command::new(program);
        cmd.args(leading).arg("check");
        if fix {
            cmd.arg("--fix");
        }
        cmd.args(["--output-format", "json", "--exit-zero"])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        debug!("Running {:?}", cmd.as_std());

        let output = cmd
            .output()
            .await
            .with_context(|| format!("Failed to run linter `{}`", display))?;

        if !output.status.success() {
            bail!(
                "Linter `{}` exited with {}: {}",
                display,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        trace!("Linter output: {}", stdout);
        parse_violations(&stdout).with_context(|| format!("Unexpected output from `{}`", display))
    }
}

#[async_trait]
impl Autofixer for RuffAutofixer {
    async fn fix(&self, path: &Path) -> anyhow::Result<FixOutcome> {
        let before = self.check(path, false).await?;
        debug!("Found {} violations before autofix", before.len());

        info!("Running ruff --fix on {}", path.display());
        let remaining = self.check(path, true).await?;

        Ok(FixOutcome {
            fixed: before.len().saturating_sub(remaining.len()),
            remaining,
        })
    }
}

/// Parse ruff's JSON output. Empty output means no violations.
pub fn parse_violations(stdout: &str) -> anyhow::Result<Vec<Violation>> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(stdout).context("Expected a JSON list of violations")
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO: &str = r#"[
        {"code": "F401", "filename": "a.py", "location": {"row": 1, "column": 1}, "message": "unused import"},
        {"code": "T201", "filename": "a.py", "location": {"row": 4, "column": 5}, "message": "print found"}
    ]"#;

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_violations("").unwrap().is_empty());
        assert!(parse_violations("  \n").unwrap().is_empty());
        assert!(parse_violations("[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_violations() {
        let violations = parse_violations(TWO).unwrap();
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[1].code.as_deref(), Some("T201"));
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(parse_violations("error: unexpected argument").is_err());
    }

    /// Fake ruff: prints two violations normally, one after `--fix`
    #[cfg(unix)]
    fn fake_ruff() -> Vec<String> {
        let script = format!(
            r#"case "$*" in *--fix*) echo '[{}]' ;; *) echo '{}' ;; esac"#,
            r#"{"code": "T201", "filename": "a.py", "location": {"row": 4, "column": 5}, "message": "print found"}"#,
            TWO.replace('\n', " ")
        );
        vec!["sh".into(), "-c".into(), script, "ruff".into()]
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fix_counts_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = RuffAutofixer::new(fake_ruff()).fix(dir.path()).await.unwrap();
        assert_eq!(outcome.fixed, 1);
        assert_eq!(outcome.remaining.len(), 1);
        assert_eq!(outcome.remaining[0].code.as_deref(), Some("T201"));
    }

    #[tokio::test]
    async fn test_missing_linter_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let fixer = RuffAutofixer::new(vec!["ruff-droids-no-such-linter".into()]);
        let err = fixer.fix(dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("Failed to run linter"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_abnormal_exit_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let command = vec![
            "sh".into(),
            "-c".into(),
            "echo 'ruff failed' >&2; exit 2".into(),
            "ruff".into(),
        ];
        let err = RuffAutofixer::new(command).fix(dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("ruff failed"));
    }
}
