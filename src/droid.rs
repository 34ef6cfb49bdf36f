use crate::config::Config;
use crate::types::WorkUnit;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, trace};

/// Environment variable the droid client reads its credential from
pub const API_KEY_ENV: &str = "FACTORY_API_KEY";

/// Successful remediation reported by the remote service
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Remediation {
    pub session_id: Option<String>,
    pub summary: Option<String>,
}

/// Why a single dispatch failed
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    Spawn(String),
    Exit { status: String, stderr: String },
    Timeout(u64),
    Malformed(String),
    Remote(String),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::Spawn(e) => write!(f, "Failed to start droid: {}", e),
            DispatchError::Exit { status, stderr } if stderr.is_empty() => {
                write!(f, "Droid exited with {}", status)
            }
            DispatchError::Exit { status, stderr } => {
                write!(f, "Droid exited with {}: {}", status, stderr)
            }
            DispatchError::Timeout(secs) => write!(f, "Droid timed out after {} seconds", secs),
            DispatchError::Malformed(e) => write!(f, "Malformed droid response: {}", e),
            DispatchError::Remote(e) => write!(f, "Droid reported an error: {}", e),
        }
    }
}

impl std::error::Error for DispatchError {}

/// A remote service that fixes the violations of one work unit
#[async_trait]
pub trait Remediator: Send + Sync {
    async fn remediate(&self, unit: &WorkUnit) -> Result<Remediation, DispatchError>;
}

/// Remediator backed by `droid exec`
pub struct DroidExec {
    /// Program and leading arguments, e.g. `["droid"]`
    command: Vec<String>,
    autonomy: String,
    cwd: PathBuf,
    api_key: String,
    /// Linter invocation quoted in the verification hint
    linter: String,
}

impl DroidExec {
    pub fn new(command: Vec<String>, autonomy: String, cwd: PathBuf, api_key: String) -> Self {
        Self {
            command,
            autonomy,
            cwd,
            api_key,
            linter: "uvx ruff".into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            linter: config.linter_command.join(" "),
            ..Self::new(
                config.droid_command.clone(),
                config.autonomy.clone(),
                config.path.clone(),
                config.api_key.clone(),
            )
        }
    }
}

#[async_trait]
impl Remediator for DroidExec {
    async fn remediate(&self, unit: &WorkUnit) -> Result<Remediation, DispatchError> {
        let prompt = build_prompt(unit, &self.linter);
        trace!("[Unit {}] Prompt: {}", unit.id, prompt);

        let Some((program, leading)) = self.command.split_first() else {
            return Err(DispatchError::Spawn("droid command is empty".into()));
        };

        // The key goes through the environment so it never shows up in `ps`
        let mut cmd = Command::new(program);
        cmd.args(leading)
            .arg("exec")
            .args(["--auto", self.autonomy.as_str()])
            .arg("--cwd")
            .arg(&self.cwd)
            .args(["-o", "json"])
            .arg(&prompt)
            .env(API_KEY_ENV, &self.api_key)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("[Unit {}] Running {} exec", unit.id, self.command.join(" "));
        let output = cmd
            .output()
            .await
            .map_err(|e| DispatchError::Spawn(e.to_string()))?;

        if !output.status.success() {
            return Err(DispatchError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_response(&String::from_utf8_lossy(&output.stdout))
    }
}

#[derive(Deserialize)]
struct DroidResponse {
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

/// Parse the JSON result object printed by `droid exec -o json`.
///
/// Some builds log progress lines before the result, so the last non-empty
/// line is tried when the whole output is not a single object.
fn parse_response(stdout: &str) -> Result<Remediation, DispatchError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(DispatchError::Malformed("empty output".into()));
    }

    let response: DroidResponse = serde_json::from_str(trimmed)
        .or_else(|e| {
            trimmed
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .and_then(|line| serde_json::from_str(line).ok())
                .ok_or(e)
        })
        .map_err(|e| DispatchError::Malformed(e.to_string()))?;

    if response.is_error {
        return Err(DispatchError::Remote(
            response.result.unwrap_or_else(|| "unknown error".into()),
        ));
    }

    Ok(Remediation {
        session_id: response.session_id,
        summary: response.result,
    })
}

/// Build the instruction handed to a droid for one work unit
pub fn build_prompt(unit: &WorkUnit, linter: &str) -> String {
    let mut lines = vec![
        "IMPORTANT: You are assigned ONLY the violations listed below. \
         Do NOT fix, modify, or address any other issues in the file. \
         Do NOT add docstrings, type annotations, imports, or any other changes \
         unless they are explicitly listed below. \
         Leave everything else exactly as-is.\n"
            .to_string(),
        format!("File: {}", unit.file),
    ];
    if let Some(scope) = &unit.scope {
        lines.push(format!("Scope: {}", scope));
    }
    lines.push("\nViolations to fix (and NOTHING else):".to_string());
    for violation in &unit.violations {
        lines.push(format!(
            "  - {} (line {}): {}",
            violation.code_or_unknown(),
            violation.location.row,
            violation.message
        ));
    }
    lines.push(format!(
        "\nVerify with: `{} check --select {} {}`",
        linter,
        unit.codes().join(","),
        unit.file
    ));
    lines.join("\n")
}
