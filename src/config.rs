use crate::cli::{Cli, GroupBy};
use anyhow::{Context, bail};
use serde::Deserialize;
use std::fs;
use std::num::{NonZeroU64, NonZeroUsize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_TIMEOUT_SECS: u64 = 600;
const DEFAULT_AUTONOMY: &str = "medium";

/// Contents of an optional ruff-droids.toml
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub linter: LinterConfig,
    #[serde(default)]
    pub droid: DroidConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct LinterConfig {
    /// Program and leading arguments used to invoke ruff
    #[serde(default = "default_linter_command")]
    pub command: Vec<String>,
    /// Glob patterns of files whose violations are never dispatched
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for LinterConfig {
    fn default() -> Self {
        Self {
            command: default_linter_command(),
            exclude: Vec::new(),
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct DroidConfig {
    /// Program and leading arguments used to invoke the droid CLI
    #[serde(default = "default_droid_command")]
    pub command: Vec<String>,
    /// Autonomy level passed to `droid exec --auto`
    #[serde(default = "default_autonomy")]
    pub autonomy: String,
}

impl Default for DroidConfig {
    fn default() -> Self {
        Self {
            command: default_droid_command(),
            autonomy: default_autonomy(),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    #[serde(default)]
    pub concurrency: Option<NonZeroUsize>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub timeout_secs: Option<NonZeroU64>,
    #[serde(default)]
    pub group_by: Option<GroupBy>,
}

fn default_linter_command() -> Vec<String> {
    vec!["uvx".into(), "ruff".into()]
}

fn default_droid_command() -> Vec<String> {
    vec!["droid".into()]
}

fn default_autonomy() -> String {
    DEFAULT_AUTONOMY.into()
}

impl ConfigFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}

/// Report file format, chosen by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Markdown,
}

impl OutputFormat {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("md") => Ok(Self::Markdown),
            _ => bail!("Output file must end with .md or .json: {}", path.display()),
        }
    }
}

/// Settings for one run, resolved once at startup.
///
/// Precedence is CLI flag, then config file, then built-in default. The API key
/// only ever comes from the flag or the `FACTORY_API_KEY` environment variable.
#[derive(Debug, Clone)]
pub struct Config {
    pub path: PathBuf,
    pub api_key: String,
    pub concurrency: usize,
    pub group_by: GroupBy,
    pub retries: u32,
    pub timeout: Duration,
    pub linter_command: Vec<String>,
    pub exclude: Vec<String>,
    pub droid_command: Vec<String>,
    pub autonomy: String,
    pub dry_run: bool,
    pub assume_yes: bool,
    pub output: Option<(PathBuf, OutputFormat)>,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        // Checked first so nothing touches the target before a key is known
        let api_key = resolve_api_key(cli.factory_api_key.as_deref())?;

        let file = match &cli.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };

        let path = fs::canonicalize(&cli.path)
            .with_context(|| format!("Target path {} is not accessible", cli.path.display()))?;

        Self::resolve(cli, file, api_key, path)
    }

    fn resolve(
        cli: &Cli,
        file: ConfigFile,
        api_key: String,
        path: PathBuf,
    ) -> anyhow::Result<Self> {
        if file.linter.command.is_empty() {
            bail!("linter.command must name a program");
        }
        if file.droid.command.is_empty() {
            bail!("droid.command must name a program");
        }

        let output = cli
            .output
            .as_ref()
            .map(|p| OutputFormat::from_path(p).map(|format| (p.clone(), format)))
            .transpose()?;

        let concurrency = cli
            .concurrency
            .or(file.dispatch.concurrency)
            .map_or(DEFAULT_CONCURRENCY, NonZeroUsize::get);
        let timeout_secs = cli
            .timeout_secs
            .or(file.dispatch.timeout_secs)
            .map_or(DEFAULT_TIMEOUT_SECS, NonZeroU64::get);

        Ok(Self {
            path,
            api_key,
            concurrency,
            group_by: cli.group_by.or(file.dispatch.group_by).unwrap_or_default(),
            retries: cli.retries.or(file.dispatch.retries).unwrap_or(0),
            timeout: Duration::from_secs(timeout_secs),
            linter_command: file.linter.command,
            exclude: file.linter.exclude,
            droid_command: file.droid.command,
            autonomy: file.droid.autonomy,
            dry_run: cli.dry_run,
            assume_yes: cli.yes,
            output,
        })
    }
}

fn resolve_api_key(flag_or_env: Option<&str>) -> anyhow::Result<String> {
    match flag_or_env.map(str::trim) {
        Some(key) if !key.is_empty() => Ok(key.to_string()),
        _ => bail!("Missing Factory API key: pass --factory-api-key or set FACTORY_API_KEY"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    fn parse(args: &[&str]) -> Cli {
        let mut cli = Cli::try_parse_from(std::iter::once("ruff-droids").chain(args.iter().copied()))
            .unwrap();
        // Keep tests independent of the caller's environment
        if !args.contains(&"--factory-api-key") {
            cli.factory_api_key = None;
        }
        cli
    }

    fn resolve(cli: &Cli, file: ConfigFile) -> anyhow::Result<Config> {
        Config::resolve(cli, file, "key".into(), PathBuf::from("/repo"))
    }

    #[test]
    fn test_missing_api_key_fails_first() {
        let cli = parse(&["--path", "/definitely/not/here"]);
        let err = Config::from_cli(&cli).unwrap_err();
        assert!(err.to_string().contains("Missing Factory API key"));
    }

    #[test]
    fn test_blank_api_key_is_missing() {
        assert!(resolve_api_key(Some("   ")).is_err());
        assert_eq!(resolve_api_key(Some(" fk-1 ")).unwrap(), "fk-1");
    }

    #[test]
    fn test_defaults() {
        let config = resolve(&parse(&[]), ConfigFile::default()).unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.group_by, GroupBy::Scope);
        assert_eq!(config.retries, 0);
        assert_eq!(config.timeout, Duration::from_secs(600));
        assert_eq!(config.linter_command, vec!["uvx", "ruff"]);
        assert_eq!(config.droid_command, vec!["droid"]);
        assert_eq!(config.autonomy, "medium");
        assert!(config.output.is_none());
    }

    #[test]
    fn test_flag_overrides_file() {
        let file: ConfigFile = toml::from_str(
            r#"
            [linter]
            command = ["ruff"]
            exclude = ["migrations/**"]

            [droid]
            autonomy = "high"

            [dispatch]
            concurrency = 2
            retries = 3
            group_by = "file"
            "#,
        )
        .unwrap();
        let config = resolve(&parse(&["--concurrency", "6"]), file).unwrap();
        assert_eq!(config.concurrency, 6);
        assert_eq!(config.retries, 3);
        assert_eq!(config.group_by, GroupBy::File);
        assert_eq!(config.linter_command, vec!["ruff"]);
        assert_eq!(config.exclude, vec!["migrations/**"]);
        assert_eq!(config.autonomy, "high");
    }

    #[test]
    fn test_zero_concurrency_in_file_rejected() {
        let result: Result<ConfigFile, _> = toml::from_str("[dispatch]\nconcurrency = 0\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_timeout_in_file_rejected() {
        let result: Result<ConfigFile, _> = toml::from_str("[dispatch]\ntimeout_secs = 0\n");
        assert!(result.is_err());

        let file: ConfigFile = toml::from_str("[dispatch]\ntimeout_secs = 45\n").unwrap();
        let config = resolve(&parse(&[]), file).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(45));
    }

    #[test]
    fn test_empty_commands_rejected() {
        let file: ConfigFile = toml::from_str("[linter]\ncommand = []\n").unwrap();
        assert!(resolve(&parse(&[]), file).is_err());
        let file: ConfigFile = toml::from_str("[droid]\ncommand = []\n").unwrap();
        assert!(resolve(&parse(&[]), file).is_err());
    }

    #[test]
    fn test_output_extension() {
        let config = resolve(&parse(&["--output", "report.json"]), ConfigFile::default()).unwrap();
        assert_eq!(
            config.output,
            Some((PathBuf::from("report.json"), OutputFormat::Json))
        );
        assert!(resolve(&parse(&["--output", "report.txt"]), ConfigFile::default()).is_err());
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[droid]\ncommand = [\"npx\", \"droid\"]").unwrap();
        let config = ConfigFile::load(file.path()).unwrap();
        assert_eq!(config.droid.command, vec!["npx", "droid"]);
        assert_eq!(config.droid.autonomy, "medium");
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[droid]\nmodel = \"x\"").unwrap();
        assert!(ConfigFile::load(file.path()).is_err());
    }
}
