use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::num::{NonZeroU64, NonZeroUsize};
use std::path::PathBuf;

// Display order for API key option (placed at top of help text)
const API_KEY_DISPLAY_ORDER: usize = 0;
// Display order for log level option (placed at end of help text)
const LOG_LEVEL_DISPLAY_ORDER: usize = 100;

/// How remaining violations are batched into droid dispatches
#[derive(ValueEnum, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    /// One droid per enclosing function, class or module body
    #[default]
    Scope,
    /// One droid per violation
    Violation,
    /// One droid per file, so no two droids edit the same file
    File,
}

/// CLI arguments
#[derive(Parser, Debug)]
#[command(
    name = "ruff-droids",
    version,
    about = "Run ruff auto-fixes and delegate remaining lint issues to Factory AI droids",
    long_about = None
)]
pub struct Cli {
    /// Factory API key
    #[arg(
        long,
        env = "FACTORY_API_KEY",
        hide_env_values = true,
        display_order = API_KEY_DISPLAY_ORDER
    )]
    pub factory_api_key: Option<String>,

    /// Target directory
    #[arg(long, default_value = ".")]
    pub path: PathBuf,

    /// Number of parallel droid workers [default: 4]
    #[arg(long)]
    pub concurrency: Option<NonZeroUsize>,

    /// Path to an optional ruff-droids.toml config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// How violations are batched into droids [default: scope]
    #[arg(long, value_enum)]
    pub group_by: Option<GroupBy>,

    /// Retries per droid after a failed attempt, with exponential backoff [default: 0]
    #[arg(long)]
    pub retries: Option<u32>,

    /// Timeout for a single droid attempt in seconds [default: 600]
    #[arg(long)]
    pub timeout_secs: Option<NonZeroU64>,

    /// Dry run: run the autofix and list droids without dispatching them
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt before dispatching droids
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Report file path (.md or .json)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Log level (see https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html)
    /// [env: RUFF_DROIDS_LOG=] [default: info]
    #[arg(
        long,
        env = "RUFF_DROIDS_LOG",
        default_value = "info",
        hide_default_value = true,
        hide_env = true,
        display_order = LOG_LEVEL_DISPLAY_ORDER,
        verbatim_doc_comment
    )]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["ruff-droids"]).unwrap();
        assert_eq!(cli.path, PathBuf::from("."));
        assert_eq!(cli.concurrency, None);
        assert_eq!(cli.group_by, None);
        assert!(!cli.dry_run);
        assert!(!cli.yes);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "ruff-droids",
            "--path",
            "src",
            "--factory-api-key",
            "fk-123",
            "--concurrency",
            "8",
            "--group-by",
            "file",
            "-y",
        ])
        .unwrap();
        assert_eq!(cli.path, PathBuf::from("src"));
        assert_eq!(cli.factory_api_key.as_deref(), Some("fk-123"));
        assert_eq!(cli.concurrency.map(NonZeroUsize::get), Some(8));
        assert_eq!(cli.group_by, Some(GroupBy::File));
        assert!(cli.yes);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(Cli::try_parse_from(["ruff-droids", "--concurrency", "0"]).is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(Cli::try_parse_from(["ruff-droids", "--timeout-secs", "0"]).is_err());
        let cli = Cli::try_parse_from(["ruff-droids", "--timeout-secs", "30"]).unwrap();
        assert_eq!(cli.timeout_secs.map(NonZeroU64::get), Some(30));
    }
}
