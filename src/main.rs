mod cli;
mod config;
mod dispatch;
mod droid;
mod linter;
mod orchestrator;
mod plan;
mod render;
mod scope;
mod types;
mod util;
mod worker;

use clap::Parser;
use cli::Cli;
use config::Config;
use droid::DroidExec;
use linter::RuffAutofixer;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

const EXIT_SUCCESS: i32 = 0;
const EXIT_FAILURE: i32 = 1;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|e| {
        eprintln!("Invalid log level '{}': {}", cli.log_level, e);
        EnvFilter::new("info")
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let code = match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            EXIT_FAILURE
        }
    };
    std::process::exit(code);
}

async fn run(cli: &Cli) -> anyhow::Result<i32> {
    let config = Config::from_cli(cli)?;
    debug!(
        "Target: {}, concurrency: {}, group by: {:?}",
        config.path.display(),
        config.concurrency,
        config.group_by
    );

    let autofixer = RuffAutofixer::new(config.linter_command.clone());
    let remediator = DroidExec::from_config(&config);

    let shutdown = CancellationToken::new();
    util::listen_for_shutdown(shutdown.clone());

    let report = orchestrator::orchestrate_and_run(
        &config,
        &autofixer,
        &remediator,
        &util::TerminalPrompt,
        &shutdown,
    )
    .await?;

    Ok(if report.is_success() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}
