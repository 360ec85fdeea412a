use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod build_config;
mod config;
mod github;
mod pipeline;
mod repo;
mod sandbox;
mod snapshot;

use config::Config;
use github::{Credential, GithubClient};
use pipeline::{cancellation, Pipeline, RunOptions};
use repo::RepoSlug;
use sandbox::DockerRuntime;

#[derive(Parser)]
#[command(name = "runbox")]
#[command(
    author,
    version,
    about = "Minimal CI runner - runs a repository's build commands in a throwaway Docker sandbox"
)]
struct Cli {
    /// Repository to build, as <owner>/<name>
    #[arg(short, long)]
    repo: RepoSlug,

    /// GitHub access token
    #[arg(short, long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: String,

    /// Settings file (default: ./runbox.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overall run deadline in minutes (overrides the settings file)
    #[arg(long)]
    timeout_minutes: Option<u64>,

    /// Ref to build instead of the repository's default branch
    #[arg(long = "ref", value_name = "REF")]
    git_ref: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Also write JSON logs to this file
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = match init_logging(cli.verbose, cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr; stdout carries command output only.
fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("runbox=debug")
        } else {
            EnvFilter::new("runbox=info")
        }
    });

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            (
                Some(fmt::layer().json().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}

async fn run(cli: Cli) -> Result<u8> {
    if cli.token.trim().is_empty() {
        bail!("Access token must not be empty");
    }

    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    let mut config = Config::load(cli.config.as_deref(), &cwd)?;
    if let Some(minutes) = cli.timeout_minutes {
        config.run.timeout_minutes = minutes;
    }

    let credential = Credential::new(cli.token);
    let host = GithubClient::new(&credential, &config.github)
        .context("Failed to set up the GitHub client")?;
    let runtime = DockerRuntime::connect(config.run.stop_timeout_secs)
        .await
        .context("Failed to connect to Docker")?;

    let pipeline = Pipeline::new(
        Arc::new(host),
        Arc::new(runtime),
        RunOptions::from_config(&config.run, cli.git_ref),
    );

    let (canceller, signal) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, tearing down the sandbox");
            canceller.cancel();
        }
    });

    let mut stdout = tokio::io::stdout();
    let outcome = pipeline.run(&cli.repo, &mut stdout, signal).await;
    Ok(outcome.exit_code())
}
