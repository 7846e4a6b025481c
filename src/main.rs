mod build;
mod cli;
mod commands;
mod error;
mod manifest;

use crate::cli::{Cli, Command};
use crate::error::{ErrorKind, Result};
use crate::manifest::Manifest;
use clap::Parser;
use exn::ResultExt;
use komi_config::Config;
use komi_fetch::transport::HttpTransport;
use komi_fetch::{CancellationToken, Fetcher};
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_directive())))
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let mut stdout = io::stdout();
    match cli.command {
        Command::Build { manifest, output } => {
            let manifest = Manifest::load(&manifest)?;
            let output = output.unwrap_or_else(|| config.cache_path.clone());
            let transport = HttpTransport::new(&config.fetch.http_options()).or_raise(|| ErrorKind::Fetch)?;
            let fetcher = Fetcher::new(Arc::new(transport))
                .with_policy(config.fetch.retry_policy())
                .with_concurrency(config.fetch.concurrency());

            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted; cancelling outstanding fetches");
                    trigger.cancel();
                }
            });

            let report = build::build(&manifest, &fetcher, &cancel, &output).await?;
            writeln!(stdout, "{report}").or_raise(|| ErrorKind::Io)
        },
        Command::List { path } => commands::list(path.as_deref().unwrap_or(config.cache_path.as_path()), &mut stdout),
        Command::Get { key, out, cache } => {
            commands::get(cache.as_deref().unwrap_or(config.cache_path.as_path()), &key, out.as_deref(), &mut stdout)
        },
        Command::Info { path } => commands::info(path.as_deref().unwrap_or(config.cache_path.as_path()), &mut stdout),
    }
}
