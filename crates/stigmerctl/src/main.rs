// stigmerctl - CLI entrypoint
//
// Errors print as a structured two-line payload on stderr: the error kind
// with the offending resource, then a remediation hint. Exit code is zero
// only on full success.

mod cli;
mod commands;
mod manifest;
mod output;

use clap::Parser;
use colored::Colorize;

use stigmer_core::StigmerError;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // Serve installs its own file-backed subscriber; every other command
    // logs to stderr at the env-selected level.
    if !matches!(cli.command, cli::Commands::Serve { .. }) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_writer(std::io::stderr)
            .try_init();
    }

    if let Err(error) = cli.execute().await {
        report(&error);
        std::process::exit(1);
    }
}

fn report(error: &anyhow::Error) {
    match error.downcast_ref::<StigmerError>() {
        Some(known) => {
            let code = known.code();
            eprintln!("{} {}", "error:".red().bold(), known);
            eprintln!("  {} {}", "hint:".yellow(), code.hint());
        }
        None => {
            eprintln!("{} {}", "error:".red().bold(), error);
        }
    }
}
