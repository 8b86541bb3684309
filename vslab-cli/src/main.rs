//! vslab -- operator client for the vslab provisioning daemon

use clap::Parser;
use tracing_subscriber::EnvFilter;

use vslab_cli::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // stdout carries command output; logs go to stderr
    let level = cli.log_level.clone().unwrap_or_else(|| "warn".to_owned());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = vslab_cli::run(cli).await {
        use colored::Colorize;
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(e.exit_code());
    }
}
