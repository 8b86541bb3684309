use anyhow::Result;
use clap::Parser;

use vslab_core::config::VslabConfig;
use vslab_daemon::cli::DaemonCli;
use vslab_daemon::daemon::Daemon;
use vslab_daemon::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    // 파일 → 환경변수 → CLI 순으로 오버라이드
    let mut config = VslabConfig::from_file(&cli.config).await.map_err(|e| {
        anyhow::anyhow!("failed to load config {}: {}", cli.config.display(), e)
    })?;
    config.apply_env_overrides();
    cli.apply_overrides(&mut config);

    if cli.validate {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "vslab-daemon starting"
    );

    let mut daemon = Daemon::build_from_config(config).await?;
    daemon.run().await?;

    tracing::info!("vslab-daemon shut down");
    Ok(())
}
