use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use dbtools_host::{render_markdown, transport};
use dbtools_service::{ServiceConfig, build_host, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::load()?;

    if config.generate_markdown {
        let host = build_host(config.provider)?;
        print!("{}", render_markdown(host.registry()));
        return Ok(());
    }

    let _guard = logging::init(&config)?;
    info!(
        pid = std::process::id(),
        provider = %config.provider,
        web_server = config.enable_web_server,
        log_dir = %config.log_dir.display(),
        "Database tools service starting"
    );

    let host = match build_host(config.provider) {
        Ok(host) => host,
        Err(err) => {
            error!("Startup failed: {}", err);
            return Err(err.into());
        }
    };

    let binding = transport::from_config(config.transport())
        .await
        .context("failed to start the transport")?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            signal.cancel();
        }
    });

    host.serve(binding, shutdown).await?;
    info!("Database tools service stopped");
    Ok(())
}
