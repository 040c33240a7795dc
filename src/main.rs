use anyhow::Result;
use clap::Parser;
use relaygate::config::{Args, Config};
use relaygate::AppContext;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_args(args)?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(
        relay_count = config.relay_urls.len(),
        port = config.port,
        "starting relaygate"
    );

    let ctx = AppContext::new(config);

    let shutdown = ctx.shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            tracing::warn!(err = %e, "failed to install shutdown signal handler");
        }
        shutdown.cancel();
    });

    relaygate::rest::start_rest_server(ctx).await
}

async fn wait_for_shutdown_signal() -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    tracing::info!("shutdown signal received");
    Ok(())
}
