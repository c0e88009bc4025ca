use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use hls2mp3::api::{ApiServer, AppState};
use hls2mp3::config::AppConfig;
use hls2mp3::conversion::ConversionManager;
use hls2mp3::logging::init_logging;
use hls2mp3::resolver::{HlsSourceResolver, PassthroughResolver, SourceResolver};
use hls2mp3::transcode::{FfmpegTranscoder, Transcoder};
use hls2mp3::utils::http_client::install_rustls_provider;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("Invalid configuration")?;
    let _log_guard = init_logging(config.log_dir.as_deref())?;
    install_rustls_provider();

    let transcoder = Arc::new(FfmpegTranscoder::new(config.transcoder.clone()));
    let version = transcoder.probe_version().await.with_context(|| {
        format!(
            "Transcoder '{}' is not usable",
            config.transcoder.binary_path
        )
    })?;
    info!(transcoder = %version, "Transcoder available");

    let resolver: Arc<dyn SourceResolver> = if config.resolver.enabled {
        Arc::new(HlsSourceResolver::from_config(&config.resolver)?)
    } else {
        info!("Stream resolution disabled, using submitted URLs as is");
        Arc::new(PassthroughResolver)
    };

    let shutdown = CancellationToken::new();
    let manager = Arc::new(
        ConversionManager::new(config.conversion.clone(), resolver, transcoder)
            .with_cancel_token(shutdown.child_token()),
    );
    manager.prepare().await?;
    let sweeper = manager.start_sweeper();

    info!(
        max_concurrent = manager.limiter().capacity(),
        retention_ttl_secs = config.conversion.retention_ttl.as_secs(),
        "Conversion manager ready"
    );

    let state = AppState::new(Arc::clone(&manager)).with_transcoder_version(version);
    let server = ApiServer::new(config.server.clone(), state).with_cancel_token(shutdown.clone());

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    let served = server.run().await;
    if let Err(e) = &served {
        error!(error = %e, "API server stopped with an error");
    }

    shutdown.cancel();
    manager.shutdown().await;
    if let Err(e) = sweeper.await {
        warn!(error = %e, "Retention sweeper task failed");
    }

    served?;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
