use std::sync::Arc;
use std::time::Duration;

use cadence::clock::SystemClock;
use cadence::config;
use cadence::rate_limit::RateLimitController;
use cadence::store::PgStores;

/// How often the provider status summary is logged
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // Load configuration
    let config = config::Config::from_env().map_err(|e| {
        log::error!("Configuration error: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    log::info!(
        "Starting Cadence with {} rate-limited provider(s)",
        config.rate_limit.providers.len()
    );

    // Pool, migrations and stores
    let stores = PgStores::connect(&config.database).await.map_err(|e| {
        log::error!("Database error: {}", e);
        std::io::Error::other(e.to_string())
    })?;

    // Admission control, quota counters survive restarts through the store
    let controller = RateLimitController::new(
        config.rate_limit.clone(),
        Arc::new(SystemClock),
        Arc::new(stores.quotas.clone()),
    )
    .await
    .map_err(|e| {
        log::error!("Rate limit controller error ({}): {}", e.error_type(), e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;
    controller.start();

    let reporter = tokio::spawn(report_status(controller.clone(), stores.clone()));

    shutdown_signal().await;
    log::info!("Shutdown signal received, stopping...");

    reporter.abort();
    controller.dispose().await;
    stores.close().await;

    log::info!("Cadence stopped");
    Ok(())
}

/// Periodically logs provider usage and database reachability
async fn report_status(controller: RateLimitController, stores: PgStores) {
    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    loop {
        ticker.tick().await;

        if !stores.is_healthy().await {
            log::warn!("Database health check failed");
        }

        for status in controller.get_all_rate_limit_status() {
            log::info!(
                "Provider '{}': {:.1}/{} tokens, daily {}/{}, monthly {}/{}, {} queued, level {}",
                status.provider,
                status.tokens,
                status.capacity,
                status.daily_used,
                status.daily_limit,
                status.monthly_used,
                status.monthly_limit,
                status.queue_length,
                status.warning_level
            );
        }
    }
}

/// Waits for a shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
