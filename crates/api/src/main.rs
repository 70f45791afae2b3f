use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use school_invitations_api::{
    app, config,
    jobs::{
        DeliveryRetryJob, ExpirySweepJob, JobScheduler, OnboardingDispatchJob, PoolMetricsJob,
        RateLimitCleanupJob,
    },
    middleware,
};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::Config::load()?;

    middleware::logging::init_logging(&config.logging)
        .context("failed to initialize logging")?;
    middleware::init_metrics().context("failed to install metrics recorder")?;

    info!("Starting school invitations API v{}", env!("CARGO_PKG_VERSION"));

    let pool = persistence::db::create_pool(&config.database.to_pool_config()).await?;
    persistence::db::run_migrations(&pool).await?;

    let jwt = config.jwt.to_jwt_config()?;
    let engine = Arc::new(app::build_engine(&config, pool.clone())?);

    let mut scheduler = JobScheduler::new();
    if config.jobs.enabled {
        let jobs = &config.jobs;
        scheduler.register(ExpirySweepJob::new(
            engine.clone(),
            jobs.expiry_sweep_minutes,
            jobs.batch_size,
        ));
        scheduler.register(DeliveryRetryJob::new(
            engine.clone(),
            jobs.delivery_retry_secs,
            config.delivery.retry_batch_size,
        ));
        scheduler.register(OnboardingDispatchJob::new(
            engine.clone(),
            jobs.onboarding_dispatch_secs,
            jobs.batch_size,
        ));
        scheduler.register(PoolMetricsJob::new(pool.clone()));
        scheduler.register(RateLimitCleanupJob::new(
            engine.clone(),
            jobs.rate_limit_cleanup_minutes,
        ));
        scheduler.start();
    }

    let addr = config.socket_addr()?;
    let router = app::create_app(config, engine, jwt);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    scheduler.shutdown();
    scheduler.wait_for_shutdown(Duration::from_secs(10)).await;

    Ok(())
}
