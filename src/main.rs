use mimalloc::MiMalloc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = &labguard::config::CONFIG;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    cfg.validate()?;

    info!(
        listen_addr = %cfg.listen_addr,
        database_url = %cfg.database_url,
        loglevel = %cfg.loglevel,
        key_rotation_days = cfg.key_rotation_days,
        maintenance_interval_secs = cfg.maintenance_interval_secs
    );

    let storage = labguard::db::Storage::connect(&cfg.database_url).await?;

    // Build services, start the maintenance actor, then serve
    let state = labguard::router::LabGuardState::build(storage, cfg).await?;
    let app = labguard::router::labguard_router(state);

    let listener = TcpListener::bind(&cfg.listen_addr).await?;
    info!("HTTP server listening on {}", cfg.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}
