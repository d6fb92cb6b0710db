use baudrate::{
    config::SiteConfig,
    context::AppContext,
    error::Error,
    federation::delivery,
    http,
    maintenance,
    storage::Storage,
    webpush,
};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = SiteConfig::from_env()?;
    info!("starting baudrate for {}", config.base_url);

    let storage = Storage::open(&config.database_path)?;
    let bind_address = config.bind_address.clone();
    let (ctx, push_rx) = AppContext::new(config, storage);

    // The site actor and its VAPID material exist from first boot.
    ctx.keys().ensure_site_keypair().await?;
    ctx.keys().ensure_vapid_keys().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let delivery_handle = tokio::spawn(delivery::run_delivery_workers(
        ctx.clone(),
        shutdown_rx.clone(),
    ));
    let push_handle = tokio::spawn(webpush::run_push_worker(ctx.clone(), push_rx));
    let maintenance_handle = tokio::spawn(maintenance::run_maintenance(
        ctx.clone(),
        shutdown_rx,
    ));

    let app = http::router(ctx);
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .map_err(Error::other)?;
    info!("listening on {bind_address}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutting down");
        })
        .await
        .map_err(Error::other)?;

    shutdown_tx.send(true).ok();
    delivery_handle.await.ok();
    maintenance_handle.await.ok();
    // The push queue drains when the context (and with it the sender) drops.
    drop(push_handle);
    Ok(())
}
