use review_sync::config::Config;
use review_sync::crawler::service::SyncService;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Config::from_env()?;
    let service = SyncService::new(cfg).await?;
    let summary = service.run().await?;

    println!("\n==============================");
    println!("REVIEWS LOADED: {}", summary.loaded);
    println!("==============================\n");

    Ok(())
}
