pub mod routes;
pub mod server;

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use edgerun_core::Config;
use edgerun_db::{init_metadata_pool, init_queue_pool, MetadataStore, QueueStore};
use edgerun_worker::Scheduler;

use crate::state::AppState;

/// Opens both stores, assembles `AppState`, spawns the scheduler, and
/// returns the router ready to serve alongside the scheduler handle it owns.
pub async fn initialize_app(config: &Config) -> Result<(Router<()>, Scheduler)> {
    let metadata_pool = init_metadata_pool(&config.metadata_database_url).await?;
    let queue_pool = init_queue_pool(&config.queue_database_url).await?;

    let metadata = MetadataStore::new(metadata_pool);
    let queue = QueueStore::new(queue_pool);

    seed_jwt_secret(&metadata, config).await?;

    let state = Arc::new(AppState::new(metadata.clone(), queue.clone(), config));
    let scheduler = Scheduler::spawn(metadata, queue, state.scheduler_config.clone());

    let router = routes::setup_routes(state);
    Ok((router, scheduler))
}

/// Seeds the `jwt_secret` config entry from `JWT_SECRET` on first
/// initialization, so `GET /api/config/jwt_secret` reflects the value the
/// process is actually running with instead of 404ing forever.
async fn seed_jwt_secret(metadata: &MetadataStore, config: &Config) -> Result<()> {
    if metadata.get_config("jwt_secret").await?.is_none() {
        metadata.put_config("jwt_secret", &config.jwt_secret).await?;
        tracing::info!("seeded default jwt_secret config entry");
    }
    Ok(())
}
