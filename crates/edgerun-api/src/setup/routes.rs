//! Route table assembly.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub fn setup_routes(state: Arc<AppState>) -> Router<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let http_concurrency_limit = std::env::var("HTTP_CONCURRENCY_LIMIT")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1_000)
        .max(1);

    let routes = Router::new()
        .route("/healthz", get(handlers::health::healthz))
        .route("/api/queue/enqueue", post(handlers::queue::enqueue))
        .route("/api/queue/subscribe", post(handlers::queue::subscribe))
        .route("/api/queue/:queue_id", get(handlers::queue::get_status))
        .route(
            "/api/functions",
            get(handlers::functions::list).post(handlers::functions::create),
        )
        .route(
            "/api/functions/:name",
            get(handlers::functions::get)
                .put(handlers::functions::update)
                .delete(handlers::functions::delete),
        )
        .route(
            "/api/tasks",
            get(handlers::tasks::list).post(handlers::tasks::create),
        )
        .route(
            "/api/tasks/:id",
            get(handlers::tasks::get)
                .put(handlers::tasks::update)
                .delete(handlers::tasks::delete),
        )
        .route("/api/config", put(handlers::config::put))
        .route("/api/config/:key", get(handlers::config::get));

    routes
        .with_state(state)
        .layer(ConcurrencyLimitLayer::new(http_concurrency_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(tower::timeout::TimeoutLayer::new(Duration::from_secs(60)))
}
