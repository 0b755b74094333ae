//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Health check, reachable by load balancers
        .route("/v1/health", get(handlers::health_check))
        // Per-image workflow
        .route("/v1/images/{image_id}", get(handlers::get_image))
        .route("/v1/images/{image_id}/solve", post(handlers::request_solve))
        .route(
            "/v1/images/{image_id}/matches",
            get(handlers::list_matches).post(handlers::rematch_image),
        )
        .route(
            "/v1/images/{image_id}/annotation",
            post(handlers::fetch_annotation),
        )
        // Bulk operations
        .route("/v1/bulk/solve", post(handlers::bulk_solve))
        .route("/v1/bulk/match", post(handlers::bulk_match))
        // Operator controls
        .route(
            "/v1/admission/ceiling",
            get(handlers::get_ceiling).put(handlers::set_ceiling),
        );

    let mut router = Router::new().merge(api_routes);

    // SECURITY: when enabled, restrict /metrics to the Prometheus scraper's network.
    if state.config.server.metrics_enabled {
        let metrics_routes = Router::new().route("/metrics", get(metrics_handler));
        router = router.merge(metrics_routes);
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
