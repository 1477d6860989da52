use crate::handlers::{health, scores, ws};
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/leaderboard", get(scores::get_leaderboard))
        .route("/leaderboard/scores", post(scores::submit_score))
        .route("/ws", get(ws::ws_handler));

    Router::new()
        // Viewers also connect on the bare root.
        .route("/", get(ws::ws_handler))
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .merge(api_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
