use std::collections::BTreeMap;

use axum::{extract::State, Json};

use crate::state::AppState;

/// GET /health
pub async fn health() -> &'static str {
    "OK"
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Json<BTreeMap<String, u64>> {
    Json(state.metrics.export())
}
