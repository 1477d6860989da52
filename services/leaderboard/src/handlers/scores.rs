use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use types::errors::ValidationError;
use types::snapshot::RankedEntry;

use crate::error::{AppError, SubmitError};
use crate::protocol;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct LeaderboardResponse {
    pub status: &'static str,
    pub data: Vec<RankedEntry>,
}

impl LeaderboardResponse {
    fn success(data: Vec<RankedEntry>) -> Self {
        Self {
            status: "success",
            data,
        }
    }
}

/// POST /leaderboard/scores
pub async fn submit_score(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<LeaderboardResponse>, AppError> {
    let Json(body) = payload.map_err(|e| {
        state.metrics.record_submission_rejected();
        AppError::BadRequest(e.body_text())
    })?;
    let Value::Object(fields) = body else {
        state.metrics.record_submission_rejected();
        return Err(SubmitError::from(ValidationError::Malformed(
            "expected a JSON object".to_string(),
        ))
        .into());
    };

    let submission = protocol::submission_from_fields(&fields).map_err(|e| {
        state.metrics.record_submission_rejected();
        SubmitError::from(e)
    })?;

    let entry = state.submit(submission).await?;
    debug!(entity_id = %entry.entity_id, score = entry.score, "Score accepted over HTTP");

    let snapshot = state
        .leaderboard
        .read()
        .await
        .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
    Ok(Json(LeaderboardResponse::success(snapshot.ranked())))
}

/// GET /leaderboard
pub async fn get_leaderboard(
    State(state): State<AppState>,
) -> Result<Json<LeaderboardResponse>, AppError> {
    let snapshot = state
        .leaderboard
        .read()
        .await
        .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
    Ok(Json(LeaderboardResponse::success(snapshot.ranked())))
}
