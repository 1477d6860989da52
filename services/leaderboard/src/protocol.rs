//! Viewer wire protocol
//!
//! Inbound frames are JSON objects keyed by `action`:
//! - `{"action":"submit_score","entity_id":"..","score":10,"leaderboard_id":".."}`
//! - `{"action":"get_leaderboard"}`
//!
//! Outbound frames are tagged by `type`: `leaderboard_update` or `error`.
//! Unknown actions decode to `ClientRequest::Unknown` and are ignored by the
//! connection; structurally invalid frames decode to a `ValidationError`
//! that is sent back to the offending connection only.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use types::errors::ValidationError;
use types::ids::{EntityId, LeaderboardId};
use types::snapshot::{RankedEntry, RankingSnapshot};

/// A validated score submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreSubmission {
    pub entity_id: EntityId,
    pub score: i64,
    /// Target leaderboard; `None` means the default one.
    pub leaderboard_id: Option<LeaderboardId>,
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    SubmitScore(ScoreSubmission),
    GetLeaderboard,
    /// Unrecognized or missing action, carried for logging.
    Unknown(Option<String>),
}

/// Decode one inbound text frame.
pub fn decode(text: &str) -> Result<ClientRequest, ValidationError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ValidationError::Malformed(format!("not valid JSON ({})", e)))?;
    let Value::Object(fields) = value else {
        return Err(ValidationError::Malformed("expected a JSON object".to_string()));
    };

    match fields.get("action").and_then(Value::as_str) {
        Some("submit_score") => submission_from_fields(&fields).map(ClientRequest::SubmitScore),
        Some("get_leaderboard") => Ok(ClientRequest::GetLeaderboard),
        Some(other) => Ok(ClientRequest::Unknown(Some(other.to_string()))),
        None => Ok(ClientRequest::Unknown(None)),
    }
}

/// Validate the submission fields of an inbound object.
///
/// Shared by the WebSocket frame decoder and the HTTP submit route.
pub fn submission_from_fields(fields: &Map<String, Value>) -> Result<ScoreSubmission, ValidationError> {
    let entity_id = match fields.get("entity_id") {
        Some(Value::String(s)) => EntityId::try_new(s.as_str())?,
        _ => return Err(ValidationError::MissingEntityId),
    };

    let score = fields
        .get("score")
        .and_then(parse_score)
        .ok_or(ValidationError::InvalidScore)?;

    let leaderboard_id = match fields.get("leaderboard_id") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(LeaderboardId::new(s.as_str())),
        Some(_) => {
            return Err(ValidationError::Malformed(
                "leaderboard_id must be a string".to_string(),
            ))
        }
    };

    Ok(ScoreSubmission {
        entity_id,
        score,
        leaderboard_id,
    })
}

/// Accept a JSON integer or a decimal-integer string, strictly positive.
fn parse_score(value: &Value) -> Option<i64> {
    let score = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    (score > 0).then_some(score)
}

/// Outbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    LeaderboardUpdate {
        data: Vec<RankedEntry>,
        timestamp: String,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn update(snapshot: &RankingSnapshot) -> Self {
        ServerMessage::LeaderboardUpdate {
            data: snapshot.ranked(),
            timestamp: snapshot.timestamp(),
        }
    }

    pub fn error(message: impl ToString) -> Self {
        ServerMessage::Error {
            message: message.to_string(),
        }
    }

    /// Serialize once; the result is shared by every recipient.
    pub fn encode(&self) -> Result<Arc<str>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}
