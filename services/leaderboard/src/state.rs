use std::sync::Arc;

use types::score::ScoreEntry;

use crate::config::RateLimitConfig;
use crate::coordinator::Leaderboard;
use crate::error::SubmitError;
use crate::metrics::ServiceMetrics;
use crate::protocol::ScoreSubmission;
use crate::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub leaderboard: Leaderboard,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: Arc<ServiceMetrics>,
}

impl AppState {
    pub fn new(leaderboard: Leaderboard, rate_limit: RateLimitConfig, metrics: Arc<ServiceMetrics>) -> Self {
        Self {
            leaderboard,
            rate_limiter: Arc::new(RateLimiter::new(rate_limit)),
            metrics,
        }
    }

    /// Throttle, then hand the submission to the leaderboard.
    ///
    /// Both the WebSocket and HTTP paths submit through here.
    pub async fn submit(&self, submission: ScoreSubmission) -> Result<ScoreEntry, SubmitError> {
        if let Err(e) = self.rate_limiter.check(&submission.entity_id) {
            self.metrics.record_submission_rejected();
            return Err(e);
        }
        self.leaderboard.submit(submission).await
    }
}
