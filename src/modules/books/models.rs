use libris_db::ReviewId;
use serde::{Deserialize, Serialize};

use super::coordinator::ReviewOutcome;

/// Request body for `POST /{id}/reviews`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateReview {
    pub rating: i64,
    pub comment: String,
}

/// Request body for `PUT /reviews/{id}`; omitted fields stay as they are.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateReview {
    pub rating: Option<i64>,
    pub comment: Option<String>,
}

/// Response for mutations that can partially degrade.
#[derive(Debug, Clone, Serialize)]
pub struct Mutation<T> {
    pub data: T,
    pub warnings: Vec<String>,
}

impl<T> From<ReviewOutcome<T>> for Mutation<T> {
    fn from(outcome: ReviewOutcome<T>) -> Self {
        let warnings = outcome.warning().into_iter().collect();
        Self {
            data: outcome.value,
            warnings,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletedReview {
    pub id: ReviewId,
}
