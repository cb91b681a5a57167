use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::ipnetwork::IpNetwork};
use uuid::Uuid;
use validator::Validate;

/// One user's current vote on one post. Unique per (user, post); a
/// retraction sets value to 0, the row is never deleted.
#[derive(Debug, Clone, FromRow)]
pub struct ForumPostVote {
    pub id: Uuid,
    pub user_id: Uuid,
    pub post_id: Uuid,
    pub value: i16, // -1 for downvote, 0 for retracted, 1 for upvote
    /// Trust weight in [0, 1], assigned once when the row is first weighted
    /// and frozen afterwards. Null only for rows awaiting backfill.
    pub computed_weight: Option<f64>,
    pub ip_address: IpNetwork,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

// Vote request
#[derive(Debug, Deserialize, Validate)]
pub struct VoteRequest {
    #[validate(range(min = -1, max = 1))]
    pub value: i16,
}

// Vote response
#[derive(Debug, Serialize)]
pub struct VoteResponse {
    pub user_vote: i16,
    pub post_score: f64,
    pub author_score: f64,
}
