use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ForumPost {
    pub id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    /// Weighted vote aggregate. Equals the sum of value * computed_weight
    /// over this post's votes once every vote has been weighted.
    pub score: f64,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct PostAuthor {
    pub id: Uuid,
    pub username: String,
    pub score: f64,
}

// Post response (public view, read by score consumers)
#[derive(Debug, Serialize)]
pub struct PostResponse {
    pub id: Uuid,
    pub body: String,
    pub score: f64,
    pub author: PostAuthor,
    pub user_vote: Option<i16>,
    pub created_at: DateTime<Utc>,
}
