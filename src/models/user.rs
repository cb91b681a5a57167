use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    /// Community reputation, itself an aggregate of weighted votes on this
    /// user's posts.
    pub score: f64,
    /// Link to a game-player identity; used for playtime weighting. Users
    /// without one take no playtime penalty.
    pub player_id: Option<Uuid>,
    pub forum_banned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

// User response (public view)
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub score: f64,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            score: user.score,
            created_at: user.created_at,
        }
    }
}
