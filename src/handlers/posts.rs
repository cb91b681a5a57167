use axum::{
    Json,
    extract::{ConnectInfo, Path, State},
};
use sqlx::Row;
use std::net::SocketAddr;
use uuid::Uuid;
use validator::Validate;

use crate::{
    AppState,
    auth::{AuthUser, OptionalAuthUser},
    error::{AppError, Result},
    models::{ForumPost, PostAuthor, PostResponse, VoteRequest, VoteResponse},
    services::vote_service,
};

pub async fn vote_post(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    auth_user: AuthUser,
    Path(post_id): Path<Uuid>,
    Json(payload): Json<VoteRequest>,
) -> Result<Json<VoteResponse>> {
    payload.validate()?;

    // Check if post exists
    let post = sqlx::query_as::<_, ForumPost>(
        "SELECT * FROM forum_posts WHERE id = $1 AND deleted = false",
    )
    .bind(post_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;

    if post.author_id == auth_user.user_id {
        return Err(AppError::Authorization(
            "Cannot vote on your own post".to_string(),
        ));
    }

    let forum_banned: bool = sqlx::query_scalar("SELECT forum_banned FROM users WHERE id = $1")
        .bind(auth_user.user_id)
        .fetch_one(&state.db)
        .await?;

    if forum_banned {
        return Err(AppError::Authorization(
            "Forum privileges revoked".to_string(),
        ));
    }

    // Rate limiting for voting
    let rate_limit_key = format!("vote_post:{}", auth_user.user_id);
    if !state
        .redis
        .check_rate_limit(&rate_limit_key, 100, 3600)
        .await?
    {
        // 100 votes per hour
        return Err(AppError::RateLimit);
    }

    let response = vote_service::cast_vote(
        &state.db,
        &state.config.scoring,
        auth_user.user_id,
        post_id,
        payload.value,
        addr.ip(),
    )
    .await?;

    Ok(Json(response))
}

pub async fn get_post(
    State(state): State<AppState>,
    OptionalAuthUser(auth_user): OptionalAuthUser,
    Path(post_id): Path<Uuid>,
) -> Result<Json<PostResponse>> {
    let viewer_id = auth_user.map(|u| u.user_id);

    let row = sqlx::query(
        r#"
        SELECT p.id, p.body, p.score, p.created_at,
               u.id as author_id, u.username, u.score as author_score,
               pv.value as user_vote
        FROM forum_posts p
        JOIN users u ON p.author_id = u.id
        LEFT JOIN forum_post_votes pv ON p.id = pv.post_id AND pv.user_id = $2
        WHERE p.id = $1 AND p.deleted = false
        "#,
    )
    .bind(post_id)
    .bind(viewer_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;

    Ok(Json(PostResponse {
        id: row.get("id"),
        body: row.get("body"),
        score: row.get("score"),
        author: PostAuthor {
            id: row.get("author_id"),
            username: row.get("username"),
            score: row.get("author_score"),
        },
        user_vote: row.get("user_vote"),
        created_at: row.get("created_at"),
    }))
}
