use chrono::{Duration, Utc};
use sqlx::{PgPool, Postgres, Transaction, types::ipnetwork::IpNetwork};
use std::net::IpAddr;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::{ForumPost, ForumPostVote, User, VoteResponse},
    services::scoring::{self, ScoringConfig, VoteSignals},
};

/// Upserts the caller's vote on a post and applies the weighted score delta
/// to the post and its author, all in one transaction.
///
/// The post row is locked first, which serializes every vote write touching
/// this post (and its author's score), so a rapid double-submit cannot lose
/// an update or insert the (user, post) row twice.
pub async fn cast_vote(
    db: &PgPool,
    config: &ScoringConfig,
    user_id: Uuid,
    post_id: Uuid,
    value: i16,
    ip: IpAddr,
) -> Result<VoteResponse> {
    let mut tx = db.begin().await?;

    let post = sqlx::query_as::<_, ForumPost>(
        "SELECT * FROM forum_posts WHERE id = $1 AND deleted = false FOR UPDATE",
    )
    .bind(post_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;

    let existing = sqlx::query_as::<_, ForumPostVote>(
        "SELECT * FROM forum_post_votes WHERE user_id = $1 AND post_id = $2 FOR UPDATE",
    )
    .bind(user_id)
    .bind(post_id)
    .fetch_optional(&mut *tx)
    .await?;

    let (post_score, author_score) = match existing {
        Some(vote) if vote.value == value => {
            let author_score: f64 = sqlx::query_scalar("SELECT score FROM users WHERE id = $1")
                .bind(post.author_id)
                .fetch_one(&mut *tx)
                .await?;
            tx.commit().await?;

            return Ok(VoteResponse {
                user_vote: value,
                post_score: post.score,
                author_score,
            });
        }
        Some(vote) => {
            let now = Utc::now();
            sqlx::query("UPDATE forum_post_votes SET value = $1, updated_at = $2 WHERE id = $3")
                .bind(value)
                .bind(now)
                .bind(vote.id)
                .execute(&mut *tx)
                .await?;

            match vote.computed_weight {
                Some(weight) => {
                    apply_vote_change(&mut tx, &post, weight, vote.value, value).await?
                }
                None => {
                    // Rows cast before weighting shipped are still awaiting
                    // backfill; their first change weighs them like a fresh
                    // cast, so no score was ever applied for the old value.
                    let updated = ForumPostVote {
                        value,
                        updated_at: Some(now),
                        ..vote
                    };
                    apply_new_vote(&mut tx, config, &updated, &post).await?
                }
            }
        }
        None => {
            let vote = insert_vote(&mut tx, user_id, post_id, value, ip).await?;
            apply_new_vote(&mut tx, config, &vote, &post).await?
        }
    };

    tx.commit().await?;

    Ok(VoteResponse {
        user_vote: value,
        post_score,
        author_score,
    })
}

/// Weighs a freshly created (or never-weighted) vote and applies
/// `weight * value` to the post and author scores. The weight is persisted
/// on the row and never recomputed afterwards.
pub async fn apply_new_vote(
    tx: &mut Transaction<'_, Postgres>,
    config: &ScoringConfig,
    vote: &ForumPostVote,
    post: &ForumPost,
) -> Result<(f64, f64)> {
    let signals = gather_signals(tx, config, vote, post).await?;
    let weight = scoring::compose(config, &signals);

    sqlx::query("UPDATE forum_post_votes SET computed_weight = $1 WHERE id = $2")
        .bind(weight)
        .bind(vote.id)
        .execute(&mut **tx)
        .await?;

    tracing::debug!(
        vote_id = %vote.id,
        post_id = %post.id,
        weight,
        "computed vote weight"
    );

    apply_score_delta(tx, post, weight * f64::from(vote.value)).await
}

/// Applies a value change on an already-weighted vote. The frozen weight
/// scales the value difference; anti-abuse signals are not re-evaluated.
pub async fn apply_vote_change(
    tx: &mut Transaction<'_, Postgres>,
    post: &ForumPost,
    computed_weight: f64,
    old_value: i16,
    new_value: i16,
) -> Result<(f64, f64)> {
    let delta = scoring::change_delta(computed_weight, old_value, new_value);
    apply_score_delta(tx, post, delta).await
}

async fn insert_vote(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    post_id: Uuid,
    value: i16,
    ip: IpAddr,
) -> Result<ForumPostVote> {
    let vote = sqlx::query_as::<_, ForumPostVote>(
        r#"
        INSERT INTO forum_post_votes (id, user_id, post_id, value, ip_address, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(post_id)
    .bind(value)
    .bind(IpNetwork::from(ip))
    .bind(Utc::now())
    .fetch_one(&mut **tx)
    .await?;

    Ok(vote)
}

async fn apply_score_delta(
    tx: &mut Transaction<'_, Postgres>,
    post: &ForumPost,
    delta: f64,
) -> Result<(f64, f64)> {
    let post_score: f64 =
        sqlx::query_scalar("UPDATE forum_posts SET score = score + $1 WHERE id = $2 RETURNING score")
            .bind(delta)
            .bind(post.id)
            .fetch_one(&mut **tx)
            .await?;

    let author_score: f64 =
        sqlx::query_scalar("UPDATE users SET score = score + $1 WHERE id = $2 RETURNING score")
            .bind(delta)
            .bind(post.author_id)
            .fetch_one(&mut **tx)
            .await?;

    Ok((post_score, author_score))
}

/// Reads everything the weight composition needs, on the open transaction so
/// the snapshot is consistent with the vote being written.
async fn gather_signals(
    tx: &mut Transaction<'_, Postgres>,
    config: &ScoringConfig,
    vote: &ForumPostVote,
    post: &ForumPost,
) -> Result<VoteSignals> {
    let voter = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(vote.user_id)
        .fetch_one(&mut **tx)
        .await?;

    let playtime_minutes = match voter.player_id {
        Some(player_id) => {
            let minutes: i64 = sqlx::query_scalar(
                "SELECT COALESCE(SUM(time_spent), 0)::BIGINT FROM player_stats WHERE player_id = $1",
            )
            .bind(player_id)
            .fetch_one(&mut **tx)
            .await?;
            Some(minutes as f64)
        }
        None => None,
    };

    let window_end = post.created_at + Duration::minutes(config.vote_window_minutes as i64);
    let same_ip_votes: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM forum_post_votes
        WHERE post_id = $1 AND user_id <> $2 AND ip_address = $3 AND created_at < $4
        "#,
    )
    .bind(post.id)
    .bind(vote.user_id)
    .bind(vote.ip_address)
    .bind(window_end)
    .fetch_one(&mut **tx)
    .await?;

    let bias_cutoff = Utc::now() - Duration::days(config.target_bias_window_days);

    // Votes this voter cast recently on the post author's other posts
    let same_author_votes: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM forum_post_votes v
        JOIN forum_posts p ON v.post_id = p.id
        WHERE v.user_id = $1 AND v.post_id <> $2 AND v.created_at > $3 AND p.author_id = $4
        "#,
    )
    .bind(vote.user_id)
    .bind(post.id)
    .bind(bias_cutoff)
    .bind(post.author_id)
    .fetch_one(&mut **tx)
    .await?;

    // Votes this voter cast recently on anyone else's posts
    let other_author_votes: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM forum_post_votes v
        JOIN forum_posts p ON v.post_id = p.id
        WHERE v.user_id = $1 AND v.post_id <> $2 AND v.created_at > $3 AND p.author_id <> $4
        "#,
    )
    .bind(vote.user_id)
    .bind(post.id)
    .bind(bias_cutoff)
    .bind(post.author_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(VoteSignals {
        voter_score: voter.score,
        playtime_minutes,
        vote_age_minutes: scoring::vote_age_minutes(vote.created_at, post.created_at),
        same_ip_votes,
        same_author_votes,
        other_author_votes,
    })
}
