use chrono::{DateTime, Utc};
use sqlx::{Acquire, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    error::Result,
    models::{ForumPost, ForumPostVote},
    services::{scoring::ScoringConfig, vote_service},
};

/// Assigns weights to votes that never received one (rows predating the
/// weighting deploy, or rows whose cast transaction failed half-way).
///
/// Rows are processed oldest-first because the anti-abuse signals consult
/// other votes' history, so replaying in causal order reproduces the scores
/// a live system would have produced. Runs are idempotent: weighted rows are
/// never selected again, so a crashed run can simply be re-invoked.
pub struct BackfillJob {
    db: PgPool,
    config: ScoringConfig,
}

#[derive(Debug, Default)]
pub struct BackfillSummary {
    pub weighted: u64,
    pub skipped: u64,
    pub failed: u64,
}

#[derive(Debug, PartialEq, Eq)]
enum WeighOutcome {
    Weighted,
    Skipped,
}

/// The idempotence predicate: a row needs backfill work only while its
/// weight is null. Checked in SQL when paging and re-checked in Rust under
/// lock, since a live change may weigh the row between the two.
fn needs_weight(vote: &ForumPostVote) -> bool {
    vote.computed_weight.is_none()
}

impl BackfillJob {
    pub fn new(db: PgPool, config: ScoringConfig) -> Self {
        Self { db, config }
    }

    pub async fn run(&self) -> Result<BackfillSummary> {
        let mut summary = BackfillSummary::default();
        let mut cursor: (DateTime<Utc>, Uuid) = (DateTime::UNIX_EPOCH, Uuid::nil());

        loop {
            // Keyset pagination keeps the scan moving past rows that fail
            // and stay unweighted, instead of re-reading them forever.
            let page: Vec<(Uuid, Uuid, DateTime<Utc>)> = sqlx::query_as(
                r#"
                SELECT id, post_id, created_at FROM forum_post_votes
                WHERE computed_weight IS NULL AND (created_at, id) > ($1, $2)
                ORDER BY created_at ASC, id ASC
                LIMIT $3
                "#,
            )
            .bind(cursor.0)
            .bind(cursor.1)
            .bind(self.config.backfill_batch_size)
            .fetch_all(&self.db)
            .await?;

            if page.is_empty() {
                break;
            }

            // One transaction per page bounds lock hold time over a large
            // backlog; each row runs in its own savepoint so a bad row is
            // rolled back, logged and skipped without aborting the batch.
            let mut tx = self.db.begin().await?;

            for (vote_id, post_id, created_at) in &page {
                let mut savepoint = tx.begin().await?;

                match weigh_vote(&mut savepoint, &self.config, *vote_id, *post_id).await {
                    Ok(WeighOutcome::Weighted) => {
                        savepoint.commit().await?;
                        summary.weighted += 1;
                    }
                    Ok(WeighOutcome::Skipped) => {
                        savepoint.commit().await?;
                        summary.skipped += 1;
                    }
                    Err(e) => {
                        savepoint.rollback().await?;
                        summary.failed += 1;
                        tracing::warn!(vote_id = %vote_id, error = %e, "skipping unweighable vote");
                    }
                }

                cursor = (*created_at, *vote_id);
            }

            tx.commit().await?;
        }

        Ok(summary)
    }
}

/// Weighs a single vote under lock. Rows are locked post first, then vote,
/// the same order `cast_vote` takes them in, so a sweep can block behind a
/// live cast but never deadlock against one. Returns `Skipped` when the row
/// no longer needs work: weighted in the meantime, or its post is gone.
async fn weigh_vote(
    tx: &mut Transaction<'_, Postgres>,
    config: &ScoringConfig,
    vote_id: Uuid,
    post_id: Uuid,
) -> Result<WeighOutcome> {
    let Some(post) =
        sqlx::query_as::<_, ForumPost>("SELECT * FROM forum_posts WHERE id = $1 FOR UPDATE")
            .bind(post_id)
            .fetch_optional(&mut **tx)
            .await?
    else {
        tracing::debug!(vote_id = %vote_id, "vote references a missing post");
        return Ok(WeighOutcome::Skipped);
    };

    let Some(vote) = sqlx::query_as::<_, ForumPostVote>(
        "SELECT * FROM forum_post_votes WHERE id = $1 FOR UPDATE",
    )
    .bind(vote_id)
    .fetch_optional(&mut **tx)
    .await?
    else {
        return Ok(WeighOutcome::Skipped);
    };

    if !needs_weight(&vote) {
        return Ok(WeighOutcome::Skipped);
    }

    vote_service::apply_new_vote(tx, config, &vote, &post).await?;
    Ok(WeighOutcome::Weighted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::types::ipnetwork::IpNetwork;
    use std::net::{IpAddr, Ipv4Addr};

    fn vote(computed_weight: Option<f64>) -> ForumPostVote {
        ForumPostVote {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            post_id: Uuid::new_v4(),
            value: 1,
            computed_weight,
            ip_address: IpNetwork::from(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn only_unweighted_rows_need_work() {
        assert!(needs_weight(&vote(None)));
        assert!(!needs_weight(&vote(Some(0.75))));
        // a frozen weight of exactly zero still counts as weighted
        assert!(!needs_weight(&vote(Some(0.0))));
    }

    #[test]
    fn a_second_sweep_selects_nothing() {
        let mut rows = vec![vote(None), vote(Some(0.5)), vote(None), vote(Some(0.0))];

        // First sweep weighs every row the predicate selects.
        let mut weighed = 0;
        for row in rows.iter_mut().filter(|v| needs_weight(v)) {
            row.computed_weight = Some(1.0);
            weighed += 1;
        }
        assert_eq!(weighed, 2);

        // Second sweep finds no work: every row now carries a weight.
        assert_eq!(rows.iter().filter(|v| needs_weight(v)).count(), 0);
    }
}
