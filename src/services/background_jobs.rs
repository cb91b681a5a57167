use sqlx::PgPool;
use std::sync::Arc;
use tokio::time::{Duration, interval};

use crate::{config::Config, services::backfill::BackfillJob};

#[derive(Clone)]
pub struct BackgroundJobsService {
    db: PgPool,
    config: Arc<Config>,
}

impl BackgroundJobsService {
    pub fn new(db: PgPool, config: Arc<Config>) -> Self {
        Self { db, config }
    }

    /// Start all background jobs
    pub async fn start_all_jobs(&self) {
        let db = self.db.clone();
        let config = self.config.clone();

        // Sweep unweighted votes periodically; also converges scores after a
        // deploy or migration left a backlog behind.
        tokio::spawn(async move {
            let job = BackfillJob::new(db, config.scoring.clone());
            let mut interval = interval(Duration::from_secs(config.backfill_interval_secs));
            loop {
                interval.tick().await;
                match job.run().await {
                    Ok(summary) if summary.weighted > 0 || summary.failed > 0 => {
                        tracing::info!(
                            weighted = summary.weighted,
                            skipped = summary.skipped,
                            failed = summary.failed,
                            "vote score backfill sweep finished"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("Failed to run vote score backfill: {}", e),
                }
            }
        });

        tracing::info!("Background jobs started successfully");
    }
}
