use std::env;

use crate::services::scoring::ScoringConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,

    // Vote scoring
    pub scoring: ScoringConfig,

    // Seconds between backfill sweeps over unweighted votes
    pub backfill_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        let scoring_defaults = ScoringConfig::default();

        Ok(Self {
            database_url: env::var("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL")?,
            jwt_secret: env::var("JWT_SECRET")?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .unwrap_or(3000),
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),

            scoring: ScoringConfig {
                active_playtime_cap_minutes: parse_env(
                    "ACTIVE_PLAYTIME_CAP_MINUTES",
                    scoring_defaults.active_playtime_cap_minutes,
                ),
                vote_window_minutes: parse_env(
                    "VOTE_WINDOW_MINUTES",
                    scoring_defaults.vote_window_minutes,
                ),
                same_ip_factor: parse_env("SAME_IP_FACTOR", scoring_defaults.same_ip_factor),
                target_bias_smoothing: parse_env(
                    "TARGET_BIAS_SMOOTHING",
                    scoring_defaults.target_bias_smoothing,
                ),
                target_bias_window_days: parse_env(
                    "TARGET_BIAS_WINDOW_DAYS",
                    scoring_defaults.target_bias_window_days,
                ),
                backfill_batch_size: parse_env(
                    "BACKFILL_BATCH_SIZE",
                    scoring_defaults.backfill_batch_size,
                ),
            },

            backfill_interval_secs: parse_env("BACKFILL_INTERVAL_SECS", 900),
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
