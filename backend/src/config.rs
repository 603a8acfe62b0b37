use anyhow::anyhow;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::ratelimit::RateLimitQuota;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub time_zone: Tz,
    pub cors_allow_origins: Vec<String>,
    /// Shared window length for the per-user, per-operation limiter.
    pub rate_limit_window_seconds: u64,
    pub rate_limit_checkin_max: u32,
    pub rate_limit_heartbeat_max: u32,
    pub rate_limit_forced_max: u32,
    /// Outer per-IP limiter applied before authentication.
    pub rate_limit_ip_max_requests: u32,
    pub rate_limit_ip_window_seconds: u64,
    /// Per-call ceiling on client-reported elapsed seconds.
    pub heartbeat_max_increment_seconds: i64,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/telepresence".to_string());

        let jwt_secret = env::var("JWT_SECRET")
            .unwrap_or_else(|_| "your-secret-key-change-this-in-production".to_string());

        let time_zone_name = env::var("APP_TIMEZONE").unwrap_or_else(|_| "Europe/Paris".to_string());
        let time_zone: Tz = time_zone_name
            .parse()
            .map_err(|_| anyhow!("Invalid APP_TIMEZONE value: {}", time_zone_name))?;

        let cors_allow_origins = env::var("CORS_ALLOW_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Ok(Config {
            database_url,
            jwt_secret,
            time_zone,
            cors_allow_origins,
            rate_limit_window_seconds: env_u64("RATE_LIMIT_WINDOW_SECONDS", 60),
            rate_limit_checkin_max: env_u32("RATE_LIMIT_CHECKIN_MAX", 30),
            rate_limit_heartbeat_max: env_u32("RATE_LIMIT_HEARTBEAT_MAX", 120),
            rate_limit_forced_max: env_u32("RATE_LIMIT_FORCED_MAX", 10),
            rate_limit_ip_max_requests: env_u32("RATE_LIMIT_IP_MAX_REQUESTS", 300),
            rate_limit_ip_window_seconds: env_u64("RATE_LIMIT_IP_WINDOW_SECONDS", 60),
            heartbeat_max_increment_seconds: env_u64("HEARTBEAT_MAX_INCREMENT_SECONDS", 300)
                as i64,
        })
    }

    /// Quota for check-in and checkout.
    pub fn checkin_quota(&self) -> RateLimitQuota {
        RateLimitQuota {
            window: Duration::from_secs(self.rate_limit_window_seconds.max(1)),
            max_requests: self.rate_limit_checkin_max.max(1),
        }
    }

    /// Quota for heartbeat and status updates.
    pub fn heartbeat_quota(&self) -> RateLimitQuota {
        RateLimitQuota {
            window: Duration::from_secs(self.rate_limit_window_seconds.max(1)),
            max_requests: self.rate_limit_heartbeat_max.max(1),
        }
    }

    /// Quota for forced checkout.
    pub fn forced_quota(&self) -> RateLimitQuota {
        RateLimitQuota {
            window: Duration::from_secs(self.rate_limit_window_seconds.max(1)),
            max_requests: self.rate_limit_forced_max.max(1),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
