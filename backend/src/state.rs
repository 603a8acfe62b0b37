use std::sync::Arc;

use crate::{
    config::Config, db::connection::DbPool, ratelimit::RateLimiter,
    services::presence::PresenceService,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Config,
    pub rate_limiter: Arc<RateLimiter>,
    pub presence: Arc<PresenceService>,
}

impl AppState {
    pub fn new(
        pool: DbPool,
        config: Config,
        rate_limiter: Arc<RateLimiter>,
        presence: Arc<PresenceService>,
    ) -> Self {
        Self {
            pool,
            config,
            rate_limiter,
            presence,
        }
    }
}
