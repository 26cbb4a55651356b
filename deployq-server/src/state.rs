use crate::rate_limit::IpRateLimiter;
use deployq_async::GroupScheduler;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: GroupScheduler,
    pub api_key: Arc<str>,
    pub limiter: Arc<IpRateLimiter>,
}

impl AppState {
    pub fn new(scheduler: GroupScheduler, api_key: &str, limiter: Arc<IpRateLimiter>) -> Self {
        Self {
            scheduler,
            api_key: Arc::from(api_key),
            limiter,
        }
    }
}
