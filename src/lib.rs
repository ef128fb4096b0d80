pub mod admission;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod storage;
pub mod utils;
pub mod vision;
pub mod web;

use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use once_cell::sync::Lazy;
use std::env;
use std::num::NonZeroU32;
use std::sync::Arc;

use gateway::Gateway;

pub static SQLITE_PATH: Lazy<String> = Lazy::new(|| {
    env::var("GATEWAY_SQLITE_PATH")
        .unwrap_or_else(|_| "sqlite:./gateway_data/gateway.db?mode=rwc".to_string())
});

pub static LOG_DIR: Lazy<String> =
    Lazy::new(|| env::var("GATEWAY_LOG_DIR").unwrap_or_else(|_| "./logs".to_string()));

/// Per-IP ceiling applied at the web layer, before the admission
/// pipeline runs.
pub static IP_REQUESTS_PER_MINUTE: Lazy<u32> = Lazy::new(|| {
    env::var("GATEWAY_IP_RPM")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30)
});

pub fn init_env() {
    dotenv::dotenv().ok();
}

pub type IpThrottle = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

pub struct AppContext {
    pub gateway: Arc<Gateway>,
    pub throttle: IpThrottle,
}

impl AppContext {
    pub fn new(gateway: Arc<Gateway>, requests_per_minute: u32) -> Self {
        let rpm = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            gateway,
            throttle: RateLimiter::keyed(Quota::per_minute(rpm)),
        }
    }
}
