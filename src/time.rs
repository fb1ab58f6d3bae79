use std::time::{Duration, SystemTime};

use async_trait::async_trait;

pub trait Clock: Send + Sync {
    fn current_timestamp(&self) -> u64;
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn current_timestamp(&self) -> u64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }
}

pub struct TokioSleeper;

impl TokioSleeper {
    pub const fn default() -> Self {
        Self
    }
}

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}

/// Sleeper that doesn't. Makes loops spin freely in tests.
pub struct Insomniac;

#[async_trait]
impl Sleeper for Insomniac {
    async fn sleep(&self, _duration: Duration) {}
}
