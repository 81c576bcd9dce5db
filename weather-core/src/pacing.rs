use async_trait::async_trait;
use std::{fmt::Debug, time::Duration};

/// Delay strategy applied between consecutive cities.
#[async_trait]
pub trait Pacer: Send + Sync + Debug {
    /// Delay the next wait will take, for reporting.
    fn delay(&self) -> Duration;

    async fn wait(&self);
}

/// Static throttle: sleeps the same interval every time.
#[derive(Debug, Clone, Copy)]
pub struct FixedInterval(pub Duration);

#[async_trait]
impl Pacer for FixedInterval {
    fn delay(&self) -> Duration {
        self.0
    }

    async fn wait(&self) {
        tokio::time::sleep(self.0).await;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoPacing;

#[async_trait]
impl Pacer for NoPacing {
    fn delay(&self) -> Duration {
        Duration::ZERO
    }

    async fn wait(&self) {}
}
