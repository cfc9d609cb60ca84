// Shared helpers for unit and integration tests.

use crate::config::SimulationConfig;
use std::future::Future;
use std::time::Duration;

/// Millisecond timings where nothing starts on its own: elections only
/// happen when forced, and a failed attempt is not retried during a test.
pub fn fast_config() -> SimulationConfig {
    SimulationConfig {
        cluster_size: 3,
        heartbeat_interval: Duration::from_millis(200),
        election_backoff_min: Duration::from_secs(3600),
        election_backoff_max: Duration::from_secs(7200),
        bootstrap_delay: Duration::from_secs(3600),
        follower_startup_delay: Duration::from_secs(3600),
        random_lag_min: Duration::from_millis(10),
        random_lag_max: Duration::from_millis(50),
        ..SimulationConfig::default()
    }
}

/// Polls `condition` every 10ms until it holds or `timeout` elapses.
/// Returns whether it held.
pub async fn wait_for<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let polling = async {
        loop {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(timeout, polling).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_config_is_valid() {
        assert!(fast_config().validate().is_ok());
    }

    #[tokio::test]
    async fn wait_for_reports_timeout() {
        assert!(wait_for(Duration::from_millis(50), || async { true }).await);
        assert!(!wait_for(Duration::from_millis(50), || async { false }).await);
    }
}
