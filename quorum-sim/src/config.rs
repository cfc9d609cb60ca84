use crate::error::{SimResult, SimulationError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long the router keeps serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouterMode {
    /// Serve until every outbound sender is gone.
    Unbounded,
    /// Route exactly this many messages, flush delayed deliveries, then stop.
    Bounded(usize),
}

impl Default for RouterMode {
    fn default() -> Self {
        RouterMode::Unbounded
    }
}

/// Longest duration any timing field or lag may hold (about a century).
pub const MAX_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

// Configuration for a simulated cluster. Defaults mirror the interactive
// testbed timings (seconds); tests shrink them to milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub cluster_size: usize,

    // Liveness heartbeat to a random peer
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,

    // Jittered wait between election attempts, drawn from [min, max)
    #[serde(with = "humantime_serde")]
    pub election_backoff_min: Duration,
    #[serde(with = "humantime_serde")]
    pub election_backoff_max: Duration,

    // First election deadline of process 0
    #[serde(with = "humantime_serde")]
    pub bootstrap_delay: Duration,
    // First election deadline of every other process
    #[serde(with = "humantime_serde")]
    pub follower_startup_delay: Duration,

    /// Proposed frequencies are drawn from `0..frequency_range`.
    pub frequency_range: u32,

    // Range used by the "randomize lag" admin action
    #[serde(with = "humantime_serde")]
    pub random_lag_min: Duration,
    #[serde(with = "humantime_serde")]
    pub random_lag_max: Duration,

    // Channel sizing
    pub outbound_capacity: usize,
    pub admin_capacity: usize,

    pub router_mode: RouterMode,

    pub log_level: log::LevelFilter,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            cluster_size: 3,
            heartbeat_interval: Duration::from_secs(5),
            election_backoff_min: Duration::from_secs(10),
            election_backoff_max: Duration::from_secs(20),
            bootstrap_delay: Duration::ZERO,
            follower_startup_delay: Duration::from_secs(60),
            frequency_range: 100,
            random_lag_min: Duration::from_secs(10),
            random_lag_max: Duration::from_secs(110),
            outbound_capacity: 64,
            admin_capacity: 8,
            router_mode: RouterMode::Unbounded,
            log_level: log::LevelFilter::Info,
        }
    }
}

impl SimulationConfig {
    /// Rejects configurations the simulation cannot run with.
    pub fn validate(&self) -> SimResult<()> {
        if self.cluster_size == 0 {
            return Err(SimulationError::InvalidInput("cluster_size must be at least 1".into()));
        }
        let timings = [
            ("heartbeat_interval", self.heartbeat_interval),
            ("election_backoff_min", self.election_backoff_min),
            ("election_backoff_max", self.election_backoff_max),
            ("bootstrap_delay", self.bootstrap_delay),
            ("follower_startup_delay", self.follower_startup_delay),
            ("random_lag_min", self.random_lag_min),
            ("random_lag_max", self.random_lag_max),
        ];
        if let Some((name, value)) = timings.iter().find(|(_, value)| *value > MAX_DURATION) {
            return Err(SimulationError::InvalidInput(format!(
                "{} of {:?} exceeds the {:?} limit", name, value, MAX_DURATION
            )));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(SimulationError::InvalidInput("heartbeat_interval must be non-zero".into()));
        }
        if self.election_backoff_min > self.election_backoff_max {
            return Err(SimulationError::InvalidInput(format!(
                "election backoff range is inverted ({:?} > {:?})",
                self.election_backoff_min, self.election_backoff_max
            )));
        }
        if self.random_lag_min > self.random_lag_max {
            return Err(SimulationError::InvalidInput(format!(
                "random lag range is inverted ({:?} > {:?})",
                self.random_lag_min, self.random_lag_max
            )));
        }
        if self.frequency_range == 0 {
            return Err(SimulationError::InvalidInput("frequency_range must be non-zero".into()));
        }
        if self.outbound_capacity == 0 || self.admin_capacity == 0 {
            return Err(SimulationError::InvalidInput("channel capacities must be non-zero".into()));
        }
        Ok(())
    }

    /// Parses a JSON document; missing fields fall back to defaults.
    pub fn from_json(json: &str) -> SimResult<Self> {
        let config: SimulationConfig = serde_json::from_str(json)
            .map_err(|e| SimulationError::InvalidInput(format!("bad config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}

/// Draws a duration uniformly from `[min, max)`, or `min` for an empty range.
pub(crate) fn random_duration_between<R: rand::Rng>(rng: &mut R, min: Duration, max: Duration) -> Duration {
    if min >= max {
        return min;
    }
    let span = (max - min).as_millis() as u64;
    if span == 0 {
        return min;
    }
    min + Duration::from_millis(rng.gen_range(0..span))
}
