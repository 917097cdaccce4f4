//! Engine configuration, read from the process environment.

use std::time::Duration;

/// Tunables for the job runner. Constructed once at startup and shared
/// (cheaply cloned) by every spawned runner.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Grace period given to a container after `stop_container` before the
    /// driver escalates to a forced kill.
    pub stop_grace: Duration,
}

impl EngineConfig {
    /// Read `JOBRUNNER_STOP_GRACE_SECONDS`, defaulting to 5 seconds.
    pub fn from_env() -> Self {
        let stop_grace = std::env::var("JOBRUNNER_STOP_GRACE_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(5));
        Self { stop_grace }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(5),
        }
    }
}
