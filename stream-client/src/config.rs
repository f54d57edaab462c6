//! Reconnection timing for a subscription.

use std::time::Duration;

/// Configuration for reconnection behaviour.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Full passes through the endpoint list before entering backoff.
    pub max_retry_cycles: u32,

    /// Wait between two full passes through the endpoint list.
    pub per_cycle_delay: Duration,

    /// Wait in backoff before starting over. Longer than `per_cycle_delay`.
    pub backoff_delay: Duration,

    /// Deadline for one attempt against a non-loopback endpoint.
    pub per_attempt_timeout: Duration,

    /// Deadline for one attempt against a loopback endpoint.
    pub loopback_timeout: Duration,

    /// Wait before moving on to the next endpoint after a failure.
    pub endpoint_switch_delay: Duration,

    /// An open stream must last this long before the retry count resets.
    /// One that drops sooner counts as a failed endpoint.
    pub stable_after: Duration,

    /// An open stream silent for this long is treated as failed.
    /// None disables the watchdog.
    pub liveness_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retry_cycles: 3,
            per_cycle_delay: Duration::from_secs(5),
            backoff_delay: Duration::from_secs(30),
            per_attempt_timeout: Duration::from_secs(10),
            loopback_timeout: Duration::from_secs(3),
            endpoint_switch_delay: Duration::from_millis(500),
            // One server heartbeat
            stable_after: Duration::from_secs(10),
            // Three missed server heartbeats
            liveness_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl ClientConfig {
    pub fn with_max_retry_cycles(mut self, max_retry_cycles: u32) -> Self {
        self.max_retry_cycles = max_retry_cycles;
        self
    }

    pub fn with_stable_after(mut self, stable_after: Duration) -> Self {
        self.stable_after = stable_after;
        self
    }

    pub fn with_liveness_timeout(mut self, liveness_timeout: Option<Duration>) -> Self {
        self.liveness_timeout = liveness_timeout;
        self
    }

    /// Attempt deadline for `endpoint`, shorter for loopback hosts.
    pub fn attempt_timeout(&self, endpoint: &str) -> Duration {
        if crate::resolver::is_loopback(endpoint) {
            self.loopback_timeout
        } else {
            self.per_attempt_timeout
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_longer_than_cycle_delay() {
        let config = ClientConfig::default();
        assert!(config.backoff_delay > config.per_cycle_delay);
        assert!(config.loopback_timeout < config.per_attempt_timeout);
    }

    #[test]
    fn test_attempt_timeout_depends_on_host() {
        let config = ClientConfig::default();
        assert_eq!(
            config.attempt_timeout("http://localhost:4000/events"),
            config.loopback_timeout
        );
        assert_eq!(
            config.attempt_timeout("http://127.0.0.1:4000/events"),
            config.loopback_timeout
        );
        assert_eq!(
            config.attempt_timeout("https://relay.example.com/events"),
            config.per_attempt_timeout
        );
    }
}
