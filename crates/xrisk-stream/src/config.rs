// ── Connector configuration ──
//
// Immutable once handed to a `StreamConnector`. The config crate builds
// these from TOML profiles; library users can construct them directly.

use std::time::Duration;

use url::Url;

use crate::error::Error;

// ── ReconnectPolicy ──────────────────────────────────────────────────

/// Exponential backoff configuration for stream reconnection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Retries allowed before the connector gives up. Default: 5.
    pub max_attempts: u32,

    /// Delay before the first retry. Default: 2s.
    pub initial_delay: Duration,

    /// Upper bound on the backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Growth factor applied per attempt. Default: 1.5.
    pub multiplier: f64,

    /// Liveness window for a silent stream. Default: 30s.
    ///
    /// Advisory only: the connector stores it but does not enforce it.
    pub heartbeat_timeout: Duration,

    /// Retry automatically after transport failures. Default: true.
    pub auto_reconnect: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(2000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 1.5,
            heartbeat_timeout: Duration::from_millis(30_000),
            auto_reconnect: true,
        }
    }
}

impl ReconnectPolicy {
    /// Policy with automatic reconnection switched off.
    pub fn no_reconnect() -> Self {
        Self {
            auto_reconnect: false,
            ..Self::default()
        }
    }

    /// Reject a multiplier [`delay_for`](Self::delay_for) cannot compute
    /// with. Any delay pair is accepted; `max_delay` simply caps the result.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.multiplier.is_finite() || self.multiplier.is_sign_negative() {
            return Err(Error::InvalidPolicy {
                field: "multiplier",
                reason: format!("must be a finite, non-negative number, got {}", self.multiplier),
            });
        }
        Ok(())
    }

    /// Delay before the `attempt`-th retry (1-based).
    ///
    /// `delay = min(initial * multiplier^(attempt - 1), max)`, deterministic.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

// ── ConnectorConfig ──────────────────────────────────────────────────

/// Where to connect and how to retry.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Backend base URL; streams live under `{base_url}/workflow/stream/{task_id}`.
    pub base_url: Url,
    pub policy: ReconnectPolicy,
}

impl ConnectorConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            policy: ReconnectPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.base_url.cannot_be_a_base() {
            return Err(Error::InvalidBaseUrl(self.base_url.to_string()));
        }
        self.policy.validate()
    }

    /// Stream URL for a task. The task id is encoded as a single path segment.
    pub fn stream_url(&self, task_id: &str) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["workflow", "stream", task_id]);
        Ok(url)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn default_policy() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_secs(2));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert!((policy.multiplier - 1.5).abs() < f64::EPSILON);
        assert_eq!(policy.heartbeat_timeout, Duration::from_secs(30));
        assert!(policy.auto_reconnect);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn backoff_sequence_matches_formula() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<Duration> = (1..=5).map(|n| policy.delay_for(n)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(2000),
                Duration::from_millis(3000),
                Duration::from_millis(4500),
                Duration::from_millis(6750),
                Duration::from_millis(10_125),
            ]
        );
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(9), Duration::from_secs(30));
        assert_eq!(policy.delay_for(50), Duration::from_secs(30));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn backoff_is_monotonic() {
        let policy = ReconnectPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 1..20 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= previous, "attempt {attempt}: {delay:?} < {previous:?}");
            previous = delay;
        }
    }

    #[test]
    fn rejects_multiplier_that_breaks_the_arithmetic() {
        for multiplier in [-1.5, f64::NAN, f64::INFINITY] {
            let policy = ReconnectPolicy {
                multiplier,
                ..ReconnectPolicy::default()
            };
            assert!(
                matches!(
                    policy.validate(),
                    Err(Error::InvalidPolicy { field: "multiplier", .. })
                ),
                "{multiplier}"
            );
        }
    }

    #[test]
    fn shrinking_multiplier_is_accepted() {
        let policy = ReconnectPolicy {
            multiplier: 0.5,
            ..ReconnectPolicy::default()
        };
        assert!(policy.validate().is_ok());
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
    }

    #[test]
    fn initial_delay_above_max_is_capped() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(30),
            ..ReconnectPolicy::default()
        };
        assert!(policy.validate().is_ok());
        assert_eq!(policy.delay_for(1), policy.max_delay);
        assert_eq!(policy.delay_for(4), Duration::from_secs(30));

        let config = ConnectorConfig::new("https://api.example.com".parse().unwrap())
            .with_policy(policy);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn stream_url_appends_segments() {
        let config = ConnectorConfig::new("https://api.example.com".parse().unwrap());
        assert_eq!(
            config.stream_url("task-1").unwrap().as_str(),
            "https://api.example.com/workflow/stream/task-1"
        );

        let config = ConnectorConfig::new("https://api.example.com/v2/".parse().unwrap());
        assert_eq!(
            config.stream_url("abc").unwrap().as_str(),
            "https://api.example.com/v2/workflow/stream/abc"
        );
    }

    #[test]
    fn stream_url_encodes_task_id() {
        let config = ConnectorConfig::new("http://localhost:8080".parse().unwrap());
        assert_eq!(
            config.stream_url("a/b c").unwrap().as_str(),
            "http://localhost:8080/workflow/stream/a%2Fb%20c"
        );
    }

    #[test]
    fn non_base_url_is_rejected() {
        let config = ConnectorConfig::new("mailto:ops@example.com".parse().unwrap());
        assert!(matches!(config.validate(), Err(Error::InvalidBaseUrl(_))));
        assert!(config.stream_url("t").is_err());
    }
}
