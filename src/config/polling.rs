use std::time::Duration;

use duration_string::DurationString;
use serde::Deserialize;

use crate::polling::{BackoffPolicy, PollLimit, Poller};

#[derive(Debug, Clone, PartialEq)]
pub struct PollingConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub limit: PollLimit,
}

impl PollingConfig {
    pub const fn attempts(min_delay: u64, max_delay: u64, max_attempts: u32) -> Self {
        Self {
            min_delay: Duration::from_secs(min_delay),
            max_delay: Duration::from_secs(max_delay),
            multiplier: 2.0,
            limit: PollLimit::Attempts(max_attempts),
        }
    }

    pub const fn elapsed(min_delay: u64, max_delay: u64, max_elapsed: u64) -> Self {
        Self {
            min_delay: Duration::from_secs(min_delay),
            max_delay: Duration::from_secs(max_delay),
            multiplier: 2.0,
            limit: PollLimit::Elapsed(Duration::from_secs(max_elapsed)),
        }
    }

    pub fn poller(&self) -> Poller {
        Poller::new(
            BackoffPolicy::new(self.min_delay, self.max_delay, self.multiplier),
            self.limit,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollingSet {
    pub namespace: PollingConfig,
    pub poddefault: PollingConfig,
    pub job: PollingConfig,
    pub deletion: PollingConfig,
}

impl Default for PollingSet {
    fn default() -> Self {
        Self {
            namespace: PollingConfig::attempts(1, 10, 30),
            poddefault: PollingConfig::attempts(1, 10, 15),
            job: PollingConfig::elapsed(1, 32, 60 * 60),
            deletion: PollingConfig::attempts(1, 10, 10),
        }
    }
}

/// Polling settings as written in the config file. Unset fields fall back
/// to the defaults of the wait they configure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct RawPollingConfig {
    min_delay: Option<DurationString>,
    max_delay: Option<DurationString>,
    multiplier: Option<f64>,
    max_attempts: Option<u32>,
    max_elapsed: Option<DurationString>,
}

impl RawPollingConfig {
    pub(super) fn resolve(self, defaults: PollingConfig) -> PollingConfig {
        let limit = match (self.max_attempts, self.max_elapsed) {
            (_, Some(elapsed)) => PollLimit::Elapsed(elapsed.into()),
            (Some(attempts), None) => PollLimit::Attempts(attempts),
            (None, None) => defaults.limit,
        };
        PollingConfig {
            min_delay: self.min_delay.map_or(defaults.min_delay, Into::into),
            max_delay: self.max_delay.map_or(defaults.max_delay, Into::into),
            multiplier: self.multiplier.unwrap_or(defaults.multiplier),
            limit,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct RawPollingSet {
    #[serde(default)]
    namespace: RawPollingConfig,
    #[serde(default)]
    poddefault: RawPollingConfig,
    #[serde(default)]
    job: RawPollingConfig,
    #[serde(default)]
    deletion: RawPollingConfig,
}

impl RawPollingSet {
    pub(super) fn resolve(self) -> PollingSet {
        let defaults = PollingSet::default();
        PollingSet {
            namespace: self.namespace.resolve(defaults.namespace),
            poddefault: self.poddefault.resolve(defaults.poddefault),
            job: self.job.resolve(defaults.job),
            deletion: self.deletion.resolve(defaults.deletion),
        }
    }
}
