use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

/// What to do when the DNS propagation pre-check gives up without seeing the
/// record: carry on to server-side checking (it may still succeed with more
/// time) or abort the authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnPropagationTimeout {
    Proceed,
    Abort,
}

/// Policy for the advisory DNS propagation pre-check. Purely local; never
/// mutates ACME server state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationPolicy {
    pub enabled: bool,
    pub timeout: Duration,
    pub interval: Duration,
    pub on_timeout: OnPropagationTimeout,
}

impl Default for PropagationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_secs(120),
            interval: Duration::from_secs(5),
            on_timeout: OnPropagationTimeout::Proceed,
        }
    }
}

/// Engine-level knobs. All of these are policy, not semantics; tests must not
/// depend on the default values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationSettings {
    /// Overall deadline for one authorization's status polling.
    pub poll_deadline: Duration,
    /// First polling interval; doubles per attempt.
    pub poll_base_interval: Duration,
    /// Ceiling for the polling interval.
    pub poll_max_interval: Duration,
    pub propagation: PropagationPolicy,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            poll_deadline: Duration::from_secs(300),
            poll_base_interval: Duration::from_secs(2),
            poll_max_interval: Duration::from_secs(30),
            propagation: PropagationPolicy::default(),
        }
    }
}

/// Resolves a setting through an ordered list of optional override sources:
/// the first present value wins, the hard default applies last.
pub fn overlay<T: Clone>(sources: &[Option<T>], default: T) -> T {
    sources
        .iter()
        .find_map(|source| source.clone())
        .unwrap_or(default)
}

pub(crate) fn resolve_http_timeout() -> Duration {
    const DEFAULT_TIMEOUT_SECS: u64 = 15;
    let timeout = std::env::var("CERTPILOT_HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    if timeout == 0 {
        warn!("[settings] invalid timeout value; using default");
        return Duration::from_secs(DEFAULT_TIMEOUT_SECS);
    }
    Duration::from_secs(timeout)
}
