//! DNS-01 propagation model shared by the authoritative pre-check and the
//! public-resolver (DoH) visibility check.

pub mod authority;
pub mod doh;

use serde::Serialize;

/// ACME challenge record name prefix.
pub const ACME_CHALLENGE_PREFIX: &str = "_acme-challenge";

/// Builds the TXT record name that proves control of a domain.
/// Accepts bare domains, wildcard domains, and already-prefixed names.
pub fn record_name(domain: &str) -> String {
    let trimmed = domain.trim().trim_end_matches('.');
    let trimmed = trimmed.strip_prefix("*.").unwrap_or(trimmed);
    if trimmed.starts_with(&format!("{ACME_CHALLENGE_PREFIX}.")) {
        trimmed.to_string()
    } else {
        format!("{ACME_CHALLENGE_PREFIX}.{trimmed}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationState {
    Pending,
    Found,
    NxDomain,
    WrongContent,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct DnsPropagationResult {
    pub state: PropagationState,
    pub reason: Option<String>,
    pub observed_values: Vec<String>,
}

/// The outcome of one TXT query against one resolver or name server.
#[derive(Debug, Clone)]
pub enum TxtObservation {
    Answered(Vec<String>),
    NoRecords,
    NxDomain,
    Failed(String),
}

pub(crate) fn trim_txt_quotes(value: &str) -> String {
    value.trim().trim_matches('"').trim().to_string()
}

/// Folds per-server observations into a single propagation verdict. A single
/// server returning the exact expected value wins; otherwise wrong content
/// beats pending beats NXDOMAIN beats error.
pub fn interpret_observations(
    observations: &[TxtObservation],
    expected_value: &str,
) -> DnsPropagationResult {
    let expected = trim_txt_quotes(expected_value);
    let mut observed = Vec::new();
    let mut saw_nxdomain = false;
    let mut saw_empty = false;

    for observation in observations {
        match observation {
            TxtObservation::Answered(values) => {
                observed.extend(values.iter().map(|v| trim_txt_quotes(v)));
            }
            TxtObservation::NoRecords => saw_empty = true,
            TxtObservation::NxDomain => saw_nxdomain = true,
            TxtObservation::Failed(_) => {}
        }
    }

    if observed.iter().any(|val| *val == expected) {
        return DnsPropagationResult {
            state: PropagationState::Found,
            reason: None,
            observed_values: observed,
        };
    }

    if !observed.is_empty() {
        return DnsPropagationResult {
            state: PropagationState::WrongContent,
            reason: Some("TXT record present with different value".to_string()),
            observed_values: observed,
        };
    }

    if saw_empty {
        return DnsPropagationResult {
            state: PropagationState::Pending,
            reason: Some("record not found yet".to_string()),
            observed_values: observed,
        };
    }

    if saw_nxdomain {
        return DnsPropagationResult {
            state: PropagationState::NxDomain,
            reason: Some("record not found (NXDOMAIN)".to_string()),
            observed_values: observed,
        };
    }

    DnsPropagationResult {
        state: PropagationState::Error,
        reason: Some("no usable responses from DNS servers".to_string()),
        observed_values: observed,
    }
}
