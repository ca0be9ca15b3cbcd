use serde::Serialize;
use thiserror::Error;

/// Terminal failure causes for one authorization or its owning order.
///
/// Authorization-level failures never abort sibling authorizations or sibling
/// plugin groups; an order with any invalid authorization cannot finalize but
/// does not roll back other orders from the same target decomposition.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationError {
    /// Every installed plugin was disabled for the target; misconfiguration,
    /// fatal for the order and never retried locally.
    #[error("no eligible validation plugin for {identifier}: {reasons}")]
    NoEligiblePlugin { identifier: String, reasons: String },

    /// The server offered no challenge of the type the selected plugin
    /// handles.
    #[error("server offered no {challenge_type} challenge for {identifier}")]
    NoMatchingChallenge {
        identifier: String,
        challenge_type: String,
    },

    /// Challenge preparation failed for one authorization; siblings are
    /// unaffected.
    #[error("challenge preparation failed for {identifier}: {message}")]
    PrepareFailed { identifier: String, message: String },

    /// The plugin instance's batched commit failed; every prepared
    /// authorization in its group is invalid.
    #[error("challenge commit failed for plugin {plugin}: {message}")]
    CommitFailed { plugin: String, message: String },

    /// The ACME server moved the authorization to "invalid".
    #[error("server rejected the authorization for {identifier}")]
    ServerRejected { identifier: String },

    /// The polling deadline elapsed before the server reached a terminal
    /// status. The order can be retried on the next renewal cycle.
    #[error("authorization for {identifier} did not become valid within {deadline_secs}s")]
    PollTimeout {
        identifier: String,
        deadline_secs: u64,
    },

    /// The run-wide cancellation signal fired before this authorization
    /// completed.
    #[error("validation of {identifier} was cancelled")]
    Cancelled { identifier: String },

    /// The propagation pre-check gave up and policy said abort rather than
    /// proceed to server-side checking.
    #[error("DNS record for {identifier} never became visible: {message}")]
    PropagationAborted { identifier: String, message: String },
}

impl ValidationError {
    pub fn identifier(&self) -> Option<&str> {
        match self {
            ValidationError::NoEligiblePlugin { identifier, .. }
            | ValidationError::NoMatchingChallenge { identifier, .. }
            | ValidationError::PrepareFailed { identifier, .. }
            | ValidationError::ServerRejected { identifier }
            | ValidationError::PollTimeout { identifier, .. }
            | ValidationError::Cancelled { identifier }
            | ValidationError::PropagationAborted { identifier, .. } => Some(identifier),
            ValidationError::CommitFailed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_identifier() {
        let err = ValidationError::PollTimeout {
            identifier: "example.com".into(),
            deadline_secs: 300,
        };
        let text = err.to_string();
        assert!(text.contains("example.com"));
        assert!(text.contains("300"));
        assert_eq!(err.identifier(), Some("example.com"));
    }

    #[test]
    fn commit_failures_are_plugin_scoped() {
        let err = ValidationError::CommitFailed {
            plugin: "dns-01 webhook".into(),
            message: "zone update rejected".into(),
        };
        assert!(err.to_string().contains("dns-01 webhook"));
        assert_eq!(err.identifier(), None);
    }
}
