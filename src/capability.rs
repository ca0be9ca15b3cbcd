use serde::Serialize;

use crate::acme::ChallengeType;
use crate::target::Target;

/// Whether a plugin may be used, and if not, why.
///
/// The reason string is surfaced to the user verbatim; callers must not
/// replace it with their own wording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Enabled,
    Disabled { reason: String },
}

impl State {
    pub fn disabled(reason: impl Into<String>) -> Self {
        State::Disabled {
            reason: reason.into(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, State::Enabled)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            State::Enabled => None,
            State::Disabled { reason } => Some(reason),
        }
    }
}

/// Plugin usability on two axes: may it run now (execution), and may a user
/// select it at all (configuration). The axes default to the same value but
/// can diverge, e.g. a plugin that stays selectable while temporarily
/// unusable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capability {
    pub execution: State,
    pub configuration: State,
}

impl Capability {
    pub fn uniform(state: State) -> Self {
        Self {
            execution: state.clone(),
            configuration: state,
        }
    }

    pub fn enabled() -> Self {
        Self::uniform(State::Enabled)
    }

    pub fn disabled(reason: impl Into<String>) -> Self {
        Self::uniform(State::disabled(reason))
    }

    pub fn may_run(&self) -> bool {
        self.execution.is_enabled()
    }

    pub fn may_select(&self) -> bool {
        self.configuration.is_enabled()
    }
}

/// Standard eligibility rule for a validation plugin of the given challenge
/// type against a target. Pure function of target shape; performs no I/O and
/// never picks a winner among enabled plugins.
pub fn challenge_state(target: &Target, challenge_type: ChallengeType) -> State {
    match challenge_type {
        ChallengeType::Http01 | ChallengeType::TlsAlpn01 => {
            if target.has_wildcard() {
                State::disabled(format!(
                    "{} validation cannot prove control of wildcard identifiers",
                    challenge_type.as_str()
                ))
            } else {
                State::Enabled
            }
        }
        ChallengeType::Dns01 => {
            if target.all_dns() {
                State::Enabled
            } else {
                State::disabled("dns-01 validation requires a target made up of DNS names only")
            }
        }
    }
}

/// Standard eligibility rule for an order-decomposition strategy. Any
/// strategy other than the identity split is disabled for targets that carry
/// a caller-supplied CSR.
pub fn split_state(target: &Target, identity: bool) -> State {
    if !identity && target.has_user_csr() {
        State::disabled(
            "the target sources its CSR from the caller and must be issued as a single order",
        )
    } else {
        State::Enabled
    }
}
