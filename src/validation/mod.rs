//! Execution-time state for authorizations being validated.

pub mod engine;
pub mod plugin;

use serde::Serialize;

use crate::acme::{AuthorizationResource, AuthorizationStatus, Challenge, ChallengeType};
use crate::dns::authority::DnsLookupResult;
use crate::error::ValidationError;

/// The phase machine for one authorization. Phases only ever move forward;
/// `Valid` and `Invalid` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPhase {
    Created,
    ChallengeSelected,
    Prepared,
    Committed,
    ServerTriggered,
    Polling,
    Valid,
    Invalid,
}

impl ValidationPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ValidationPhase::Valid | ValidationPhase::Invalid)
    }
}

/// One server authorization bound to its order, with a display label
/// (punycode decoded where applicable). Immutable after construction apart
/// from status refreshes against the resource.
#[derive(Debug, Clone)]
pub struct AuthorizationContext {
    pub authorization: AuthorizationResource,
    pub order_key: String,
    pub label: String,
}

impl AuthorizationContext {
    pub fn new(authorization: AuthorizationResource, order_key: String) -> Self {
        // Wildcard authorizations may arrive with the base-domain identifier;
        // the label always shows the wildcard form exactly once.
        let base = authorization.identifier.label();
        let label = if authorization.wildcard && !base.starts_with("*.") {
            format!("*.{base}")
        } else {
            base
        };
        Self {
            authorization,
            order_key,
            label,
        }
    }
}

/// One DNS-01 proof unit: the authority record name, the value to publish,
/// and (once resolved) which name servers are authoritative for it.
#[derive(Debug, Clone, Serialize)]
pub struct DnsValidationRecord {
    pub authority: String,
    pub value: String,
    pub lookup: Option<DnsLookupResult>,
}

/// Plugin-specific proof material staged for one authorization.
#[derive(Debug, Clone, Default)]
pub enum ChallengeDetails {
    #[default]
    None,
    Dns(DnsValidationRecord),
    Http {
        token: String,
        response: String,
    },
    Custom(serde_json::Value),
}

/// Execution-time state for one authorization: the selected plugin, the
/// negotiated challenge, staged proof details, and the last server status
/// observed. Created by the engine, passed by reference into plugin calls,
/// discarded once the authorization resolves.
#[derive(Debug)]
pub struct ValidationContext {
    pub authorization: AuthorizationContext,
    pub plugin_name: String,
    pub challenge_type: ChallengeType,
    pub challenge: Option<Challenge>,
    pub details: ChallengeDetails,
    phase: ValidationPhase,
    valid: bool,
    error: Option<ValidationError>,
}

impl ValidationContext {
    pub fn new(
        authorization: AuthorizationContext,
        plugin_name: impl Into<String>,
        challenge_type: ChallengeType,
    ) -> Self {
        Self {
            authorization,
            plugin_name: plugin_name.into(),
            challenge_type,
            challenge: None,
            details: ChallengeDetails::None,
            phase: ValidationPhase::Created,
            valid: false,
            error: None,
        }
    }

    pub fn phase(&self) -> ValidationPhase {
        self.phase
    }

    /// Moves the phase forward. Terminal phases and backwards transitions are
    /// ignored so a failed authorization keeps its terminal state.
    pub fn advance(&mut self, phase: ValidationPhase) {
        if !self.phase.is_terminal() && phase > self.phase {
            self.phase = phase;
        }
    }

    /// True iff the last observed server status was "valid". Never inferred
    /// locally; only `observe_status` sets it.
    pub fn valid(&self) -> bool {
        self.valid
    }

    pub fn observe_status(&mut self, status: AuthorizationStatus) {
        self.valid = status == AuthorizationStatus::Valid;
    }

    pub fn error(&self) -> Option<&ValidationError> {
        self.error.as_ref()
    }

    pub fn mark_invalid(&mut self, error: ValidationError) {
        if self.phase != ValidationPhase::Invalid {
            self.phase = ValidationPhase::Invalid;
            self.error = Some(error);
        }
    }

    pub fn mark_valid(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = ValidationPhase::Valid;
        }
    }

    /// Still progressing through the protocol (not yet terminal).
    pub fn is_active(&self) -> bool {
        !self.phase.is_terminal()
    }

    pub fn label(&self) -> &str {
        &self.authorization.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Identifier;

    fn auth(domain: &str, wildcard: bool) -> AuthorizationContext {
        AuthorizationContext::new(
            AuthorizationResource {
                url: format!("https://acme.example/authz/{domain}"),
                identifier: Identifier::dns(domain).unwrap(),
                wildcard,
            },
            "order-key".to_string(),
        )
    }

    #[test]
    fn label_decodes_punycode() {
        let ctx = auth("xn--test-epa.fr", false);
        assert_eq!(ctx.label, "testé.fr");
    }

    #[test]
    fn label_restores_wildcard_prefix() {
        let ctx = auth("example.com", true);
        assert_eq!(ctx.label, "*.example.com");
    }

    #[test]
    fn wildcard_identifiers_keep_a_single_wildcard_label() {
        let ctx = auth("*.example.com", true);
        assert_eq!(ctx.label, "*.example.com");
    }

    #[test]
    fn phases_only_move_forward() {
        let mut ctx = ValidationContext::new(auth("example.com", false), "mock", ChallengeType::Dns01);
        ctx.advance(ValidationPhase::Prepared);
        ctx.advance(ValidationPhase::ChallengeSelected);
        assert_eq!(ctx.phase(), ValidationPhase::Prepared);
    }

    #[test]
    fn terminal_phase_is_sticky() {
        let mut ctx = ValidationContext::new(auth("example.com", false), "mock", ChallengeType::Dns01);
        ctx.mark_invalid(ValidationError::PrepareFailed {
            identifier: "example.com".into(),
            message: "boom".into(),
        });
        ctx.advance(ValidationPhase::Polling);
        ctx.mark_valid();
        assert_eq!(ctx.phase(), ValidationPhase::Invalid);
        assert!(ctx.error().is_some());
    }

    #[test]
    fn valid_flag_mirrors_observed_status_only() {
        let mut ctx = ValidationContext::new(auth("example.com", false), "mock", ChallengeType::Dns01);
        assert!(!ctx.valid());
        ctx.observe_status(AuthorizationStatus::Pending);
        assert!(!ctx.valid());
        ctx.observe_status(AuthorizationStatus::Valid);
        assert!(ctx.valid());
        ctx.observe_status(AuthorizationStatus::Invalid);
        assert!(!ctx.valid());
    }
}
