//! The consumed ACME client surface.
//!
//! The orchestration engine does not speak the ACME wire protocol itself; it
//! drives a pre-existing client through the [`AcmeClient`] trait and treats it
//! as a black box that may retry transient network errors internally and
//! surfaces only terminal success or failure. A production adapter over
//! `acme-lib` lives in [`account`].

pub mod account;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::identifier::Identifier;
use crate::order::Order;

/// The proof-of-control methods the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeType {
    #[serde(rename = "http-01")]
    Http01,
    #[serde(rename = "dns-01")]
    Dns01,
    #[serde(rename = "tls-alpn-01")]
    TlsAlpn01,
}

impl ChallengeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeType::Http01 => "http-01",
            ChallengeType::Dns01 => "dns-01",
            ChallengeType::TlsAlpn01 => "tls-alpn-01",
        }
    }
}

impl std::fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side lifecycle of one authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
}

/// One concrete proof-of-control offer from the server for an authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Identity of the challenge resource on the server.
    pub url: String,
    pub kind: ChallengeType,
    /// The server-issued token.
    pub token: String,
    /// The proof material the plugin must publish: the key authorization for
    /// http-01, the TXT digest for dns-01.
    pub proof: String,
}

/// The server's proof-of-control record for one identifier within an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResource {
    /// Identity of the authorization resource on the server.
    pub url: String,
    pub identifier: Identifier,
    pub wildcard: bool,
}

/// The pre-existing wire-level ACME client, consumed by the engine.
///
/// Implementations own nonce handling, JWS signing, and transient-error
/// retries. Every method is a server round trip and may block the calling
/// thread.
pub trait AcmeClient: Send + Sync {
    /// Requests the authorization resource for one identifier of an order.
    fn create_authorization(
        &self,
        order: &Order,
        identifier: &Identifier,
    ) -> Result<AuthorizationResource>;

    /// Lists the challenges the server offers for an authorization.
    fn challenges(&self, authorization: &AuthorizationResource) -> Result<Vec<Challenge>>;

    /// Tells the server the challenge is ready to be checked.
    fn trigger_challenge(&self, challenge: &Challenge) -> Result<()>;

    /// Fetches the current server-side status of an authorization.
    fn authorization_status(
        &self,
        authorization: &AuthorizationResource,
    ) -> Result<AuthorizationStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_type_round_trips_through_serde() {
        let json = serde_json::to_string(&ChallengeType::Dns01).unwrap();
        assert_eq!(json, "\"dns-01\"");
        let back: ChallengeType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ChallengeType::Dns01);
    }

    #[test]
    fn challenge_type_display_matches_wire_names() {
        assert_eq!(ChallengeType::Http01.to_string(), "http-01");
        assert_eq!(ChallengeType::TlsAlpn01.to_string(), "tls-alpn-01");
    }
}
