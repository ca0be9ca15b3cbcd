use std::cmp::Ordering;
use std::fmt;
use std::net::IpAddr;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::domain::{is_wildcard, normalize_domain_for_display, normalize_domain_for_storage};

/// The kind of subject an identifier names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    DnsName,
    IpAddress,
    UserPrincipalName,
}

impl IdentifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::DnsName => "dns",
            IdentifierKind::IpAddress => "ip",
            IdentifierKind::UserPrincipalName => "upn",
        }
    }
}

/// A single certificate subject: a kind plus its normalized value.
///
/// The value is stored lower-cased in canonical (punycode) form, so equality
/// and ordering are case-insensitive by construction. Immutable once built.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct Identifier {
    kind: IdentifierKind,
    value: String,
}

impl Identifier {
    pub fn dns(value: &str) -> Result<Self> {
        let value = normalize_domain_for_storage(value)?;
        Ok(Self {
            kind: IdentifierKind::DnsName,
            value,
        })
    }

    pub fn ip(value: &str) -> Result<Self> {
        let parsed: IpAddr = value
            .trim()
            .parse()
            .map_err(|err| anyhow!("invalid IP address {value:?}: {err}"))?;
        Ok(Self {
            kind: IdentifierKind::IpAddress,
            value: parsed.to_string(),
        })
    }

    pub fn upn(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("user principal name is required"));
        }
        Ok(Self {
            kind: IdentifierKind::UserPrincipalName,
            value: trimmed.to_lowercase(),
        })
    }

    pub fn kind(&self) -> IdentifierKind {
        self.kind
    }

    /// Canonical lower-cased value (punycode for DNS names).
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Human-readable form: punycode labels decoded back to Unicode.
    pub fn label(&self) -> String {
        match self.kind {
            IdentifierKind::DnsName => normalize_domain_for_display(&self.value),
            _ => self.value.clone(),
        }
    }

    pub fn is_dns(&self) -> bool {
        self.kind == IdentifierKind::DnsName
    }

    pub fn is_wildcard(&self) -> bool {
        self.kind == IdentifierKind::DnsName && is_wildcard(&self.value)
    }

    /// The domain a wildcard identifier covers, or the value itself.
    pub fn base_domain(&self) -> &str {
        self.value.strip_prefix("*.").unwrap_or(&self.value)
    }
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.value == other.value
    }
}

impl std::hash::Hash for Identifier {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.value.hash(state);
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.kind
            .cmp(&other.kind)
            .then_with(|| self.value.cmp(&other.value))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_case_insensitive() {
        let a = Identifier::dns("A.com").unwrap();
        let b = Identifier::dns("a.COM").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.value(), "a.com");
    }

    #[test]
    fn kind_distinguishes_identifiers() {
        let dns = Identifier::dns("example.com").unwrap();
        let upn = Identifier::upn("example.com").unwrap();
        assert_ne!(dns, upn);
    }

    #[test]
    fn unicode_value_normalizes_to_punycode_with_unicode_label() {
        let id = Identifier::dns("Testé.FR").unwrap();
        assert_eq!(id.value(), "xn--test-epa.fr");
        assert_eq!(id.label(), "testé.fr");
    }

    #[test]
    fn punycode_and_unicode_forms_are_equal() {
        let a = Identifier::dns("testé.fr").unwrap();
        let b = Identifier::dns("xn--test-epa.fr").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn ip_identifiers_parse_and_normalize() {
        let id = Identifier::ip(" 192.168.0.1 ").unwrap();
        assert_eq!(id.value(), "192.168.0.1");
        assert!(Identifier::ip("not-an-ip").is_err());
    }

    #[test]
    fn upn_lowercases() {
        let id = Identifier::upn("User@Example.COM").unwrap();
        assert_eq!(id.value(), "user@example.com");
    }

    #[test]
    fn wildcard_properties() {
        let id = Identifier::dns("*.Example.com").unwrap();
        assert!(id.is_wildcard());
        assert_eq!(id.base_domain(), "example.com");
        assert!(!Identifier::dns("www.example.com").unwrap().is_wildcard());
    }

    #[test]
    fn ordering_is_stable_on_normalized_value() {
        let mut ids = vec![
            Identifier::dns("B.example.com").unwrap(),
            Identifier::dns("a.example.com").unwrap(),
        ];
        ids.sort();
        assert_eq!(ids[0].value(), "a.example.com");
    }
}
