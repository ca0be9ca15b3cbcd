use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::identifier::Identifier;

/// Reference to the site or source a part of a target came from
/// (an IIS site id, a config block index, and so on).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SiteId(pub i64);

/// One logical unit of a target: an ordered set of identifiers, an optional
/// site reference, and an optional caller-supplied CSR that bypasses key
/// generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetPart {
    identifiers: Vec<Identifier>,
    site: Option<SiteId>,
    user_csr: Option<Vec<u8>>,
}

impl TargetPart {
    pub fn new(identifiers: Vec<Identifier>) -> Result<Self> {
        if identifiers.is_empty() {
            return Err(anyhow!("a target part requires at least one identifier"));
        }
        Ok(Self {
            identifiers: dedup_preserving_order(identifiers),
            site: None,
            user_csr: None,
        })
    }

    pub fn with_site(mut self, site: SiteId) -> Self {
        self.site = Some(site);
        self
    }

    pub fn with_user_csr(mut self, csr: Vec<u8>) -> Self {
        self.user_csr = Some(csr);
        self
    }

    pub fn identifiers(&self) -> &[Identifier] {
        &self.identifiers
    }

    pub fn site(&self) -> Option<SiteId> {
        self.site
    }

    pub fn user_csr(&self) -> Option<&[u8]> {
        self.user_csr.as_deref()
    }
}

/// The caller's abstract description of what to obtain a certificate for,
/// prior to order placement. Owns one or more parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    friendly_name: String,
    parts: Vec<TargetPart>,
}

impl Target {
    pub fn new(friendly_name: impl Into<String>, parts: Vec<TargetPart>) -> Result<Self> {
        if parts.is_empty() {
            return Err(anyhow!("a target requires at least one part"));
        }
        Ok(Self {
            friendly_name: friendly_name.into(),
            parts,
        })
    }

    /// Convenience constructor for the common single-part DNS target.
    pub fn from_domains(friendly_name: impl Into<String>, domains: &[&str]) -> Result<Self> {
        if domains.is_empty() {
            return Err(anyhow!("at least one domain is required"));
        }
        let identifiers = domains
            .iter()
            .map(|d| Identifier::dns(d))
            .collect::<Result<Vec<_>>>()?;
        Self::new(friendly_name, vec![TargetPart::new(identifiers)?])
    }

    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    pub fn parts(&self) -> &[TargetPart] {
        &self.parts
    }

    /// The union of all identifiers across parts, first occurrence wins.
    pub fn identifiers(&self) -> Vec<Identifier> {
        dedup_preserving_order(
            self.parts
                .iter()
                .flat_map(|p| p.identifiers().iter().cloned())
                .collect(),
        )
    }

    /// True when any part carries a caller-supplied CSR. Such a target is
    /// issued as a single order and is not decomposable by site.
    pub fn has_user_csr(&self) -> bool {
        self.parts.iter().any(|p| p.user_csr.is_some())
    }

    pub fn has_wildcard(&self) -> bool {
        self.identifiers().iter().any(|i| i.is_wildcard())
    }

    pub fn all_dns(&self) -> bool {
        self.identifiers().iter().all(|i| i.is_dns())
    }
}

fn dedup_preserving_order(identifiers: Vec<Identifier>) -> Vec<Identifier> {
    let mut seen = Vec::new();
    for id in identifiers {
        if !seen.contains(&id) {
            seen.push(id);
        }
    }
    seen
}
