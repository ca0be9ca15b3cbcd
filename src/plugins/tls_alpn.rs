//! TLS-ALPN-01 validation.
//!
//! The acme-tls/1 listener and certificate construction live with the
//! embedding application; the plugin hands the key authorization to an
//! installer and takes it back out afterwards.

use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use log::debug;

use crate::acme::ChallengeType;
use crate::capability::{Capability, challenge_state};
use crate::target::Target;
use crate::validation::plugin::{ParallelOperations, ValidationPlugin, ValidationPluginFactory};
use crate::validation::{ChallengeDetails, ValidationContext};

/// The consumed installer: places a self-signed certificate carrying the
/// acmeIdentifier extension for the domain and removes it again.
pub trait AlpnCertificateInstaller: Send + Sync {
    fn install(&self, domain: &str, key_authorization: &str) -> Result<()>;
    fn remove(&self, domain: &str) -> Result<()>;
}

pub struct TlsAlpn01 {
    installer: Arc<dyn AlpnCertificateInstaller>,
    staged: Mutex<Vec<String>>,
}

impl TlsAlpn01 {
    pub fn new(installer: Arc<dyn AlpnCertificateInstaller>) -> Self {
        Self {
            installer,
            staged: Mutex::new(Vec::new()),
        }
    }
}

impl ValidationPlugin for TlsAlpn01 {
    fn name(&self) -> &str {
        "tls-alpn-01 selfhosted"
    }

    fn challenge_type(&self) -> ChallengeType {
        ChallengeType::TlsAlpn01
    }

    fn parallelism(&self) -> ParallelOperations {
        ParallelOperations::ANSWER | ParallelOperations::REUSE
    }

    fn prepare(&self, ctx: &mut ValidationContext) -> Result<bool> {
        let challenge = ctx
            .challenge
            .as_ref()
            .ok_or_else(|| anyhow!("no challenge selected"))?;
        let domain = ctx.authorization.authorization.identifier.value().to_string();
        debug!("[tls-alpn] installing validation certificate for {domain}");
        self.installer.install(&domain, &challenge.proof)?;
        self.staged
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(domain.clone());
        ctx.details = ChallengeDetails::Custom(serde_json::json!({ "domain": domain }));
        Ok(true)
    }

    fn commit(&self) -> Result<()> {
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        let staged: Vec<String> = self
            .staged
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for domain in staged {
            debug!("[tls-alpn] removing validation certificate for {domain}");
            self.installer.remove(&domain)?;
        }
        Ok(())
    }
}

pub struct TlsAlpn01Factory {
    installer: Arc<dyn AlpnCertificateInstaller>,
}

impl TlsAlpn01Factory {
    pub fn new(installer: Arc<dyn AlpnCertificateInstaller>) -> Self {
        Self { installer }
    }
}

impl ValidationPluginFactory for TlsAlpn01Factory {
    fn name(&self) -> &str {
        "tls-alpn-01 selfhosted"
    }

    fn challenge_type(&self) -> ChallengeType {
        ChallengeType::TlsAlpn01
    }

    fn state(&self, target: &Target) -> Capability {
        Capability::uniform(challenge_state(target, ChallengeType::TlsAlpn01))
    }

    fn create(&self) -> Result<Arc<dyn ValidationPlugin>> {
        Ok(Arc::new(TlsAlpn01::new(self.installer.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::{AuthorizationResource, Challenge};
    use crate::identifier::Identifier;
    use crate::validation::AuthorizationContext;

    #[derive(Default)]
    struct RecordingInstaller {
        installed: Mutex<Vec<String>>,
        removed: Mutex<Vec<String>>,
    }

    impl AlpnCertificateInstaller for RecordingInstaller {
        fn install(&self, domain: &str, _key_authorization: &str) -> Result<()> {
            self.installed.lock().unwrap().push(domain.to_string());
            Ok(())
        }

        fn remove(&self, domain: &str) -> Result<()> {
            self.removed.lock().unwrap().push(domain.to_string());
            Ok(())
        }
    }

    fn ctx_for(domain: &str) -> ValidationContext {
        let authorization = AuthorizationContext::new(
            AuthorizationResource {
                url: format!("https://acme.example/authz/{domain}"),
                identifier: Identifier::dns(domain).unwrap(),
                wildcard: false,
            },
            "order".to_string(),
        );
        let mut ctx = ValidationContext::new(authorization, "tls-alpn-01", ChallengeType::TlsAlpn01);
        ctx.challenge = Some(Challenge {
            url: format!("https://acme.example/chall/{domain}"),
            kind: ChallengeType::TlsAlpn01,
            token: "token".to_string(),
            proof: "key-auth".to_string(),
        });
        ctx
    }

    #[test]
    fn prepare_installs_and_cleanup_removes() {
        let installer = Arc::new(RecordingInstaller::default());
        let plugin = TlsAlpn01::new(installer.clone());
        let mut ctx = ctx_for("example.com");

        assert!(plugin.prepare(&mut ctx).unwrap());
        assert_eq!(installer.installed.lock().unwrap().len(), 1);

        plugin.cleanup().unwrap();
        plugin.cleanup().unwrap();
        assert_eq!(installer.removed.lock().unwrap().len(), 1);
    }
}
