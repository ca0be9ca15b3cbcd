//! Production adapter over `acme-lib`.
//!
//! Account setup, order placement, and finalization speak the wire protocol
//! through `acme-lib`; [`AcmeLibClient`] bridges its order/authorization
//! objects to the [`AcmeClient`](super::AcmeClient) surface the engine
//! consumes. `acme-lib` performs the server-side validation wait inside
//! `validate`, so `trigger_challenge` blocks until the server reaches a
//! terminal state and the subsequent status polls read the cached outcome:
//! the black box surfaces only terminal success or failure.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use acme_lib::order::{Auth, NewOrder};
use acme_lib::persist::{Persist, PersistKey, PersistKind};
use acme_lib::{
    Certificate, Directory, DirectoryUrl, Error as AcmeError, create_p256_key, create_p384_key,
    create_rsa_key,
};
use anyhow::{Result, anyhow};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::{AcmeClient, AuthorizationResource, AuthorizationStatus, Challenge, ChallengeType};
use crate::identifier::Identifier;
use crate::order::Order;

/// How long `acme-lib` waits between its own validation polls.
const VALIDATE_DELAY_MS: u64 = 2000;
/// Poll delay during finalization.
const FINALIZE_DELAY_MS: u64 = 5000;

/// In-memory persistence for acme-lib that avoids disk I/O and lets us seed
/// the ACME account key.
#[derive(Clone, Default)]
pub struct EphemeralPersist {
    inner: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl EphemeralPersist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_account_key(&self, realm: &str, pem: &[u8]) -> Result<()> {
        let key = PersistKey::new(realm, PersistKind::AccountPrivateKey, "acme_account");
        self.put(&key, pem).map_err(|e| anyhow!(e.to_string()))
    }
}

impl Persist for EphemeralPersist {
    fn put(&self, key: &PersistKey, value: &[u8]) -> acme_lib::Result<()> {
        let mut lock = self
            .inner
            .lock()
            .map_err(|e| AcmeError::Other(e.to_string()))?;
        lock.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &PersistKey) -> acme_lib::Result<Option<Vec<u8>>> {
        let lock = self
            .inner
            .lock()
            .map_err(|e| AcmeError::Other(e.to_string()))?;
        Ok(lock.get(&key.to_string()).cloned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    Rsa,
    Ecdsa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyCurve {
    P256,
    P384,
}

/// Validates key algorithm and size/curve parameters.
/// Returns the resolved parameters or an error if invalid.
pub fn resolve_key_params(
    key_algorithm: Option<KeyAlgorithm>,
    key_size: Option<u16>,
    key_curve: Option<KeyCurve>,
) -> Result<(KeyAlgorithm, Option<u16>, Option<KeyCurve>)> {
    match key_algorithm {
        None => {
            if key_size.is_some() || key_curve.is_some() {
                return Err(anyhow!(
                    "Key parameters must include key_algorithm when size/curve is provided"
                ));
            }
            Ok((KeyAlgorithm::Rsa, Some(2048), None))
        }
        Some(KeyAlgorithm::Rsa) => {
            let size = key_size.ok_or_else(|| anyhow!("RSA key_size is required"))?;
            if !matches!(size, 2048 | 3072 | 4096) {
                return Err(anyhow!(
                    "Unsupported RSA key size {size}. Allowed: 2048, 3072, 4096"
                ));
            }
            if key_curve.is_some() {
                return Err(anyhow!("RSA issuance does not accept key_curve"));
            }
            Ok((KeyAlgorithm::Rsa, Some(size), None))
        }
        Some(KeyAlgorithm::Ecdsa) => {
            if key_size.is_some() {
                return Err(anyhow!("ECDSA issuance does not accept key_size"));
            }
            let curve = key_curve.ok_or_else(|| anyhow!("ECDSA key_curve is required"))?;
            match curve {
                KeyCurve::P256 | KeyCurve::P384 => Ok((KeyAlgorithm::Ecdsa, None, Some(curve))),
            }
        }
    }
}

/// Generates a private key based on the specified algorithm and parameters.
pub fn generate_private_key(
    key_algorithm: &KeyAlgorithm,
    key_size: Option<u16>,
    key_curve: Option<&KeyCurve>,
) -> Result<String> {
    let key = match key_algorithm {
        KeyAlgorithm::Rsa => {
            let size = key_size.unwrap_or(2048);
            create_rsa_key(u32::from(size))
        }
        KeyAlgorithm::Ecdsa => match key_curve {
            Some(KeyCurve::P256) => create_p256_key(),
            Some(KeyCurve::P384) => create_p384_key(),
            None => return Err(anyhow!("ECDSA key_curve is required")),
        },
    };

    let key_pem = key
        .private_key_to_pem_pkcs8()
        .map_err(|e| anyhow!("failed to serialize private key: {e}"))?;

    String::from_utf8(key_pem).map_err(|_| anyhow!("generated key PEM contained invalid UTF-8"))
}

/// Generates a fresh RSA account key for a new ACME account.
pub fn generate_account_key_pem() -> Result<String> {
    generate_private_key(&KeyAlgorithm::Rsa, Some(2048), None)
}

/// Creates an ACME directory connection and account from a stored account
/// key.
pub fn setup_account(
    directory_url: &str,
    contact_email: &str,
    account_key_pem: &str,
) -> Result<(
    Directory<EphemeralPersist>,
    acme_lib::Account<EphemeralPersist>,
)> {
    let persist = EphemeralPersist::new();
    persist.seed_account_key(contact_email, account_key_pem.as_bytes())?;

    let directory = Directory::from_url(persist.clone(), DirectoryUrl::Other(directory_url))
        .map_err(|e: AcmeError| anyhow!(e.to_string()))?;

    let account = directory
        .account_with_realm(
            contact_email,
            Some(vec![format!("mailto:{}", contact_email)]),
        )
        .map_err(|e: AcmeError| anyhow!(e.to_string()))?;

    Ok((directory, account))
}

/// Places one order on the server. `acme-lib` speaks DNS identifiers only;
/// targets carrying other identifier kinds must go through a different
/// client.
pub fn place_order(
    account: &acme_lib::Account<EphemeralPersist>,
    order: &Order,
) -> Result<NewOrder<EphemeralPersist>> {
    let identifiers = order.target.identifiers();
    if let Some(other) = identifiers.iter().find(|i| !i.is_dns()) {
        return Err(anyhow!(
            "the acme-lib client only supports DNS identifiers, got {}",
            other.kind().as_str()
        ));
    }

    let primary = identifiers
        .first()
        .map(|i| i.value().to_string())
        .ok_or_else(|| anyhow!("order target has no identifiers"))?;
    let alt_names: Vec<&str> = identifiers.iter().skip(1).map(|i| i.value()).collect();

    info!(
        "[acme] placing order for {} (+{} alt name(s))",
        primary,
        alt_names.len()
    );
    account
        .new_order(&primary, &alt_names)
        .map_err(|e: AcmeError| anyhow!(e.to_string()))
}

/// [`AcmeClient`] over one placed acme-lib order.
pub struct AcmeLibClient {
    order: Mutex<Option<NewOrder<EphemeralPersist>>>,
    auths: HashMap<String, Auth<EphemeralPersist>>,
    statuses: Mutex<HashMap<String, AuthorizationStatus>>,
    /// challenge url → (authorization domain, challenge type)
    routes: Mutex<HashMap<String, (String, ChallengeType)>>,
}

impl AcmeLibClient {
    pub fn new(order: NewOrder<EphemeralPersist>) -> Result<Self> {
        let auths: Vec<Auth<EphemeralPersist>> = order
            .authorizations()
            .map_err(|e: AcmeError| anyhow!(e.to_string()))?;
        let auths = auths
            .into_iter()
            .map(|auth| (auth.domain_name().to_string(), auth))
            .collect();
        Ok(Self {
            order: Mutex::new(Some(order)),
            auths,
            statuses: Mutex::new(HashMap::new()),
            routes: Mutex::new(HashMap::new()),
        })
    }

    fn auth_for(&self, domain: &str) -> Result<&Auth<EphemeralPersist>> {
        self.auths
            .get(domain)
            .ok_or_else(|| anyhow!("server returned no authorization for {domain}"))
    }

    /// Completes the order after validation: confirm, finalize with the
    /// supplied key, download the certificate chain.
    pub fn finalize(&self, private_key_pem: &str) -> Result<Certificate> {
        let mut order = self
            .order
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| anyhow!("order already finalized"))?;

        let csr_order = loop {
            if let Some(csr) = order.confirm_validations() {
                break csr;
            }
            order.refresh().map_err(|e| anyhow!(e.to_string()))?;
        };

        let cert_order = csr_order
            .finalize(private_key_pem, FINALIZE_DELAY_MS)
            .map_err(|e| anyhow!(e.to_string()))?;
        cert_order
            .download_and_save_cert()
            .map_err(|e| anyhow!(e.to_string()))
    }
}

impl AcmeClient for AcmeLibClient {
    fn create_authorization(
        &self,
        _order: &Order,
        identifier: &Identifier,
    ) -> Result<AuthorizationResource> {
        // ACME wildcard authorizations are issued for the base domain with
        // the wildcard marker set.
        let domain = identifier.base_domain().to_string();
        let auth = self.auth_for(&domain)?;
        Ok(AuthorizationResource {
            url: format!("urn:authz:{}", auth.domain_name()),
            identifier: identifier.clone(),
            wildcard: identifier.is_wildcard(),
        })
    }

    fn challenges(&self, authorization: &AuthorizationResource) -> Result<Vec<Challenge>> {
        let domain = authorization.identifier.base_domain();
        let auth = self.auth_for(domain)?;
        let api = auth.api_auth();

        let mut offered = Vec::new();
        for api_challenge in &api.challenges {
            let (kind, proof) = match api_challenge._type.as_str() {
                "http-01" => (ChallengeType::Http01, auth.http_challenge().http_proof()),
                "dns-01" => (ChallengeType::Dns01, auth.dns_challenge().dns_proof()),
                other => {
                    debug!("[acme] ignoring unsupported challenge type {other} for {domain}");
                    continue;
                }
            };
            self.routes.lock().unwrap_or_else(|e| e.into_inner()).insert(
                api_challenge.url.clone(),
                (domain.to_string(), kind),
            );
            offered.push(Challenge {
                url: api_challenge.url.clone(),
                kind,
                token: api_challenge.token.clone(),
                proof,
            });
        }
        Ok(offered)
    }

    fn trigger_challenge(&self, challenge: &Challenge) -> Result<()> {
        let (domain, kind) = self
            .routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&challenge.url)
            .cloned()
            .ok_or_else(|| anyhow!("unknown challenge {}", challenge.url))?;
        let auth = self.auth_for(&domain)?;

        debug!("[acme] validating {kind} challenge for {domain}");
        let outcome = match kind {
            ChallengeType::Http01 => auth.http_challenge().validate(VALIDATE_DELAY_MS),
            ChallengeType::Dns01 => auth.dns_challenge().validate(VALIDATE_DELAY_MS),
            ChallengeType::TlsAlpn01 => {
                return Err(anyhow!("tls-alpn-01 is not supported by the acme-lib client"));
            }
        };

        let status = match outcome {
            Ok(()) => AuthorizationStatus::Valid,
            Err(err) => {
                warn!("[acme] validation failed for {domain}: {err}");
                AuthorizationStatus::Invalid
            }
        };
        self.statuses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(domain, status);
        Ok(())
    }

    fn authorization_status(
        &self,
        authorization: &AuthorizationResource,
    ) -> Result<AuthorizationStatus> {
        let domain = authorization.identifier.base_domain();
        Ok(self
            .statuses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(domain)
            .copied()
            .unwrap_or(AuthorizationStatus::Pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_persist_round_trips() {
        let persist = EphemeralPersist::new();
        let key = PersistKey::new("realm", PersistKind::AccountPrivateKey, "acme_account");
        assert_eq!(persist.get(&key).unwrap(), None);
        persist.put(&key, b"pem bytes").unwrap();
        assert_eq!(persist.get(&key).unwrap(), Some(b"pem bytes".to_vec()));
    }

    #[test]
    fn key_params_default_to_rsa_2048() {
        let (algorithm, size, curve) = resolve_key_params(None, None, None).unwrap();
        assert_eq!(algorithm, KeyAlgorithm::Rsa);
        assert_eq!(size, Some(2048));
        assert_eq!(curve, None);
    }

    #[test]
    fn key_params_reject_size_without_algorithm() {
        assert!(resolve_key_params(None, Some(2048), None).is_err());
    }

    #[test]
    fn key_params_validate_rsa_sizes() {
        assert!(resolve_key_params(Some(KeyAlgorithm::Rsa), Some(3072), None).is_ok());
        assert!(resolve_key_params(Some(KeyAlgorithm::Rsa), Some(1024), None).is_err());
        assert!(resolve_key_params(Some(KeyAlgorithm::Rsa), None, None).is_err());
    }

    #[test]
    fn key_params_validate_ecdsa_curves() {
        let (_, size, curve) =
            resolve_key_params(Some(KeyAlgorithm::Ecdsa), None, Some(KeyCurve::P384)).unwrap();
        assert_eq!(size, None);
        assert_eq!(curve, Some(KeyCurve::P384));
        assert!(resolve_key_params(Some(KeyAlgorithm::Ecdsa), Some(256), Some(KeyCurve::P256)).is_err());
        assert!(resolve_key_params(Some(KeyAlgorithm::Ecdsa), None, None).is_err());
    }

    #[test]
    fn generates_ec_keys_in_pem() {
        let pem = generate_private_key(&KeyAlgorithm::Ecdsa, None, Some(&KeyCurve::P256)).unwrap();
        assert!(pem.contains("BEGIN PRIVATE KEY"));
    }
}
