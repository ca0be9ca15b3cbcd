//! DNS-01 validation over interchangeable provider transports.
//!
//! Vendor-specific providers (Cloudflare, Route 53, ...) live outside this
//! crate; they plug in through [`DnsProviderAdapter`]. The generic
//! [`WebhookAdapter`] covers self-operated DNS update endpoints.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;

use super::http::{HttpClient, status_error};
use crate::acme::ChallengeType;
use crate::capability::{Capability, challenge_state};
use crate::dns::record_name;
use crate::target::Target;
use crate::validation::plugin::{ParallelOperations, ValidationPlugin, ValidationPluginFactory};
use crate::validation::{ChallengeDetails, DnsValidationRecord, ValidationContext};

/// The uniform contract a DNS provider transport must fit.
///
/// `create_txt` may stage the record locally; `commit` flushes staged changes
/// in one go (the default applies records immediately and has nothing to
/// flush). Implementations declare their safe concurrency via `parallelism`;
/// a provider that batches `commit` must include `REUSE`.
pub trait DnsProviderAdapter: Send + Sync {
    fn name(&self) -> &str;
    fn create_txt(&self, record_name: &str, value: &str) -> Result<()>;
    fn cleanup_txt(&self, record_name: &str) -> Result<()>;
    fn commit(&self) -> Result<()> {
        Ok(())
    }
    fn parallelism(&self) -> ParallelOperations {
        ParallelOperations::ANSWER
    }
}

/// Stands in for a provider that cannot be used; every operation fails with
/// the stored reason, verbatim.
pub struct UnsupportedAdapter {
    reason: String,
}

impl UnsupportedAdapter {
    pub fn new(reason: String) -> Self {
        Self { reason }
    }
}

impl DnsProviderAdapter for UnsupportedAdapter {
    fn name(&self) -> &str {
        "unsupported"
    }

    fn create_txt(&self, _record_name: &str, _value: &str) -> Result<()> {
        Err(anyhow!(self.reason.clone()))
    }

    fn cleanup_txt(&self, _record_name: &str) -> Result<()> {
        Err(anyhow!(self.reason.clone()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub endpoint: String,
    #[serde(default)]
    pub auth_token: Option<String>,
}

/// Provider-agnostic transport: POSTs present/cleanup requests to a
/// self-operated endpoint that performs the actual zone update.
pub struct WebhookAdapter {
    config: WebhookConfig,
}

impl WebhookAdapter {
    pub fn new(config: WebhookConfig) -> Self {
        Self { config }
    }

    /// Builds the adapter from plugin configuration JSON. Secret references
    /// inside the value must be materialized before this is called.
    pub fn from_config(config: Value) -> Result<Self> {
        let config: WebhookConfig =
            serde_json::from_value(config).context("invalid webhook DNS provider configuration")?;
        Ok(Self::new(config))
    }

    fn post(&self, action: &str, record_name: &str, value: Option<&str>) -> Result<()> {
        let mut request = HttpClient::shared().post(&self.config.endpoint).json(
            &serde_json::json!({
                "action": action,
                "record_name": record_name,
                "value": value,
            }),
        );
        if let Some(token) = &self.config.auth_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        let response = request
            .send()
            .with_context(|| format!("webhook {action} request failed for {record_name}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().ok();
            return Err(status_error("webhook", status, body));
        }
        Ok(())
    }
}

impl DnsProviderAdapter for WebhookAdapter {
    fn name(&self) -> &str {
        "webhook"
    }

    fn create_txt(&self, record_name: &str, value: &str) -> Result<()> {
        self.post("present", record_name, Some(value))
    }

    fn cleanup_txt(&self, record_name: &str) -> Result<()> {
        self.post("cleanup", record_name, None)
    }
}

struct StagedRecord {
    record_name: String,
}

/// DNS-01 validation plugin over one provider adapter. Keeps a ledger of the
/// records it published so cleanup removes exactly what this instance
/// created, once.
pub struct Dns01 {
    name: String,
    adapter: Arc<dyn DnsProviderAdapter>,
    staged: Mutex<Vec<StagedRecord>>,
}

impl Dns01 {
    pub fn new(adapter: Arc<dyn DnsProviderAdapter>) -> Self {
        Self {
            name: format!("dns-01 via {}", adapter.name()),
            adapter,
            staged: Mutex::new(Vec::new()),
        }
    }
}

impl ValidationPlugin for Dns01 {
    fn name(&self) -> &str {
        &self.name
    }

    fn challenge_type(&self) -> ChallengeType {
        ChallengeType::Dns01
    }

    fn parallelism(&self) -> ParallelOperations {
        self.adapter.parallelism()
    }

    fn prepare(&self, ctx: &mut ValidationContext) -> Result<bool> {
        let challenge = ctx
            .challenge
            .as_ref()
            .ok_or_else(|| anyhow!("no challenge selected"))?;
        let record = record_name(ctx.authorization.authorization.identifier.value());
        debug!("[dns01] publishing TXT {} for {}", record, ctx.label());

        self.adapter.create_txt(&record, &challenge.proof)?;
        self.staged
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(StagedRecord {
                record_name: record.clone(),
            });
        ctx.details = ChallengeDetails::Dns(DnsValidationRecord {
            authority: record,
            value: challenge.proof.clone(),
            lookup: None,
        });
        Ok(true)
    }

    fn commit(&self) -> Result<()> {
        self.adapter.commit()
    }

    fn cleanup(&self) -> Result<()> {
        // Draining makes a second call a no-op.
        let staged: Vec<StagedRecord> = self
            .staged
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        let mut errors = Vec::new();
        for record in staged {
            debug!("[dns01] removing TXT {}", record.record_name);
            if let Err(err) = self.adapter.cleanup_txt(&record.record_name) {
                warn!(
                    "[dns01] failed to remove TXT {}: {err:#}",
                    record.record_name
                );
                errors.push((record.record_name, err));
            }
        }
        if let Some((record_name, err)) = errors.into_iter().next() {
            return Err(anyhow!("failed to remove TXT {record_name}: {err}"));
        }
        Ok(())
    }
}

/// Creates one [`Dns01`] instance per call against a fresh adapter from the
/// supplied constructor.
pub struct Dns01Factory {
    name: String,
    make_adapter: Box<dyn Fn() -> Result<Arc<dyn DnsProviderAdapter>> + Send + Sync>,
}

impl Dns01Factory {
    pub fn new(
        name: impl Into<String>,
        make_adapter: impl Fn() -> Result<Arc<dyn DnsProviderAdapter>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            make_adapter: Box::new(make_adapter),
        }
    }
}

impl ValidationPluginFactory for Dns01Factory {
    fn name(&self) -> &str {
        &self.name
    }

    fn challenge_type(&self) -> ChallengeType {
        ChallengeType::Dns01
    }

    fn state(&self, target: &Target) -> Capability {
        Capability::uniform(challenge_state(target, ChallengeType::Dns01))
    }

    fn create(&self) -> Result<Arc<dyn ValidationPlugin>> {
        let adapter = (self.make_adapter)()?;
        Ok(Arc::new(Dns01::new(adapter)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::{AuthorizationResource, Challenge};
    use crate::identifier::Identifier;
    use crate::validation::AuthorizationContext;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingAdapter {
        created: Mutex<Vec<(String, String)>>,
        removed: Mutex<Vec<String>>,
        commits: AtomicUsize,
        fail_create: bool,
    }

    impl DnsProviderAdapter for RecordingAdapter {
        fn name(&self) -> &str {
            "recording"
        }

        fn create_txt(&self, record_name: &str, value: &str) -> Result<()> {
            if self.fail_create {
                return Err(anyhow!("provider API unavailable"));
            }
            self.created
                .lock()
                .unwrap()
                .push((record_name.to_string(), value.to_string()));
            Ok(())
        }

        fn cleanup_txt(&self, record_name: &str) -> Result<()> {
            self.removed.lock().unwrap().push(record_name.to_string());
            Ok(())
        }

        fn commit(&self) -> Result<()> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn ctx_for(domain: &str) -> ValidationContext {
        let authorization = AuthorizationContext::new(
            AuthorizationResource {
                url: format!("https://acme.example/authz/{domain}"),
                identifier: Identifier::dns(domain).unwrap(),
                wildcard: domain.starts_with("*."),
            },
            "order".to_string(),
        );
        let mut ctx = ValidationContext::new(authorization, "dns-01", ChallengeType::Dns01);
        ctx.challenge = Some(Challenge {
            url: format!("https://acme.example/chall/{domain}"),
            kind: ChallengeType::Dns01,
            token: "token".to_string(),
            proof: format!("proof-{domain}"),
        });
        ctx
    }

    #[test]
    fn prepare_publishes_and_stages_the_record() {
        let adapter = Arc::new(RecordingAdapter::default());
        let plugin = Dns01::new(adapter.clone());
        let mut ctx = ctx_for("example.com");

        assert!(plugin.prepare(&mut ctx).unwrap());
        assert_eq!(
            adapter.created.lock().unwrap()[0],
            (
                "_acme-challenge.example.com".to_string(),
                "proof-example.com".to_string()
            )
        );
        assert!(matches!(ctx.details, ChallengeDetails::Dns(_)));
    }

    #[test]
    fn prepare_strips_wildcard_labels_from_the_record_name() {
        let adapter = Arc::new(RecordingAdapter::default());
        let plugin = Dns01::new(adapter.clone());
        let mut ctx = ctx_for("*.example.com");

        assert!(plugin.prepare(&mut ctx).unwrap());
        assert_eq!(
            adapter.created.lock().unwrap()[0].0,
            "_acme-challenge.example.com"
        );
    }

    #[test]
    fn prepare_without_a_challenge_errors() {
        let plugin = Dns01::new(Arc::new(RecordingAdapter::default()));
        let mut ctx = ctx_for("example.com");
        ctx.challenge = None;
        assert!(plugin.prepare(&mut ctx).is_err());
    }

    #[test]
    fn prepare_surfaces_provider_failures() {
        let adapter = Arc::new(RecordingAdapter {
            fail_create: true,
            ..RecordingAdapter::default()
        });
        let plugin = Dns01::new(adapter);
        let mut ctx = ctx_for("example.com");
        let err = plugin.prepare(&mut ctx).unwrap_err();
        assert!(err.to_string().contains("unavailable"));
    }

    #[test]
    fn commit_flushes_through_the_adapter() {
        let adapter = Arc::new(RecordingAdapter::default());
        let plugin = Dns01::new(adapter.clone());
        plugin.commit().unwrap();
        assert_eq!(adapter.commits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cleanup_removes_staged_records_and_is_idempotent() {
        let adapter = Arc::new(RecordingAdapter::default());
        let plugin = Dns01::new(adapter.clone());
        let mut a = ctx_for("a.example.com");
        let mut b = ctx_for("b.example.com");
        plugin.prepare(&mut a).unwrap();
        plugin.prepare(&mut b).unwrap();

        plugin.cleanup().unwrap();
        assert_eq!(adapter.removed.lock().unwrap().len(), 2);

        // Second call sees an empty ledger.
        plugin.cleanup().unwrap();
        assert_eq!(adapter.removed.lock().unwrap().len(), 2);
    }

    #[test]
    fn unsupported_adapter_fails_with_its_reason_verbatim() {
        let adapter = UnsupportedAdapter::new("provider xyz has no adapter yet".to_string());
        let err = adapter.create_txt("_acme-challenge.example.com", "v").unwrap_err();
        assert_eq!(err.to_string(), "provider xyz has no adapter yet");
    }

    #[test]
    fn webhook_config_parses_with_and_without_token() {
        let adapter = WebhookAdapter::from_config(serde_json::json!({
            "endpoint": "https://dns.internal/hook",
            "auth_token": "t0ken",
        }))
        .unwrap();
        assert_eq!(adapter.config.endpoint, "https://dns.internal/hook");
        assert_eq!(adapter.config.auth_token.as_deref(), Some("t0ken"));

        let adapter = WebhookAdapter::from_config(serde_json::json!({
            "endpoint": "https://dns.internal/hook",
        }))
        .unwrap();
        assert!(adapter.config.auth_token.is_none());

        assert!(WebhookAdapter::from_config(serde_json::json!({})).is_err());
    }

    #[test]
    fn factory_constructs_independent_instances() {
        let factory = Dns01Factory::new("webhook-dns", || {
            Ok(Arc::new(RecordingAdapter::default()) as Arc<dyn DnsProviderAdapter>)
        });
        let first = factory.create().unwrap();
        let second = factory.create().unwrap();
        assert_eq!(first.name(), "dns-01 via recording");
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
