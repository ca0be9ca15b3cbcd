//! Manually-operated DNS-01 validation.
//!
//! A human creates the TXT record by hand; the plugin shows the instruction,
//! watches public resolvers for the record, and offers a retry / continue /
//! abort choice while it stays invisible. The blocking human-in-the-loop
//! cycle is modeled as a suspension point yielding [`RetryChoice`] to the
//! caller.

use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use log::{debug, info};
use serde::Serialize;

use crate::acme::ChallengeType;
use crate::capability::{Capability, challenge_state};
use crate::dns::{DnsPropagationResult, PropagationState, doh, record_name};
use crate::target::Target;
use crate::validation::plugin::{ParallelOperations, ValidationPlugin, ValidationPluginFactory};
use crate::validation::{ChallengeDetails, DnsValidationRecord, ValidationContext};

/// What the operator chose after a failed visibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryChoice {
    /// Check again.
    Retry,
    /// Stop checking locally and hand over to the ACME server.
    Continue,
    /// Give up on this authorization.
    Abort,
}

/// The TXT record instructions shown to the operator.
#[derive(Debug, Clone, Serialize)]
pub struct DnsRecordInstruction {
    pub record_name: String,
    pub value: String,
    pub zone: String,
}

/// The human (or UI) driving manual validation.
pub trait ValidationPrompt: Send + Sync {
    /// Shows the record to create. Returns once the operator says it exists.
    fn present_record(&self, instruction: &DnsRecordInstruction) -> Result<()>;

    /// The record was not (or wrongly) visible; ask how to proceed.
    fn record_missing(
        &self,
        instruction: &DnsRecordInstruction,
        result: &DnsPropagationResult,
    ) -> RetryChoice;

    /// Asks the operator to delete the record again.
    fn remove_record(&self, instruction: &DnsRecordInstruction);
}

type VisibilityCheck = dyn Fn(&str, &str) -> Result<DnsPropagationResult> + Send + Sync;

/// Manual DNS-01 plugin. Strictly sequential: one record is presented,
/// confirmed, and recorded at a time.
pub struct ManualDns {
    prompt: Arc<dyn ValidationPrompt>,
    check: Box<VisibilityCheck>,
    staged: Mutex<Vec<DnsRecordInstruction>>,
}

impl ManualDns {
    pub fn new(prompt: Arc<dyn ValidationPrompt>) -> Self {
        Self::with_visibility_check(prompt, doh::check_txt_record)
    }

    /// Overrides the public-resolver visibility check (used by tests).
    pub fn with_visibility_check(
        prompt: Arc<dyn ValidationPrompt>,
        check: impl Fn(&str, &str) -> Result<DnsPropagationResult> + Send + Sync + 'static,
    ) -> Self {
        Self {
            prompt,
            check: Box::new(check),
            staged: Mutex::new(Vec::new()),
        }
    }
}

impl ValidationPlugin for ManualDns {
    fn name(&self) -> &str {
        "dns-01 manual"
    }

    fn challenge_type(&self) -> ChallengeType {
        ChallengeType::Dns01
    }

    fn parallelism(&self) -> ParallelOperations {
        // A human answers one instruction at a time.
        ParallelOperations::NONE
    }

    fn prepare(&self, ctx: &mut ValidationContext) -> Result<bool> {
        let challenge = ctx
            .challenge
            .as_ref()
            .ok_or_else(|| anyhow!("no challenge selected"))?;
        let identifier = ctx.authorization.authorization.identifier.clone();
        let instruction = DnsRecordInstruction {
            record_name: record_name(identifier.value()),
            value: challenge.proof.clone(),
            zone: derive_zone(identifier.base_domain()),
        };

        self.prompt.present_record(&instruction)?;
        self.staged
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(instruction.clone());
        ctx.details = ChallengeDetails::Dns(DnsValidationRecord {
            authority: instruction.record_name.clone(),
            value: instruction.value.clone(),
            lookup: None,
        });

        loop {
            let result = (self.check)(&instruction.record_name, &instruction.value)?;
            match result.state {
                PropagationState::Found => {
                    info!(
                        "[manual-dns] record {} confirmed via public resolvers",
                        instruction.record_name
                    );
                    return Ok(true);
                }
                _ => {
                    debug!(
                        "[manual-dns] record {} not confirmed (state={:?})",
                        instruction.record_name, result.state
                    );
                    match self.prompt.record_missing(&instruction, &result) {
                        RetryChoice::Retry => continue,
                        RetryChoice::Continue => return Ok(true),
                        RetryChoice::Abort => return Ok(false),
                    }
                }
            }
        }
    }

    fn commit(&self) -> Result<()> {
        // Records were created by hand; there is nothing to flush.
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        let staged: Vec<DnsRecordInstruction> = self
            .staged
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for instruction in staged {
            self.prompt.remove_record(&instruction);
        }
        Ok(())
    }
}

/// Best-effort zone guess for display purposes only; authoritative discovery
/// happens in the propagation pre-check.
fn derive_zone(hostname: &str) -> String {
    let parts: Vec<&str> = hostname.trim_end_matches('.').split('.').collect();
    if parts.len() >= 2 {
        format!("{}.{}", parts[parts.len() - 2], parts[parts.len() - 1])
    } else {
        hostname.to_string()
    }
}

pub struct ManualDnsFactory {
    prompt: Arc<dyn ValidationPrompt>,
}

impl ManualDnsFactory {
    pub fn new(prompt: Arc<dyn ValidationPrompt>) -> Self {
        Self { prompt }
    }
}

impl ValidationPluginFactory for ManualDnsFactory {
    fn name(&self) -> &str {
        "dns-01 manual"
    }

    fn challenge_type(&self) -> ChallengeType {
        ChallengeType::Dns01
    }

    fn state(&self, target: &Target) -> Capability {
        Capability::uniform(challenge_state(target, ChallengeType::Dns01))
    }

    fn create(&self) -> Result<Arc<dyn ValidationPlugin>> {
        Ok(Arc::new(ManualDns::new(self.prompt.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::{AuthorizationResource, Challenge};
    use crate::identifier::Identifier;
    use crate::validation::AuthorizationContext;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedPrompt {
        choices: Mutex<Vec<RetryChoice>>,
        presented: AtomicUsize,
        removed: AtomicUsize,
    }

    impl ScriptedPrompt {
        fn new(choices: Vec<RetryChoice>) -> Self {
            Self {
                choices: Mutex::new(choices),
                presented: AtomicUsize::new(0),
                removed: AtomicUsize::new(0),
            }
        }
    }

    impl ValidationPrompt for ScriptedPrompt {
        fn present_record(&self, _instruction: &DnsRecordInstruction) -> Result<()> {
            self.presented.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn record_missing(
            &self,
            _instruction: &DnsRecordInstruction,
            _result: &DnsPropagationResult,
        ) -> RetryChoice {
            self.choices.lock().unwrap().remove(0)
        }

        fn remove_record(&self, _instruction: &DnsRecordInstruction) {
            self.removed.fetch_add(1, Ordering::SeqCst);
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
        let mut ctx = ValidationContext::new(authorization, "dns-01 manual", ChallengeType::Dns01);
        ctx.challenge = Some(Challenge {
            url: format!("https://acme.example/chall/{domain}"),
            kind: ChallengeType::Dns01,
            token: "token".to_string(),
            proof: "proof-value".to_string(),
        });
        ctx
    }

    fn found() -> DnsPropagationResult {
        DnsPropagationResult {
            state: PropagationState::Found,
            reason: None,
            observed_values: vec!["proof-value".to_string()],
        }
    }

    fn pending() -> DnsPropagationResult {
        DnsPropagationResult {
            state: PropagationState::Pending,
            reason: Some("record not found yet".to_string()),
            observed_values: vec![],
        }
    }

    #[test]
    fn succeeds_once_the_record_is_visible() {
        let prompt = Arc::new(ScriptedPrompt::new(vec![]));
        let plugin =
            ManualDns::with_visibility_check(prompt.clone(), |_, _| Ok(found()));
        let mut ctx = ctx_for("example.com");
        assert!(plugin.prepare(&mut ctx).unwrap());
        assert_eq!(prompt.presented.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retry_choice_loops_until_found() {
        let prompt = Arc::new(ScriptedPrompt::new(vec![RetryChoice::Retry]));
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        let plugin = ManualDns::with_visibility_check(prompt, move |_, _| {
            if attempts_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(pending())
            } else {
                Ok(found())
            }
        });
        let mut ctx = ctx_for("example.com");
        assert!(plugin.prepare(&mut ctx).unwrap());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn continue_choice_hands_over_without_confirmation() {
        let prompt = Arc::new(ScriptedPrompt::new(vec![RetryChoice::Continue]));
        let plugin = ManualDns::with_visibility_check(prompt, |_, _| Ok(pending()));
        let mut ctx = ctx_for("example.com");
        assert!(plugin.prepare(&mut ctx).unwrap());
    }

    #[test]
    fn abort_choice_declines_the_authorization() {
        let prompt = Arc::new(ScriptedPrompt::new(vec![RetryChoice::Abort]));
        let plugin = ManualDns::with_visibility_check(prompt, |_, _| Ok(pending()));
        let mut ctx = ctx_for("example.com");
        assert!(!plugin.prepare(&mut ctx).unwrap());
    }

    #[test]
    fn cleanup_asks_for_removal_once() {
        let prompt = Arc::new(ScriptedPrompt::new(vec![]));
        let plugin =
            ManualDns::with_visibility_check(prompt.clone(), |_, _| Ok(found()));
        let mut ctx = ctx_for("example.com");
        plugin.prepare(&mut ctx).unwrap();

        plugin.cleanup().unwrap();
        plugin.cleanup().unwrap();
        assert_eq!(prompt.removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zone_guess_takes_the_last_two_labels() {
        assert_eq!(derive_zone("www.example.com"), "example.com");
        assert_eq!(derive_zone("example.com."), "example.com");
        assert_eq!(derive_zone("localhost"), "localhost");
    }
}
