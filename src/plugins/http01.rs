//! HTTP-01 validation against a self-hosted challenge responder.
//!
//! The listener itself lives outside this crate; the plugin populates its
//! token mapping during prepare/commit and clears it during cleanup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use log::debug;

use crate::acme::ChallengeType;
use crate::capability::{Capability, challenge_state};
use crate::target::Target;
use crate::validation::plugin::{ParallelOperations, ValidationPlugin, ValidationPluginFactory};
use crate::validation::{ChallengeDetails, ValidationContext};

/// Path prefix the responder serves challenges under.
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Returns the challenge token when `path` is a challenge request.
pub fn extract_token(path: &str) -> Option<&str> {
    path.strip_prefix(ACME_CHALLENGE_PREFIX)
}

/// The consumed self-hosted HTTP responder: serves plain-text responses under
/// the well-known prefix on a configurable port and answers 404 for unknown
/// tokens. Implementations live with the embedding application.
pub trait ChallengeResponder: Send + Sync {
    /// Replaces the token → response mapping wholesale.
    fn set_challenges(&self, responses: &HashMap<String, String>) -> Result<()>;
    fn start(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
}

/// In-memory responder state, usable as the backing store of an embedded
/// listener and as a test double.
#[derive(Default)]
pub struct InMemoryResponder {
    challenges: Mutex<HashMap<String, String>>,
    running: AtomicBool,
}

impl InMemoryResponder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The response body for a token, or `None` (a 404) when unknown.
    pub fn response_for(&self, token: &str) -> Option<String> {
        self.challenges
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(token)
            .cloned()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.challenges.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl ChallengeResponder for InMemoryResponder {
    fn set_challenges(&self, responses: &HashMap<String, String>) -> Result<()> {
        *self.challenges.lock().unwrap_or_else(|e| e.into_inner()) = responses.clone();
        Ok(())
    }

    fn start(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// HTTP-01 plugin: stages token → key-authorization pairs per authorization,
/// publishes them to the responder in one commit, clears them on cleanup.
/// Batching into one responder requires instance reuse across the group.
pub struct Http01 {
    responder: Arc<dyn ChallengeResponder>,
    staged: Mutex<HashMap<String, String>>,
}

impl Http01 {
    pub fn new(responder: Arc<dyn ChallengeResponder>) -> Self {
        Self {
            responder,
            staged: Mutex::new(HashMap::new()),
        }
    }
}

impl ValidationPlugin for Http01 {
    fn name(&self) -> &str {
        "http-01 selfhosted"
    }

    fn challenge_type(&self) -> ChallengeType {
        ChallengeType::Http01
    }

    fn parallelism(&self) -> ParallelOperations {
        ParallelOperations::PREPARE | ParallelOperations::ANSWER | ParallelOperations::REUSE
    }

    fn prepare(&self, ctx: &mut ValidationContext) -> Result<bool> {
        let Some(challenge) = ctx.challenge.as_ref() else {
            return Ok(false);
        };
        debug!(
            "[http01] staging token {} for {}",
            challenge.token,
            ctx.label()
        );
        self.staged
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(challenge.token.clone(), challenge.proof.clone());
        ctx.details = ChallengeDetails::Http {
            token: challenge.token.clone(),
            response: challenge.proof.clone(),
        };
        Ok(true)
    }

    fn commit(&self) -> Result<()> {
        let staged = self.staged.lock().unwrap_or_else(|e| e.into_inner()).clone();
        debug!("[http01] publishing {} challenge(s)", staged.len());
        self.responder.set_challenges(&staged)?;
        self.responder.start()
    }

    fn cleanup(&self) -> Result<()> {
        self.staged.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.responder.set_challenges(&HashMap::new())?;
        self.responder.stop()
    }
}

pub struct Http01Factory {
    responder: Arc<dyn ChallengeResponder>,
}

impl Http01Factory {
    pub fn new(responder: Arc<dyn ChallengeResponder>) -> Self {
        Self { responder }
    }
}

impl ValidationPluginFactory for Http01Factory {
    fn name(&self) -> &str {
        "http-01 selfhosted"
    }

    fn challenge_type(&self) -> ChallengeType {
        ChallengeType::Http01
    }

    fn state(&self, target: &Target) -> Capability {
        Capability::uniform(challenge_state(target, ChallengeType::Http01))
    }

    fn create(&self) -> Result<Arc<dyn ValidationPlugin>> {
        Ok(Arc::new(Http01::new(self.responder.clone())))
    }
}
