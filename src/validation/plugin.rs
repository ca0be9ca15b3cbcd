use std::ops::BitOr;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use super::ValidationContext;
use crate::acme::{Challenge, ChallengeType};
use crate::capability::Capability;
use crate::target::Target;

/// Which phases a plugin allows to run concurrently, and whether one plugin
/// instance may serve several authorizations of the same order. Absence of a
/// flag forces sequential behavior for that phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ParallelOperations(u8);

impl ParallelOperations {
    pub const NONE: Self = Self(0);
    /// Authorizations may be told to proceed to server-side checking (and be
    /// polled) concurrently.
    pub const ANSWER: Self = Self(1);
    /// Challenge preparation for multiple authorizations may run
    /// concurrently.
    pub const PREPARE: Self = Self(1 << 1);
    /// One instance may serve multiple authorizations without
    /// reinitialization. Required for plugins that batch Commit.
    pub const REUSE: Self = Self(1 << 2);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ParallelOperations {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One validation plugin instance.
///
/// Instances may carry batching state across `prepare` calls (guarded
/// internally; an instance is never shared across plugin groups). Errors from
/// any method are caught by the engine and converted into the per-
/// authorization or per-instance failure semantics; they never abort the run.
pub trait ValidationPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn challenge_type(&self) -> ChallengeType;

    fn parallelism(&self) -> ParallelOperations;

    /// Picks one of several offered challenges of the plugin's type.
    /// The default takes the first offer.
    fn select_challenge(&self, offered: &[Challenge]) -> Option<Challenge> {
        offered.first().cloned()
    }

    /// Computes and stages proof material for one authorization. Returning
    /// `Ok(false)` or an error marks that single authorization invalid
    /// without affecting its siblings.
    fn prepare(&self, ctx: &mut ValidationContext) -> Result<bool>;

    /// Flushes staged changes once per instance after all of its `prepare`
    /// calls finished. Failure invalidates every prepared authorization in
    /// the group.
    fn commit(&self) -> Result<()>;

    /// Removes staged proof material. Invoked once per instance regardless of
    /// outcome; must be idempotent. Failures are logged, never escalated.
    fn cleanup(&self) -> Result<()>;
}

/// Constructs plugin instances and declares their eligibility.
///
/// The engine creates a fresh instance per authorization unless the plugin
/// declares `REUSE`, in which case one instance serves the whole group.
pub trait ValidationPluginFactory: Send + Sync {
    fn name(&self) -> &str;

    fn challenge_type(&self) -> ChallengeType;

    /// Pure eligibility rule for this plugin against a target. No I/O.
    fn state(&self, target: &Target) -> Capability;

    fn create(&self) -> Result<Arc<dyn ValidationPlugin>>;
}

impl std::fmt::Debug for dyn ValidationPluginFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationPluginFactory")
            .field("name", &self.name())
            .finish()
    }
}

/// The set of installed plugins, built once at startup and passed by
/// reference into the engine. Priority among enabled plugins is registration
/// order; the capability rules only decide eligibility.
#[derive(Default)]
pub struct PluginRegistry {
    factories: Vec<Arc<dyn ValidationPluginFactory>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn ValidationPluginFactory>) -> &mut Self {
        self.factories.push(factory);
        self
    }

    pub fn factories(&self) -> &[Arc<dyn ValidationPluginFactory>] {
        &self.factories
    }

    /// The plugins a user may select for this target, with the disabled ones
    /// and their verbatim reasons.
    pub fn menu(&self, target: &Target) -> Vec<(String, Capability)> {
        self.factories
            .iter()
            .map(|f| (f.name().to_string(), f.state(target)))
            .collect()
    }

    /// Resolves the single plugin to run for a target. A preferred plugin
    /// name (user choice) wins if it exists and may run; otherwise the first
    /// runnable plugin in registration order is taken. The error value lists
    /// every installed plugin with its disabled reason, verbatim.
    pub fn resolve(
        &self,
        target: &Target,
        preferred: Option<&str>,
    ) -> Result<Arc<dyn ValidationPluginFactory>, String> {
        if self.factories.is_empty() {
            return Err("no validation plugins are installed".to_string());
        }

        if let Some(name) = preferred {
            let factory = self
                .factories
                .iter()
                .find(|f| f.name() == name)
                .ok_or_else(|| format!("selected validation plugin {name} is not installed"))?;
            return match factory.state(target).execution.reason() {
                None => Ok(factory.clone()),
                Some(reason) => Err(format!("{name}: {reason}")),
            };
        }

        let mut reasons = Vec::new();
        for factory in &self.factories {
            match factory.state(target).execution.reason() {
                None => return Ok(factory.clone()),
                Some(reason) => reasons.push(format!("{}: {}", factory.name(), reason)),
            }
        }
        Err(reasons.join("; "))
    }
}
