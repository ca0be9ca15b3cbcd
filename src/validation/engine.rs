//! The validation execution protocol.
//!
//! Authorizations are grouped by their selected plugin and driven through
//! `select → prepare → commit → propagation pre-check → server trigger →
//! poll → cleanup`. Phase order is strict within a group; calls inside a
//! phase interleave only when the plugin opts in through its
//! [`ParallelOperations`] flags. Groups execute independently of each other:
//! one group's failure never blocks another's progress.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;

use super::plugin::{
    ParallelOperations, PluginRegistry, ValidationPlugin, ValidationPluginFactory,
};
use super::{AuthorizationContext, ChallengeDetails, ValidationContext, ValidationPhase};
use crate::acme::{AcmeClient, AuthorizationStatus, ChallengeType};
use crate::cancel::CancellationToken;
use crate::dns::PropagationState;
use crate::dns::authority::PropagationChecker;
use crate::error::ValidationError;
use crate::order::Order;
use crate::retry::Backoff;
use crate::settings::{OnPropagationTimeout, ValidationSettings};

/// Terminal per-identifier report: which validation method ran and how it
/// ended. Nothing is silently swallowed except best-effort cleanup errors,
/// which are logged at a lower severity.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationOutcome {
    pub identifier: String,
    pub label: String,
    pub plugin: String,
    pub challenge_type: ChallengeType,
    pub valid: bool,
    pub error: Option<ValidationError>,
}

struct GroupMember {
    instance_idx: usize,
    ctx: ValidationContext,
}

impl GroupMember {
    fn identifier(&self) -> String {
        self.ctx
            .authorization
            .authorization
            .identifier
            .value()
            .to_string()
    }
}

/// The authorizations of one order that share a selected plugin, together
/// with the plugin instance(s) that serve them. Without the `Reuse` flag a
/// fresh instance is constructed per authorization so no client state is
/// shared; with it, one instance serves the whole group (required for plugins
/// that batch Commit).
pub struct PluginGroup {
    plugin_name: String,
    flags: ParallelOperations,
    instances: Vec<Arc<dyn ValidationPlugin>>,
    members: Vec<GroupMember>,
}

impl PluginGroup {
    pub fn build(
        factory: &dyn ValidationPluginFactory,
        contexts: Vec<AuthorizationContext>,
    ) -> Result<Self> {
        let first = factory
            .create()
            .with_context(|| format!("failed to construct plugin {}", factory.name()))?;
        let flags = first.parallelism();
        let plugin_name = first.name().to_string();
        let challenge_type = first.challenge_type();
        let reuse = flags.contains(ParallelOperations::REUSE);

        let mut instances = vec![first];
        let mut members = Vec::with_capacity(contexts.len());
        for (i, authorization) in contexts.into_iter().enumerate() {
            let instance_idx = if reuse || i == 0 {
                0
            } else {
                instances.push(factory.create().with_context(|| {
                    format!("failed to construct plugin {}", factory.name())
                })?);
                instances.len() - 1
            };
            members.push(GroupMember {
                instance_idx,
                ctx: ValidationContext::new(authorization, plugin_name.clone(), challenge_type),
            });
        }

        Ok(Self {
            plugin_name,
            flags,
            instances,
            members,
        })
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn into_outcomes(self) -> Vec<AuthorizationOutcome> {
        self.members
            .into_iter()
            .map(|member| {
                let identifier = member
                    .ctx
                    .authorization
                    .authorization
                    .identifier
                    .value()
                    .to_string();
                AuthorizationOutcome {
                    identifier,
                    label: member.ctx.label().to_string(),
                    plugin: member.ctx.plugin_name.clone(),
                    challenge_type: member.ctx.challenge_type,
                    valid: member.ctx.valid(),
                    error: member.ctx.error().cloned(),
                }
            })
            .collect()
    }
}

/// Drives plugin groups through the validation protocol against the consumed
/// ACME client.
pub struct ValidationEngine<'a> {
    client: &'a dyn AcmeClient,
    registry: &'a PluginRegistry,
    settings: ValidationSettings,
    propagation: Option<&'a dyn PropagationChecker>,
    cancel: CancellationToken,
}

impl<'a> ValidationEngine<'a> {
    pub fn new(client: &'a dyn AcmeClient, registry: &'a PluginRegistry) -> Self {
        Self {
            client,
            registry,
            settings: ValidationSettings::default(),
            propagation: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_settings(mut self, settings: ValidationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_propagation_checker(mut self, checker: &'a dyn PropagationChecker) -> Self {
        self.propagation = Some(checker);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Validates every identifier of one order: requests authorizations,
    /// resolves the plugin, and runs the phase machine. Per-identifier
    /// failures land in the returned outcomes; only setup problems (the
    /// client refusing to hand out authorizations, a plugin that cannot be
    /// constructed) surface as errors.
    pub fn validate_order(
        &self,
        order: &Order,
        preferred_plugin: Option<&str>,
    ) -> Result<Vec<AuthorizationOutcome>> {
        let identifiers = order.target.identifiers();
        let order_key = order.cache_key();
        info!(
            "[engine] validating order {} with {} identifier(s)",
            &order_key[..12],
            identifiers.len()
        );

        let factory = match self.registry.resolve(&order.target, preferred_plugin) {
            Ok(factory) => factory,
            Err(reasons) => {
                warn!("[engine] no eligible validation plugin: {reasons}");
                return Ok(identifiers
                    .iter()
                    .map(|identifier| AuthorizationOutcome {
                        identifier: identifier.value().to_string(),
                        label: identifier.label(),
                        plugin: String::new(),
                        challenge_type: ChallengeType::Dns01,
                        valid: false,
                        error: Some(ValidationError::NoEligiblePlugin {
                            identifier: identifier.value().to_string(),
                            reasons: reasons.clone(),
                        }),
                    })
                    .collect());
            }
        };

        let mut contexts = Vec::with_capacity(identifiers.len());
        for identifier in &identifiers {
            let resource = self
                .client
                .create_authorization(order, identifier)
                .with_context(|| format!("failed to create authorization for {identifier}"))?;
            contexts.push(AuthorizationContext::new(resource, order_key.clone()));
        }

        let mut group = PluginGroup::build(factory.as_ref(), contexts)?;
        self.run_groups(std::slice::from_mut(&mut group));
        Ok(group.into_outcomes())
    }

    /// Runs several plugin groups concurrently and independently.
    pub fn run_groups(&self, groups: &mut [PluginGroup]) {
        thread::scope(|scope| {
            for group in groups.iter_mut() {
                scope.spawn(move || self.run_group(group));
            }
        });
    }

    /// One group's trip through the phase machine. Never early-returns:
    /// failures are recorded on their contexts so cleanup always runs, on
    /// every path.
    fn run_group(&self, group: &mut PluginGroup) {
        self.select_phase(group);
        self.prepare_phase(group);
        self.commit_phase(group);
        self.propagation_phase(group);
        self.answer_phase(group);
        self.cleanup_phase(group);
    }

    fn select_phase(&self, group: &mut PluginGroup) {
        for i in 0..group.members.len() {
            let instance = group.instances[group.members[i].instance_idx].clone();
            let identifier = group.members[i].identifier();
            let ctx = &mut group.members[i].ctx;
            let offered = match self.client.challenges(&ctx.authorization.authorization) {
                Ok(offered) => offered,
                Err(err) => {
                    ctx.mark_invalid(ValidationError::PrepareFailed {
                        identifier,
                        message: format!("failed to fetch challenges: {err}"),
                    });
                    continue;
                }
            };
            let supported: Vec<_> = offered
                .into_iter()
                .filter(|c| c.kind == ctx.challenge_type)
                .collect();
            let chosen = if supported.len() > 1 {
                instance.select_challenge(&supported)
            } else {
                supported.first().cloned()
            };
            match chosen {
                Some(challenge) => {
                    debug!(
                        "[engine] selected {} challenge for {}",
                        challenge.kind,
                        ctx.label()
                    );
                    ctx.challenge = Some(challenge);
                    ctx.advance(ValidationPhase::ChallengeSelected);
                }
                None => {
                    ctx.mark_invalid(ValidationError::NoMatchingChallenge {
                        identifier,
                        challenge_type: ctx.challenge_type.to_string(),
                    });
                }
            }
        }
    }

    fn prepare_phase(&self, group: &mut PluginGroup) {
        if group.flags.contains(ParallelOperations::PREPARE) {
            if self.cancel.is_cancelled() {
                self.cancel_active(group, None);
                return;
            }
            let instances = group.instances.clone();
            thread::scope(|scope| {
                for member in group.members.iter_mut().filter(|m| m.ctx.is_active()) {
                    let instance = instances[member.instance_idx].clone();
                    scope.spawn(move || Self::prepare_member(instance.as_ref(), &mut member.ctx));
                }
            });
        } else {
            // Sequential on purpose: without the flag one authorization's
            // Prepare completes before the next starts.
            for i in 0..group.members.len() {
                if !group.members[i].ctx.is_active() {
                    continue;
                }
                if self.cancel.is_cancelled() {
                    let identifier = group.members[i].identifier();
                    group.members[i]
                        .ctx
                        .mark_invalid(ValidationError::Cancelled { identifier });
                    continue;
                }
                let instance = group.instances[group.members[i].instance_idx].clone();
                Self::prepare_member(instance.as_ref(), &mut group.members[i].ctx);
            }
        }
    }

    fn prepare_member(instance: &dyn ValidationPlugin, ctx: &mut ValidationContext) {
        debug!("[engine] preparing challenge for {}", ctx.label());
        let identifier = ctx
            .authorization
            .authorization
            .identifier
            .value()
            .to_string();
        match instance.prepare(ctx) {
            Ok(true) => ctx.advance(ValidationPhase::Prepared),
            Ok(false) => ctx.mark_invalid(ValidationError::PrepareFailed {
                identifier,
                message: "plugin declined to prepare the challenge".to_string(),
            }),
            Err(err) => {
                warn!("[engine] prepare failed for {}: {err:#}", ctx.label());
                ctx.mark_invalid(ValidationError::PrepareFailed {
                    identifier,
                    message: err.to_string(),
                });
            }
        }
    }

    fn commit_phase(&self, group: &mut PluginGroup) {
        for idx in 0..group.instances.len() {
            let has_prepared = group.members.iter().any(|m| {
                m.instance_idx == idx
                    && m.ctx.is_active()
                    && m.ctx.phase() >= ValidationPhase::Prepared
            });
            if !has_prepared {
                continue;
            }
            if self.cancel.is_cancelled() {
                self.cancel_active(group, Some(idx));
                continue;
            }
            let instance = group.instances[idx].clone();
            match instance.commit() {
                Ok(()) => {
                    for member in group
                        .members
                        .iter_mut()
                        .filter(|m| m.instance_idx == idx && m.ctx.is_active())
                    {
                        member.ctx.advance(ValidationPhase::Committed);
                    }
                }
                Err(err) => {
                    warn!(
                        "[engine] commit failed for plugin {}: {err:#}",
                        instance.name()
                    );
                    for member in group
                        .members
                        .iter_mut()
                        .filter(|m| m.instance_idx == idx && m.ctx.is_active())
                    {
                        member.ctx.mark_invalid(ValidationError::CommitFailed {
                            plugin: instance.name().to_string(),
                            message: err.to_string(),
                        });
                    }
                }
            }
        }
    }

    /// Advisory DNS propagation pre-check. Confirms the published record is
    /// visible on the authoritative servers before the ACME server is asked
    /// to look; when the record never shows up, policy decides between
    /// proceeding anyway (the server-side check may still succeed with more
    /// time) and aborting the authorization.
    fn propagation_phase(&self, group: &mut PluginGroup) {
        let Some(checker) = self.propagation else {
            return;
        };
        let policy = &self.settings.propagation;
        if !policy.enabled {
            return;
        }
        for member in group.members.iter_mut().filter(|m| m.ctx.is_active()) {
            let identifier = member
                .ctx
                .authorization
                .authorization
                .identifier
                .value()
                .to_string();
            let ctx = &mut member.ctx;
            let (authority, value) = match &ctx.details {
                ChallengeDetails::Dns(record) => (record.authority.clone(), record.value.clone()),
                _ => continue,
            };
            debug!(
                "[engine] pre-checking propagation of {} for {}",
                authority,
                ctx.label()
            );
            let outcome = checker.check(&authority, &value, policy, &self.cancel);
            if outcome.lookup.is_some() {
                if let ChallengeDetails::Dns(record) = &mut ctx.details {
                    record.lookup = outcome.lookup.clone();
                }
            }
            match outcome.result.state {
                PropagationState::Found => {}
                state => {
                    let reason = outcome
                        .result
                        .reason
                        .unwrap_or_else(|| format!("last state: {state:?}"));
                    match policy.on_timeout {
                        OnPropagationTimeout::Proceed => {
                            warn!(
                                "[engine] record for {} not confirmed ({reason}); proceeding to \
                                 server-side checking",
                                ctx.label()
                            );
                        }
                        OnPropagationTimeout::Abort => {
                            ctx.mark_invalid(ValidationError::PropagationAborted {
                                identifier,
                                message: reason,
                            });
                        }
                    }
                }
            }
        }
    }

    fn answer_phase(&self, group: &mut PluginGroup) {
        if group.flags.contains(ParallelOperations::ANSWER) {
            thread::scope(|scope| {
                for member in group.members.iter_mut().filter(|m| m.ctx.is_active()) {
                    scope.spawn(move || self.answer_member(&mut member.ctx));
                }
            });
        } else {
            // Original order, one authorization at a time.
            for member in group.members.iter_mut().filter(|m| m.ctx.is_active()) {
                self.answer_member(&mut member.ctx);
            }
        }
    }

    /// Tells the server one authorization is ready, then polls its status
    /// with bounded exponential backoff until a terminal state or the
    /// deadline. Every poll refreshes the context's `valid` flag from the
    /// observed server status.
    fn answer_member(&self, ctx: &mut ValidationContext) {
        let identifier = ctx
            .authorization
            .authorization
            .identifier
            .value()
            .to_string();
        if self.cancel.is_cancelled() {
            ctx.mark_invalid(ValidationError::Cancelled { identifier });
            return;
        }
        let Some(challenge) = ctx.challenge.clone() else {
            ctx.mark_invalid(ValidationError::NoMatchingChallenge {
                identifier,
                challenge_type: ctx.challenge_type.to_string(),
            });
            return;
        };

        debug!(
            "[engine] triggering {} challenge for {}",
            challenge.kind,
            ctx.label()
        );
        if let Err(err) = self.client.trigger_challenge(&challenge) {
            warn!(
                "[engine] challenge trigger failed for {}: {err:#}",
                ctx.label()
            );
            ctx.mark_invalid(ValidationError::ServerRejected { identifier });
            return;
        }
        ctx.advance(ValidationPhase::ServerTriggered);
        ctx.advance(ValidationPhase::Polling);

        let deadline = Instant::now() + self.settings.poll_deadline;
        let mut backoff = Backoff::new(
            self.settings.poll_base_interval,
            self.settings.poll_max_interval,
        );
        loop {
            match self
                .client
                .authorization_status(&ctx.authorization.authorization)
            {
                Ok(status) => {
                    ctx.observe_status(status);
                    match status {
                        AuthorizationStatus::Valid => {
                            info!("[engine] authorization for {} is valid", ctx.label());
                            ctx.mark_valid();
                            return;
                        }
                        AuthorizationStatus::Invalid => {
                            warn!("[engine] server rejected authorization for {}", ctx.label());
                            ctx.mark_invalid(ValidationError::ServerRejected {
                                identifier: identifier.clone(),
                            });
                            return;
                        }
                        AuthorizationStatus::Pending => {}
                    }
                }
                Err(err) => {
                    // Transient poll failures only matter if they outlast the
                    // deadline.
                    warn!("[engine] status poll failed for {}: {err:#}", ctx.label());
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("[engine] polling deadline exhausted for {}", ctx.label());
                ctx.mark_invalid(ValidationError::PollTimeout {
                    identifier: identifier.clone(),
                    deadline_secs: self.settings.poll_deadline.as_secs(),
                });
                return;
            }
            let delay = backoff.next_delay().min(remaining);
            if self.cancel.wait_timeout(delay) {
                ctx.mark_invalid(ValidationError::Cancelled {
                    identifier: identifier.clone(),
                });
                return;
            }
        }
    }

    /// Best-effort: every instance is cleaned up exactly once, regardless of
    /// outcome, and one instance's cleanup failure never blocks another's.
    /// Runs to completion even after cancellation so no staged records or
    /// files are left behind.
    fn cleanup_phase(&self, group: &mut PluginGroup) {
        for instance in &group.instances {
            debug!("[engine] cleaning up plugin {}", instance.name());
            if let Err(err) = instance.cleanup() {
                warn!(
                    "[engine] cleanup failed for plugin {} (continuing): {err:#}",
                    instance.name()
                );
            }
        }
    }

    fn cancel_active(&self, group: &mut PluginGroup, instance_idx: Option<usize>) {
        for i in 0..group.members.len() {
            let member = &group.members[i];
            if !member.ctx.is_active() {
                continue;
            }
            if let Some(idx) = instance_idx {
                if member.instance_idx != idx {
                    continue;
                }
            }
            let identifier = member.identifier();
            group.members[i]
                .ctx
                .mark_invalid(ValidationError::Cancelled { identifier });
        }
    }
}
