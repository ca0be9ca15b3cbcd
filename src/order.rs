use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::capability::{Capability, split_state};
use crate::target::{SiteId, Target, TargetPart};

/// The stored renewal an order belongs to. Scheduling, history, and
/// due-date bookkeeping live outside this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Renewal {
    pub id: Uuid,
    pub friendly_name: String,
    pub last_issued: Option<DateTime<Utc>>,
}

impl Renewal {
    pub fn new(friendly_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            friendly_name: friendly_name.into(),
            last_issued: None,
        }
    }
}

/// Optional knobs forwarded to the ACME server when the order is placed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderParameters {
    pub not_after: Option<DateTime<Utc>>,
    pub profile: Option<String>,
    /// ARI "replaces" hint: the certificate this order renews.
    pub replaces: Option<String>,
}

/// One certificate order: a renewal paired with (a subset of) its target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub renewal_id: Uuid,
    /// Distinguishes sibling orders from the same decomposition, e.g. the
    /// site a part came from. Empty for identity splits.
    pub partition: Option<String>,
    pub target: Target,
    pub parameters: OrderParameters,
}

impl Order {
    pub fn new(renewal: &Renewal, target: Target) -> Self {
        Self {
            renewal_id: renewal.id,
            partition: None,
            target,
            parameters: OrderParameters::default(),
        }
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    pub fn with_parameters(mut self, parameters: OrderParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Stable fingerprint of the order's composition. Renewal-history
    /// reconciliation matches orders across runs by this key, so it must not
    /// depend on identifier ordering within the target.
    pub fn cache_key(&self) -> String {
        let mut values: Vec<String> = self
            .target
            .identifiers()
            .iter()
            .map(|i| format!("{}:{}", i.kind().as_str(), i.value()))
            .collect();
        values.sort();

        let mut hasher = Sha256::new();
        for value in &values {
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        if let Some(partition) = &self.partition {
            hasher.update(partition.as_bytes());
        }
        if let Some(profile) = &self.parameters.profile {
            hasher.update(profile.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Server-side lifecycle of a placed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// What the server said about a placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderResult {
    pub status: OrderStatus,
    pub finalize_url: Option<String>,
}

/// Runtime wrapper for one order during an orchestration run. Discarded when
/// the run ends.
#[derive(Debug, Clone)]
pub struct OrderContext {
    pub order: Order,
    result: Option<OrderResult>,
}

impl OrderContext {
    pub fn new(order: Order) -> Self {
        Self {
            order,
            result: None,
        }
    }

    pub fn set_result(&mut self, result: OrderResult) {
        self.result = Some(result);
    }

    pub fn result(&self) -> Option<&OrderResult> {
        self.result.as_ref()
    }

    pub fn may_finalize(&self) -> bool {
        matches!(
            self.result.as_ref().map(|r| r.status),
            Some(OrderStatus::Ready)
        )
    }
}

/// Splits one target into one or more independent orders.
///
/// Callers check `state` before calling `split`; `split` re-checks and fails
/// closed so a disabled strategy can never run by accident. Output is
/// deterministic and stable across runs for the same target composition.
pub trait OrderSplitter: Send + Sync {
    fn name(&self) -> &'static str;
    fn state(&self, target: &Target) -> Capability;
    fn split(&self, renewal: &Renewal, target: &Target) -> Result<Vec<Order>>;
}

/// Identity split: the whole target becomes one order.
pub struct SingleSplitter;

impl OrderSplitter for SingleSplitter {
    fn name(&self) -> &'static str {
        "single"
    }

    fn state(&self, target: &Target) -> Capability {
        Capability::uniform(split_state(target, true))
    }

    fn split(&self, renewal: &Renewal, target: &Target) -> Result<Vec<Order>> {
        Ok(vec![Order::new(renewal, target.clone())])
    }
}

/// One order per distinguishable site: parts sharing a `SiteId` are grouped,
/// ordered by site id; parts without a site form a trailing order.
pub struct SiteSplitter;

impl OrderSplitter for SiteSplitter {
    fn name(&self) -> &'static str {
        "site"
    }

    fn state(&self, target: &Target) -> Capability {
        Capability::uniform(split_state(target, false))
    }

    fn split(&self, renewal: &Renewal, target: &Target) -> Result<Vec<Order>> {
        let state = self.state(target);
        if let Some(reason) = state.execution.reason() {
            return Err(anyhow!("split strategy {} is disabled: {}", self.name(), reason));
        }

        let mut sites: Vec<(Option<SiteId>, Vec<TargetPart>)> = Vec::new();
        for part in target.parts() {
            match sites.iter_mut().find(|(site, _)| *site == part.site()) {
                Some((_, parts)) => parts.push(part.clone()),
                None => sites.push((part.site(), vec![part.clone()])),
            }
        }
        // Stable output: ordered by site id, site-less parts last.
        sites.sort_by_key(|(site, _)| match site {
            Some(SiteId(id)) => (0, *id),
            None => (1, 0),
        });

        sites
            .into_iter()
            .map(|(site, parts)| {
                let sub_target = Target::new(target.friendly_name(), parts)?;
                let order = Order::new(renewal, sub_target);
                Ok(match site {
                    Some(SiteId(id)) => order.with_partition(format!("site-{id}")),
                    None => order,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Identifier;

    fn part(domains: &[&str], site: Option<i64>) -> TargetPart {
        let ids = domains
            .iter()
            .map(|d| Identifier::dns(d).unwrap())
            .collect();
        let part = TargetPart::new(ids).unwrap();
        match site {
            Some(id) => part.with_site(SiteId(id)),
            None => part,
        }
    }

    #[test]
    fn single_splitter_is_identity() {
        let renewal = Renewal::new("example");
        let target = Target::from_domains("example", &["a.example.com", "b.example.com"]).unwrap();
        let orders = SingleSplitter.split(&renewal, &target).unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].target.identifiers().len(), 2);
        assert_eq!(orders[0].partition, None);
    }

    #[test]
    fn site_splitter_groups_parts_by_site() {
        let renewal = Renewal::new("example");
        let target = Target::new(
            "example",
            vec![
                part(&["b.example.com"], Some(2)),
                part(&["a.example.com"], Some(1)),
                part(&["a2.example.com"], Some(1)),
                part(&["loose.example.com"], None),
            ],
        )
        .unwrap();

        let orders = SiteSplitter.split(&renewal, &target).unwrap();
        assert_eq!(orders.len(), 3);
        assert_eq!(orders[0].partition.as_deref(), Some("site-1"));
        assert_eq!(orders[0].target.identifiers().len(), 2);
        assert_eq!(orders[1].partition.as_deref(), Some("site-2"));
        assert_eq!(orders[2].partition, None);
    }

    #[test]
    fn site_split_is_deterministic_across_runs() {
        let renewal = Renewal::new("example");
        let target = Target::new(
            "example",
            vec![
                part(&["b.example.com"], Some(9)),
                part(&["a.example.com"], Some(3)),
            ],
        )
        .unwrap();
        let first: Vec<String> = SiteSplitter
            .split(&renewal, &target)
            .unwrap()
            .iter()
            .map(|o| o.cache_key())
            .collect();
        let second: Vec<String> = SiteSplitter
            .split(&renewal, &target)
            .unwrap()
            .iter()
            .map(|o| o.cache_key())
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn site_splitter_fails_closed_on_user_csr() {
        let renewal = Renewal::new("example");
        let csr_part = part(&["example.com"], Some(1)).with_user_csr(vec![0u8; 4]);
        let target = Target::new("example", vec![csr_part]).unwrap();

        assert!(!SiteSplitter.state(&target).may_run());
        let err = SiteSplitter.split(&renewal, &target).unwrap_err();
        assert!(err.to_string().contains("single order"));
        assert!(SingleSplitter.state(&target).may_run());
    }

    #[test]
    fn cache_key_ignores_identifier_ordering() {
        let renewal = Renewal::new("example");
        let a = Order::new(
            &renewal,
            Target::from_domains("x", &["a.example.com", "b.example.com"]).unwrap(),
        );
        let b = Order::new(
            &renewal,
            Target::from_domains("x", &["b.example.com", "a.example.com"]).unwrap(),
        );
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn cache_key_distinguishes_partitions_and_profiles() {
        let renewal = Renewal::new("example");
        let base = Order::new(
            &renewal,
            Target::from_domains("x", &["example.com"]).unwrap(),
        );
        let partitioned = base.clone().with_partition("site-1");
        let profiled = base.clone().with_parameters(OrderParameters {
            profile: Some("shortlived".into()),
            ..OrderParameters::default()
        });
        assert_ne!(base.cache_key(), partitioned.cache_key());
        assert_ne!(base.cache_key(), profiled.cache_key());
    }

    #[test]
    fn order_context_tracks_server_result() {
        let renewal = Renewal::new("example");
        let order = Order::new(
            &renewal,
            Target::from_domains("x", &["example.com"]).unwrap(),
        );
        let mut ctx = OrderContext::new(order);
        assert!(ctx.result().is_none());
        assert!(!ctx.may_finalize());

        ctx.set_result(OrderResult {
            status: OrderStatus::Ready,
            finalize_url: Some("https://acme.example/finalize/1".into()),
        });
        assert!(ctx.may_finalize());
    }
}
