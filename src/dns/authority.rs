//! Authoritative DNS propagation pre-check.
//!
//! Walks the registrable-domain hierarchy to find the name servers that are
//! authoritative for a challenge record (following CNAME delegation and
//! recording each hop), then queries those servers directly with recursion
//! and caching disabled. Purely advisory: never mutates ACME server state.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use hickory_resolver::Resolver;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::proto::rr::RecordType;
use log::{debug, warn};
use serde::Serialize;

use super::{DnsPropagationResult, PropagationState, TxtObservation, interpret_observations};
use crate::cancel::CancellationToken;
use crate::settings::PropagationPolicy;

const MAX_CNAME_HOPS: usize = 10;

/// One hop of CNAME delegation encountered while locating the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CnameHop {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthoritativeNameServer {
    pub host: String,
    pub addresses: Vec<IpAddr>,
}

/// Which name servers are authoritative for a challenge record, including the
/// delegation chain that led there.
#[derive(Debug, Clone, Serialize)]
pub struct DnsLookupResult {
    /// The record name the caller asked about.
    pub record_name: String,
    /// The name to query after following CNAME delegation.
    pub canonical_name: String,
    /// The zone whose NS set answered.
    pub zone: String,
    pub nameservers: Vec<AuthoritativeNameServer>,
    pub chain: Vec<CnameHop>,
}

/// The DNS primitives the authority walk needs. Split out so tests can run
/// the walk against scripted data.
pub trait NameResolver: Send + Sync {
    /// The CNAME target of `name`, if any.
    fn cname(&self, name: &str) -> Result<Option<String>>;
    /// NS host names for `zone`; empty when this level holds no delegation.
    fn name_servers(&self, zone: &str) -> Result<Vec<String>>;
    /// Addresses of a name-server host.
    fn addresses(&self, host: &str) -> Result<Vec<IpAddr>>;
    /// TXT query sent directly to one authoritative address.
    fn query_txt_at(&self, server: IpAddr, record_name: &str) -> TxtObservation;
}

/// Locates the authoritative name-server set for a record, following CNAME
/// delegation (each hop recorded) and walking label by label towards the
/// registrable domain until an NS set answers.
pub fn resolve_authority(
    resolver: &dyn NameResolver,
    record_name: &str,
) -> Result<DnsLookupResult> {
    let record_name = record_name.trim().trim_end_matches('.').to_string();
    let mut chain = Vec::new();
    let mut canonical = record_name.clone();

    for _ in 0..MAX_CNAME_HOPS {
        match resolver.cname(&canonical)? {
            Some(to) if to != canonical => {
                debug!("[dns-authority] {canonical} is delegated via CNAME to {to}");
                chain.push(CnameHop {
                    from: canonical.clone(),
                    to: to.clone(),
                });
                canonical = to;
            }
            _ => break,
        }
    }

    for zone in zone_candidates(&canonical) {
        let hosts = resolver.name_servers(&zone)?;
        if hosts.is_empty() {
            continue;
        }
        debug!(
            "[dns-authority] zone {zone} is served by {} name server(s)",
            hosts.len()
        );
        let mut nameservers = Vec::new();
        for host in hosts {
            match resolver.addresses(&host) {
                Ok(addresses) if !addresses.is_empty() => {
                    nameservers.push(AuthoritativeNameServer { host, addresses });
                }
                Ok(_) => warn!("[dns-authority] name server {host} has no addresses"),
                Err(err) => warn!("[dns-authority] failed to resolve name server {host}: {err}"),
            }
        }
        if nameservers.is_empty() {
            return Err(anyhow!(
                "no reachable authoritative name server for zone {zone}"
            ));
        }
        return Ok(DnsLookupResult {
            record_name,
            canonical_name: canonical,
            zone,
            nameservers,
            chain,
        });
    }

    Err(anyhow!(
        "no authoritative zone found for {record_name} (canonical {canonical})"
    ))
}

/// Candidate zones from most to least specific: the name itself, then each
/// parent produced by stripping a leading label, stopping above the TLD.
fn zone_candidates(name: &str) -> Vec<String> {
    let labels: Vec<&str> = name.split('.').filter(|l| !l.is_empty()).collect();
    let mut candidates = Vec::new();
    for start in 0..labels.len().saturating_sub(1) {
        candidates.push(labels[start..].join("."));
    }
    candidates
}

/// Queries every authoritative address for the record and folds the answers.
/// Success requires at least one server returning the exact expected value.
pub fn check_authoritative(
    resolver: &dyn NameResolver,
    lookup: &DnsLookupResult,
    expected_value: &str,
) -> DnsPropagationResult {
    let observations: Vec<TxtObservation> = lookup
        .nameservers
        .iter()
        .flat_map(|ns| ns.addresses.iter().copied())
        .map(|addr| resolver.query_txt_at(addr, &lookup.canonical_name))
        .collect();
    interpret_observations(&observations, expected_value)
}

/// The advisory propagation checker used by the validation engine.
pub trait PropagationChecker: Send + Sync {
    fn check(
        &self,
        record_name: &str,
        expected_value: &str,
        policy: &PropagationPolicy,
        cancel: &CancellationToken,
    ) -> PropagationCheckOutcome;
}

#[derive(Debug, Clone)]
pub struct PropagationCheckOutcome {
    pub result: DnsPropagationResult,
    pub lookup: Option<DnsLookupResult>,
}

/// Polls the authoritative servers until the record is visible, the policy
/// timeout elapses, or the run is cancelled.
pub struct AuthoritativePropagation<R: NameResolver> {
    resolver: R,
}

impl<R: NameResolver> AuthoritativePropagation<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }
}

impl AuthoritativePropagation<SystemResolver> {
    pub fn system() -> Result<Self> {
        Ok(Self::new(SystemResolver::new()?))
    }
}

impl<R: NameResolver> PropagationChecker for AuthoritativePropagation<R> {
    fn check(
        &self,
        record_name: &str,
        expected_value: &str,
        policy: &PropagationPolicy,
        cancel: &CancellationToken,
    ) -> PropagationCheckOutcome {
        let lookup = match resolve_authority(&self.resolver, record_name) {
            Ok(lookup) => lookup,
            Err(err) => {
                warn!("[dns-authority] authority resolution failed for {record_name}: {err}");
                return PropagationCheckOutcome {
                    result: DnsPropagationResult {
                        state: PropagationState::Error,
                        reason: Some(err.to_string()),
                        observed_values: Vec::new(),
                    },
                    lookup: None,
                };
            }
        };

        let started = Instant::now();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = check_authoritative(&self.resolver, &lookup, expected_value);
            match result.state {
                PropagationState::Found => {
                    debug!(
                        "[dns-authority] {record_name} visible after {}ms (attempt {attempt})",
                        started.elapsed().as_millis()
                    );
                    return PropagationCheckOutcome {
                        result,
                        lookup: Some(lookup),
                    };
                }
                PropagationState::WrongContent => {
                    warn!(
                        "[dns-authority] {record_name} carries an unexpected value: {:?}",
                        result.observed_values
                    );
                    return PropagationCheckOutcome {
                        result,
                        lookup: Some(lookup),
                    };
                }
                PropagationState::Pending
                | PropagationState::NxDomain
                | PropagationState::Error => {
                    if started.elapsed() >= policy.timeout {
                        warn!(
                            "[dns-authority] propagation timeout for {record_name} after {}ms \
                             (attempt {attempt}), last state: {:?}",
                            started.elapsed().as_millis(),
                            result.state
                        );
                        return PropagationCheckOutcome {
                            result,
                            lookup: Some(lookup),
                        };
                    }
                    if cancel.wait_timeout(policy.interval) {
                        return PropagationCheckOutcome {
                            result,
                            lookup: Some(lookup),
                        };
                    }
                }
            }
        }
    }
}

/// Production resolver: recursive lookups through the system configuration,
/// direct per-server TXT queries with recursion and caching disabled.
pub struct SystemResolver {
    recursive: Resolver,
    query_timeout: Duration,
}

impl SystemResolver {
    pub fn new() -> Result<Self> {
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(5);
        opts.attempts = 2;
        // Propagation checks must observe fresh data.
        opts.cache_size = 0;
        let recursive = Resolver::new(ResolverConfig::default(), opts)
            .context("failed to construct recursive DNS resolver")?;
        Ok(Self {
            recursive,
            query_timeout: Duration::from_secs(5),
        })
    }

    fn direct_resolver(&self, server: IpAddr) -> Result<Resolver> {
        let group = NameServerConfigGroup::from_ips_clear(&[server], 53, true);
        let config = ResolverConfig::from_parts(None, Vec::new(), group);
        let mut opts = ResolverOpts::default();
        opts.timeout = self.query_timeout;
        opts.attempts = 1;
        opts.cache_size = 0;
        // The target is authoritative; asking for recursion only invites
        // refusals.
        opts.recursion_desired = false;
        Resolver::new(config, opts)
            .with_context(|| format!("failed to construct direct resolver for {server}"))
    }
}

fn is_no_records(err: &ResolveError) -> bool {
    matches!(err.kind(), ResolveErrorKind::NoRecordsFound { .. })
}

fn is_nxdomain(err: &ResolveError) -> bool {
    matches!(
        err.kind(),
        ResolveErrorKind::NoRecordsFound {
            response_code: ResponseCode::NXDomain,
            ..
        }
    )
}

impl NameResolver for SystemResolver {
    fn cname(&self, name: &str) -> Result<Option<String>> {
        match self.recursive.lookup(name, RecordType::CNAME) {
            Ok(lookup) => Ok(lookup
                .iter()
                .find_map(|rdata| rdata.as_cname())
                .map(|cname| cname.0.to_utf8().trim_end_matches('.').to_string())),
            Err(err) if is_no_records(&err) => Ok(None),
            Err(err) => Err(err).with_context(|| format!("CNAME lookup failed for {name}")),
        }
    }

    fn name_servers(&self, zone: &str) -> Result<Vec<String>> {
        match self.recursive.lookup(zone, RecordType::NS) {
            Ok(lookup) => Ok(lookup
                .iter()
                .filter_map(|rdata| rdata.as_ns())
                .map(|ns| ns.0.to_utf8().trim_end_matches('.').to_string())
                .collect()),
            Err(err) if is_no_records(&err) => Ok(Vec::new()),
            Err(err) => Err(err).with_context(|| format!("NS lookup failed for {zone}")),
        }
    }

    fn addresses(&self, host: &str) -> Result<Vec<IpAddr>> {
        let lookup = self
            .recursive
            .lookup_ip(host)
            .with_context(|| format!("address lookup failed for {host}"))?;
        Ok(lookup.iter().collect())
    }

    fn query_txt_at(&self, server: IpAddr, record_name: &str) -> TxtObservation {
        let resolver = match self.direct_resolver(server) {
            Ok(resolver) => resolver,
            Err(err) => return TxtObservation::Failed(err.to_string()),
        };
        match resolver.txt_lookup(record_name) {
            Ok(lookup) => {
                let values: Vec<String> = lookup
                    .iter()
                    .map(|txt| {
                        txt.txt_data()
                            .iter()
                            .map(|data| String::from_utf8_lossy(data))
                            .collect::<String>()
                    })
                    .collect();
                if values.is_empty() {
                    TxtObservation::NoRecords
                } else {
                    TxtObservation::Answered(values)
                }
            }
            Err(err) if is_nxdomain(&err) => TxtObservation::NxDomain,
            Err(err) if is_no_records(&err) => TxtObservation::NoRecords,
            Err(err) => TxtObservation::Failed(err.to_string()),
        }
    }
}
