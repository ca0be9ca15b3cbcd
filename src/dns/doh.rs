//! Public-resolver visibility check over DNS-over-HTTPS.
//!
//! Used by manually-operated validation to show whether a record has reached
//! the big caching resolvers. The authoritative pre-check in
//! [`super::authority`] is what the engine consults; this check exists for
//! humans watching propagation from the outside.

use std::sync::mpsc;
use std::thread;

use anyhow::{Result, anyhow};
use log::{debug, info, warn};
use serde::Deserialize;

use super::{DnsPropagationResult, TxtObservation, interpret_observations, trim_txt_quotes};
use crate::settings::resolve_http_timeout;

#[derive(Debug, Deserialize, Clone)]
struct DohAnswer {
    #[serde(rename = "data")]
    data: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
struct DohResponse {
    #[serde(rename = "Status")]
    status: u32,
    #[serde(rename = "Answer")]
    answer: Option<Vec<DohAnswer>>,
}

impl DohResponse {
    fn observation(&self) -> TxtObservation {
        let values: Vec<String> = self
            .answer
            .iter()
            .flatten()
            .filter_map(|a| a.data.clone())
            .collect();
        match (self.status, values.is_empty()) {
            (0, false) => TxtObservation::Answered(values),
            (0, true) => TxtObservation::NoRecords,
            (3, _) => TxtObservation::NxDomain,
            (status, _) => TxtObservation::Failed(format!("resolver status {status}")),
        }
    }
}

/// Checks a TXT record against Google and Cloudflare DoH in parallel.
/// Returns as soon as one resolver reports the expected value.
pub fn check_txt_record(record_name: &str, expected_value: &str) -> Result<DnsPropagationResult> {
    info!(
        "[dns-doh] Checking TXT record {} for value {}",
        record_name, expected_value
    );
    let observations = query_txt(record_name, Some(expected_value))?;
    let result = interpret_observations(&observations, expected_value);
    info!(
        "[dns-doh] DNS check result for {}: state={:?}, observed={:?}",
        record_name, result.state, result.observed_values
    );
    Ok(result)
}

fn query_txt(record_name: &str, expected_value: Option<&str>) -> Result<Vec<TxtObservation>> {
    let urls = [
        (
            "Google DNS",
            format!("https://dns.google/resolve?name={record_name}&type=TXT&random_padding=x"),
        ),
        (
            "Cloudflare DNS",
            format!("https://cloudflare-dns.com/dns-query?name={record_name}&type=TXT"),
        ),
    ];

    let timeout = resolve_http_timeout();
    let (tx, rx) = mpsc::channel();

    for (resolver_name, url) in urls {
        let tx = tx.clone();
        let record_name = record_name.to_string();
        let expected_value = expected_value.map(|s| trim_txt_quotes(s));

        thread::spawn(move || {
            debug!("[dns-doh] Querying {} for {}", resolver_name, record_name);
            let agent = ureq::AgentBuilder::new().timeout(timeout).build();
            let result = match agent
                .get(&url)
                .set("Accept", "application/dns-json")
                .call()
            {
                Ok(resp) => match resp.into_string() {
                    Ok(body) => match serde_json::from_str::<DohResponse>(&body) {
                        Ok(parsed) => {
                            debug!(
                                "[dns-doh] {} responded: status={}, has_answer={}",
                                resolver_name,
                                parsed.status,
                                parsed.answer.is_some()
                            );
                            Ok(parsed.observation())
                        }
                        Err(err) => {
                            warn!(
                                "[dns-doh] {} parse failed for {}: {}",
                                resolver_name, record_name, err
                            );
                            Err(anyhow!("parse failed: {err}"))
                        }
                    },
                    Err(err) => {
                        warn!(
                            "[dns-doh] {} body read failed for {}: {}",
                            resolver_name, record_name, err
                        );
                        Err(anyhow!("body read failed: {err}"))
                    }
                },
                Err(err) => {
                    warn!(
                        "[dns-doh] {} query failed for {}: {}",
                        resolver_name, record_name, err
                    );
                    Err(anyhow!("query failed: {err}"))
                }
            };

            // Flag whether this observation already satisfies the caller so
            // the receiver can return early.
            let satisfied = match (&result, &expected_value) {
                (Ok(TxtObservation::Answered(values)), Some(expected)) => {
                    values.iter().any(|v| trim_txt_quotes(v) == *expected)
                }
                _ => false,
            };
            let _ = tx.send((result, satisfied));
        });
    }

    drop(tx);

    let mut observations = Vec::new();
    for (result, satisfied) in rx {
        match result {
            Ok(observation) => {
                if satisfied {
                    debug!("[dns-doh] expected value observed, returning immediately");
                    return Ok(vec![observation]);
                }
                observations.push(observation);
            }
            Err(err) => {
                debug!("[dns-doh] one resolver failed: {err}");
                observations.push(TxtObservation::Failed(err.to_string()));
            }
        }
    }

    if observations
        .iter()
        .all(|o| matches!(o, TxtObservation::Failed(_)))
    {
        warn!("[dns-doh] all DNS queries failed for {record_name}");
    }
    Ok(observations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::PropagationState;

    #[test]
    fn doh_status_zero_with_answers_is_answered() {
        let response = DohResponse {
            status: 0,
            answer: Some(vec![DohAnswer {
                data: Some("\"value\"".to_string()),
            }]),
        };
        assert!(matches!(
            response.observation(),
            TxtObservation::Answered(_)
        ));
    }

    #[test]
    fn doh_status_zero_without_answers_is_pending() {
        let response = DohResponse {
            status: 0,
            answer: None,
        };
        assert!(matches!(response.observation(), TxtObservation::NoRecords));
    }

    #[test]
    fn doh_status_three_is_nxdomain() {
        let response = DohResponse {
            status: 3,
            answer: None,
        };
        assert!(matches!(response.observation(), TxtObservation::NxDomain));
    }

    #[test]
    fn doh_other_status_is_a_failure() {
        let response = DohResponse {
            status: 2,
            answer: None,
        };
        assert!(matches!(response.observation(), TxtObservation::Failed(_)));
    }

    #[test]
    fn observations_fold_through_shared_interpretation() {
        let observations = [
            DohResponse {
                status: 3,
                answer: None,
            }
            .observation(),
            DohResponse {
                status: 0,
                answer: Some(vec![DohAnswer {
                    data: Some("\"expected-value\"".to_string()),
                }]),
            }
            .observation(),
        ];
        let result = interpret_observations(&observations, "expected-value");
        assert!(matches!(result.state, PropagationState::Found));
    }
}
