//! Built-in validation plugins and the contracts external providers fit.
//!
//! The registry is composed explicitly by the embedding application: build
//! the collaborators (responder, DNS adapters, prompt), wrap them in
//! factories, and register them in priority order.

pub mod dns01;
pub(crate) mod http;
pub mod http01;
pub mod manual;
pub mod tls_alpn;

pub use dns01::{Dns01, Dns01Factory, DnsProviderAdapter, UnsupportedAdapter, WebhookAdapter};
pub use http01::{ChallengeResponder, Http01, Http01Factory, InMemoryResponder};
pub use manual::{DnsRecordInstruction, ManualDns, ManualDnsFactory, RetryChoice, ValidationPrompt};
pub use tls_alpn::{AlpnCertificateInstaller, TlsAlpn01, TlsAlpn01Factory};
