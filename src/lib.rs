//! certpilot: ACME authorization and challenge orchestration.
//!
//! The crate models certificate subjects as [`identifier::Identifier`]s
//! grouped into [`target::Target`]s, decomposes targets into orders
//! ([`order`]), and drives proof-of-control for every authorization through
//! the validation engine ([`validation::engine`]): plugin selection via the
//! capability resolver ([`capability`]), per-plugin-group phase execution
//! with declared parallelism, an advisory DNS propagation pre-check
//! ([`dns`]), and reconciliation of plugin results against server status
//! transitions.
//!
//! The wire-level ACME client, DNS provider transports, the HTTP-01
//! responder, and secret-store backends are consumed behind traits
//! ([`acme::AcmeClient`], [`plugins::DnsProviderAdapter`],
//! [`plugins::ChallengeResponder`], [`secrets::SecretResolver`]); production
//! adapters are provided where the crate can carry them.

pub mod acme;
pub mod cancel;
pub mod capability;
pub mod dns;
pub mod domain;
pub mod error;
pub mod identifier;
pub mod order;
pub mod plugins;
pub mod retry;
pub mod secrets;
pub mod settings;
pub mod target;
pub mod validation;

pub use acme::{AcmeClient, AuthorizationStatus, Challenge, ChallengeType};
pub use cancel::CancellationToken;
pub use capability::{Capability, State};
pub use error::ValidationError;
pub use identifier::{Identifier, IdentifierKind};
pub use order::{Order, OrderContext, OrderParameters, OrderSplitter, Renewal};
pub use settings::{PropagationPolicy, ValidationSettings};
pub use target::{Target, TargetPart};
pub use validation::engine::{AuthorizationOutcome, PluginGroup, ValidationEngine};
pub use validation::plugin::{ParallelOperations, PluginRegistry, ValidationPlugin};
pub use validation::{AuthorizationContext, ValidationContext, ValidationPhase};
