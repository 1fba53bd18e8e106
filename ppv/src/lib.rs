#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core orchestration for pay-per-view ETH purchases.
//!
//! Content on the platform is priced in USDC. This crate lets a buyer pay the
//! equivalent amount in native ETH instead: a payment intent is registered
//! with the platform backend, the backend authorizes it, and the authorized
//! call is executed against the commerce contract. Progress and failures are
//! reported through a watchable [`FlowState`] and [`FlowObserver`]s.
//!
//! The crate is chain- and transport-agnostic. The backend and the chain are
//! reached through the [`IntentBackend`], [`PaymentExecutor`] and
//! [`PriceOracle`] traits; `ppv-http` and `ppv-evm` provide implementations.
//!
//! # Modules
//!
//! - [`amount`] - USDC price parsing
//! - [`backend`] - Backend and executor traits with their records
//! - [`config`] - TOML configuration with environment expansion
//! - [`error`] - Validation and flow errors
//! - [`flow`] - The payment intent state machine
//! - [`observer`] - Transition notifications
//! - [`oracle`] - ETH price quotes
//! - [`purchase`] - Routing between USDC and ETH purchases
//! - [`registry`] - Cross-flow attempt exclusivity
//! - [`request`] - Payment intent requests and their validation
//! - [`state`] - Observable flow state
//! - [`timestamp`] - Unix timestamps
//!
//! # Feature Flags
//!
//! - `telemetry` - Emits `tracing` events at every transition, failure and refusal

pub mod amount;
pub mod backend;
pub mod config;
pub mod error;
pub mod flow;
pub mod observer;
pub mod oracle;
pub mod purchase;
pub mod registry;
pub mod request;
pub mod state;
pub mod timestamp;

pub use amount::UsdcAmount;
pub use backend::{IntentBackend, PaymentExecutor};
pub use config::PurchaseConfig;
pub use error::{FlowError, ValidationError};
pub use flow::{FlowContext, FlowOutcome, PaymentIntentFlow, RefusalReason};
pub use observer::{ChannelObserver, FlowEvent, FlowObserver};
pub use oracle::PriceOracle;
pub use purchase::{ContentPurchase, PaymentMethod};
pub use request::{IntentRequestBuilder, PaymentIntentRequest};
pub use state::{FlowState, Step};
pub use timestamp::UnixTimestamp;
