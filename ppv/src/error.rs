//! Error types for pay-per-view payment orchestration.
//!
//! [`ValidationError`] covers requests rejected before any network call,
//! [`FlowError`] everything that can end an attempt. Neither escapes
//! [`PaymentIntentFlow::execute_eth_payment`](crate::flow::PaymentIntentFlow::execute_eth_payment):
//! they are folded into a cloneable [`FlowFailure`](crate::state::FlowFailure)
//! recorded on the flow state.

use std::time::Duration;

use alloy_primitives::Address;

use crate::state::{FailureKind, Step};
use crate::timestamp::UnixTimestamp;

/// Boxed error from an external collaborator (backend, chain, oracle).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A payment intent request that must not be submitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The ETH amount is zero.
    #[error("invalid amount: ETH amount must be greater than zero")]
    ZeroAmount,
    /// The deadline is not in the future.
    #[error("deadline {deadline} has already passed (now {now})")]
    DeadlineElapsed {
        /// Requested deadline.
        deadline: UnixTimestamp,
        /// Time of validation.
        now: UnixTimestamp,
    },
    /// The creator is the zero address.
    #[error("invalid creator address {0}")]
    InvalidCreator(Address),
    /// The creator string is not an address.
    #[error("creator '{0}' is not a valid address")]
    UnparsableCreator(String),
    /// Slippage tolerance outside `0..=max` basis points.
    #[error("max slippage {bps} bps exceeds the allowed {max} bps")]
    SlippageTooHigh {
        /// Requested slippage.
        bps: u16,
        /// Upper bound.
        max: u16,
    },
    /// The price quote is older than the configured maximum.
    #[error("price quote is {age:?} old, maximum is {max:?}")]
    StaleQuote {
        /// Age of the quote.
        age: Duration,
        /// Maximum accepted age.
        max: Duration,
    },
}

/// Everything that can end a payment attempt unsuccessfully.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// The request failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The backend did not accept the payment intent.
    #[error("payment intent was not created: {0}")]
    Backend(#[source] BoxError),

    /// The backend did not produce an authorization.
    #[error("signature retrieval failed: {0}")]
    Signature(#[source] BoxError),

    /// The execution call failed or reverted.
    #[error("payment execution failed: {0}")]
    Execution(#[source] BoxError),

    /// The deadline passed before the execution call was sent.
    #[error("payment deadline {0} expired before execution")]
    DeadlineExpired(UnixTimestamp),

    /// A suspension point exceeded its time budget.
    #[error("{step} timed out after {after:?}")]
    Timeout {
        /// Step that was waiting.
        step: Step,
        /// Configured limit.
        after: Duration,
    },
}

impl FlowError {
    /// Classifies the error for presentation.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Validation(_) => FailureKind::Validation,
            Self::Backend(_) => FailureKind::Backend,
            Self::Signature(_) => FailureKind::Signature,
            Self::Execution(_) => FailureKind::Execution,
            Self::DeadlineExpired(_) => FailureKind::DeadlineExpired,
            Self::Timeout { .. } => FailureKind::Timeout,
        }
    }
}

/// Errors raised while quoting a price and building a request.
#[derive(Debug, thiserror::Error)]
pub enum QuoteError {
    /// The oracle call failed.
    #[error("price oracle failed: {0}")]
    Oracle(#[source] BoxError),

    /// The quoted request is not valid.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
