//! Choosing between the stablecoin and the ETH purchase paths.
//!
//! Content is always priced in USDC. A USDC purchase is handed unchanged to
//! the existing [`UsdcPurchase`] implementation; an ETH purchase quotes the
//! price, builds a [`PaymentIntentRequest`](crate::request::PaymentIntentRequest)
//! and runs it through a [`PaymentIntentFlow`].

use std::fmt;
use std::future::Future;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::amount::UsdcAmount;
use crate::backend::{IntentBackend, PaymentExecutor};
use crate::config::RequestPolicy;
use crate::error::QuoteError;
use crate::flow::{FlowOutcome, PaymentIntentFlow};
use crate::oracle::PriceOracle;
use crate::request::IntentRequestBuilder;
use crate::state::{FailureKind, FlowFailure, Step};

/// Currency the buyer pays with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// The stablecoin path.
    #[default]
    Usdc,
    /// Native ETH through a payment intent.
    Eth,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usdc => f.write_str("usdc"),
            Self::Eth => f.write_str("eth"),
        }
    }
}

/// A piece of content offered for sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentListing {
    /// On-chain content identifier.
    pub content_id: U256,
    /// Account that receives the payment.
    pub creator: Address,
    /// Listed price.
    pub price: UsdcAmount,
}

/// The stablecoin purchase path.
pub trait UsdcPurchase {
    /// Error returned by the purchase.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Buys `listing` with USDC.
    fn purchase_usdc(
        &self,
        listing: &ContentListing,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// How a purchase ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseOutcome {
    /// The USDC purchase succeeded.
    UsdcCompleted,
    /// The ETH flow ran, or refused to run.
    Eth(FlowOutcome),
    /// The purchase failed before the ETH flow started, or the USDC path failed.
    Failed(FlowFailure),
}

impl PurchaseOutcome {
    /// Whether the content was paid for.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        match self {
            Self::UsdcCompleted => true,
            Self::Eth(outcome) => outcome.is_completed(),
            Self::Failed(_) => false,
        }
    }
}

/// Routes a purchase to the USDC delegate or the ETH flow.
pub struct ContentPurchase<B, E, O, U> {
    flow: PaymentIntentFlow<B, E>,
    oracle: O,
    usdc: U,
    policy: RequestPolicy,
}

impl<B, E, O, U> fmt::Debug for ContentPurchase<B, E, O, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentPurchase")
            .field("flow", &self.flow)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<B, E, O, U> ContentPurchase<B, E, O, U> {
    /// Combines an ETH flow, a price oracle and the USDC path.
    pub fn new(flow: PaymentIntentFlow<B, E>, oracle: O, usdc: U) -> Self {
        Self {
            flow,
            oracle,
            usdc,
            policy: RequestPolicy::default(),
        }
    }

    /// Replaces the request policy used for ETH purchases.
    #[must_use]
    pub const fn with_policy(mut self, policy: RequestPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The ETH flow, for state and subscriptions.
    #[must_use]
    pub const fn flow(&self) -> &PaymentIntentFlow<B, E> {
        &self.flow
    }
}

impl<B, E, O, U> ContentPurchase<B, E, O, U>
where
    B: IntentBackend + Sync,
    E: PaymentExecutor + Sync,
    O: PriceOracle + Sync,
    U: UsdcPurchase + Sync,
{
    /// Buys `listing` with `method`.
    ///
    /// A quote failure ends the purchase without touching the flow state.
    pub async fn purchase(&self, listing: &ContentListing, method: PaymentMethod) -> PurchaseOutcome {
        match method {
            PaymentMethod::Usdc => self.purchase_usdc(listing).await,
            PaymentMethod::Eth => self.purchase_eth(listing).await,
        }
    }

    /// Resets the ETH flow and pays again with a freshly quoted request.
    pub async fn retry_eth(&self, listing: &ContentListing) -> PurchaseOutcome {
        self.flow.reset_flow();
        self.purchase_eth(listing).await
    }

    async fn purchase_usdc(&self, listing: &ContentListing) -> PurchaseOutcome {
        match self.usdc.purchase_usdc(listing).await {
            Ok(()) => PurchaseOutcome::UsdcCompleted,
            Err(e) => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(content_id = %listing.content_id, error = %e, "USDC purchase failed");
                PurchaseOutcome::Failed(FlowFailure::new(
                    Step::Idle,
                    FailureKind::Delegated,
                    e.to_string(),
                ))
            }
        }
    }

    async fn purchase_eth(&self, listing: &ContentListing) -> PurchaseOutcome {
        let builder =
            IntentRequestBuilder::new(listing.content_id, listing.creator).with_policy(self.policy);
        let request = match builder.quote(&self.oracle, listing.price).await {
            Ok(request) => request,
            Err(e) => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(content_id = %listing.content_id, error = %e, "ETH quote failed");
                let kind = match e {
                    QuoteError::Oracle(_) => FailureKind::Quote,
                    QuoteError::Validation(_) => FailureKind::Validation,
                };
                return PurchaseOutcome::Failed(FlowFailure::new(Step::Idle, kind, e.to_string()));
            }
        };
        PurchaseOutcome::Eth(self.flow.execute_eth_payment(request).await)
    }
}
