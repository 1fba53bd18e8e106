//! Payment intent requests and their construction.
//!
//! A [`PaymentIntentRequest`] describes one proposed ETH purchase. It is
//! built at purchase time from a fresh price quote by
//! [`IntentRequestBuilder`], which applies the [`RequestPolicy`]: slippage
//! tolerance, deadline window and maximum quote age.

use std::collections::BTreeMap;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::amount::UsdcAmount;
use crate::config::RequestPolicy;
use crate::error::{QuoteError, ValidationError};
use crate::oracle::{PriceOracle, PriceQuote};
use crate::timestamp::UnixTimestamp;

/// Basis points in 100%.
pub const BPS_DENOMINATOR: u16 = 10_000;

/// Opaque key/value annotations carried with a request for tracing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    /// Creates empty metadata.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Adds or replaces an entry.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Looks up an entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// One proposed ETH purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentRequest {
    /// Content being purchased.
    pub content_id: U256,
    /// Creator receiving the payment.
    pub creator: Address,
    /// Quoted ETH amount in wei.
    pub eth_amount: U256,
    /// Slippage tolerance for the ETH→USDC conversion, in basis points.
    pub max_slippage_bps: u16,
    /// Last moment the payment may execute.
    pub deadline: UnixTimestamp,
    /// Tracing annotations.
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl PaymentIntentRequest {
    /// Checks the preconditions of a payment attempt at time `now`.
    ///
    /// # Errors
    ///
    /// Returns the first violated precondition.
    pub fn validate(&self, now: UnixTimestamp) -> Result<(), ValidationError> {
        if self.eth_amount.is_zero() {
            return Err(ValidationError::ZeroAmount);
        }
        if self.creator == Address::ZERO {
            return Err(ValidationError::InvalidCreator(self.creator));
        }
        if self.max_slippage_bps > BPS_DENOMINATOR {
            return Err(ValidationError::SlippageTooHigh {
                bps: self.max_slippage_bps,
                max: BPS_DENOMINATOR,
            });
        }
        if self.deadline.has_passed(now) {
            return Err(ValidationError::DeadlineElapsed {
                deadline: self.deadline,
                now,
            });
        }
        Ok(())
    }

    /// The quoted amount raised by the slippage tolerance, rounded up.
    ///
    /// This is the value attached to the execution call; the contract refunds
    /// whatever the swap does not consume.
    #[must_use]
    pub fn max_eth_with_slippage(&self) -> U256 {
        let denominator = U256::from(BPS_DENOMINATOR);
        let numerator = self
            .eth_amount
            .saturating_mul(denominator + U256::from(self.max_slippage_bps));
        numerator.saturating_add(denominator - U256::from(1)) / denominator
    }
}

/// Parses a creator address string.
///
/// # Errors
///
/// Returns [`ValidationError::UnparsableCreator`] for malformed input and
/// [`ValidationError::InvalidCreator`] for the zero address.
pub fn parse_creator(input: &str) -> Result<Address, ValidationError> {
    let address: Address = input
        .trim()
        .parse()
        .map_err(|_| ValidationError::UnparsableCreator(input.to_owned()))?;
    if address == Address::ZERO {
        return Err(ValidationError::InvalidCreator(address));
    }
    Ok(address)
}

/// Builds [`PaymentIntentRequest`]s from price quotes.
#[derive(Debug, Clone)]
pub struct IntentRequestBuilder {
    content_id: U256,
    creator: Address,
    policy: RequestPolicy,
    metadata: Metadata,
}

impl IntentRequestBuilder {
    /// Starts a request for `content_id` sold by `creator`, with the default policy.
    #[must_use]
    pub fn new(content_id: U256, creator: Address) -> Self {
        Self {
            content_id,
            creator,
            policy: RequestPolicy::default(),
            metadata: Metadata::new(),
        }
    }

    /// Replaces the policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: RequestPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Overrides the slippage tolerance.
    #[must_use]
    pub const fn with_max_slippage_bps(mut self, bps: u16) -> Self {
        self.policy.max_slippage_bps = bps;
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key, value);
        self
    }

    /// Builds a request from an existing quote, valid from `now`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::StaleQuote`] if the quote is older than the
    /// policy allows, or any precondition failure of the resulting request.
    pub fn build(
        &self,
        quote: &PriceQuote,
        now: UnixTimestamp,
    ) -> Result<PaymentIntentRequest, ValidationError> {
        let max = Duration::from_secs(self.policy.max_quote_age_secs);
        let age = quote.quoted_at.age_at(now);
        if age > max {
            return Err(ValidationError::StaleQuote { age, max });
        }
        let request = PaymentIntentRequest {
            content_id: self.content_id,
            creator: self.creator,
            eth_amount: quote.eth_amount,
            max_slippage_bps: self.policy.max_slippage_bps,
            deadline: now + self.policy.deadline_window_secs,
            metadata: self.metadata.clone(),
        };
        request.validate(now)?;
        Ok(request)
    }

    /// Quotes `price` with `oracle` and builds a request from the result.
    ///
    /// # Errors
    ///
    /// Returns [`QuoteError::Oracle`] if the oracle fails, or
    /// [`QuoteError::Validation`] if the resulting request is invalid.
    pub async fn quote<O>(
        &self,
        oracle: &O,
        price: UsdcAmount,
    ) -> Result<PaymentIntentRequest, QuoteError>
    where
        O: PriceOracle + Sync,
    {
        let quote = oracle
            .quote_eth(price)
            .await
            .map_err(|e| QuoteError::Oracle(Box::new(e)))?;
        Ok(self.build(&quote, UnixTimestamp::now())?)
    }
}
