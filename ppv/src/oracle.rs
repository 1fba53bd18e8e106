//! Price oracle abstraction.
//!
//! Content is priced in USDC; ETH purchases need the ETH amount for that price
//! at the time the request is built. Implementations live next to the chain
//! they read from.

use std::future::Future;

use alloy_primitives::U256;

use crate::amount::UsdcAmount;
use crate::timestamp::UnixTimestamp;

/// An ETH amount quoted for a USDC price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceQuote {
    /// Price that was quoted.
    pub usdc_amount: UsdcAmount,
    /// ETH needed, in wei.
    pub eth_amount: U256,
    /// When the quote was taken.
    pub quoted_at: UnixTimestamp,
}

/// Source of ETH quotes for USDC prices.
pub trait PriceOracle {
    /// Error returned by the oracle.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Quotes the ETH amount for `price`.
    fn quote_eth(
        &self,
        price: UsdcAmount,
    ) -> impl Future<Output = Result<PriceQuote, Self::Error>> + Send;
}

impl<T: PriceOracle + Send + Sync> PriceOracle for std::sync::Arc<T> {
    type Error = T::Error;

    async fn quote_eth(&self, price: UsdcAmount) -> Result<PriceQuote, Self::Error> {
        (**self).quote_eth(price).await
    }
}
