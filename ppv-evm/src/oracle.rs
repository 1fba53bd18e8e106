//! ETH quotes read from the on-chain price oracle.

use std::future::IntoFuture;

use alloy_primitives::Address;
use alloy_provider::Provider;
use ppv::UnixTimestamp;
use ppv::amount::UsdcAmount;
use ppv::oracle::{PriceOracle, PriceQuote};

use crate::contract::IPriceOracle;
use crate::error::EvmError;
use crate::executor::traced;

/// Quotes through `IPriceOracle.getETHPrice`.
#[derive(Debug, Clone)]
pub struct OnChainPriceOracle<P> {
    provider: P,
    oracle: Address,
}

impl<P> OnChainPriceOracle<P> {
    /// Reads from the oracle contract at `oracle`.
    pub const fn new(provider: P, oracle: Address) -> Self {
        Self { provider, oracle }
    }

    /// Address of the oracle contract.
    pub const fn address(&self) -> Address {
        self.oracle
    }
}

impl<P: Provider> PriceOracle for OnChainPriceOracle<P> {
    type Error = EvmError;

    async fn quote_eth(&self, price: UsdcAmount) -> Result<PriceQuote, EvmError> {
        let oracle = IPriceOracle::new(self.oracle, &self.provider);
        let call = oracle.getETHPrice(price.to_u256());
        let eth_amount = traced!(
            call.call().into_future(),
            tracing::info_span!("call_getETHPrice",
                usdc = %price,
                oracle = %self.oracle,
                otel.kind = "client",
            )
        )?;
        if eth_amount.is_zero() {
            return Err(EvmError::ZeroQuote);
        }
        #[cfg(feature = "telemetry")]
        tracing::debug!(usdc = %price, wei = %eth_amount, "Quoted ETH price");
        Ok(PriceQuote {
            usdc_amount: price,
            eth_amount,
            quoted_at: UnixTimestamp::now(),
        })
    }
}
