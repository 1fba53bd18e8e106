#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! EVM collaborators for pay-per-view ETH purchases.
//!
//! Implements the chain side of [`ppv`]:
//!
//! - [`EvmPaymentExecutor`] sends `executeETHPayment` to the commerce contract
//!   and waits for the receipt
//! - [`OnChainPriceOracle`] quotes USDC prices in ETH through the price oracle
//! - [`describe_revert`] turns contract reverts into readable reasons
//!
//! [`connect`] builds both from a [`ChainConfig`] with a wallet-backed HTTP
//! provider.
//!
//! # Feature Flags
//!
//! - `telemetry` - Tracing spans around contract calls

pub mod contract;
pub mod error;
pub mod executor;
pub mod networks;
pub mod oracle;

pub use error::{EvmError, describe_revert};
pub use executor::EvmPaymentExecutor;
pub use oracle::OnChainPriceOracle;

use alloy_network::EthereumWallet;
use alloy_primitives::Address;
use alloy_provider::{Provider, ProviderBuilder};
use alloy_signer_local::PrivateKeySigner;
use ppv::config::ChainConfig;
use ppv::flow::FlowContext;
use url::Url;

/// Errors raised by [`connect`].
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// No usable payer key in the chain configuration.
    #[error("chain {0}: payer_private_key is not set (missing env var?)")]
    MissingSigner(u64),
    /// The payer key could not be parsed.
    #[error("invalid payer key: {0}")]
    InvalidKey(#[from] alloy_signer_local::LocalSignerError),
    /// The RPC URL could not be parsed.
    #[error("invalid RPC URL: {0}")]
    InvalidRpcUrl(#[from] url::ParseError),
}

/// Chain collaborators sharing one provider.
#[derive(Debug, Clone)]
pub struct EvmStack<P> {
    /// Chain and payer for the flow.
    pub context: FlowContext,
    /// Payment executor.
    pub executor: EvmPaymentExecutor<P>,
    /// Price oracle.
    pub oracle: OnChainPriceOracle<P>,
}

/// Connects to the configured chain with the configured payer wallet.
///
/// No request is sent; a wrong RPC endpoint surfaces on first use.
///
/// # Errors
///
/// Returns [`ConnectError`] if the payer key is missing or malformed, or the
/// RPC URL does not parse.
pub fn connect(
    config: &ChainConfig,
) -> Result<EvmStack<impl Provider + Clone + 'static>, ConnectError> {
    let key = config
        .payer_private_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty() && !key.starts_with('$'))
        .ok_or(ConnectError::MissingSigner(config.chain_id))?;
    let signer: PrivateKeySigner = key.parse()?;
    let payer: Address = signer.address();
    let rpc_url: Url = config.rpc_url.parse()?;

    #[cfg(feature = "telemetry")]
    match networks::network_by_chain_id(config.chain_id) {
        Some(network) => tracing::info!(
            network = network.name,
            payer = %payer,
            commerce = %config.commerce_contract,
            "Connected EVM payment stack"
        ),
        None => tracing::warn!(
            chain_id = config.chain_id,
            "Chain is not a known pay-per-view network"
        ),
    }

    let provider = ProviderBuilder::new()
        .wallet(EthereumWallet::from(signer))
        .connect_http(rpc_url);
    let executor = EvmPaymentExecutor::new(provider.clone(), config.commerce_contract)
        .with_confirmations(config.confirmations);
    let oracle = OnChainPriceOracle::new(provider, config.price_oracle);
    Ok(EvmStack {
        context: FlowContext {
            chain_id: config.chain_id,
            payer,
        },
        executor,
        oracle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    // Well-known development key (anvil account #0).
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn chain(key: Option<&str>) -> ChainConfig {
        ChainConfig {
            chain_id: networks::BASE_SEPOLIA,
            rpc_url: "http://localhost:8545".into(),
            commerce_contract: address!("00000000000000000000000000000000000000c1"),
            price_oracle: address!("00000000000000000000000000000000000000c2"),
            confirmations: 2,
            payer_private_key: key.map(str::to_owned),
        }
    }

    #[test]
    fn test_connect_derives_payer() {
        let stack = connect(&chain(Some(DEV_KEY))).unwrap();
        assert_eq!(
            stack.context.payer,
            address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266")
        );
        assert_eq!(stack.context.chain_id, networks::BASE_SEPOLIA);
        assert_eq!(
            stack.executor.commerce(),
            address!("00000000000000000000000000000000000000c1")
        );
        assert_eq!(
            stack.oracle.address(),
            address!("00000000000000000000000000000000000000c2")
        );
    }

    #[test]
    fn test_connect_requires_resolved_key() {
        assert!(matches!(
            connect(&chain(None)),
            Err(ConnectError::MissingSigner(84532))
        ));
        assert!(matches!(
            connect(&chain(Some("$PAYER_KEY"))),
            Err(ConnectError::MissingSigner(_))
        ));
        assert!(matches!(
            connect(&chain(Some("0x1234"))),
            Err(ConnectError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_connect_rejects_bad_url() {
        let mut config = chain(Some(DEV_KEY));
        config.rpc_url = "not a url".into();
        assert!(matches!(
            connect(&config),
            Err(ConnectError::InvalidRpcUrl(_))
        ));
    }
}
