//! Errors of the EVM collaborators and revert decoding.

use alloy_primitives::{Bytes, TxHash};
use alloy_sol_types::{Revert, SolError, SolInterface};
use alloy_transport::TransportError;

use crate::contract::IPayPerViewCommerce::IPayPerViewCommerceErrors;

/// Errors raised while executing payments or reading prices on chain.
#[derive(Debug, thiserror::Error)]
pub enum EvmError {
    /// The provider is connected to another chain than the flow pays on.
    #[error("provider is on chain {actual}, payment expects chain {expected}")]
    ChainMismatch {
        /// Chain of the flow context.
        expected: u64,
        /// Chain reported by the provider.
        actual: u64,
    },
    /// The contract refused the call; the reason is decoded from its revert data.
    #[error("contract rejected the payment: {0}")]
    Rejected(String),
    /// Any other contract call failure.
    #[error("contract call failed: {0}")]
    Contract(#[source] alloy_contract::Error),
    /// RPC transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Waiting for the receipt failed or timed out.
    #[error(transparent)]
    PendingTransaction(#[from] alloy_provider::PendingTransactionError),
    /// The transaction was mined but reverted.
    #[error("transaction {0} reverted")]
    Reverted(TxHash),
    /// The oracle returned a zero ETH amount.
    #[error("price oracle quoted zero ETH")]
    ZeroQuote,
}

impl From<alloy_contract::Error> for EvmError {
    fn from(e: alloy_contract::Error) -> Self {
        match e.as_revert_data() {
            Some(data) => Self::Rejected(
                describe_revert(&data)
                    .unwrap_or_else(|| format!("unrecognised revert data {}", raw_revert(&data))),
            ),
            None => Self::Contract(e),
        }
    }
}

/// Turns commerce contract revert data into a readable reason.
///
/// Understands the contract's custom errors and the standard `Error(string)`.
/// Returns `None` for anything else.
#[must_use]
pub fn describe_revert(data: &[u8]) -> Option<String> {
    if let Ok(error) = IPayPerViewCommerceErrors::abi_decode(data) {
        return Some(match error {
            IPayPerViewCommerceErrors::IntentExpired(e) => {
                format!("payment intent {} expired", e.intentId)
            }
            IPayPerViewCommerceErrors::InvalidSignature(_) => {
                "payment authorization signature is invalid".to_owned()
            }
            IPayPerViewCommerceErrors::SlippageExceeded(e) => format!(
                "price moved beyond the slippage tolerance: needed {} wei, sent at most {} wei",
                e.actual, e.expected
            ),
        });
    }
    Revert::abi_decode(data).ok().map(|revert| revert.reason)
}

/// Hex rendering of revert data that [`describe_revert`] did not recognise.
#[must_use]
pub fn raw_revert(data: &[u8]) -> String {
    Bytes::copy_from_slice(data).to_string()
}
