//! Solidity interface definitions for the pay-per-view contracts.
//!
//! Only the ABI surface the purchase flow touches is declared:
//! - [`IPayPerViewCommerce`] executes an authorized ETH payment intent
//! - [`IPriceOracle`] converts USDC prices into ETH amounts

use alloy_sol_types::sol;

sol! {
    /// Commerce contract entry point for ETH purchases.
    ///
    /// `executeETHPayment` checks the backend signature over the intent,
    /// refunds any value above the amount needed at the current price and
    /// reverts with one of the declared errors otherwise.
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IPayPerViewCommerce {
        struct EthPaymentIntent {
            bytes16 intentId;
            address payer;
            address creator;
            uint256 contentId;
            uint256 ethAmount;
            uint256 maxSlippageBps;
            uint256 deadline;
        }

        event PaymentExecuted(
            bytes16 indexed intentId,
            address indexed payer,
            uint256 indexed contentId,
            uint256 ethPaid
        );

        error IntentExpired(bytes16 intentId);
        error InvalidSignature();
        error SlippageExceeded(uint256 expected, uint256 actual);

        function executeETHPayment(EthPaymentIntent calldata intent, bytes calldata signature) external payable;
    }
}

sol! {
    /// USDC to ETH price oracle.
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IPriceOracle {
        function getETHPrice(uint256 usdcAmount) external view returns (uint256 ethAmount);
    }
}
