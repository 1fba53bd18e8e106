//! On-chain execution of authorized ETH payment intents.

use std::time::Duration;

use alloy_primitives::{Address, U256};
use alloy_provider::{PendingTransactionBuilder, Provider};
use ppv::backend::{ExecutionRequest, PaymentConfirmation, PaymentExecutor, PendingPayment};
use ppv::flow::FlowContext;

use crate::contract::IPayPerViewCommerce;
use crate::error::EvmError;

/// Awaits a future, optionally instrumenting it with a tracing span.
macro_rules! traced {
    ($fut:expr, $span:expr) => {{
        #[cfg(feature = "telemetry")]
        {
            use tracing::Instrument;
            $fut.instrument($span).await
        }
        #[cfg(not(feature = "telemetry"))]
        {
            $fut.await
        }
    }};
}

pub(crate) use traced;

/// Builds the contract's view of an intent.
#[must_use]
pub fn eth_payment_intent(
    payer: Address,
    execution: &ExecutionRequest,
) -> IPayPerViewCommerce::EthPaymentIntent {
    let request = &execution.request;
    IPayPerViewCommerce::EthPaymentIntent {
        intentId: execution.intent_id,
        payer,
        creator: request.creator,
        contentId: request.content_id,
        ethAmount: request.eth_amount,
        maxSlippageBps: U256::from(request.max_slippage_bps),
        deadline: U256::from(request.deadline.as_secs()),
    }
}

/// Sends `executeETHPayment` from the payer's wallet and waits for the receipt.
///
/// The provider must be able to sign for [`FlowContext::payer`], usually a
/// wallet-filled provider from [`connect`](crate::connect). The transaction
/// value is [`max_eth_with_slippage`](ppv::request::PaymentIntentRequest::max_eth_with_slippage);
/// the contract refunds what the current price does not need.
#[derive(Debug, Clone)]
pub struct EvmPaymentExecutor<P> {
    provider: P,
    commerce: Address,
    confirmations: u64,
    receipt_timeout: Option<Duration>,
}

impl<P> EvmPaymentExecutor<P> {
    /// Executes against the commerce contract at `commerce`, with one confirmation.
    pub const fn new(provider: P, commerce: Address) -> Self {
        Self {
            provider,
            commerce,
            confirmations: 1,
            receipt_timeout: None,
        }
    }

    /// Confirmations required before a payment counts as completed.
    #[must_use]
    pub const fn with_confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = confirmations;
        self
    }

    /// Gives up waiting for the receipt after `timeout`.
    #[must_use]
    pub const fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = Some(timeout);
        self
    }

    /// The underlying provider.
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Address of the commerce contract.
    pub const fn commerce(&self) -> Address {
        self.commerce
    }
}

impl<P: Provider> PaymentExecutor for EvmPaymentExecutor<P> {
    type Error = EvmError;

    async fn submit(
        &self,
        context: &FlowContext,
        execution: &ExecutionRequest,
    ) -> Result<PendingPayment, EvmError> {
        let actual = self.provider.get_chain_id().await?;
        if actual != context.chain_id {
            return Err(EvmError::ChainMismatch {
                expected: context.chain_id,
                actual,
            });
        }

        let value = execution.request.max_eth_with_slippage();
        let contract = IPayPerViewCommerce::new(self.commerce, &self.provider);
        let call = contract
            .executeETHPayment(
                eth_payment_intent(context.payer, execution),
                execution.signature.clone(),
            )
            .from(context.payer)
            .value(value);
        let pending = traced!(
            call.send(),
            tracing::info_span!("call_executeETHPayment",
                intent_id = %execution.intent_id,
                payer = %context.payer,
                creator = %execution.request.creator,
                content_id = %execution.request.content_id,
                value = %value,
                contract = %self.commerce,
                otel.kind = "client",
            )
        )?;

        let tx_hash = *pending.tx_hash();
        #[cfg(feature = "telemetry")]
        tracing::info!(tx = %tx_hash, intent_id = %execution.intent_id, "executeETHPayment broadcast");
        Ok(PendingPayment {
            intent_id: execution.intent_id,
            tx_hash,
        })
    }

    async fn confirm(&self, pending: &PendingPayment) -> Result<PaymentConfirmation, EvmError> {
        let watcher = PendingTransactionBuilder::new(self.provider.root().clone(), pending.tx_hash)
            .with_required_confirmations(self.confirmations)
            .with_timeout(self.receipt_timeout);
        let receipt = traced!(
            watcher.get_receipt(),
            tracing::info_span!("await_receipt",
                tx = %pending.tx_hash,
                confirmations = self.confirmations,
                otel.kind = "client",
            )
        )?;

        if !receipt.status() {
            #[cfg(feature = "telemetry")]
            tracing::warn!(status = "failed", tx = %receipt.transaction_hash, "executeETHPayment reverted");
            return Err(EvmError::Reverted(receipt.transaction_hash));
        }
        #[cfg(feature = "telemetry")]
        tracing::info!(
            status = "ok",
            tx = %receipt.transaction_hash,
            block = ?receipt.block_number,
            "executeETHPayment succeeded"
        );
        Ok(PaymentConfirmation {
            intent_id: pending.intent_id,
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
        })
    }
}
