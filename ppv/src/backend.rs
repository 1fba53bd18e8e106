//! External collaborators of the payment flow.
//!
//! - [`IntentBackend`] - the off-chain service that registers a payment intent
//!   and issues the authorization the commerce contract requires.
//! - [`PaymentExecutor`] - submits the authorized execution call and waits
//!   for it to confirm.
//!
//! Both traits return `Send` futures so a flow can run on a multi-threaded
//! runtime. HTTP and EVM implementations live in `ppv-http` and `ppv-evm`.

use std::future::Future;
use std::sync::Arc;

use alloy_primitives::{Address, B128, Bytes, TxHash};
use serde::{Deserialize, Serialize};

use crate::flow::FlowContext;
use crate::request::PaymentIntentRequest;
use crate::timestamp::UnixTimestamp;

/// Backend-assigned identifier of a payment intent.
pub type IntentId = B128;

/// Acknowledgement that the backend registered an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentReceipt {
    /// Intent identifier, also used on chain.
    pub intent_id: IntentId,
    /// When the backend stops honouring the intent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<UnixTimestamp>,
}

/// Backend authorization for an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentSignature {
    /// Signature checked by the commerce contract.
    pub signature: Bytes,
    /// Operator that signed, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<Address>,
}

/// Everything the executor needs to send the payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// The original request.
    pub request: PaymentIntentRequest,
    /// Intent registered by the backend.
    pub intent_id: IntentId,
    /// Authorization for the intent.
    pub signature: Bytes,
}

/// A broadcast, not yet confirmed, execution transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingPayment {
    /// Intent being paid.
    pub intent_id: IntentId,
    /// Transaction hash.
    pub tx_hash: TxHash,
}

/// A confirmed payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmation {
    /// Intent that was paid.
    pub intent_id: IntentId,
    /// Transaction hash.
    pub tx_hash: TxHash,
    /// Block including the transaction, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
}

/// The backend signer service.
pub trait IntentBackend {
    /// Error returned by the backend.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Registers a payment intent for `request` on behalf of the context's payer.
    fn create_intent(
        &self,
        context: &FlowContext,
        request: &PaymentIntentRequest,
    ) -> impl Future<Output = Result<IntentReceipt, Self::Error>> + Send;

    /// Waits for the backend to authorize a registered intent.
    fn fetch_signature(
        &self,
        receipt: &IntentReceipt,
    ) -> impl Future<Output = Result<IntentSignature, Self::Error>> + Send;
}

/// Submits and confirms authorized payments.
pub trait PaymentExecutor {
    /// Error returned by the executor.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Broadcasts the execution call.
    fn submit(
        &self,
        context: &FlowContext,
        execution: &ExecutionRequest,
    ) -> impl Future<Output = Result<PendingPayment, Self::Error>> + Send;

    /// Waits for a broadcast payment to confirm.
    ///
    /// A transaction that is mined but reverted must be reported as an error.
    fn confirm(
        &self,
        pending: &PendingPayment,
    ) -> impl Future<Output = Result<PaymentConfirmation, Self::Error>> + Send;
}

impl<T: IntentBackend + Send + Sync> IntentBackend for Arc<T> {
    type Error = T::Error;

    async fn create_intent(
        &self,
        context: &FlowContext,
        request: &PaymentIntentRequest,
    ) -> Result<IntentReceipt, Self::Error> {
        (**self).create_intent(context, request).await
    }

    async fn fetch_signature(&self, receipt: &IntentReceipt) -> Result<IntentSignature, Self::Error> {
        (**self).fetch_signature(receipt).await
    }
}

impl<T: PaymentExecutor + Send + Sync> PaymentExecutor for Arc<T> {
    type Error = T::Error;

    async fn submit(
        &self,
        context: &FlowContext,
        execution: &ExecutionRequest,
    ) -> Result<PendingPayment, Self::Error> {
        (**self).submit(context, execution).await
    }

    async fn confirm(&self, pending: &PendingPayment) -> Result<PaymentConfirmation, Self::Error> {
        (**self).confirm(pending).await
    }
}
