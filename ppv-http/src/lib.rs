#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! HTTP client for the pay-per-view backend signer service.
//!
//! [`SignerClient`] implements [`ppv::IntentBackend`]: it registers payment
//! intents and polls for the backend's authorization, using `reqwest`.
//!
//! # Feature Flags
//!
//! - `telemetry` - Tracing spans with `otel.status_code` around every request

pub mod client;
pub mod types;

pub use client::{SignerClient, SignerClientError};
pub use types::{CreateIntentBody, SignatureStatus};

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{TxHash, U256, address};
    use ppv::backend::{
        ExecutionRequest, PaymentConfirmation, PaymentExecutor, PendingPayment,
    };
    use ppv::request::Metadata;
    use ppv::state::{FailureKind, Step};
    use ppv::{FlowContext, PaymentIntentFlow, PaymentIntentRequest, UnixTimestamp};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, thiserror::Error)]
    #[error("unreachable")]
    struct Never;

    /// Records what it was asked to execute.
    #[derive(Debug, Default)]
    struct RecordingExecutor {
        executed: Mutex<Vec<ExecutionRequest>>,
    }

    impl PaymentExecutor for RecordingExecutor {
        type Error = Never;

        async fn submit(
            &self,
            _context: &FlowContext,
            execution: &ExecutionRequest,
        ) -> Result<PendingPayment, Never> {
            self.executed.lock().unwrap().push(execution.clone());
            Ok(PendingPayment {
                intent_id: execution.intent_id,
                tx_hash: TxHash::repeat_byte(0xee),
            })
        }

        async fn confirm(&self, pending: &PendingPayment) -> Result<PaymentConfirmation, Never> {
            Ok(PaymentConfirmation {
                intent_id: pending.intent_id,
                tx_hash: pending.tx_hash,
                block_number: Some(1),
            })
        }
    }

    fn flow(server: &MockServer) -> PaymentIntentFlow<SignerClient, RecordingExecutor> {
        let client = SignerClient::try_from(server.uri().as_str())
            .unwrap()
            .with_poll_interval(Duration::from_millis(5))
            .with_max_polls(5);
        let context = FlowContext {
            chain_id: 8453,
            payer: address!("00000000000000000000000000000000000000aa"),
        };
        PaymentIntentFlow::new(client, RecordingExecutor::default(), context)
    }

    fn request() -> PaymentIntentRequest {
        PaymentIntentRequest {
            content_id: U256::from(3),
            creator: address!("00000000000000000000000000000000000000c0"),
            eth_amount: U256::from(10_000u64),
            max_slippage_bps: 100,
            deadline: UnixTimestamp::now() + 600,
            metadata: Metadata::new(),
        }
    }

    async fn mount_intent(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/intents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "intentId": "0x0000000000000000000000000000abcd"
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_flow_with_signer_backend() {
        let server = MockServer::start().await;
        mount_intent(&server).await;
        Mock::given(method("GET"))
            .and(path("/intents/0x0000000000000000000000000000abcd/signature"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "ready",
                "signature": "0x0102"
            })))
            .mount(&server)
            .await;
        let flow = flow(&server);

        let outcome = flow.execute_eth_payment(request()).await;

        assert!(outcome.is_completed());
        let executed = flow.executor().executed.lock().unwrap().clone();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].signature.as_ref(), &[0x01, 0x02]);
        assert_eq!(executed[0].request.content_id, U256::from(3));
    }

    #[tokio::test]
    async fn test_flow_reports_rejected_signature() {
        let server = MockServer::start().await;
        mount_intent(&server).await;
        Mock::given(method("GET"))
            .and(path("/intents/0x0000000000000000000000000000abcd/signature"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "rejected",
                "reason": "content unavailable"
            })))
            .mount(&server)
            .await;
        let flow = flow(&server);

        let outcome = flow.execute_eth_payment(request()).await;

        let failure = outcome.failure().unwrap();
        assert_eq!(failure.step, Step::WaitingSignature);
        assert_eq!(failure.kind, FailureKind::Signature);
        assert!(failure.message.contains("content unavailable"));
        assert!(flow.executor().executed.lock().unwrap().is_empty());
    }
}
