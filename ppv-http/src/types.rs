//! Wire format of the backend signer service.

use alloy_primitives::Address;
use ppv::backend::IntentSignature;
use ppv::request::PaymentIntentRequest;
use serde::{Deserialize, Serialize};

/// Body of `POST /intents`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentBody<'a> {
    /// Chain the payment executes on.
    pub chain_id: u64,
    /// Paying account.
    pub payer: Address,
    /// The purchase being authorized.
    pub request: &'a PaymentIntentRequest,
}

/// Response of `GET /intents/{id}/signature`.
///
/// ```json
/// {"status":"pending"}
/// {"status":"ready","signature":"0x…","signer":"0x…"}
/// {"status":"rejected","reason":"content is not for sale"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SignatureStatus {
    /// The backend has not signed yet.
    Pending,
    /// The authorization is available.
    Ready(IntentSignature),
    /// The backend will not sign this intent.
    Rejected {
        /// Reason given by the backend.
        reason: String,
    },
}
