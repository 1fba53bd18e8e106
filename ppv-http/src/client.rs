//! An [`IntentBackend`] that talks to the backend signer service over HTTP.
//!
//! [`SignerClient`] registers intents with `POST /intents` and polls
//! `GET /intents/{id}/signature` until the backend signs or rejects.
//!
//! ## Error Handling
//!
//! [`SignerClientError`] keeps the context of every failure:
//! - URL construction
//! - HTTP transport failures
//! - JSON deserialization errors
//! - Unexpected HTTP status responses, with their body
//! - Rejected or never-signed intents

use std::fmt::Display;
use std::time::Duration;

use http::header::{AUTHORIZATION, HeaderValue, InvalidHeaderValue};
use http::{HeaderMap, StatusCode};
use ppv::backend::{IntentBackend, IntentId, IntentReceipt, IntentSignature};
use ppv::config::BackendConfig;
use ppv::flow::FlowContext;
use ppv::request::PaymentIntentRequest;
use reqwest::{Client, RequestBuilder};
use url::Url;

#[cfg(feature = "telemetry")]
use tracing::Span;

use crate::types::{CreateIntentBody, SignatureStatus};

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

/// Errors that can occur while talking to the signer service.
#[derive(Debug, thiserror::Error)]
pub enum SignerClientError {
    /// URL parse error.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// Human-readable context.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// The API key is not a valid header value.
    #[error("invalid API key header: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),
    /// HTTP transport error.
    #[error("HTTP error: {context}: {source}")]
    Http {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// JSON deserialization error.
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// Unexpected HTTP status code.
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        /// Human-readable context.
        context: &'static str,
        /// The HTTP status code.
        status: StatusCode,
        /// The response body.
        body: String,
    },
    /// Failed to read response body.
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// The backend refused to sign.
    #[error("intent {intent_id} rejected: {reason}")]
    Rejected {
        /// Intent that was refused.
        intent_id: IntentId,
        /// Reason given by the backend.
        reason: String,
    },
    /// The signature was still pending after the last poll.
    #[error("intent {intent_id} still unsigned after {polls} polls")]
    NotReady {
        /// Intent that was polled.
        intent_id: IntentId,
        /// Polls made.
        polls: u32,
    },
}

/// A client for the backend signer service.
#[derive(Clone, Debug)]
pub struct SignerClient {
    /// Base URL of the service (e.g. `https://api.example/ppv/`)
    base_url: Url,
    /// Full URL of `POST /intents`
    intents_url: Url,
    client: Client,
    headers: HeaderMap,
    timeout: Option<Duration>,
    poll_interval: Duration,
    max_polls: u32,
}

impl SignerClient {
    /// Default delay between signature polls.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

    /// Default number of signature polls.
    pub const DEFAULT_MAX_POLLS: u32 = 60;

    /// Constructs a client rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`SignerClientError::UrlParse`] if the intent routes cannot be
    /// resolved against `base_url`.
    pub fn try_new(base_url: Url) -> Result<Self, SignerClientError> {
        let intents_url = base_url
            .join("./intents")
            .map_err(|e| SignerClientError::UrlParse {
                context: "Failed to construct ./intents URL",
                source: e,
            })?;
        Ok(Self {
            base_url,
            intents_url,
            client: Client::new(),
            headers: HeaderMap::new(),
            timeout: None,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            max_polls: Self::DEFAULT_MAX_POLLS,
        })
    }

    /// Builds a client from the `[backend]` configuration section.
    ///
    /// # Errors
    ///
    /// Returns [`SignerClientError`] if the base URL or API key is invalid.
    pub fn from_config(config: &BackendConfig) -> Result<Self, SignerClientError> {
        let mut client = Self::try_from(config.base_url.as_str())?
            .with_poll_interval(Duration::from_millis(config.poll_interval_ms))
            .with_max_polls(config.max_polls);
        if let Some(secs) = config.request_timeout_secs {
            client = client.with_timeout(Duration::from_secs(secs));
        }
        if let Some(key) = &config.api_key {
            let mut value = HeaderValue::from_str(&format!("Bearer {key}"))?;
            value.set_sensitive(true);
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, value);
            client = client.with_headers(headers);
        }
        Ok(client)
    }

    /// Returns the base URL used by this client.
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the computed `./intents` URL.
    pub const fn intents_url(&self) -> &Url {
        &self.intents_url
    }

    /// Returns any custom headers configured on the client.
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the per-request timeout, if any.
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Attaches custom headers to all future requests.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets a timeout for each HTTP request.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the delay between signature polls.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets how many times a pending signature is polled. Zero is treated as one.
    #[must_use]
    pub const fn with_max_polls(mut self, polls: u32) -> Self {
        self.max_polls = polls;
        self
    }

    /// URL of `GET /intents/{id}/signature`.
    ///
    /// # Errors
    ///
    /// Returns [`SignerClientError::UrlParse`] if the URL cannot be built.
    pub fn signature_url(&self, intent_id: IntentId) -> Result<Url, SignerClientError> {
        self.base_url
            .join(&format!("./intents/{intent_id}/signature"))
            .map_err(|e| SignerClientError::UrlParse {
                context: "Failed to construct ./intents/{id}/signature URL",
                source: e,
            })
    }

    /// Sends `POST /intents`.
    ///
    /// # Errors
    ///
    /// Returns [`SignerClientError`] if the request fails or the response does
    /// not decode.
    pub async fn create(
        &self,
        context: &FlowContext,
        request: &PaymentIntentRequest,
    ) -> Result<IntentReceipt, SignerClientError> {
        let body = CreateIntentBody {
            chain_id: context.chain_id,
            payer: context.payer,
            request,
        };
        self.post_json(&self.intents_url, "POST /intents", &body)
            .await
    }

    /// Polls `GET /intents/{id}/signature` until the backend signs or rejects.
    ///
    /// # Errors
    ///
    /// Returns [`SignerClientError::Rejected`] if the backend refuses,
    /// [`SignerClientError::NotReady`] once the poll budget is spent, or the
    /// first transport failure.
    pub async fn poll_signature(
        &self,
        intent_id: IntentId,
    ) -> Result<IntentSignature, SignerClientError> {
        let url = self.signature_url(intent_id)?;
        let polls = self.max_polls.max(1);
        for attempt in 1..=polls {
            let status: SignatureStatus = self
                .get_json(&url, "GET /intents/{id}/signature")
                .await?;
            match status {
                SignatureStatus::Ready(signature) => return Ok(signature),
                SignatureStatus::Rejected { reason } => {
                    return Err(SignerClientError::Rejected { intent_id, reason });
                }
                SignatureStatus::Pending => {
                    #[cfg(feature = "telemetry")]
                    tracing::debug!(intent_id = %intent_id, attempt, "Signature pending");
                    if attempt < polls {
                        tokio::time::sleep(self.poll_interval).await;
                    }
                }
            }
        }
        Err(SignerClientError::NotReady { intent_id, polls })
    }

    async fn post_json<T, R>(
        &self,
        url: &Url,
        context: &'static str,
        payload: &T,
    ) -> Result<R, SignerClientError>
    where
        T: serde::Serialize + Sync + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        self.send(self.client.post(url.clone()).json(payload), context)
            .await
    }

    async fn get_json<R>(&self, url: &Url, context: &'static str) -> Result<R, SignerClientError>
    where
        R: serde::de::DeserializeOwned,
    {
        self.send(self.client.get(url.clone()), context).await
    }

    /// Applies headers and timeout, sends, and decodes a 2xx JSON body.
    ///
    /// `context` is a human-readable identifier used in tracing and error
    /// messages (e.g. `"POST /intents"`).
    async fn send<R>(
        &self,
        mut req: RequestBuilder,
        context: &'static str,
    ) -> Result<R, SignerClientError>
    where
        R: serde::de::DeserializeOwned,
    {
        for (key, value) in &self.headers {
            req = req.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req
            .send()
            .await
            .map_err(|e| SignerClientError::Http { context, source: e })?;

        let result = if http_response.status().is_success() {
            http_response
                .json::<R>()
                .await
                .map_err(|e| SignerClientError::JsonDeserialization { context, source: e })
        } else {
            let status = http_response.status();
            let body = http_response
                .text()
                .await
                .map_err(|e| SignerClientError::ResponseBodyRead { context, source: e })?;
            Err(SignerClientError::HttpStatus {
                context,
                status,
                body,
            })
        };

        record_result_on_span(&result);

        result
    }
}

impl IntentBackend for SignerClient {
    type Error = SignerClientError;

    async fn create_intent(
        &self,
        context: &FlowContext,
        request: &PaymentIntentRequest,
    ) -> Result<IntentReceipt, SignerClientError> {
        traced!(
            self.create(context, request),
            tracing::info_span!("ppv.signer_client.create_intent",
                content_id = %request.content_id,
                chain_id = context.chain_id,
                timeout = ?self.timeout,
                otel.status_code = tracing::field::Empty,
                error.message = tracing::field::Empty,
            )
        )
    }

    async fn fetch_signature(
        &self,
        receipt: &IntentReceipt,
    ) -> Result<IntentSignature, SignerClientError> {
        traced!(
            self.poll_signature(receipt.intent_id),
            tracing::info_span!("ppv.signer_client.fetch_signature",
                intent_id = %receipt.intent_id,
                max_polls = self.max_polls,
                otel.status_code = tracing::field::Empty,
                error.message = tracing::field::Empty,
            )
        )
    }
}

/// Converts a string URL into a `SignerClient`, parsing the URL and calling `try_new`.
impl TryFrom<&str> for SignerClient {
    type Error = SignerClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        // Routes are joined relative to the base, which needs exactly one trailing slash
        let mut normalized = value.trim_end_matches('/').to_string();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| SignerClientError::UrlParse {
            context: "Failed to parse base url",
            source: e,
        })?;
        Self::try_new(url)
    }
}

/// Records the outcome of a request on the current span.
#[cfg(feature = "telemetry")]
fn record_result_on_span<R, E: Display>(result: &Result<R, E>) {
    let span = Span::current();
    match result {
        Ok(_) => {
            span.record("otel.status_code", "OK");
        }
        Err(err) => {
            span.record("otel.status_code", "ERROR");
            span.record("error.message", tracing::field::display(err));
            tracing::event!(tracing::Level::ERROR, error = %err, "Request to signer service failed");
        }
    }
}

/// Noop if telemetry feature is off.
#[cfg(not(feature = "telemetry"))]
fn record_result_on_span<R, E: Display>(_result: &Result<R, E>) {}
