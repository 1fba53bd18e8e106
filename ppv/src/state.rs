//! Observable state of a payment attempt.
//!
//! [`FlowState`] is a fixed-shape snapshot: presentation code matches on
//! [`Step`] exhaustively instead of probing optional fields.

use std::fmt;
use std::time::Duration;

use alloy_primitives::TxHash;
use serde::{Deserialize, Serialize};

use crate::config::StepEstimates;

/// Progress reported when the intent is being created.
pub const PROGRESS_CREATING_INTENT: u8 = 10;
/// Progress reported once the backend accepted the intent.
pub const PROGRESS_WAITING_SIGNATURE: u8 = 25;
/// Progress reported once the authorization arrived.
pub const PROGRESS_EXECUTING_PAYMENT: u8 = 50;
/// Progress reported once the execution transaction is broadcast.
pub const PROGRESS_AWAITING_CONFIRMATION: u8 = 85;
/// Progress of a completed payment.
pub const PROGRESS_COMPLETED: u8 = 100;

/// Position of an attempt in the payment sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// No attempt started, or the flow was reset.
    #[default]
    Idle,
    /// The backend is registering the payment intent.
    CreatingIntent,
    /// Waiting for the backend authorization.
    WaitingSignature,
    /// The execution call is being sent and confirmed.
    ExecutingPayment,
    /// The payment was confirmed on chain.
    Completed,
    /// The attempt failed; see [`FlowState::error`].
    Error,
}

impl Step {
    /// Snake-case name used in logs and on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CreatingIntent => "creating_intent",
            Self::WaitingSignature => "waiting_signature",
            Self::ExecutingPayment => "executing_payment",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Whether an attempt in this step is in flight.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(
            self,
            Self::CreatingIntent | Self::WaitingSignature | Self::ExecutingPayment
        )
    }

    /// Whether no further transition happens without a reset.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The request was rejected before any network call.
    Validation,
    /// No usable price quote could be obtained.
    Quote,
    /// The backend refused or failed to create the intent.
    Backend,
    /// The backend refused or failed to sign.
    Signature,
    /// The execution call failed, reverted or was not confirmed.
    Execution,
    /// A step exceeded its time budget.
    Timeout,
    /// The payment deadline passed before execution.
    DeadlineExpired,
    /// The delegated stablecoin purchase failed.
    Delegated,
}

/// A failed attempt as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowFailure {
    /// Step the attempt was in when it failed.
    pub step: Step,
    /// Failure classification.
    pub kind: FailureKind,
    /// Human-readable message.
    pub message: String,
}

impl FlowFailure {
    /// Creates a failure record.
    #[must_use]
    pub fn new(step: Step, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            step,
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FlowFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.step, self.message)
    }
}

/// Snapshot of one payment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlowState {
    /// Current step.
    pub step: Step,
    /// Progress percentage, `0..=100`.
    pub progress: u8,
    /// Human-readable status line.
    pub message: String,
    /// Whether an attempt is in flight.
    pub is_active: bool,
    /// Failure of the last attempt, if it failed.
    pub error: Option<FlowFailure>,
    /// Execution transaction, once broadcast.
    pub transaction: Option<TxHash>,
    /// Time since the attempt started.
    pub elapsed: Duration,
    /// Rough time left until completion.
    pub estimated_remaining: Option<Duration>,
}

impl FlowState {
    /// The initial state: idle, no progress, no error.
    #[must_use]
    pub fn idle() -> Self {
        Self::default()
    }

    /// Moves to `step`, never lowering progress.
    pub(crate) fn advance(&mut self, step: Step, progress: u8, message: impl Into<String>) {
        self.step = step;
        self.progress = self.progress.max(progress).min(PROGRESS_COMPLETED);
        self.message = message.into();
        self.is_active = step.is_active();
    }

    /// Records a terminal failure. Progress is left where it was.
    pub(crate) fn fail(&mut self, failure: FlowFailure) {
        self.step = Step::Error;
        self.message.clone_from(&failure.message);
        self.is_active = false;
        self.estimated_remaining = None;
        self.error = Some(failure);
    }

    /// Refreshes timing fields.
    pub(crate) fn update_timing(&mut self, elapsed: Duration, estimates: &StepEstimates) {
        self.elapsed = elapsed;
        self.estimated_remaining = estimates.remaining_after(self.step, self.progress);
    }
}
