//! Transition notifications for presentation layers.
//!
//! A flow pushes every transition to its registered [`FlowObserver`]s
//! synchronously, in registration order:
//!
//! - **Progress**: every step change and progress bump
//! - **Error**: exactly once per failed attempt
//! - **Completed**: exactly once per confirmed payment
//! - **Reset**: whenever the flow returns to idle
//!
//! Observers that cannot run inline (a UI thread, a websocket session) should
//! use [`ChannelObserver`] and consume [`FlowEvent`]s from a channel. For the
//! latest snapshot instead of every event, use
//! [`PaymentIntentFlow::subscribe`](crate::flow::PaymentIntentFlow::subscribe).

use std::fmt;

use tokio::sync::mpsc;

use crate::backend::PaymentConfirmation;
use crate::state::{FlowFailure, Step};

/// Receives flow transitions. All methods default to no-ops.
pub trait FlowObserver: Send + Sync {
    /// Called on every transition with the new progress and status line.
    fn on_progress(&self, _progress: u8, _message: &str) {}

    /// Called once when an attempt fails in `step`.
    fn on_error(&self, _step: Step, _failure: &FlowFailure) {}

    /// Called once when the payment is confirmed.
    fn on_completed(&self, _confirmation: &PaymentConfirmation) {}

    /// Called when the flow is reset to idle.
    fn on_reset(&self) {}
}

/// A transition, as delivered by [`ChannelObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    /// Progress changed.
    Progress {
        /// New percentage.
        progress: u8,
        /// Status line.
        message: String,
    },
    /// The attempt failed.
    Failed(FlowFailure),
    /// The payment was confirmed.
    Completed(PaymentConfirmation),
    /// The flow was reset.
    Reset,
}

impl FlowEvent {
    pub(crate) fn deliver(&self, observer: &dyn FlowObserver) {
        match self {
            Self::Progress { progress, message } => observer.on_progress(*progress, message),
            Self::Failed(failure) => observer.on_error(failure.step, failure),
            Self::Completed(confirmation) => observer.on_completed(confirmation),
            Self::Reset => observer.on_reset(),
        }
    }
}

/// Forwards transitions into an unbounded channel.
///
/// Sending never blocks the flow; events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<FlowEvent>,
}

impl ChannelObserver {
    /// Creates an observer and the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FlowEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: FlowEvent) {
        // A closed receiver only means nobody is watching anymore
        let _ = self.tx.send(event);
    }
}

impl FlowObserver for ChannelObserver {
    fn on_progress(&self, progress: u8, message: &str) {
        self.send(FlowEvent::Progress {
            progress,
            message: message.to_owned(),
        });
    }

    fn on_error(&self, _step: Step, failure: &FlowFailure) {
        self.send(FlowEvent::Failed(failure.clone()));
    }

    fn on_completed(&self, confirmation: &PaymentConfirmation) {
        self.send(FlowEvent::Completed(*confirmation));
    }

    fn on_reset(&self) {
        self.send(FlowEvent::Reset);
    }
}

impl<T: FlowObserver + ?Sized> FlowObserver for std::sync::Arc<T> {
    fn on_progress(&self, progress: u8, message: &str) {
        (**self).on_progress(progress, message);
    }

    fn on_error(&self, step: Step, failure: &FlowFailure) {
        (**self).on_error(step, failure);
    }

    fn on_completed(&self, confirmation: &PaymentConfirmation) {
        (**self).on_completed(confirmation);
    }

    fn on_reset(&self) {
        (**self).on_reset();
    }
}

type ProgressFn = Box<dyn Fn(u8, &str) + Send + Sync>;
type ErrorFn = Box<dyn Fn(Step, &FlowFailure) + Send + Sync>;

/// Adapts a pair of closures `(progress, message)` and `(step, failure)`.
pub struct FnObserver {
    on_progress: ProgressFn,
    on_error: ErrorFn,
}

impl FnObserver {
    /// Wraps the two callbacks.
    pub fn new<P, E>(on_progress: P, on_error: E) -> Self
    where
        P: Fn(u8, &str) + Send + Sync + 'static,
        E: Fn(Step, &FlowFailure) + Send + Sync + 'static,
    {
        Self {
            on_progress: Box::new(on_progress),
            on_error: Box::new(on_error),
        }
    }
}

impl fmt::Debug for FnObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnObserver").finish_non_exhaustive()
    }
}

impl FlowObserver for FnObserver {
    fn on_progress(&self, progress: u8, message: &str) {
        (self.on_progress)(progress, message);
    }

    fn on_error(&self, step: Step, failure: &FlowFailure) {
        (self.on_error)(step, failure);
    }
}
