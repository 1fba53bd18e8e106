//! Orchestration of a single ETH purchase.
//!
//! [`PaymentIntentFlow`] drives one attempt through
//! `idle → creating_intent → waiting_signature → executing_payment → completed`,
//! with `error` reachable from any non-terminal step:
//!
//! 1. **Validate** the request. Failures end the attempt before any network call.
//! 2. **Create the intent** with the [`IntentBackend`].
//! 3. **Wait for the authorization** from the backend.
//! 4. **Execute** through the [`PaymentExecutor`]: broadcast, then confirm.
//!
//! Each transition updates the [`FlowState`] watch channel and notifies the
//! registered [`FlowObserver`]s. Events are queued together with the state
//! write and delivered in that order, so observers never see a transition
//! after the reset that superseded it. Failures never escape as `Err`: they are
//! recorded on the state and reported through [`FlowOutcome::Failed`].
//!
//! Every wait is bounded by the [`FlowConfig`] timeouts and raced against the
//! attempt's cancellation token, so [`PaymentIntentFlow::reset_flow`] stops
//! in-flight work instead of only clearing the display.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use alloy_primitives::{Address, TxHash};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backend::{
    ExecutionRequest, IntentBackend, IntentReceipt, PaymentConfirmation, PaymentExecutor,
};
use crate::config::{FlowConfig, SuspensionPoint};
use crate::error::FlowError;
use crate::observer::{FlowEvent, FlowObserver};
use crate::registry::{AttemptGuard, AttemptKey, AttemptRegistry};
use crate::request::PaymentIntentRequest;
use crate::state::{
    FlowFailure, FlowState, PROGRESS_AWAITING_CONFIRMATION, PROGRESS_COMPLETED,
    PROGRESS_CREATING_INTENT, PROGRESS_EXECUTING_PAYMENT, PROGRESS_WAITING_SIGNATURE, Step,
};
use crate::timestamp::UnixTimestamp;

/// Wallet and chain the flow pays from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowContext {
    /// EIP-155 chain ID.
    pub chain_id: u64,
    /// Paying account.
    pub payer: Address,
}

/// Why an attempt was not started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusalReason {
    /// This flow already has an attempt in flight.
    InProgress,
    /// The previous attempt ended in this step and the flow was not reset.
    NotReset(Step),
    /// Another flow sharing the registry is paying for the same content.
    DuplicateAttempt,
}

/// How an attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// The payment was confirmed.
    Completed(PaymentConfirmation),
    /// The attempt failed; the same failure is on the flow state.
    Failed(FlowFailure),
    /// The flow was reset while the attempt was in flight.
    Cancelled,
    /// The attempt was never started. State is untouched.
    Refused(RefusalReason),
}

impl FlowOutcome {
    /// Whether the payment was confirmed.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// The failure, if the attempt failed.
    #[must_use]
    pub const fn failure(&self) -> Option<&FlowFailure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Why [`PaymentIntentFlow::run`] stopped early.
#[derive(Debug)]
enum Interrupt {
    /// The attempt is no longer current.
    Cancelled,
    /// The attempt failed in the given step.
    Failed(Step, FlowError),
}

#[derive(Debug, Clone)]
struct Attempt {
    id: u64,
    token: CancellationToken,
    started: Instant,
}

/// Events waiting for delivery, in state-write order.
#[derive(Debug, Default)]
struct Outbox {
    queue: VecDeque<FlowEvent>,
    draining: bool,
}

/// Drives ETH purchases through an [`IntentBackend`] and a [`PaymentExecutor`].
///
/// All methods take `&self`; share the flow in an `Arc` to reset it from
/// another task while an attempt is running.
pub struct PaymentIntentFlow<B, E> {
    backend: B,
    executor: E,
    context: FlowContext,
    config: FlowConfig,
    state: watch::Sender<FlowState>,
    observers: Vec<Box<dyn FlowObserver>>,
    current: Mutex<Option<Attempt>>,
    outbox: Mutex<Outbox>,
    attempts: AtomicU64,
    registry: Option<AttemptRegistry>,
}

impl<B, E> fmt::Debug for PaymentIntentFlow<B, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentIntentFlow")
            .field("context", &self.context)
            .field("config", &self.config)
            .field("state", &*self.state.borrow())
            .field("observers", &format!("[{} observers]", self.observers.len()))
            .finish_non_exhaustive()
    }
}

impl<B, E> PaymentIntentFlow<B, E> {
    /// Creates an idle flow with the default configuration.
    pub fn new(backend: B, executor: E, context: FlowContext) -> Self {
        let (state, _) = watch::channel(FlowState::idle());
        Self {
            backend,
            executor,
            context,
            config: FlowConfig::default(),
            state,
            observers: Vec::new(),
            current: Mutex::new(None),
            outbox: Mutex::new(Outbox::default()),
            attempts: AtomicU64::new(0),
            registry: None,
        }
    }

    /// Replaces the timeouts and estimates.
    #[must_use]
    pub fn with_config(mut self, config: FlowConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers an observer. Observers are notified in registration order.
    #[must_use]
    pub fn with_observer(mut self, observer: impl FlowObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    /// Adds an observer after construction.
    pub fn add_observer(&mut self, observer: impl FlowObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Shares an attempt registry with other flows.
    #[must_use]
    pub fn with_registry(mut self, registry: AttemptRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Wallet and chain context.
    #[must_use]
    pub const fn context(&self) -> &FlowContext {
        &self.context
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// The backend collaborator.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// The executor collaborator.
    #[must_use]
    pub const fn executor(&self) -> &E {
        &self.executor
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> FlowState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<FlowState> {
        self.state.subscribe()
    }

    /// Whether an attempt is in flight.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lock_current().is_some()
    }

    /// Returns the flow to idle: progress 0, no error, inactive.
    ///
    /// An in-flight attempt is cancelled at its current wait and resolves to
    /// [`FlowOutcome::Cancelled`] without touching state again. A transaction
    /// that was already broadcast is not recalled.
    pub fn reset_flow(&self) {
        let mut current = self.lock_current();
        if let Some(attempt) = current.take() {
            attempt.token.cancel();
            #[cfg(feature = "telemetry")]
            tracing::info!(attempt = attempt.id, "Cancelled in-flight payment attempt");
        }
        self.state.send_replace(FlowState::idle());
        self.enqueue([FlowEvent::Reset]);
        drop(current);
        self.dispatch();
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<Attempt>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues events. Callers hold the `current` lock so queue order matches
    /// state-write order.
    fn enqueue(&self, events: impl IntoIterator<Item = FlowEvent>) {
        if self.observers.is_empty() {
            return;
        }
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queue
            .extend(events);
    }

    /// Delivers queued events to every observer.
    ///
    /// Only one caller drains at a time. A call made while another is draining,
    /// including one from inside an observer, returns at once and its events
    /// are delivered by the drainer after the ones already queued.
    fn dispatch(&self) {
        {
            let mut outbox = self.outbox.lock().unwrap_or_else(PoisonError::into_inner);
            if outbox.draining {
                return;
            }
            outbox.draining = true;
        }
        loop {
            let event = {
                let mut outbox = self.outbox.lock().unwrap_or_else(PoisonError::into_inner);
                match outbox.queue.pop_front() {
                    Some(event) => event,
                    None => {
                        outbox.draining = false;
                        return;
                    }
                }
            };
            for observer in &self.observers {
                event.deliver(observer.as_ref());
            }
        }
    }

    fn begin(&self, key: AttemptKey) -> Result<(Attempt, Option<AttemptGuard>), RefusalReason> {
        let mut current = self.lock_current();
        if current.is_some() {
            return Err(RefusalReason::InProgress);
        }
        let step = self.state.borrow().step;
        if step != Step::Idle {
            return Err(RefusalReason::NotReset(step));
        }
        let guard = match &self.registry {
            Some(registry) => Some(
                registry
                    .try_begin(key)
                    .ok_or(RefusalReason::DuplicateAttempt)?,
            ),
            None => None,
        };
        let attempt = Attempt {
            id: self.attempts.fetch_add(1, Ordering::Relaxed) + 1,
            token: CancellationToken::new(),
            started: Instant::now(),
        };
        *current = Some(attempt.clone());
        Ok((attempt, guard))
    }

    /// Applies `f` to the state if `attempt` is still current and queues the
    /// progress event. Returns the new progress.
    fn update(
        &self,
        attempt: &Attempt,
        message: &str,
        f: impl FnOnce(&mut FlowState),
    ) -> Result<u8, Interrupt> {
        let current = self.lock_current();
        if current.as_ref().map(|a| a.id) != Some(attempt.id) {
            return Err(Interrupt::Cancelled);
        }
        let elapsed = attempt.started.elapsed();
        let mut progress = 0;
        self.state.send_modify(|state| {
            f(state);
            state.update_timing(elapsed, &self.config.estimates);
            progress = state.progress;
        });
        self.enqueue([FlowEvent::Progress {
            progress,
            message: message.to_owned(),
        }]);
        Ok(progress)
    }

    fn transition(
        &self,
        attempt: &Attempt,
        step: Step,
        progress: u8,
        message: &str,
    ) -> Result<(), Interrupt> {
        let progress =
            self.update(attempt, message, |state| state.advance(step, progress, message))?;
        #[cfg(feature = "telemetry")]
        tracing::info!(attempt = attempt.id, step = %step, progress, "{message}");
        self.dispatch();
        Ok(())
    }

    fn record_broadcast(&self, attempt: &Attempt, tx_hash: TxHash) -> Result<(), Interrupt> {
        const MESSAGE: &str = "Waiting for confirmation";
        let progress = self.update(attempt, MESSAGE, |state| {
            state.transaction = Some(tx_hash);
            state.advance(Step::ExecutingPayment, PROGRESS_AWAITING_CONFIRMATION, MESSAGE);
        })?;
        #[cfg(feature = "telemetry")]
        tracing::info!(attempt = attempt.id, tx = %tx_hash, progress, "{MESSAGE}");
        self.dispatch();
        Ok(())
    }

    /// Awaits `fut` unless the attempt is cancelled or `point` times out.
    async fn suspend<T, Er, F>(
        &self,
        attempt: &Attempt,
        step: Step,
        point: SuspensionPoint,
        fut: F,
        map_err: impl FnOnce(Er) -> FlowError,
    ) -> Result<T, Interrupt>
    where
        F: Future<Output = Result<T, Er>>,
    {
        let limit = self.config.timeout_for(point);
        tokio::select! {
            biased;
            () = attempt.token.cancelled() => Err(Interrupt::Cancelled),
            result = tokio::time::timeout(limit, fut) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(Interrupt::Failed(step, map_err(e))),
                Err(_) => Err(Interrupt::Failed(step, FlowError::Timeout { step, after: limit })),
            },
        }
    }

    fn fail(&self, attempt: &Attempt, step: Step, error: &FlowError) -> FlowOutcome {
        let failure = FlowFailure::new(step, error.kind(), error.to_string());
        let mut current = self.lock_current();
        if current.as_ref().map(|a| a.id) != Some(attempt.id) {
            return FlowOutcome::Cancelled;
        }
        *current = None;
        let elapsed = attempt.started.elapsed();
        self.state.send_modify(|state| {
            state.fail(failure.clone());
            state.elapsed = elapsed;
        });
        self.enqueue([FlowEvent::Failed(failure.clone())]);
        drop(current);

        #[cfg(feature = "telemetry")]
        tracing::warn!(
            attempt = attempt.id,
            step = %step,
            kind = ?failure.kind,
            error = %error,
            "Payment attempt failed"
        );
        self.dispatch();
        FlowOutcome::Failed(failure)
    }

    fn complete(&self, attempt: &Attempt, confirmation: PaymentConfirmation) -> FlowOutcome {
        const MESSAGE: &str = "Payment completed";
        let mut current = self.lock_current();
        if current.as_ref().map(|a| a.id) != Some(attempt.id) {
            return FlowOutcome::Cancelled;
        }
        *current = None;
        let elapsed = attempt.started.elapsed();
        self.state.send_modify(|state| {
            state.advance(Step::Completed, PROGRESS_COMPLETED, MESSAGE);
            state.transaction = Some(confirmation.tx_hash);
            state.update_timing(elapsed, &self.config.estimates);
        });
        self.enqueue([
            FlowEvent::Progress {
                progress: PROGRESS_COMPLETED,
                message: MESSAGE.to_owned(),
            },
            FlowEvent::Completed(confirmation),
        ]);
        drop(current);

        #[cfg(feature = "telemetry")]
        tracing::info!(
            attempt = attempt.id,
            tx = %confirmation.tx_hash,
            block = ?confirmation.block_number,
            elapsed_ms = elapsed.as_millis(),
            "{MESSAGE}"
        );
        self.dispatch();
        FlowOutcome::Completed(confirmation)
    }
}

impl<B, E> PaymentIntentFlow<B, E>
where
    B: IntentBackend + Sync,
    E: PaymentExecutor + Sync,
{
    /// Runs one ETH purchase to completion.
    ///
    /// The flow must be idle: after a completed or failed attempt, call
    /// [`Self::reset_flow`] and build a fresh request (deadlines are never
    /// extended). Calling this while an attempt is in flight, on this flow or
    /// on another flow sharing the registry for the same content and payer,
    /// is refused without touching state.
    pub async fn execute_eth_payment(&self, request: PaymentIntentRequest) -> FlowOutcome {
        let key = AttemptKey {
            content_id: request.content_id,
            payer: self.context.payer,
        };
        let (attempt, guard) = match self.begin(key) {
            Ok(started) => started,
            Err(reason) => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(content_id = %key.content_id, reason = ?reason, "Payment attempt refused");
                return FlowOutcome::Refused(reason);
            }
        };
        let scope = AttemptScope {
            flow: self,
            attempt: &attempt,
            _guard: guard,
        };

        #[cfg(feature = "telemetry")]
        tracing::info!(
            attempt = attempt.id,
            content_id = %request.content_id,
            creator = %request.creator,
            eth_amount = %request.eth_amount,
            deadline = %request.deadline,
            "Starting ETH payment"
        );

        let outcome = match self.run(&attempt, request).await {
            Ok(confirmation) => self.complete(&attempt, confirmation),
            Err(Interrupt::Cancelled) => FlowOutcome::Cancelled,
            Err(Interrupt::Failed(step, error)) => self.fail(&attempt, step, &error),
        };
        drop(scope);
        outcome
    }

    async fn run(
        &self,
        attempt: &Attempt,
        request: PaymentIntentRequest,
    ) -> Result<PaymentConfirmation, Interrupt> {
        request
            .validate(UnixTimestamp::now())
            .map_err(|e| Interrupt::Failed(Step::Idle, e.into()))?;

        self.transition(
            attempt,
            Step::CreatingIntent,
            PROGRESS_CREATING_INTENT,
            "Creating payment intent",
        )?;
        let receipt = self
            .suspend(
                attempt,
                Step::CreatingIntent,
                SuspensionPoint::CreateIntent,
                self.backend.create_intent(&self.context, &request),
                |e| FlowError::Backend(Box::new(e)),
            )
            .await?;

        self.transition(
            attempt,
            Step::WaitingSignature,
            PROGRESS_WAITING_SIGNATURE,
            "Waiting for payment authorization",
        )?;
        let authorization = self
            .suspend(
                attempt,
                Step::WaitingSignature,
                SuspensionPoint::FetchSignature,
                self.backend.fetch_signature(&receipt),
                |e| FlowError::Signature(Box::new(e)),
            )
            .await?;

        self.transition(
            attempt,
            Step::ExecutingPayment,
            PROGRESS_EXECUTING_PAYMENT,
            "Submitting payment",
        )?;
        let deadline = effective_deadline(&request, &receipt);
        if deadline.has_passed(UnixTimestamp::now()) {
            return Err(Interrupt::Failed(
                Step::ExecutingPayment,
                FlowError::DeadlineExpired(deadline),
            ));
        }
        let execution = ExecutionRequest {
            request,
            intent_id: receipt.intent_id,
            signature: authorization.signature,
        };
        let pending = self
            .suspend(
                attempt,
                Step::ExecutingPayment,
                SuspensionPoint::Submit,
                self.executor.submit(&self.context, &execution),
                |e| FlowError::Execution(Box::new(e)),
            )
            .await?;

        self.record_broadcast(attempt, pending.tx_hash)?;
        self.suspend(
            attempt,
            Step::ExecutingPayment,
            SuspensionPoint::Confirm,
            self.executor.confirm(&pending),
            |e| FlowError::Execution(Box::new(e)),
        )
        .await
    }
}

/// The earlier of the request deadline and the backend's intent expiry.
fn effective_deadline(request: &PaymentIntentRequest, receipt: &IntentReceipt) -> UnixTimestamp {
    receipt
        .expires_at
        .map_or(request.deadline, |expiry| expiry.min(request.deadline))
}

/// Clears the attempt slot if the `execute_eth_payment` future is dropped
/// mid-flight, tells observers the flow is idle again, and releases the
/// registry claim.
struct AttemptScope<'a, B, E> {
    flow: &'a PaymentIntentFlow<B, E>,
    attempt: &'a Attempt,
    _guard: Option<AttemptGuard>,
}

impl<B, E> Drop for AttemptScope<'_, B, E> {
    fn drop(&mut self) {
        let mut current = self.flow.lock_current();
        if current.as_ref().map(|a| a.id) != Some(self.attempt.id) {
            return;
        }
        current.take();
        self.attempt.token.cancel();
        self.flow.state.send_replace(FlowState::idle());
        self.flow.enqueue([FlowEvent::Reset]);
        drop(current);
        #[cfg(feature = "telemetry")]
        tracing::warn!(attempt = self.attempt.id, "Payment attempt abandoned");
        self.flow.dispatch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{IntentSignature, PendingPayment};
    use crate::observer::{ChannelObserver, FlowEvent};
    use crate::request::Metadata;
    use crate::state::FailureKind;
    use alloy_primitives::{B128, Bytes, U256, address, b256};
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, OnceLock, Weak};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    const TX: TxHash = b256!("00000000000000000000000000000000000000000000000000000000000000ab");

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct FakeError(&'static str);

    #[derive(Debug, Default)]
    struct ScriptedBackend {
        fail_intent: bool,
        fail_signature: bool,
        hang_signature: bool,
        expires_at: Option<UnixTimestamp>,
        intent_calls: AtomicUsize,
        signature_calls: AtomicUsize,
    }

    impl IntentBackend for ScriptedBackend {
        type Error = FakeError;

        async fn create_intent(
            &self,
            _context: &FlowContext,
            _request: &PaymentIntentRequest,
        ) -> Result<IntentReceipt, FakeError> {
            self.intent_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_intent {
                return Err(FakeError("backend unavailable"));
            }
            Ok(IntentReceipt {
                intent_id: B128::repeat_byte(0x11),
                expires_at: self.expires_at,
            })
        }

        async fn fetch_signature(&self, _receipt: &IntentReceipt) -> Result<IntentSignature, FakeError> {
            self.signature_calls.fetch_add(1, Ordering::SeqCst);
            if self.hang_signature {
                std::future::pending::<()>().await;
            }
            if self.fail_signature {
                return Err(FakeError("network error"));
            }
            Ok(IntentSignature {
                signature: Bytes::from_static(&[0xde, 0xad]),
                signer: None,
            })
        }
    }

    #[derive(Debug, Default)]
    struct ScriptedExecutor {
        revert: bool,
        submit_calls: AtomicUsize,
        confirm_calls: AtomicUsize,
    }

    impl PaymentExecutor for ScriptedExecutor {
        type Error = FakeError;

        async fn submit(
            &self,
            _context: &FlowContext,
            execution: &ExecutionRequest,
        ) -> Result<PendingPayment, FakeError> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            Ok(PendingPayment {
                intent_id: execution.intent_id,
                tx_hash: TX,
            })
        }

        async fn confirm(&self, pending: &PendingPayment) -> Result<PaymentConfirmation, FakeError> {
            self.confirm_calls.fetch_add(1, Ordering::SeqCst);
            if self.revert {
                return Err(FakeError("execution reverted"));
            }
            Ok(PaymentConfirmation {
                intent_id: pending.intent_id,
                tx_hash: pending.tx_hash,
                block_number: Some(42),
            })
        }
    }

    /// Records the step seen at every progress notification.
    struct StepRecorder {
        state: watch::Receiver<FlowState>,
        seen: Mutex<Vec<(Step, u8)>>,
    }

    impl FlowObserver for StepRecorder {
        fn on_progress(&self, progress: u8, _message: &str) {
            let step = self.state.borrow().step;
            self.seen.lock().unwrap().push((step, progress));
        }
    }

    type TestFlow = PaymentIntentFlow<ScriptedBackend, ScriptedExecutor>;

    /// Resets the flow it observes once progress reaches `at`.
    struct ResetAt {
        at: u8,
        flow: OnceLock<Weak<TestFlow>>,
    }

    impl FlowObserver for ResetAt {
        fn on_progress(&self, progress: u8, _message: &str) {
            if progress != self.at {
                return;
            }
            if let Some(flow) = self.flow.get().and_then(Weak::upgrade) {
                flow.reset_flow();
            }
        }
    }

    fn context() -> FlowContext {
        FlowContext {
            chain_id: 84532,
            payer: address!("00000000000000000000000000000000000000aa"),
        }
    }

    fn valid_request() -> PaymentIntentRequest {
        PaymentIntentRequest {
            content_id: U256::from(7),
            creator: address!("00000000000000000000000000000000000000c0"),
            eth_amount: U256::from(400_000_000_000_000u64),
            max_slippage_bps: 200,
            deadline: UnixTimestamp::now() + 3600,
            metadata: Metadata::new(),
        }
    }

    fn flow_with(
        backend: ScriptedBackend,
        executor: ScriptedExecutor,
    ) -> (TestFlow, UnboundedReceiver<FlowEvent>) {
        let (observer, events) = ChannelObserver::new();
        let flow = PaymentIntentFlow::new(backend, executor, context()).with_observer(observer);
        (flow, events)
    }

    fn drain(events: &mut UnboundedReceiver<FlowEvent>) -> Vec<FlowEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn count_failures(events: &[FlowEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, FlowEvent::Failed(_)))
            .count()
    }

    #[tokio::test]
    async fn test_happy_path_visits_steps_in_order() {
        let (mut flow, mut events) =
            flow_with(ScriptedBackend::default(), ScriptedExecutor::default());
        let recorder = Arc::new(StepRecorder {
            state: flow.subscribe(),
            seen: Mutex::new(Vec::new()),
        });
        flow.add_observer(Arc::clone(&recorder));

        let outcome = flow.execute_eth_payment(valid_request()).await;

        assert!(outcome.is_completed());
        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (Step::CreatingIntent, 10),
                (Step::WaitingSignature, 25),
                (Step::ExecutingPayment, 50),
                (Step::ExecutingPayment, 85),
                (Step::Completed, 100),
            ]
        );

        let state = flow.state();
        assert_eq!(state.step, Step::Completed);
        assert_eq!(state.progress, 100);
        assert!(!state.is_active);
        assert!(state.error.is_none());
        assert_eq!(state.transaction, Some(TX));
        assert_eq!(state.estimated_remaining, Some(Duration::ZERO));

        let events = drain(&mut events);
        let completions = events
            .iter()
            .filter(|e| matches!(e, FlowEvent::Completed(_)))
            .count();
        assert_eq!(completions, 1);
        assert_eq!(count_failures(&events), 0);
    }

    #[tokio::test]
    async fn test_expired_deadline_fails_without_network_calls() {
        let (flow, mut events) = flow_with(ScriptedBackend::default(), ScriptedExecutor::default());
        let mut request = valid_request();
        request.deadline = UnixTimestamp::now();

        let outcome = flow.execute_eth_payment(request).await;

        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Validation);
        assert_eq!(failure.step, Step::Idle);
        assert_eq!(flow.backend().intent_calls.load(Ordering::SeqCst), 0);
        assert_eq!(flow.executor().submit_calls.load(Ordering::SeqCst), 0);
        let state = flow.state();
        assert_eq!(state.step, Step::Error);
        assert_eq!(state.progress, 0);
        assert_eq!(count_failures(&drain(&mut events)), 1);
    }

    #[tokio::test]
    async fn test_zero_amount_fails_validation() {
        let (flow, _events) = flow_with(ScriptedBackend::default(), ScriptedExecutor::default());
        let mut request = valid_request();
        request.eth_amount = U256::ZERO;

        flow.execute_eth_payment(request).await;

        let state = flow.state();
        assert_eq!(state.step, Step::Error);
        assert_eq!(state.progress, 0);
        assert!(!state.is_active);
        let error = state.error.unwrap();
        assert_eq!(error.kind, FailureKind::Validation);
        assert!(error.message.contains("invalid amount"));
    }

    #[tokio::test]
    async fn test_signature_failure_stops_at_waiting_signature() {
        let backend = ScriptedBackend {
            fail_signature: true,
            ..Default::default()
        };
        let (flow, mut events) = flow_with(backend, ScriptedExecutor::default());

        let outcome = flow.execute_eth_payment(valid_request()).await;

        let failure = outcome.failure().unwrap().clone();
        assert_eq!(failure.step, Step::WaitingSignature);
        assert_eq!(failure.kind, FailureKind::Signature);
        assert!(failure.message.contains("network error"));

        let state = flow.state();
        assert_eq!(state.step, Step::Error);
        assert_eq!(state.progress, PROGRESS_WAITING_SIGNATURE);
        assert_eq!(state.error, Some(failure));
        assert_eq!(flow.executor().submit_calls.load(Ordering::SeqCst), 0);
        assert_eq!(count_failures(&drain(&mut events)), 1);
    }

    #[tokio::test]
    async fn test_intent_failure_reports_backend_kind() {
        let backend = ScriptedBackend {
            fail_intent: true,
            ..Default::default()
        };
        let (flow, _events) = flow_with(backend, ScriptedExecutor::default());

        let outcome = flow.execute_eth_payment(valid_request()).await;

        let failure = outcome.failure().unwrap();
        assert_eq!(failure.step, Step::CreatingIntent);
        assert_eq!(failure.kind, FailureKind::Backend);
        assert_eq!(flow.state().progress, PROGRESS_CREATING_INTENT);
        assert_eq!(flow.backend().signature_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_revert_keeps_transaction_and_progress() {
        let executor = ScriptedExecutor {
            revert: true,
            ..Default::default()
        };
        let (flow, _events) = flow_with(ScriptedBackend::default(), executor);

        let outcome = flow.execute_eth_payment(valid_request()).await;

        assert_eq!(outcome.failure().unwrap().kind, FailureKind::Execution);
        let state = flow.state();
        assert_eq!(state.progress, PROGRESS_AWAITING_CONFIRMATION);
        assert_eq!(state.transaction, Some(TX));
    }

    #[tokio::test]
    async fn test_expired_intent_is_not_executed() {
        let backend = ScriptedBackend {
            expires_at: Some(UnixTimestamp::from_secs(1)),
            ..Default::default()
        };
        let (flow, _events) = flow_with(backend, ScriptedExecutor::default());

        let outcome = flow.execute_eth_payment(valid_request()).await;

        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::DeadlineExpired);
        assert_eq!(failure.step, Step::ExecutingPayment);
        assert_eq!(flow.executor().submit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reset_restores_idle_and_allows_fresh_run() {
        let backend = ScriptedBackend {
            fail_signature: true,
            ..Default::default()
        };
        let (flow, mut events) = flow_with(backend, ScriptedExecutor::default());
        flow.execute_eth_payment(valid_request()).await;
        assert_eq!(flow.state().step, Step::Error);

        flow.reset_flow();
        assert_eq!(flow.state(), FlowState::idle());
        assert!(drain(&mut events).contains(&FlowEvent::Reset));

        // Same scripted failure, but the new attempt starts from zero.
        let outcome = flow.execute_eth_payment(valid_request()).await;
        assert_eq!(outcome.failure().unwrap().step, Step::WaitingSignature);
        assert_eq!(count_failures(&drain(&mut events)), 1);
    }

    #[tokio::test]
    async fn test_retry_after_reset_is_independent() {
        let (flow, _events) = flow_with(ScriptedBackend::default(), ScriptedExecutor::default());
        let mut bad = valid_request();
        bad.eth_amount = U256::ZERO;
        flow.execute_eth_payment(bad).await;
        flow.reset_flow();

        let outcome = flow.execute_eth_payment(valid_request()).await;

        assert!(outcome.is_completed());
        let state = flow.state();
        assert!(state.error.is_none());
        assert_eq!(state.progress, 100);
    }

    #[tokio::test]
    async fn test_terminal_state_requires_reset() {
        let (flow, _events) = flow_with(ScriptedBackend::default(), ScriptedExecutor::default());
        assert!(flow.execute_eth_payment(valid_request()).await.is_completed());

        let outcome = flow.execute_eth_payment(valid_request()).await;

        assert_eq!(
            outcome,
            FlowOutcome::Refused(RefusalReason::NotReset(Step::Completed))
        );
        assert_eq!(flow.backend().intent_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reset_cancels_in_flight_attempt() {
        let backend = ScriptedBackend {
            hang_signature: true,
            ..Default::default()
        };
        let (flow, _events) = flow_with(backend, ScriptedExecutor::default());
        let flow = Arc::new(flow);
        let mut rx = flow.subscribe();

        let running = Arc::clone(&flow);
        let handle = tokio::spawn(async move { running.execute_eth_payment(valid_request()).await });
        rx.wait_for(|s| s.step == Step::WaitingSignature).await.unwrap();

        assert_eq!(
            flow.execute_eth_payment(valid_request()).await,
            FlowOutcome::Refused(RefusalReason::InProgress)
        );

        flow.reset_flow();
        let outcome = handle.await.unwrap();

        assert_eq!(outcome, FlowOutcome::Cancelled);
        assert_eq!(flow.state(), FlowState::idle());
        assert!(!flow.is_active());
        assert_eq!(flow.executor().submit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signature_timeout() {
        let backend = ScriptedBackend {
            hang_signature: true,
            ..Default::default()
        };
        let config = FlowConfig {
            signature_timeout_secs: 5,
            ..FlowConfig::default()
        };
        let (flow, _events) = flow_with(backend, ScriptedExecutor::default());
        let flow = flow.with_config(config);

        let outcome = flow.execute_eth_payment(valid_request()).await;

        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert_eq!(failure.step, Step::WaitingSignature);
        assert_eq!(flow.state().progress, PROGRESS_WAITING_SIGNATURE);
    }

    #[tokio::test]
    async fn test_registry_refuses_duplicate_attempt_across_flows() {
        let registry = AttemptRegistry::new();
        let hanging = ScriptedBackend {
            hang_signature: true,
            ..Default::default()
        };
        let first = Arc::new(
            PaymentIntentFlow::new(hanging, ScriptedExecutor::default(), context())
                .with_registry(registry.clone()),
        );
        let second = PaymentIntentFlow::new(
            ScriptedBackend::default(),
            ScriptedExecutor::default(),
            context(),
        )
        .with_registry(registry.clone());

        let mut rx = first.subscribe();
        let running = Arc::clone(&first);
        let handle = tokio::spawn(async move { running.execute_eth_payment(valid_request()).await });
        rx.wait_for(|s| s.is_active).await.unwrap();

        assert_eq!(
            second.execute_eth_payment(valid_request()).await,
            FlowOutcome::Refused(RefusalReason::DuplicateAttempt)
        );
        assert_eq!(second.state(), FlowState::idle());

        first.reset_flow();
        assert_eq!(handle.await.unwrap(), FlowOutcome::Cancelled);
        assert!(registry.is_empty());
        assert!(second.execute_eth_payment(valid_request()).await.is_completed());
    }

    #[tokio::test]
    async fn test_dropped_attempt_frees_flow() {
        let backend = ScriptedBackend {
            hang_signature: true,
            ..Default::default()
        };
        let (flow, mut events) = flow_with(backend, ScriptedExecutor::default());

        let attempt = flow.execute_eth_payment(valid_request());
        let _ = tokio::time::timeout(Duration::from_millis(10), attempt).await;

        assert!(!flow.is_active());
        assert_eq!(flow.state(), FlowState::idle());
        let events = drain(&mut events);
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[1],
            FlowEvent::Progress {
                progress: PROGRESS_WAITING_SIGNATURE,
                message: "Waiting for payment authorization".into(),
            }
        );
        assert_eq!(events.last(), Some(&FlowEvent::Reset));
    }

    #[tokio::test]
    async fn test_reset_from_observer_is_delivered_last() {
        let resetter = Arc::new(ResetAt {
            at: PROGRESS_CREATING_INTENT,
            flow: OnceLock::new(),
        });
        let (observer, mut events) = ChannelObserver::new();
        let flow = Arc::new(
            PaymentIntentFlow::new(
                ScriptedBackend::default(),
                ScriptedExecutor::default(),
                context(),
            )
            .with_observer(Arc::clone(&resetter))
            .with_observer(observer),
        );
        resetter.flow.set(Arc::downgrade(&flow)).unwrap();

        let outcome = flow.execute_eth_payment(valid_request()).await;

        assert_eq!(outcome, FlowOutcome::Cancelled);
        assert_eq!(flow.state(), FlowState::idle());
        assert_eq!(
            drain(&mut events),
            vec![
                FlowEvent::Progress {
                    progress: PROGRESS_CREATING_INTENT,
                    message: "Creating payment intent".into(),
                },
                FlowEvent::Reset,
            ]
        );
        assert_eq!(flow.backend().intent_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reset_after_completion_keeps_completed_event() {
        let (flow, mut events) =
            flow_with(ScriptedBackend::default(), ScriptedExecutor::default());
        assert!(flow.execute_eth_payment(valid_request()).await.is_completed());

        flow.reset_flow();

        let events = drain(&mut events);
        assert!(matches!(events[events.len() - 2], FlowEvent::Completed(_)));
        assert_eq!(events.last(), Some(&FlowEvent::Reset));
    }
}
