use crate::application::retry::{RetryError, RetryExecutor};
use crate::domain::classification::{DependencyError, ErrorClassifier, gateway_kinds};
use crate::domain::payment::{PaymentAttempt, PaymentRequest, PaymentStatus};
use crate::domain::ports::{
    Confirmation, ConfirmationStatus, PaymentGatewayRef, PaymentIntent, PaymentStoreRef,
    RequiredAction,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub const DECLINED_MESSAGE: &str =
    "Your payment was declined. Please try a different payment method.";
pub const UNAVAILABLE_MESSAGE: &str =
    "We couldn't reach the payment provider. Please try again in a few minutes.";
pub const GENERIC_FAILURE_MESSAGE: &str = "Your payment could not be processed.";

/// What the UI layer receives from a submission. Dependency failures are always
/// folded into `Failed` with a message that is safe to show to the customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Succeeded(PaymentAttempt),
    Pending(RequiredAction),
    Failed { message: String },
}

/// A submission the coordinator refused to run to completion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("payment {reference} already has a submission in flight")]
    ConcurrentSubmission { reference: String },
    #[error("payment {reference} cancelled after {attempts} gateway attempt(s)")]
    Cancelled { reference: String, attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorPhase {
    Idle,
    Submitting,
    AwaitingAction,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
enum State {
    Idle,
    Submitting,
    AwaitingAction(RequiredAction),
    Succeeded(PaymentAttempt),
    Failed { message: String },
}

impl State {
    fn phase(&self) -> CoordinatorPhase {
        match self {
            State::Idle => CoordinatorPhase::Idle,
            State::Submitting => CoordinatorPhase::Submitting,
            State::AwaitingAction(_) => CoordinatorPhase::AwaitingAction,
            State::Succeeded(_) => CoordinatorPhase::Succeeded,
            State::Failed { .. } => CoordinatorPhase::Failed,
        }
    }
}

struct Inner {
    state: State,
    attempt: PaymentAttempt,
}

impl Inner {
    fn advance(&mut self, status: PaymentStatus) {
        if let Err(e) = self.attempt.transition(status) {
            tracing::error!(reference = %self.attempt.reference, error = %e, "rejected payment status change");
        }
    }

    /// Puts back the phase held before a submission that did not complete.
    fn restore(&mut self, prior: State) {
        let status = match prior {
            State::AwaitingAction(_) => PaymentStatus::RequiresAction,
            _ => PaymentStatus::Created,
        };
        self.state = prior;
        self.advance(status);
    }

    fn fail(&mut self, message: &str) -> PaymentOutcome {
        self.advance(PaymentStatus::Failed);
        self.state = State::Failed {
            message: message.to_string(),
        };
        PaymentOutcome::Failed {
            message: message.to_string(),
        }
    }

    fn terminal_attempt(&self) -> Option<PaymentAttempt> {
        match &self.state {
            State::Succeeded(_) | State::Failed { .. } => Some(self.attempt.clone()),
            _ => None,
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds the phase that preceded an in-flight submission. If the submission
/// future is dropped before it settles (a caller timeout, a losing `select!`
/// branch, an aborted task), the prior phase is restored on drop.
struct InFlight<'a> {
    inner: &'a Mutex<Inner>,
    reference: &'a str,
    prior: Option<State>,
}

impl InFlight<'_> {
    fn disarm(mut self) -> State {
        self.prior.take().unwrap_or(State::Idle)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(prior) = self.prior.take() {
            lock(self.inner).restore(prior);
            tracing::info!(reference = %self.reference, "payment submission abandoned");
        }
    }
}

/// Drives a single payment attempt against the gateway.
///
/// Each coordinator owns exactly one [`PaymentAttempt`] and allows one
/// submission in flight at a time. Gateway calls go through the
/// [`RetryExecutor`]; the coordinator's own state is never retried. Once the
/// attempt succeeds or fails, every further `submit` returns the cached
/// outcome without touching the gateway.
///
/// The state lock is never held across an `.await`.
pub struct PaymentCoordinator {
    request: PaymentRequest,
    gateway: PaymentGatewayRef,
    executor: RetryExecutor,
    gateway_classifier: Arc<ErrorClassifier>,
    store: Option<(PaymentStoreRef, Arc<ErrorClassifier>)>,
    gateway_calls: AtomicU32,
    inner: Mutex<Inner>,
}

impl PaymentCoordinator {
    /// Creates a coordinator in the `Idle` phase.
    ///
    /// # Arguments
    ///
    /// * `request` - The charge to make.
    /// * `gateway` - The payment gateway, usually shared with other coordinators.
    /// * `executor` - Retry policy applied to every gateway and store call.
    /// * `gateway_classifier` - Decides which gateway errors are worth retrying.
    pub fn new(
        request: PaymentRequest,
        gateway: PaymentGatewayRef,
        executor: RetryExecutor,
        gateway_classifier: Arc<ErrorClassifier>,
    ) -> Self {
        let attempt = PaymentAttempt::new(&request);
        Self {
            request,
            gateway,
            executor,
            gateway_classifier,
            store: None,
            gateway_calls: AtomicU32::new(0),
            inner: Mutex::new(Inner {
                state: State::Idle,
                attempt,
            }),
        }
    }

    /// Persists the attempt to `store` once it reaches a terminal status.
    pub fn with_store(mut self, store: PaymentStoreRef, classifier: Arc<ErrorClassifier>) -> Self {
        self.store = Some((store, classifier));
        self
    }

    pub fn reference(&self) -> &str {
        &self.request.reference
    }

    pub fn phase(&self) -> CoordinatorPhase {
        lock(&self.inner).state.phase()
    }

    pub fn attempt(&self) -> PaymentAttempt {
        lock(&self.inner).attempt.clone()
    }

    /// Number of gateway calls made so far, retries included.
    pub fn gateway_calls(&self) -> u32 {
        self.gateway_calls.load(Ordering::SeqCst)
    }

    pub async fn submit(&self) -> Result<PaymentOutcome, CoordinatorError> {
        self.submit_cancellable(&CancellationToken::new()).await
    }

    /// Submits the payment. Valid from `Idle` (creates and confirms the intent)
    /// or `AwaitingAction` (confirms the existing intent after the customer has
    /// completed the required step).
    ///
    /// Cancelling `cancel` during a backoff wait returns
    /// [`CoordinatorError::Cancelled`] and restores the phase held before the
    /// call. Dropping the returned future does the same.
    pub async fn submit_cancellable(
        &self,
        cancel: &CancellationToken,
    ) -> Result<PaymentOutcome, CoordinatorError> {
        let (in_flight, intent_id) = {
            let mut inner = lock(&self.inner);
            match &inner.state {
                State::Succeeded(attempt) => {
                    tracing::debug!(reference = %self.reference(), "payment already succeeded");
                    return Ok(PaymentOutcome::Succeeded(attempt.clone()));
                }
                State::Failed { message } => {
                    return Ok(PaymentOutcome::Failed {
                        message: message.clone(),
                    });
                }
                State::Submitting => {
                    tracing::warn!(reference = %self.reference(), "rejected concurrent submission");
                    return Err(CoordinatorError::ConcurrentSubmission {
                        reference: self.request.reference.clone(),
                    });
                }
                State::Idle | State::AwaitingAction(_) => {}
            }
            let prior = std::mem::replace(&mut inner.state, State::Submitting);
            inner.advance(PaymentStatus::Processing);
            let in_flight = InFlight {
                inner: &self.inner,
                reference: self.reference(),
                prior: Some(prior),
            };
            (in_flight, inner.attempt.intent_id.clone())
        };

        let result = self.confirm_with_gateway(intent_id, cancel).await;
        self.settle(in_flight.disarm(), result).await
    }

    async fn confirm_with_gateway(
        &self,
        intent_id: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<Confirmation, RetryError<DependencyError>> {
        let intent_id = match intent_id {
            Some(id) => id,
            None => {
                let intent = self.create_intent(cancel).await?;
                lock(&self.inner).attempt.intent_id = Some(intent.intent_id.clone());
                intent.intent_id
            }
        };

        let gateway = &self.gateway;
        let calls = &self.gateway_calls;
        let intent_id = intent_id.as_str();
        self.executor
            .execute_cancellable(
                move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    gateway.confirm(intent_id)
                },
                |e| self.gateway_classifier.classify(e),
                cancel,
            )
            .await
    }

    async fn create_intent(
        &self,
        cancel: &CancellationToken,
    ) -> Result<PaymentIntent, RetryError<DependencyError>> {
        let gateway = &self.gateway;
        let calls = &self.gateway_calls;
        let amount = self.request.amount;
        let currency = &self.request.currency;
        let key = self.request.idempotency_key();
        let key = key.as_str();
        self.executor
            .execute_cancellable(
                move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    gateway.create_intent(amount, currency, key)
                },
                |e| self.gateway_classifier.classify(e),
                cancel,
            )
            .await
    }

    async fn settle(
        &self,
        prior: State,
        result: Result<Confirmation, RetryError<DependencyError>>,
    ) -> Result<PaymentOutcome, CoordinatorError> {
        let (outcome, finalized) = {
            let mut inner = lock(&self.inner);
            let outcome = match result {
                Ok(confirmation) => self.apply_confirmation(&mut inner, confirmation),
                Err(RetryError::Cancelled { attempts }) => {
                    inner.restore(prior);
                    tracing::info!(reference = %self.reference(), attempts, "payment submission cancelled");
                    return Err(CoordinatorError::Cancelled {
                        reference: self.request.reference.clone(),
                        attempts,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        reference = %self.reference(),
                        attempts = err.attempts(),
                        exhausted = err.is_exhausted(),
                        error = %err,
                        "payment failed"
                    );
                    inner.fail(failure_message(&err))
                }
            };
            (outcome, inner.terminal_attempt())
        };

        if let Some(attempt) = finalized {
            self.persist(attempt).await;
        }
        Ok(outcome)
    }

    fn apply_confirmation(&self, inner: &mut Inner, confirmation: Confirmation) -> PaymentOutcome {
        match confirmation.status {
            ConfirmationStatus::Succeeded => {
                inner.advance(PaymentStatus::Succeeded);
                inner.state = State::Succeeded(inner.attempt.clone());
                tracing::info!(
                    reference = %self.reference(),
                    intent_id = inner.attempt.intent_id.as_deref().unwrap_or_default(),
                    "payment succeeded"
                );
                PaymentOutcome::Succeeded(inner.attempt.clone())
            }
            ConfirmationStatus::RequiresAction => {
                let action = confirmation.next_action.unwrap_or_else(|| RequiredAction {
                    kind: "requires_action".to_string(),
                    redirect_url: None,
                });
                inner.advance(PaymentStatus::RequiresAction);
                inner.state = State::AwaitingAction(action.clone());
                tracing::info!(reference = %self.reference(), action = %action.kind, "payment requires customer action");
                PaymentOutcome::Pending(action)
            }
            ConfirmationStatus::Failed => {
                let message = match &confirmation.error {
                    Some(error) => {
                        tracing::warn!(reference = %self.reference(), %error, "gateway reported failed payment");
                        message_for(error)
                    }
                    None => {
                        tracing::warn!(reference = %self.reference(), "gateway reported failed payment without detail");
                        GENERIC_FAILURE_MESSAGE
                    }
                };
                inner.fail(message)
            }
        }
    }

    /// Records a terminal attempt. The charge outcome is already decided, so a
    /// store failure is logged and never changes what the caller sees.
    async fn persist(&self, attempt: PaymentAttempt) {
        let Some((store, classifier)) = &self.store else {
            return;
        };
        let reference = attempt.reference.clone();
        let result = self
            .executor
            .execute(
                move || store.store(attempt.clone()),
                |e| classifier.classify(e),
            )
            .await;
        if let Err(err) = result {
            tracing::error!(%reference, error = %err, "failed to persist payment attempt");
        }
    }
}

fn message_for(error: &DependencyError) -> &'static str {
    if error.kind == gateway_kinds::CARD_DECLINED {
        DECLINED_MESSAGE
    } else {
        GENERIC_FAILURE_MESSAGE
    }
}

fn failure_message(err: &RetryError<DependencyError>) -> &'static str {
    match err {
        RetryError::Exhausted { .. } => UNAVAILABLE_MESSAGE,
        RetryError::Fatal { error, .. } => message_for(error),
        RetryError::Cancelled { .. } => GENERIC_FAILURE_MESSAGE,
    }
}
