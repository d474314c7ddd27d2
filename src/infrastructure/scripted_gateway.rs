use crate::domain::classification::{DependencyError, gateway_kinds};
use crate::domain::payment::{Amount, Currency};
use crate::domain::ports::{
    Confirmation, ConfirmationStatus, DependencyResult, PaymentGateway, PaymentIntent,
    RequiredAction,
};
use crate::error::PaymentError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// One scripted gateway response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStep {
    Succeeded,
    RequiresAction,
    Declined,
    ConnectionReset,
    Timeout,
    RateLimited,
    InvalidRequest,
    IdempotencyConflict,
}

impl FromStr for GatewayStep {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "succeeded" | "ok" => Ok(GatewayStep::Succeeded),
            "requires_action" | "3ds" => Ok(GatewayStep::RequiresAction),
            "declined" => Ok(GatewayStep::Declined),
            "reset" => Ok(GatewayStep::ConnectionReset),
            "timeout" => Ok(GatewayStep::Timeout),
            "rate_limit" => Ok(GatewayStep::RateLimited),
            "invalid" => Ok(GatewayStep::InvalidRequest),
            "conflict" => Ok(GatewayStep::IdempotencyConflict),
            other => Err(PaymentError::ValidationError(format!(
                "Unknown gateway step: {other:?}"
            ))),
        }
    }
}

/// Parses a `;`-separated script such as `"reset;reset;succeeded"`.
/// An empty script is valid and means every call succeeds.
pub fn parse_script(script: &str) -> Result<Vec<GatewayStep>, PaymentError> {
    script
        .split(';')
        .filter(|step| !step.trim().is_empty())
        .map(str::parse)
        .collect()
}

impl GatewayStep {
    /// The error a failing step produces, or `None` for steps the gateway answers.
    fn transport_error(self) -> Option<DependencyError> {
        match self {
            GatewayStep::ConnectionReset => Some(
                DependencyError::new(gateway_kinds::API_CONNECTION, "connection reset by peer")
                    .with_code("ECONNRESET"),
            ),
            GatewayStep::Timeout => Some(
                DependencyError::new(gateway_kinds::API_CONNECTION, "request timed out")
                    .with_code("ETIMEDOUT"),
            ),
            GatewayStep::RateLimited => Some(DependencyError::new(
                gateway_kinds::RATE_LIMIT,
                "too many requests",
            )),
            GatewayStep::InvalidRequest => Some(DependencyError::new(
                gateway_kinds::INVALID_REQUEST,
                "missing payment method",
            )),
            GatewayStep::IdempotencyConflict => Some(DependencyError::new(
                gateway_kinds::IDEMPOTENCY,
                "idempotency key in use by a concurrent request",
            )),
            GatewayStep::Succeeded | GatewayStep::RequiresAction | GatewayStep::Declined => None,
        }
    }
}

#[derive(Default)]
struct GatewayState {
    create_script: VecDeque<GatewayStep>,
    confirm_script: VecDeque<GatewayStep>,
    intents_by_key: HashMap<String, PaymentIntent>,
}

/// An in-process gateway that answers from a script.
///
/// `confirm` consumes one step per call; once the script runs out every call
/// succeeds. `create_intent` honours idempotency keys: replaying a key returns
/// the intent created by the first successful call.
#[derive(Default)]
pub struct ScriptedGateway {
    state: Mutex<GatewayState>,
    latency: Duration,
    create_calls: AtomicU32,
    confirm_calls: AtomicU32,
}

impl ScriptedGateway {
    pub fn new(confirm_script: impl IntoIterator<Item = GatewayStep>) -> Self {
        Self {
            state: Mutex::new(GatewayState {
                confirm_script: confirm_script.into_iter().collect(),
                ..GatewayState::default()
            }),
            ..Self::default()
        }
    }

    /// Steps consumed by `create_intent`. Only failure steps are meaningful here;
    /// any other step lets the call through.
    pub fn with_create_script(mut self, steps: impl IntoIterator<Item = GatewayStep>) -> Self {
        self.state.get_mut().create_script = steps.into_iter().collect();
        self
    }

    /// Delay applied to every call, so tests can overlap requests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn confirm_calls(&self) -> u32 {
        self.confirm_calls.load(Ordering::SeqCst)
    }

    pub async fn intents_created(&self) -> usize {
        self.state.lock().await.intents_by_key.len()
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_intent(
        &self,
        amount: Amount,
        currency: &Currency,
        idempotency_key: &str,
    ) -> DependencyResult<PaymentIntent> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let mut state = self.state.lock().await;
        if let Some(error) = state
            .create_script
            .pop_front()
            .and_then(GatewayStep::transport_error)
        {
            return Err(error);
        }

        let next_id = state.intents_by_key.len() + 1;
        let intent = state
            .intents_by_key
            .entry(idempotency_key.to_string())
            .or_insert_with(|| {
                tracing::debug!(%amount, %currency, idempotency_key, "created payment intent");
                let intent_id = format!("pi_{next_id:06}");
                PaymentIntent {
                    client_secret: format!("{intent_id}_secret"),
                    intent_id,
                }
            });
        Ok(intent.clone())
    }

    async fn confirm(&self, intent_id: &str) -> DependencyResult<Confirmation> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let step = self
            .state
            .lock()
            .await
            .confirm_script
            .pop_front()
            .unwrap_or(GatewayStep::Succeeded);
        if let Some(error) = step.transport_error() {
            return Err(error);
        }

        let confirmation = match step {
            GatewayStep::RequiresAction => Confirmation {
                status: ConfirmationStatus::RequiresAction,
                next_action: Some(RequiredAction {
                    kind: "redirect_to_url".to_string(),
                    redirect_url: Some(format!("https://gateway.invalid/3ds/{intent_id}")),
                }),
                error: None,
            },
            GatewayStep::Declined => Confirmation {
                status: ConfirmationStatus::Failed,
                next_action: None,
                error: Some(
                    DependencyError::new(gateway_kinds::CARD_DECLINED, "Your card was declined.")
                        .with_code("insufficient_funds"),
                ),
            },
            _ => Confirmation {
                status: ConfirmationStatus::Succeeded,
                next_action: None,
                error: None,
            },
        };
        Ok(confirmation)
    }
}
