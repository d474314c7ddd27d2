use super::classification::DependencyError;
use super::payment::{Amount, Currency, PaymentAttempt};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Result type of every call into an external dependency.
pub type DependencyResult<T> = std::result::Result<T, DependencyError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub intent_id: String,
    pub client_secret: String,
}

/// Status reported by the gateway when confirming an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    Succeeded,
    RequiresAction,
    Failed,
}

/// An extra step the customer must complete before the charge can proceed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredAction {
    /// Gateway action type, e.g. `"use_stripe_sdk"` or `"redirect_to_url"`.
    pub kind: String,
    pub redirect_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub status: ConfirmationStatus,
    pub next_action: Option<RequiredAction>,
    /// Populated when `status` is `Failed`.
    pub error: Option<DependencyError>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(
        &self,
        amount: Amount,
        currency: &Currency,
        idempotency_key: &str,
    ) -> DependencyResult<PaymentIntent>;

    async fn confirm(&self, intent_id: &str) -> DependencyResult<Confirmation>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn store(&self, attempt: PaymentAttempt) -> DependencyResult<()>;
    async fn get(&self, reference: &str) -> DependencyResult<Option<PaymentAttempt>>;
    async fn all(&self) -> DependencyResult<Vec<PaymentAttempt>>;
}

/// Gateways and stores are shared by every coordinator in the process.
pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;
pub type PaymentStoreRef = Arc<dyn PaymentStore>;
