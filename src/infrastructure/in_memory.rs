use crate::domain::payment::PaymentAttempt;
use crate::domain::ports::{DependencyResult, PaymentStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory store for payment attempts, keyed by reference.
///
/// Uses `Arc<RwLock<HashMap<String, PaymentAttempt>>>` to allow shared concurrent access.
/// Storing an attempt with an existing reference replaces it, so replayed writes
/// are harmless.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    attempts: Arc<RwLock<HashMap<String, PaymentAttempt>>>,
}

impl InMemoryPaymentStore {
    /// Creates a new, empty in-memory payment store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn store(&self, attempt: PaymentAttempt) -> DependencyResult<()> {
        let mut attempts = self.attempts.write().await;
        attempts.insert(attempt.reference.clone(), attempt);
        Ok(())
    }

    async fn get(&self, reference: &str) -> DependencyResult<Option<PaymentAttempt>> {
        let attempts = self.attempts.read().await;
        Ok(attempts.get(reference).cloned())
    }

    async fn all(&self) -> DependencyResult<Vec<PaymentAttempt>> {
        let attempts = self.attempts.read().await;
        let mut all: Vec<_> = attempts.values().cloned().collect();
        all.sort_by(|a, b| a.reference.cmp(&b.reference));
        Ok(all)
    }
}
