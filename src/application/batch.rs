use crate::application::coordinator::{GENERIC_FAILURE_MESSAGE, PaymentCoordinator, PaymentOutcome};
use crate::application::retry::RetryExecutor;
use crate::domain::classification::ErrorClassifier;
use crate::domain::payment::{PaymentRequest, PaymentStatus};
use crate::domain::ports::{PaymentGatewayRef, PaymentStoreRef};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Final state of one payment driven by [`PaymentBatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettledPayment {
    pub reference: String,
    pub status: PaymentStatus,
    pub gateway_calls: u32,
    /// Customer-facing message, empty on success.
    pub message: String,
}

/// Runs many independent payments concurrently, one coordinator per payment.
///
/// Coordinators share the executor, classifiers and store but no mutable
/// state. When a payment asks for customer action the batch plays the
/// customer and resubmits, up to `max_actions` times.
pub struct PaymentBatch {
    executor: RetryExecutor,
    gateway_classifier: Arc<ErrorClassifier>,
    store: Option<(PaymentStoreRef, Arc<ErrorClassifier>)>,
    max_actions: u32,
}

impl PaymentBatch {
    pub fn new(executor: RetryExecutor, gateway_classifier: Arc<ErrorClassifier>) -> Self {
        Self {
            executor,
            gateway_classifier,
            store: None,
            max_actions: 1,
        }
    }

    pub fn with_store(mut self, store: PaymentStoreRef, classifier: Arc<ErrorClassifier>) -> Self {
        self.store = Some((store, classifier));
        self
    }

    pub fn with_max_actions(mut self, max_actions: u32) -> Self {
        self.max_actions = max_actions;
        self
    }

    /// Settles every payment and returns the results in input order, one per job.
    pub async fn run(&self, jobs: Vec<(PaymentRequest, PaymentGatewayRef)>) -> Vec<SettledPayment> {
        let mut coordinators = Vec::with_capacity(jobs.len());
        let mut tasks = JoinSet::new();
        for (index, (request, gateway)) in jobs.into_iter().enumerate() {
            let mut coordinator = PaymentCoordinator::new(
                request,
                gateway,
                self.executor.clone(),
                Arc::clone(&self.gateway_classifier),
            );
            if let Some((store, classifier)) = &self.store {
                coordinator = coordinator.with_store(Arc::clone(store), Arc::clone(classifier));
            }
            let coordinator = Arc::new(coordinator);
            coordinators.push(Arc::clone(&coordinator));
            let max_actions = self.max_actions;
            tasks.spawn(async move { (index, settle(&coordinator, max_actions).await) });
        }

        let mut settled: Vec<Option<SettledPayment>> = vec![None; coordinators.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, payment)) => settled[index] = Some(payment),
                Err(e) => tracing::error!(error = %e, "payment task failed"),
            }
        }

        settled
            .into_iter()
            .zip(coordinators)
            .map(|(payment, coordinator)| payment.unwrap_or_else(|| abandoned(&coordinator)))
            .collect()
    }
}

/// Result row for a payment whose task died before settling.
fn abandoned(coordinator: &PaymentCoordinator) -> SettledPayment {
    let attempt = coordinator.attempt();
    let status = match attempt.status() {
        status if status.is_terminal() => status,
        _ => PaymentStatus::Failed,
    };
    SettledPayment {
        reference: coordinator.reference().to_string(),
        status,
        gateway_calls: coordinator.gateway_calls(),
        message: GENERIC_FAILURE_MESSAGE.to_string(),
    }
}

async fn settle(coordinator: &PaymentCoordinator, max_actions: u32) -> SettledPayment {
    let mut actions_completed = 0;
    let message = loop {
        match coordinator.submit().await {
            Ok(PaymentOutcome::Succeeded(_)) => break String::new(),
            Ok(PaymentOutcome::Failed { message }) => break message,
            Ok(PaymentOutcome::Pending(action)) if actions_completed < max_actions => {
                tracing::debug!(
                    reference = %coordinator.reference(),
                    action = %action.kind,
                    "completing customer action"
                );
                actions_completed += 1;
            }
            Ok(PaymentOutcome::Pending(_)) => break "Awaiting customer action.".to_string(),
            Err(e) => break e.to_string(),
        }
    };

    SettledPayment {
        reference: coordinator.reference().to_string(),
        status: coordinator.attempt().status(),
        gateway_calls: coordinator.gateway_calls(),
        message,
    }
}
