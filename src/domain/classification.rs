//! Retryable-vs-fatal classification of dependency errors.
//!
//! Classification only retries conditions known to be transient. An error whose
//! kind and code are both absent from the allow-lists is fatal, so validation
//! failures and declines are never replayed against the dependency.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Error kinds reported by payment gateways.
pub mod gateway_kinds {
    pub const API_CONNECTION: &str = "api_connection_error";
    pub const RATE_LIMIT: &str = "rate_limit_error";
    pub const IDEMPOTENCY: &str = "idempotency_error";
    pub const CARD_DECLINED: &str = "card_declined";
    pub const INVALID_REQUEST: &str = "invalid_request_error";
    pub const AUTHENTICATION: &str = "authentication_error";
}

/// Error kinds reported by data store drivers.
pub mod driver_kinds {
    pub const NETWORK: &str = "network_error";
    pub const SERVER_SELECTION: &str = "server_selection_error";
    pub const WRITE_CONFLICT: &str = "write_conflict";
    pub const VALIDATION: &str = "validation_error";
}

/// Socket-level codes that denote a connectivity problem.
pub const DEFAULT_CONNECTIVITY_CODES: &[&str] = &[
    "ETIMEDOUT",
    "ECONNREFUSED",
    "ECONNRESET",
    "EPIPE",
    "ENOTFOUND",
    "ECONNABORTED",
];

/// An error reported by an external dependency (data store driver or gateway).
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}{}: {message}", code_suffix(.code))]
pub struct DependencyError {
    pub kind: String,
    pub code: Option<String>,
    pub message: String,
}

impl DependencyError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_ref().map(|c| format!(" ({c})")).unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    Retryable,
    Fatal,
}

/// Allow-list classifier. Holds its lists as plain data so each dependency
/// can be given its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorClassifier {
    retryable_kinds: HashSet<String>,
    retryable_codes: HashSet<String>,
}

impl ErrorClassifier {
    pub fn new<K, C>(kinds: K, codes: C) -> Self
    where
        K: IntoIterator,
        K::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            retryable_kinds: kinds.into_iter().map(Into::into).collect(),
            retryable_codes: codes.into_iter().map(Into::into).collect(),
        }
    }

    /// Classifier for data store drivers: network and server-selection
    /// failures, plus the given connectivity codes.
    pub fn driver<C>(codes: C) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self::new(
            [driver_kinds::NETWORK, driver_kinds::SERVER_SELECTION],
            codes,
        )
    }

    /// Classifier for the payment gateway. Connection errors always retry;
    /// rate limits and idempotency-key conflicts only when enabled.
    pub fn gateway<C>(codes: C, retry_rate_limits: bool, retry_idempotency_conflicts: bool) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
    {
        let mut kinds = vec![gateway_kinds::API_CONNECTION];
        if retry_rate_limits {
            kinds.push(gateway_kinds::RATE_LIMIT);
        }
        if retry_idempotency_conflicts {
            kinds.push(gateway_kinds::IDEMPOTENCY);
        }
        Self::new(kinds, codes)
    }

    pub fn classify(&self, error: &DependencyError) -> ErrorClassification {
        let kind_match = self.retryable_kinds.contains(&error.kind);
        let code_match = error
            .code
            .as_ref()
            .is_some_and(|code| self.retryable_codes.contains(code));

        if kind_match || code_match {
            ErrorClassification::Retryable
        } else {
            ErrorClassification::Fatal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> ErrorClassifier {
        ErrorClassifier::driver(DEFAULT_CONNECTIVITY_CODES.iter().copied())
    }

    #[test]
    fn test_driver_network_errors_are_retryable() {
        let classifier = driver();
        let err = DependencyError::new(driver_kinds::NETWORK, "socket closed");
        assert_eq!(classifier.classify(&err), ErrorClassification::Retryable);

        let err = DependencyError::new("driver_error", "reset").with_code("ECONNRESET");
        assert_eq!(classifier.classify(&err), ErrorClassification::Retryable);
    }

    #[test]
    fn test_unknown_errors_are_fatal() {
        let classifier = driver();
        let err = DependencyError::new(driver_kinds::VALIDATION, "document failed validation");
        assert_eq!(classifier.classify(&err), ErrorClassification::Fatal);

        let err = DependencyError::new("driver_error", "disk corrupted").with_code("E11000");
        assert_eq!(classifier.classify(&err), ErrorClassification::Fatal);

        assert_eq!(
            ErrorClassifier::default().classify(&DependencyError::new(driver_kinds::NETWORK, "x")),
            ErrorClassification::Fatal
        );
    }

    #[test]
    fn test_gateway_rate_limit_is_configurable() {
        let rate_limited = DependencyError::new(gateway_kinds::RATE_LIMIT, "too many requests");
        let conflict = DependencyError::new(gateway_kinds::IDEMPOTENCY, "key reused");

        let strict = ErrorClassifier::gateway(Vec::<String>::new(), false, false);
        assert_eq!(strict.classify(&rate_limited), ErrorClassification::Fatal);
        assert_eq!(strict.classify(&conflict), ErrorClassification::Fatal);

        let lenient = ErrorClassifier::gateway(Vec::<String>::new(), true, true);
        assert_eq!(lenient.classify(&rate_limited), ErrorClassification::Retryable);
        assert_eq!(lenient.classify(&conflict), ErrorClassification::Retryable);
    }

    #[test]
    fn test_gateway_declines_are_fatal() {
        let classifier = ErrorClassifier::gateway(DEFAULT_CONNECTIVITY_CODES.iter().copied(), true, false);
        for kind in [
            gateway_kinds::CARD_DECLINED,
            gateway_kinds::INVALID_REQUEST,
            gateway_kinds::AUTHENTICATION,
        ] {
            let err = DependencyError::new(kind, "no");
            assert_eq!(classifier.classify(&err), ErrorClassification::Fatal, "{kind}");
        }
        let err = DependencyError::new(gateway_kinds::API_CONNECTION, "timeout");
        assert_eq!(classifier.classify(&err), ErrorClassification::Retryable);
    }

    #[test]
    fn test_dependency_error_display() {
        let err = DependencyError::new("driver_error", "reset").with_code("ECONNRESET");
        assert_eq!(err.to_string(), "driver_error (ECONNRESET): reset");
        let err = DependencyError::new("card_declined", "declined");
        assert_eq!(err.to_string(), "card_declined: declined");
    }
}
