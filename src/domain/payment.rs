use crate::error::PaymentError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A positive amount expressed in minor currency units (e.g. cents).
///
/// The gateway never sees fractional values, so the amount is an integer count
/// rather than a decimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Amount(u64);

impl Amount {
    pub fn new(minor_units: u64) -> Result<Self, PaymentError> {
        if minor_units > 0 {
            Ok(Self(minor_units))
        } else {
            Err(PaymentError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn minor_units(&self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for Amount {
    type Error = PaymentError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for u64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A three-letter ISO 4217 currency code, stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Validates and normalizes a currency code. `"EUR"` and `" eur "` both become `"eur"`.
    pub fn new(code: &str) -> Result<Self, PaymentError> {
        let code = code.trim().to_ascii_lowercase();
        if code.len() == 3 && code.bytes().all(|b| b.is_ascii_lowercase()) {
            Ok(Self(code))
        } else {
            Err(PaymentError::ValidationError(format!(
                "Invalid currency code: {code:?}"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = PaymentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Created,
    Processing,
    RequiresAction,
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Succeeded | PaymentStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Created => "created",
            PaymentStatus::Processing => "processing",
            PaymentStatus::RequiresAction => "requires_action",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller wants to charge. The reference identifies the charge across
/// retries and is the basis of the gateway idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub reference: String,
    pub amount: Amount,
    pub currency: Currency,
}

impl PaymentRequest {
    pub fn new(reference: impl Into<String>, amount: Amount, currency: Currency) -> Self {
        Self {
            reference: reference.into(),
            amount,
            currency,
        }
    }

    pub fn idempotency_key(&self) -> String {
        format!("payguard-intent-{}", self.reference)
    }
}

/// One logical charge, from intent creation to a terminal status.
///
/// Mutated only through [`PaymentAttempt::transition`], which refuses to leave
/// `succeeded` or `failed` once reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub reference: String,
    pub amount: Amount,
    pub currency: Currency,
    pub intent_id: Option<String>,
    status: PaymentStatus,
}

impl PaymentAttempt {
    pub fn new(request: &PaymentRequest) -> Self {
        Self {
            reference: request.reference.clone(),
            amount: request.amount,
            currency: request.currency.clone(),
            intent_id: None,
            status: PaymentStatus::Created,
        }
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    /// Moves the attempt to `next`. Re-applying the current terminal status is
    /// accepted; anything else out of a terminal status is rejected.
    pub fn transition(&mut self, next: PaymentStatus) -> Result<(), PaymentError> {
        if self.status.is_terminal() && self.status != next {
            return Err(PaymentError::TerminalStateError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PaymentRequest {
        PaymentRequest::new(
            "booking-42",
            Amount::new(2500).unwrap(),
            Currency::new("usd").unwrap(),
        )
    }

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(1).is_ok());
        assert!(matches!(
            Amount::new(0),
            Err(PaymentError::ValidationError(_))
        ));
    }

    #[test]
    fn test_currency_normalization() {
        assert_eq!(Currency::new("EUR").unwrap().as_str(), "eur");
        assert_eq!(Currency::new(" gbp ").unwrap().as_str(), "gbp");
        assert!(Currency::new("eu").is_err());
        assert!(Currency::new("e1r").is_err());
        assert!(Currency::new("euro").is_err());
    }

    #[test]
    fn test_idempotency_key_is_stable() {
        assert_eq!(request().idempotency_key(), request().idempotency_key());
        assert!(request().idempotency_key().ends_with("booking-42"));
    }

    #[test]
    fn test_attempt_lifecycle() {
        let mut attempt = PaymentAttempt::new(&request());
        assert_eq!(attempt.status(), PaymentStatus::Created);

        attempt.transition(PaymentStatus::Processing).unwrap();
        attempt.transition(PaymentStatus::RequiresAction).unwrap();
        attempt.transition(PaymentStatus::Processing).unwrap();
        attempt.transition(PaymentStatus::Succeeded).unwrap();
        assert_eq!(attempt.status(), PaymentStatus::Succeeded);
    }

    #[test]
    fn test_terminal_status_is_immutable() {
        let mut attempt = PaymentAttempt::new(&request());
        attempt.transition(PaymentStatus::Failed).unwrap();

        let result = attempt.transition(PaymentStatus::Processing);
        assert!(matches!(
            result,
            Err(PaymentError::TerminalStateError {
                from: PaymentStatus::Failed,
                to: PaymentStatus::Processing,
            })
        ));
        assert_eq!(attempt.status(), PaymentStatus::Failed);

        // Re-applying the same terminal status is a no-op.
        assert!(attempt.transition(PaymentStatus::Failed).is_ok());
    }

    #[test]
    fn test_amount_deserialization_rejects_zero() {
        let parsed: Result<Amount, _> = serde_json::from_str("0");
        assert!(parsed.is_err());
        let parsed: Amount = serde_json::from_str("1999").unwrap();
        assert_eq!(parsed.minor_units(), 1999);
    }
}
