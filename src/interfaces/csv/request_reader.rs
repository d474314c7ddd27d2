use crate::domain::payment::{Amount, Currency, PaymentRequest};
use crate::error::{PaymentError, Result};
use crate::infrastructure::scripted_gateway::{GatewayStep, parse_script};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize)]
struct PaymentRow {
    reference: String,
    amount: u64,
    currency: String,
    #[serde(default)]
    script: Option<String>,
}

/// A payment request paired with the gateway behaviour to simulate for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedPayment {
    pub request: PaymentRequest,
    pub script: Vec<GatewayStep>,
}

impl TryFrom<PaymentRow> for ScriptedPayment {
    type Error = PaymentError;

    fn try_from(row: PaymentRow) -> Result<Self> {
        if row.reference.is_empty() {
            return Err(PaymentError::ValidationError(
                "Reference must not be empty".to_string(),
            ));
        }
        let request = PaymentRequest::new(
            row.reference,
            Amount::new(row.amount)?,
            Currency::new(&row.currency)?,
        );
        let script = parse_script(row.script.as_deref().unwrap_or_default())?;
        Ok(Self { request, script })
    }
}

/// Reads payment requests from a CSV source with the header
/// `reference, amount, currency, script`.
///
/// Whitespace is trimmed and the `script` column may be omitted.
pub struct RequestReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> RequestReader<R> {
    /// Creates a new `RequestReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and validates requests, one per row.
    pub fn payments(self) -> impl Iterator<Item = Result<ScriptedPayment>> {
        self.reader.into_deserialize().map(|result| {
            let row: PaymentRow = result.map_err(PaymentError::from)?;
            ScriptedPayment::try_from(row)
        })
    }
}
