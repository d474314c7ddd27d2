use crate::application::batch::SettledPayment;
use crate::error::Result;
use std::io::Write;

/// Writes settled payments as CSV with the header
/// `reference,status,gateway_calls,message`.
pub struct OutcomeWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> OutcomeWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_outcomes<'a>(
        &mut self,
        outcomes: impl IntoIterator<Item = &'a SettledPayment>,
    ) -> Result<()> {
        for outcome in outcomes {
            self.writer.serialize(outcome)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::PaymentStatus;

    #[test]
    fn test_writer_output() {
        let outcomes = vec![
            SettledPayment {
                reference: "s-1".to_string(),
                status: PaymentStatus::Succeeded,
                gateway_calls: 2,
                message: String::new(),
            },
            SettledPayment {
                reference: "s-2".to_string(),
                status: PaymentStatus::Failed,
                gateway_calls: 1,
                message: "Your payment could not be processed.".to_string(),
            },
        ];

        let mut buf = Vec::new();
        OutcomeWriter::new(&mut buf).write_outcomes(&outcomes).unwrap();
        let out = String::from_utf8(buf).unwrap();

        let mut lines = out.lines();
        assert_eq!(lines.next(), Some("reference,status,gateway_calls,message"));
        assert_eq!(lines.next(), Some("s-1,succeeded,2,"));
        assert_eq!(
            lines.next(),
            Some("s-2,failed,1,Your payment could not be processed.")
        );
    }
}
