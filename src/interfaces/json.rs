use crate::application::batch::SettledPayment;
use crate::error::Result;
use std::io::Write;

/// Writes one JSON object per settled payment, newline-delimited.
pub fn write_outcomes<'a, W: Write>(
    mut sink: W,
    outcomes: impl IntoIterator<Item = &'a SettledPayment>,
) -> Result<()> {
    for outcome in outcomes {
        serde_json::to_writer(&mut sink, outcome)?;
        sink.write_all(b"\n")?;
    }
    sink.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::PaymentStatus;

    #[test]
    fn test_json_lines() {
        let outcome = SettledPayment {
            reference: "s-1".to_string(),
            status: PaymentStatus::RequiresAction,
            gateway_calls: 2,
            message: "Awaiting customer action.".to_string(),
        };

        let mut buf = Vec::new();
        write_outcomes(&mut buf, [&outcome]).unwrap();
        let line = String::from_utf8(buf).unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();

        assert_eq!(value["reference"], "s-1");
        assert_eq!(value["status"], "requires_action");
        assert_eq!(value["gateway_calls"], 2);
    }
}
