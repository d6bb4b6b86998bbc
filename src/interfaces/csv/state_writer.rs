use crate::domain::amount::Balance;
use crate::domain::payment::PaymentState;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

/// Final state of one named payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentRow {
    pub payment: String,
    pub state: PaymentState,
    pub capturable: Balance,
    pub refundable: Balance,
    pub frozen: bool,
}

/// Writes the payment table as CSV with a
/// `payment,state,capturable,refundable,frozen` header.
pub struct StateWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> StateWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_rows(&mut self, rows: impl IntoIterator<Item = PaymentRow>) -> Result<()> {
        for row in rows {
            self.writer.serialize(Normalized::from(row))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

// Decimals are written without trailing zeros.
#[derive(Serialize)]
struct Normalized {
    payment: String,
    state: PaymentState,
    capturable: String,
    refundable: String,
    frozen: bool,
}

impl From<PaymentRow> for Normalized {
    fn from(row: PaymentRow) -> Self {
        Self {
            payment: row.payment,
            state: row.state,
            capturable: row.capturable.to_string(),
            refundable: row.refundable.to_string(),
            frozen: row.frozen,
        }
    }
}
