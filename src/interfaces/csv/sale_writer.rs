use crate::domain::sale::Sale;
use crate::error::SaleError;
use serde::Serialize;
use std::io::Write;

/// One line of the sales report.
#[derive(Debug, Serialize)]
struct SaleRow<'a> {
    secret: &'a str,
    booking_id: u64,
    payment_order_id: &'a str,
    amount: String,
    payment_status: &'static str,
    problem_step: &'static str,
    refunded: bool,
    tickets: usize,
    notified: bool,
    created_at: String,
}

impl<'a> From<&'a Sale> for SaleRow<'a> {
    fn from(sale: &'a Sale) -> Self {
        Self {
            secret: sale.secret().as_str(),
            booking_id: sale.booking_id().0,
            payment_order_id: &sale.payment_order_id().0,
            amount: sale.amount().to_minor_string(),
            payment_status: sale.payment_status().as_str(),
            problem_step: sale.problem_step().as_str(),
            refunded: sale.is_refunded(),
            tickets: sale.tickets().len(),
            notified: sale.notification_sent(),
            created_at: sale.created_at.to_rfc3339(),
        }
    }
}

pub struct SaleWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> SaleWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes one row per sale. The header is written even when there are no
    /// sales.
    pub fn write_sales<'a>(
        &mut self,
        sales: impl IntoIterator<Item = &'a Sale>,
    ) -> Result<(), SaleError> {
        let mut wrote_any = false;
        for sale in sales {
            self.writer.serialize(SaleRow::from(sale))?;
            wrote_any = true;
        }
        if !wrote_any {
            self.writer.write_record(HEADER)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

const HEADER: [&str; 10] = [
    "secret",
    "booking_id",
    "payment_order_id",
    "amount",
    "payment_status",
    "problem_step",
    "refunded",
    "tickets",
    "notified",
    "created_at",
];
