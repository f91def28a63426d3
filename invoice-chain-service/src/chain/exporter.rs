//! Regulatory ledger export.

use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use service_core::error::AppError;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::Invoice;
use crate::services::metrics::EXPORTS_TOTAL;
use crate::services::store::{ChainFilter, InvoiceStore};

use super::hasher::{format_money, format_timestamp};

/// Column names, in order.
pub const LEDGER_HEADER: [&str; 10] = [
    "sequenceNumber",
    "issueDate",
    "clientName",
    "clientTaxId",
    "taxableBase",
    "taxRate",
    "taxAmount",
    "total",
    "paymentStatus",
    "currentHash",
];

const DELIMITER: u8 = b';';

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LedgerFormat {
    #[default]
    Csv,
    Json,
}

impl LedgerFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            LedgerFormat::Csv => "text/csv; charset=utf-8",
            LedgerFormat::Json => "application/json",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerFormat::Csv => "csv",
            LedgerFormat::Json => "json",
        }
    }

    pub fn from_proto(value: i32) -> Self {
        match value {
            2 => LedgerFormat::Json,
            _ => LedgerFormat::Csv,
        }
    }
}

impl FromStr for LedgerFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(LedgerFormat::Csv),
            "json" => Ok(LedgerFormat::Json),
            other => Err(AppError::BadRequest(anyhow::anyhow!(
                "Unsupported ledger format: {}",
                other
            ))),
        }
    }
}

/// One ledger line. Amounts and dates use the same rendering as the hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRow {
    pub sequence_number: String,
    pub issue_date: String,
    pub client_name: String,
    pub client_tax_id: String,
    pub taxable_base: String,
    pub tax_rate: String,
    pub tax_amount: String,
    pub total: String,
    pub payment_status: String,
    pub current_hash: String,
}

impl From<&Invoice> for LedgerRow {
    fn from(invoice: &Invoice) -> Self {
        Self {
            sequence_number: invoice.sequence_number.clone(),
            issue_date: format_timestamp(invoice.issue_date),
            client_name: invoice.client_name.clone(),
            client_tax_id: invoice.client_tax_id.clone().unwrap_or_default(),
            taxable_base: format_money(invoice.taxable_base),
            tax_rate: format_money(invoice.tax_rate),
            tax_amount: format_money(invoice.tax_amount),
            total: format_money(invoice.total),
            payment_status: invoice.payment_status.clone(),
            current_hash: invoice.current_hash.clone(),
        }
    }
}

/// Rendered ledger.
#[derive(Debug, Clone)]
pub struct LedgerExport {
    pub content: String,
    pub content_type: &'static str,
    pub row_count: usize,
}

/// Project invoices into ledger rows: invoices before credit notes, then by
/// series and counter.
pub fn ledger_rows(invoices: &[Invoice]) -> Vec<LedgerRow> {
    let mut ordered: Vec<&Invoice> = invoices.iter().collect();
    ordered.sort_by(|a, b| {
        (a.document_type(), &a.series, a.counter).cmp(&(b.document_type(), &b.series, b.counter))
    });
    ordered.into_iter().map(LedgerRow::from).collect()
}

/// `;`-separated UTF-8 with a header line. An empty slice yields the header only.
pub fn to_csv(invoices: &[Invoice]) -> Result<String, AppError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer
        .write_record(LEDGER_HEADER)
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to write header: {}", e)))?;

    for row in ledger_rows(invoices) {
        writer.serialize(&row).map_err(|e| {
            AppError::InternalError(anyhow::anyhow!(
                "Failed to write ledger row {}: {}",
                row.sequence_number,
                e
            ))
        })?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to flush ledger: {}", e)))?;

    String::from_utf8(bytes)
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Ledger is not UTF-8: {}", e)))
}

/// JSON array of rows with camelCase keys.
pub fn to_json(invoices: &[Invoice]) -> Result<String, AppError> {
    serde_json::to_string(&ledger_rows(invoices))
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to encode ledger: {}", e)))
}

pub fn render(invoices: &[Invoice], format: LedgerFormat) -> Result<LedgerExport, AppError> {
    let content = match format {
        LedgerFormat::Csv => to_csv(invoices)?,
        LedgerFormat::Json => to_json(invoices)?,
    };

    Ok(LedgerExport {
        content,
        content_type: format.content_type(),
        row_count: invoices.len(),
    })
}

/// Read-only ledger export over the store.
#[derive(Clone)]
pub struct LedgerExporter {
    store: Arc<dyn InvoiceStore>,
}

impl LedgerExporter {
    pub fn new(store: Arc<dyn InvoiceStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, fiscal_year = fiscal_year, format = format.as_str()))]
    pub async fn export(
        &self,
        tenant_id: Uuid,
        fiscal_year: i32,
        format: LedgerFormat,
    ) -> Result<LedgerExport, AppError> {
        let invoices = self
            .store
            .list_chain_invoices(tenant_id, fiscal_year, &ChainFilter::default())
            .await?;

        let export = render(&invoices, format)?;

        EXPORTS_TOTAL.with_label_values(&[format.as_str()]).inc();
        info!(row_count = export.row_count, "Ledger exported");

        Ok(export)
    }
}
