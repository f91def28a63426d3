//! Persistence seam for invoice chains.

use async_trait::async_trait;
use service_core::error::AppError;
use uuid::Uuid;

use crate::chain::ChainError;
use crate::models::{ChainKey, DocumentType, Invoice, PaymentStatus};

/// Position reserved for a new document on its chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSlot {
    pub counter: i64,
    /// `current_hash` of the chain tip, or the genesis sentinel.
    pub previous_hash: String,
}

/// Narrows a fiscal-year listing.
#[derive(Debug, Clone, Default)]
pub struct ChainFilter {
    pub series: Option<String>,
    pub document_type: Option<DocumentType>,
}

impl ChainFilter {
    pub fn series(series: impl Into<String>) -> Self {
        Self {
            series: Some(series.into()),
            document_type: None,
        }
    }

    pub fn matches(&self, invoice: &Invoice) -> bool {
        self.series.as_deref().is_none_or(|s| s == invoice.series)
            && self
                .document_type
                .is_none_or(|t| t.as_str() == invoice.document_type)
    }
}

/// Builds the record to persist once its slot on the chain is known.
pub type SealFn<'a> = dyn Fn(ChainSlot) -> Invoice + Send + Sync + 'a;

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Reserve the next slot of `key`, seal the record and persist it, all
    /// inside one critical section per chain key. Either everything is
    /// persisted or nothing is.
    async fn create_invoice(
        &self,
        key: &ChainKey,
        seal: &SealFn<'_>,
    ) -> Result<Invoice, ChainError>;

    async fn get_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError>;

    /// Documents of a fiscal year ordered by document type, series and counter.
    async fn list_chain_invoices(
        &self,
        tenant_id: Uuid,
        fiscal_year: i32,
        filter: &ChainFilter,
    ) -> Result<Vec<Invoice>, AppError>;

    /// The only mutation allowed on an issued document.
    async fn update_payment_status(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        status: PaymentStatus,
    ) -> Result<Option<Invoice>, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}
