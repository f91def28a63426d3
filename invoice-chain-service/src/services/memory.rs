//! Single-process store used when no database is configured, and by tests.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use service_core::error::AppError;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::chain::{ChainError, GENESIS_HASH};
use crate::models::{ChainKey, Invoice, PaymentStatus};
use crate::services::store::{ChainFilter, ChainSlot, InvoiceStore, SealFn};

/// In-memory invoice store. Counters live behind one async mutex per chain
/// key, so issuance on different chains proceeds in parallel.
#[derive(Default)]
pub struct InMemoryStore {
    counters: DashMap<ChainKey, Arc<Mutex<i64>>>,
    invoices: RwLock<Vec<Invoice>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the last issued counter of a chain.
    #[doc(hidden)]
    pub async fn seed_counter(&self, key: &ChainKey, last_value: i64) {
        let slot = self.counter_for(key);
        *slot.lock().await = last_value;
    }

    fn counter_for(&self, key: &ChainKey) -> Arc<Mutex<i64>> {
        self.counters
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(0)))
            .clone()
    }

    fn poisoned() -> AppError {
        AppError::InternalError(anyhow::anyhow!("invoice store lock poisoned"))
    }

    fn tip_hash(&self, key: &ChainKey, before: i64) -> Result<String, AppError> {
        let rows = self.invoices.read().map_err(|_| Self::poisoned())?;
        Ok(rows
            .iter()
            .filter(|r| r.counter < before && r.chain_key() == *key)
            .max_by_key(|r| r.counter)
            .map(|r| r.current_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string()))
    }
}

#[async_trait]
impl InvoiceStore for InMemoryStore {
    #[instrument(skip(self, seal), fields(chain = %key))]
    async fn create_invoice(
        &self,
        key: &ChainKey,
        seal: &SealFn<'_>,
    ) -> Result<Invoice, ChainError> {
        let slot = self.counter_for(key);
        let mut last_value = slot.lock().await;

        let counter = *last_value + 1;
        let previous_hash = self.tip_hash(key, counter)?;
        let invoice = seal(ChainSlot {
            counter,
            previous_hash,
        });

        {
            let mut rows = self.invoices.write().map_err(|_| Self::poisoned())?;
            let taken = rows.iter().any(|r| {
                r.tenant_id == invoice.tenant_id && r.sequence_number == invoice.sequence_number
            });
            if taken {
                // Catch the counter up with what is stored so the retry lands on a free slot.
                let highest = rows
                    .iter()
                    .filter(|r| r.chain_key() == *key)
                    .map(|r| r.counter)
                    .max()
                    .unwrap_or(0);
                *last_value = (*last_value).max(highest);

                warn!(
                    sequence_number = %invoice.sequence_number,
                    highest_counter = highest,
                    "Sequence number already taken"
                );
                return Err(ChainError::DuplicateSequence {
                    sequence_number: invoice.sequence_number,
                });
            }
            rows.push(invoice.clone());
        }

        // Only advance once the row is in.
        *last_value = counter;

        info!(invoice_id = %invoice.invoice_id, sequence_number = %invoice.sequence_number, "Invoice stored");

        Ok(invoice)
    }

    async fn get_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let rows = self.invoices.read().map_err(|_| Self::poisoned())?;
        Ok(rows
            .iter()
            .find(|r| r.tenant_id == tenant_id && r.invoice_id == invoice_id)
            .cloned())
    }

    async fn list_chain_invoices(
        &self,
        tenant_id: Uuid,
        fiscal_year: i32,
        filter: &ChainFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let rows = self.invoices.read().map_err(|_| Self::poisoned())?;
        let mut invoices: Vec<Invoice> = rows
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.fiscal_year == fiscal_year)
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();

        invoices.sort_by(|a, b| {
            (&a.document_type, &a.series, a.counter).cmp(&(&b.document_type, &b.series, b.counter))
        });

        Ok(invoices)
    }

    async fn update_payment_status(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        status: PaymentStatus,
    ) -> Result<Option<Invoice>, AppError> {
        let mut rows = self.invoices.write().map_err(|_| Self::poisoned())?;
        Ok(rows
            .iter_mut()
            .find(|r| r.tenant_id == tenant_id && r.invoice_id == invoice_id)
            .map(|r| {
                r.payment_status = status.as_str().to_string();
                r.clone()
            }))
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}
