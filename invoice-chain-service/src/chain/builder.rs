//! Appends documents to their chain.

use std::sync::Arc;

use chrono::{Datelike, SubsecRound, Utc};
use service_core::retry::{retry_with, RetryConfig, RetryExhausted};
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::models::{
    ChainKey, CreditNoteDraft, DocumentType, Invoice, InvoiceDraft, PaymentStatus, FISCAL_YEARS,
};
use crate::services::metrics::{CHAIN_BUILD_EVENTS_TOTAL, DOCUMENTS_ISSUED_TOTAL};
use crate::services::store::{ChainSlot, InvoiceStore, SealFn};

use super::amounts;
use super::error::ChainError;
use super::hasher::{compute_hash, HashInput, HASH_VERSION};

/// Issues invoices and credit notes.
///
/// Sequence assignment, tip lookup and persistence happen inside the store's
/// per-chain critical section; a sequence collision is retried within the
/// configured attempt budget.
#[derive(Clone)]
pub struct ChainBuilder {
    store: Arc<dyn InvoiceStore>,
    retry: RetryConfig,
}

impl ChainBuilder {
    pub fn new(store: Arc<dyn InvoiceStore>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    #[instrument(
        skip(self, draft),
        fields(
            tenant_id = %draft.tenant_id,
            series = %draft.series,
            document_type = draft.document_type.as_str()
        )
    )]
    pub async fn create_invoice(&self, draft: InvoiceDraft) -> Result<Invoice, ChainError> {
        draft.validate()?;

        if draft.document_type == DocumentType::CreditNote {
            let reference_id = draft.reference_invoice_id.ok_or_else(|| {
                ChainError::InvalidDraft("credit note requires a referenced invoice".to_string())
            })?;
            self.referenced_invoice(draft.tenant_id, reference_id)
                .await?;
        }

        self.append(draft).await
    }

    /// Offset an issued invoice. The credit note copies the client snapshot of
    /// the referenced invoice and is chained on its own series.
    #[instrument(
        skip(self, draft),
        fields(
            tenant_id = %draft.tenant_id,
            reference_invoice_id = %draft.reference_invoice_id,
            series = %draft.series
        )
    )]
    pub async fn create_credit_note(&self, draft: CreditNoteDraft) -> Result<Invoice, ChainError> {
        draft.validate()?;

        let reference = self
            .referenced_invoice(draft.tenant_id, draft.reference_invoice_id)
            .await?;

        let credit_note = InvoiceDraft {
            tenant_id: draft.tenant_id,
            document_type: DocumentType::CreditNote,
            series: draft.series,
            fiscal_year: None,
            issue_date: draft.issue_date,
            client_id: reference.client_id,
            client_name: reference.client_name,
            client_tax_id: reference.client_tax_id,
            order_id: reference.order_id,
            reference_invoice_id: Some(reference.invoice_id),
            taxable_base: draft.taxable_base,
            tax_rate: draft.tax_rate.unwrap_or(reference.tax_rate),
        };

        self.append(credit_note).await
    }

    async fn referenced_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Invoice, ChainError> {
        let reference = self
            .store
            .get_invoice(tenant_id, invoice_id)
            .await?
            .ok_or_else(|| ChainError::ReferenceNotFound(format!("invoice {}", invoice_id)))?;

        if reference.document_type() != DocumentType::Invoice {
            return Err(ChainError::InvalidDraft(format!(
                "{} is not an invoice",
                reference.sequence_number
            )));
        }

        Ok(reference)
    }

    async fn append(&self, draft: InvoiceDraft) -> Result<Invoice, ChainError> {
        let amounts = amounts::validate(draft.document_type, draft.taxable_base, draft.tax_rate)?;
        let issue_date = draft.issue_date.unwrap_or_else(Utc::now).trunc_subsecs(0);
        let fiscal_year = draft.fiscal_year.unwrap_or_else(|| issue_date.year());
        if !FISCAL_YEARS.contains(&fiscal_year) {
            return Err(ChainError::InvalidDraft(format!(
                "fiscal year {} is outside {}..={}",
                fiscal_year,
                FISCAL_YEARS.start(),
                FISCAL_YEARS.end()
            )));
        }
        let key = ChainKey::new(
            draft.tenant_id,
            fiscal_year,
            draft.series.clone(),
            draft.document_type,
        );
        let invoice_id = Uuid::new_v4();

        let seal = |slot: ChainSlot| {
            let sequence_number = key.sequence_number(slot.counter);
            let current_hash = compute_hash(&HashInput {
                sequence_number: &sequence_number,
                issue_date,
                taxable_base: amounts.taxable_base,
                tax_amount: amounts.tax_amount,
                total: amounts.total,
                previous_hash: &slot.previous_hash,
            });

            Invoice {
                invoice_id,
                tenant_id: key.tenant_id,
                document_type: key.document_type.as_str().to_string(),
                sequence_number,
                fiscal_year: key.fiscal_year,
                series: key.series.clone(),
                counter: slot.counter,
                issue_date,
                client_id: draft.client_id,
                client_name: draft.client_name.clone(),
                client_tax_id: draft.client_tax_id.clone(),
                order_id: draft.order_id,
                reference_invoice_id: draft.reference_invoice_id,
                taxable_base: amounts.taxable_base,
                tax_rate: amounts.tax_rate,
                tax_amount: amounts.tax_amount,
                total: amounts.total,
                previous_hash: slot.previous_hash,
                current_hash,
                hash_version: HASH_VERSION,
                payment_status: PaymentStatus::Pending.as_str().to_string(),
                created_utc: Utc::now(),
            }
        };

        let store = &self.store;
        let chain = &key;
        let seal: &SealFn<'_> = &seal;

        let outcome = retry_with(
            &self.retry,
            "create_invoice",
            ChainError::is_duplicate_sequence,
            move || async move {
                let result = store.create_invoice(chain, seal).await;
                if matches!(result, Err(ChainError::DuplicateSequence { .. })) {
                    CHAIN_BUILD_EVENTS_TOTAL
                        .with_label_values(&["duplicate_sequence"])
                        .inc();
                }
                result
            },
        )
        .await;

        match outcome {
            Ok(invoice) => {
                DOCUMENTS_ISSUED_TOTAL
                    .with_label_values(&[key.document_type.as_str()])
                    .inc();

                info!(
                    invoice_id = %invoice.invoice_id,
                    sequence_number = %invoice.sequence_number,
                    current_hash = %invoice.current_hash,
                    "Document appended to chain"
                );

                Ok(invoice)
            }
            Err(RetryExhausted {
                attempts,
                last_error,
            }) => {
                CHAIN_BUILD_EVENTS_TOTAL
                    .with_label_values(&["build_failure"])
                    .inc();

                error!(chain = %key, attempts = attempts, error = %last_error, "Chain build failed");

                Err(ChainError::BuildFailure {
                    attempts,
                    reason: last_error.to_string(),
                })
            }
        }
    }
}
