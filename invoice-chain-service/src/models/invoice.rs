//! Invoice model for invoice-chain-service.

use std::ops::RangeInclusive;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Kind of fiscal document. Each kind is numbered on its own chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Invoice,
    CreditNote,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "invoice",
            DocumentType::CreditNote => "credit_note",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "credit_note" => DocumentType::CreditNote,
            _ => DocumentType::Invoice,
        }
    }

    /// Prefix of the sequence number (`FAC-2025-001-00000001`).
    pub fn prefix(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "FAC",
            DocumentType::CreditNote => "RCT",
        }
    }

    /// Convert from proto enum value.
    pub fn from_proto(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Invoice),
            2 => Some(Self::CreditNote),
            _ => None,
        }
    }

    /// Convert to proto enum value.
    pub fn to_proto(self) -> i32 {
        match self {
            Self::Invoice => 1,
            Self::CreditNote => 2,
        }
    }
}

/// Payment status, driven by external payment events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "paid" => PaymentStatus::Paid,
            "failed" => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        }
    }

    pub fn from_proto(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Pending),
            2 => Some(Self::Paid),
            3 => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn to_proto(self) -> i32 {
        match self {
            Self::Pending => 1,
            Self::Paid => 2,
            Self::Failed => 3,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fiscal years a chain may be opened for. Sequence numbers carry the year as
/// four digits.
pub const FISCAL_YEARS: RangeInclusive<i32> = 2000..=9999;

/// Partition under which sequence numbers are gapless and hashes are linked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainKey {
    pub tenant_id: Uuid,
    pub fiscal_year: i32,
    pub series: String,
    pub document_type: DocumentType,
}

impl ChainKey {
    pub fn new(
        tenant_id: Uuid,
        fiscal_year: i32,
        series: impl Into<String>,
        document_type: DocumentType,
    ) -> Self {
        Self {
            tenant_id,
            fiscal_year,
            series: series.into(),
            document_type,
        }
    }

    /// Render the sequence number for a counter value on this chain.
    pub fn sequence_number(&self, counter: i64) -> String {
        format!(
            "{}-{}-{}-{:08}",
            self.document_type.prefix(),
            self.fiscal_year,
            self.series,
            counter
        )
    }
}

impl std::fmt::Display for ChainKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}-{}-{}",
            self.tenant_id,
            self.document_type.prefix(),
            self.fiscal_year,
            self.series
        )
    }
}

/// Issued fiscal document. Immutable once persisted except for `payment_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub tenant_id: Uuid,
    pub document_type: String,
    pub sequence_number: String,
    pub fiscal_year: i32,
    pub series: String,
    pub counter: i64,
    pub issue_date: DateTime<Utc>,
    pub client_id: Uuid,
    pub client_name: String,
    pub client_tax_id: Option<String>,
    pub order_id: Option<Uuid>,
    pub reference_invoice_id: Option<Uuid>,
    pub taxable_base: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub previous_hash: String,
    pub current_hash: String,
    pub hash_version: i16,
    pub payment_status: String,
    pub created_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn document_type(&self) -> DocumentType {
        DocumentType::from_string(&self.document_type)
    }

    pub fn payment_status(&self) -> PaymentStatus {
        PaymentStatus::from_string(&self.payment_status)
    }

    pub fn chain_key(&self) -> ChainKey {
        ChainKey::new(
            self.tenant_id,
            self.fiscal_year,
            self.series.clone(),
            self.document_type(),
        )
    }
}

/// Input for issuing a document. Carries neither a sequence number nor a hash;
/// both are assigned by the chain builder.
#[derive(Debug, Clone, Validate)]
pub struct InvoiceDraft {
    pub tenant_id: Uuid,
    pub document_type: DocumentType,
    #[validate(custom(function = "validate_series"))]
    pub series: String,
    /// Explicit fiscal year for backfilled series; derived from the issue date otherwise.
    #[validate(range(min = 2000, max = 9999))]
    pub fiscal_year: Option<i32>,
    /// Defaults to the current time.
    pub issue_date: Option<DateTime<Utc>>,
    pub client_id: Uuid,
    #[validate(length(min = 1, max = 200))]
    pub client_name: String,
    #[validate(length(max = 32))]
    pub client_tax_id: Option<String>,
    pub order_id: Option<Uuid>,
    pub reference_invoice_id: Option<Uuid>,
    pub taxable_base: Decimal,
    pub tax_rate: Decimal,
}

/// Input for issuing a credit note against an existing invoice.
#[derive(Debug, Clone, Validate)]
pub struct CreditNoteDraft {
    pub tenant_id: Uuid,
    pub reference_invoice_id: Uuid,
    #[validate(custom(function = "validate_series"))]
    pub series: String,
    /// Negative amount being credited.
    pub taxable_base: Decimal,
    /// Falls back to the referenced invoice's rate.
    pub tax_rate: Option<Decimal>,
    pub issue_date: Option<DateTime<Utc>>,
}

fn validate_series(series: &str) -> Result<(), ValidationError> {
    let well_formed = !series.is_empty()
        && series.len() <= 10
        && series.chars().all(|c| c.is_ascii_alphanumeric());

    if well_formed {
        Ok(())
    } else {
        Err(ValidationError::new("series")
            .with_message("series must be 1-10 ASCII alphanumeric characters".into()))
    }
}
