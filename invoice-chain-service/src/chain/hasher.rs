//! Canonical form and digest of an invoice.
//!
//! The canonical form is the exact byte string that is hashed. It is
//! versioned: every record stores the version it was hashed with so that a
//! future format never invalidates existing chains.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sha2::{Digest, Sha256};

use crate::models::Invoice;

/// Canonical form version written by this build.
pub const HASH_VERSION: i16 = 1;

/// `previous_hash` of the first document of a chain.
pub const GENESIS_HASH: &str = "";

const FIELD_SEPARATOR: &str = "|";

/// Hashed fields of a document, borrowed from whatever holds them.
#[derive(Debug, Clone, Copy)]
pub struct HashInput<'a> {
    pub sequence_number: &'a str,
    pub issue_date: DateTime<Utc>,
    pub taxable_base: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub previous_hash: &'a str,
}

impl<'a> From<&'a Invoice> for HashInput<'a> {
    fn from(invoice: &'a Invoice) -> Self {
        Self {
            sequence_number: &invoice.sequence_number,
            issue_date: invoice.issue_date,
            taxable_base: invoice.taxable_base,
            tax_amount: invoice.tax_amount,
            total: invoice.total,
            previous_hash: &invoice.previous_hash,
        }
    }
}

/// Fixed-point rendering with exactly two decimals, half away from zero.
pub fn format_money(amount: Decimal) -> String {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded.to_string()
}

/// RFC 3339 in UTC with whole seconds and a `Z` suffix.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Build the v1 canonical string.
pub fn canonicalize(input: &HashInput<'_>) -> String {
    [
        "v1".to_string(),
        input.sequence_number.to_string(),
        format_timestamp(input.issue_date),
        format_money(input.taxable_base),
        format_money(input.tax_amount),
        format_money(input.total),
        input.previous_hash.to_string(),
    ]
    .join(FIELD_SEPARATOR)
}

/// Lowercase hex SHA-256 of the canonical form.
pub fn compute_hash(input: &HashInput<'_>) -> String {
    let canonical = canonicalize(input);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}
