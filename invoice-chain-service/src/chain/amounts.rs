//! Tax computation and amount checks for drafts.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::DocumentType;

use super::error::ChainError;

/// Derived amounts of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Amounts {
    pub taxable_base: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

/// Largest magnitude (exclusive) a stored amount may take: `NUMERIC(14,2)`.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

/// `tax = round_half_up(base * rate / 100, 2)`, `total = base + tax`.
/// Every amount comes back with a scale of exactly 2.
pub fn compute(taxable_base: Decimal, tax_rate: Decimal) -> Result<Amounts, ChainError> {
    let tax_amount = taxable_base
        .checked_mul(tax_rate)
        .and_then(|tax| tax.checked_div(Decimal::ONE_HUNDRED))
        .ok_or_else(|| out_of_range("tax amount", taxable_base))?
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);

    let total = taxable_base
        .checked_add(tax_amount)
        .ok_or_else(|| out_of_range("total", taxable_base))?;

    if total.abs() >= MAX_AMOUNT {
        return Err(out_of_range("total", total));
    }

    Ok(Amounts {
        taxable_base: cents(taxable_base),
        tax_rate: cents(tax_rate),
        tax_amount: cents(tax_amount),
        total: cents(total),
    })
}

fn out_of_range(what: &str, amount: Decimal) -> ChainError {
    ChainError::InvalidDraft(format!("{} for {} is out of range", what, amount))
}

fn cents(mut amount: Decimal) -> Decimal {
    amount.rescale(2);
    amount
}

/// Check the amounts of a draft and derive tax and total.
pub fn validate(
    document_type: DocumentType,
    taxable_base: Decimal,
    tax_rate: Decimal,
) -> Result<Amounts, ChainError> {
    if taxable_base.normalize().scale() > 2 {
        return Err(ChainError::InvalidDraft(format!(
            "taxable base {} has more than 2 decimal places",
            taxable_base
        )));
    }

    if taxable_base.abs() >= MAX_AMOUNT {
        return Err(ChainError::InvalidDraft(format!(
            "taxable base {} exceeds the storable range",
            taxable_base
        )));
    }

    if tax_rate.normalize().scale() > 2 {
        return Err(ChainError::InvalidDraft(format!(
            "tax rate {} has more than 2 decimal places",
            tax_rate
        )));
    }

    if tax_rate < Decimal::ZERO || tax_rate > Decimal::ONE_HUNDRED {
        return Err(ChainError::InvalidDraft(format!(
            "tax rate {} is outside 0..=100",
            tax_rate
        )));
    }

    match document_type {
        DocumentType::Invoice if taxable_base < Decimal::ZERO => {
            return Err(ChainError::InvalidDraft(
                "invoice taxable base must not be negative".to_string(),
            ));
        }
        DocumentType::CreditNote if taxable_base >= Decimal::ZERO => {
            return Err(ChainError::InvalidDraft(
                "credit note taxable base must be negative".to_string(),
            ));
        }
        _ => {}
    }

    compute(taxable_base, tax_rate)
}
