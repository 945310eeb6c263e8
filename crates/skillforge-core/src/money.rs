use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

pub const RECEIPT_MAX_LEN: usize = 40;

const SUPPORTED_CURRENCIES: [&str; 3] = ["USD", "INR", "EUR"];

pub fn to_minor_units(price: Decimal, currency: &str) -> Result<i64> {
    if price <= Decimal::ZERO {
        anyhow::bail!("price must be greater than zero");
    }

    let exponent = minor_unit_exponent(currency)?;
    let scale = Decimal::from(10_i64.pow(exponent));
    (price * scale)
        .round()
        .to_i64()
        .context("amount does not fit in a 64-bit minor unit")
}

pub fn to_major_units(amount_minor: i64, currency: &str) -> Result<Decimal> {
    if amount_minor < 0 {
        anyhow::bail!("minor-unit amount must not be negative");
    }

    let exponent = minor_unit_exponent(currency)?;
    Ok(Decimal::new(amount_minor, exponent))
}

// Gateway receipt identifiers are capped at 40 characters. The timestamp
// suffix is what keeps receipts unique, so truncation always eats into the
// course id, never the suffix.
pub fn receipt_id(course_id: &str, issued_at: DateTime<Utc>) -> String {
    let suffix = format!("_{}", issued_at.timestamp_millis());
    let budget = RECEIPT_MAX_LEN.saturating_sub(suffix.len());
    let head: String = course_id.chars().take(budget).collect();
    format!("{head}{suffix}")
}

fn minor_unit_exponent(currency: &str) -> Result<u32> {
    let normalized = currency.trim().to_ascii_uppercase();
    if SUPPORTED_CURRENCIES.contains(&normalized.as_str()) {
        Ok(2)
    } else {
        anyhow::bail!("unsupported currency: {currency}")
    }
}
