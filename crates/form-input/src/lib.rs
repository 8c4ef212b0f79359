#![deny(warnings)]

//! Input masks and form conversion for the reinvestment simulator.
//!
//! Money is typed as a stream of digits interpreted as cents and shown as
//! `R$ 1.234,56`; percentages are up to three digits followed by `%`. The
//! parsers accept the masked form (and plain digits) and produce decimals.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sim_core::{ParameterError, SimulationParameters};
use std::str::FromStr;
use thiserror::Error;

/// Currency prefix used by the money mask.
pub const CURRENCY_PREFIX: &str = "R$";

const MAX_PERCENT_DIGITS: usize = 3;

/// Errors produced while reading masked strings.
#[derive(Debug, Error, PartialEq)]
pub enum MaskError {
    #[error("not a money value: {0:?}")]
    InvalidMoney(String),
    #[error("not a percentage: {0:?}")]
    InvalidPercent(String),
}

/// Errors produced while turning a form into run parameters.
#[derive(Debug, Error, PartialEq)]
pub enum FormError {
    #[error("{field}: {source}")]
    Mask {
        field: &'static str,
        #[source]
        source: MaskError,
    },
    #[error(transparent)]
    Parameter(#[from] ParameterError),
}

fn digits(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

fn group_thousands(int_part: &str) -> String {
    let mut out = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(ch);
    }
    out
}

/// Apply the money mask to raw keyboard input.
///
/// Non-digits are dropped and the remaining digits read as cents:
/// `"123456"` becomes `"R$ 1.234,56"`. Empty input stays empty.
pub fn format_money(raw: &str) -> String {
    let d = digits(raw);
    if d.is_empty() {
        return String::new();
    }
    let trimmed = d.trim_start_matches('0');
    let padded = format!("{trimmed:0>3}");
    let (int_part, cents) = padded.split_at(padded.len() - 2);
    format!("{CURRENCY_PREFIX} {},{cents}", group_thousands(int_part))
}

/// Apply the percent mask: at most three digits followed by `%`.
pub fn format_percent(raw: &str) -> String {
    let d = digits(raw);
    if d.is_empty() {
        return String::new();
    }
    let kept: String = d.chars().take(MAX_PERCENT_DIGITS).collect();
    format!("{kept}%")
}

/// Masked representation of a decimal amount, rounded to cents.
pub fn money_string(value: Decimal) -> String {
    let cents = (value.abs() * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    let masked = format_money(&cents.to_u128().unwrap_or(0).to_string());
    if value.is_sign_negative() && !cents.is_zero() {
        format!("-{masked}")
    } else {
        masked
    }
}

/// Masked representation of a fraction, as a whole percentage.
pub fn percent_string(fraction: Decimal) -> String {
    let pct = (fraction * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    format_percent(&pct.to_u64().unwrap_or(0).to_string())
}

/// Read a masked money string. Empty input reads as zero.
///
/// Dots are thousands separators and the first comma is the decimal point.
pub fn parse_money(s: &str) -> Result<Decimal, MaskError> {
    let cleaned = s
        .trim()
        .replace(CURRENCY_PREFIX, "")
        .replace('.', "")
        .replacen(',', ".", 1);
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Ok(Decimal::ZERO);
    }
    Decimal::from_str(cleaned).map_err(|_| MaskError::InvalidMoney(s.to_string()))
}

/// Read a masked percentage as a fraction. Empty input reads as zero.
pub fn parse_percent(s: &str) -> Result<Decimal, MaskError> {
    let cleaned = s.trim().replace('%', "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Ok(Decimal::ZERO);
    }
    let pct = Decimal::from_str(cleaned).map_err(|_| MaskError::InvalidPercent(s.to_string()))?;
    Ok(pct / Decimal::ONE_HUNDRED)
}

/// The five form fields exactly as entered.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormValues {
    #[serde(default)]
    pub initial_capital: String,
    #[serde(default)]
    pub unit_cost: String,
    #[serde(default)]
    pub unit_revenue: String,
    #[serde(default)]
    pub target_net_profit: String,
    #[serde(default)]
    pub yield_variance: String,
}

impl FormValues {
    /// Masked form for a set of parameters.
    pub fn from_parameters(params: &SimulationParameters) -> Self {
        Self {
            initial_capital: money_string(params.initial_capital()),
            unit_cost: money_string(params.unit_cost()),
            unit_revenue: money_string(params.unit_revenue()),
            target_net_profit: money_string(params.target_net_profit()),
            yield_variance: percent_string(params.yield_variance()),
        }
    }

    /// Fill empty fields from `fallback`.
    pub fn or(mut self, fallback: &FormValues) -> Self {
        for (field, backup) in [
            (&mut self.initial_capital, &fallback.initial_capital),
            (&mut self.unit_cost, &fallback.unit_cost),
            (&mut self.unit_revenue, &fallback.unit_revenue),
            (&mut self.target_net_profit, &fallback.target_net_profit),
            (&mut self.yield_variance, &fallback.yield_variance),
        ] {
            if field.trim().is_empty() {
                field.clone_from(backup);
            }
        }
        self
    }

    /// Parse every field and build checked run parameters.
    pub fn to_parameters(&self) -> Result<SimulationParameters, FormError> {
        let money = |field: &'static str, s: &str| {
            parse_money(s).map_err(|source| FormError::Mask { field, source })
        };
        let initial_capital = money("initial capital", &self.initial_capital)?;
        let unit_cost = money("unit cost", &self.unit_cost)?;
        let unit_revenue = money("unit revenue", &self.unit_revenue)?;
        let target = money("target net profit", &self.target_net_profit)?;
        let variance = parse_percent(&self.yield_variance).map_err(|source| FormError::Mask {
            field: "yield variance",
            source,
        })?;
        Ok(SimulationParameters::new(
            initial_capital,
            unit_cost,
            unit_revenue,
            target,
            variance,
        )?)
    }
}
