//! Fixed-point money in minor currency units.
//!
//! Amounts are stored as `i64` minor units (pesewas, kobo, cents) and never
//! pass through floating point. Scaling by a ratio uses 128-bit intermediates
//! and rounds half-up to the minor unit.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors raised by money arithmetic
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("currency mismatch: {0} vs {1}")]
    CurrencyMismatch(Currency, Currency),

    #[error("invalid currency code: {0}")]
    InvalidCurrency(String),

    #[error("arithmetic overflow")]
    Overflow,

    #[error("division by zero")]
    DivisionByZero,
}

/// ISO 4217 currency code (three uppercase ASCII letters)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, MoneyError> {
        let code = code.trim().to_ascii_uppercase();
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(MoneyError::InvalidCurrency(code));
        }
        Ok(Self(code))
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    /// Number of decimal places of the minor unit
    pub fn exponent(&self) -> u32 {
        match self.0.as_str() {
            "JPY" | "KRW" | "XOF" | "XAF" | "UGX" | "RWF" => 0,
            "KWD" | "BHD" | "OMR" | "JOD" | "TND" => 3,
            _ => 2,
        }
    }
}

/// Ghanaian cedi, the platform's home currency
impl Default for Currency {
    fn default() -> Self {
        Self("GHS".to_string())
    }
}

impl TryFrom<String> for Currency {
    type Error = MoneyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::new(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An amount of money in minor units of a single currency
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    pub minor: i64,
    pub currency: Currency,
}

impl Money {
    pub fn new(minor: i64, currency: Currency) -> Self {
        Self { minor, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self { minor: 0, currency }
    }

    pub fn is_zero(&self) -> bool {
        self.minor == 0
    }

    pub fn is_positive(&self) -> bool {
        self.minor > 0
    }

    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        let minor = self
            .minor
            .checked_add(other.minor)
            .ok_or(MoneyError::Overflow)?;
        Ok(Money::new(minor, self.currency.clone()))
    }

    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        let minor = self
            .minor
            .checked_sub(other.minor)
            .ok_or(MoneyError::Overflow)?;
        Ok(Money::new(minor, self.currency.clone()))
    }

    /// Multiply by `numerator / denominator`, rounding half-up to the minor unit
    pub fn scale(&self, numerator: i64, denominator: i64) -> Result<Money, MoneyError> {
        let minor = mul_div_round_half_up(self.minor, numerator, denominator)?;
        Ok(Money::new(minor, self.currency.clone()))
    }

    /// Clamp negative amounts to zero
    pub fn non_negative(self) -> Money {
        if self.minor < 0 {
            Money::zero(self.currency)
        } else {
            self
        }
    }

    pub fn ensure_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch(
                self.currency.clone(),
                other.currency.clone(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let exponent = self.currency.exponent();
        if exponent == 0 {
            return write!(f, "{} {}", self.currency, self.minor);
        }
        let scale = 10_i64.pow(exponent);
        let sign = if self.minor < 0 { "-" } else { "" };
        let abs = self.minor.unsigned_abs();
        write!(
            f,
            "{} {}{}.{:0width$}",
            self.currency,
            sign,
            abs / scale as u64,
            abs % scale as u64,
            width = exponent as usize
        )
    }
}

/// `round_half_up(value * numerator / denominator)` with 128-bit intermediates
pub fn mul_div_round_half_up(
    value: i64,
    numerator: i64,
    denominator: i64,
) -> Result<i64, MoneyError> {
    if denominator == 0 {
        return Err(MoneyError::DivisionByZero);
    }
    let (mut product, mut denominator) = (
        i128::from(value) * i128::from(numerator),
        i128::from(denominator),
    );
    if denominator < 0 {
        product = -product;
        denominator = -denominator;
    }
    // floor((2p + d) / 2d) == floor(p/d + 1/2)
    let rounded = (2 * product + denominator).div_euclid(2 * denominator);
    i64::try_from(rounded).map_err(|_| MoneyError::Overflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ghs(minor: i64) -> Money {
        Money::new(minor, Currency::new("GHS").unwrap())
    }

    #[test]
    fn test_round_half_up() {
        assert_eq!(mul_div_round_half_up(5, 1, 2).unwrap(), 3);
        assert_eq!(mul_div_round_half_up(4, 1, 3).unwrap(), 1);
        assert_eq!(mul_div_round_half_up(5, 1, 3).unwrap(), 2);
        assert_eq!(mul_div_round_half_up(-5, 1, 2).unwrap(), -2);
        assert_eq!(mul_div_round_half_up(3000, 10, 30).unwrap(), 1000);
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(
            mul_div_round_half_up(1, 1, 0),
            Err(MoneyError::DivisionByZero)
        );
    }

    #[test]
    fn test_currency_validation() {
        assert_eq!(Currency::new("ghs").unwrap().code(), "GHS");
        assert!(Currency::new("GH").is_err());
        assert!(Currency::new("G1S").is_err());
        assert_eq!(Currency::default().code(), "GHS");
    }

    #[test]
    fn test_currency_mismatch() {
        let usd = Money::new(100, Currency::new("USD").unwrap());
        assert!(matches!(
            ghs(100).checked_sub(&usd),
            Err(MoneyError::CurrencyMismatch(_, _))
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(ghs(1000).to_string(), "GHS 10.00");
        assert_eq!(ghs(-5).to_string(), "GHS -0.05");
        assert_eq!(
            Money::new(1500, Currency::new("JPY").unwrap()).to_string(),
            "JPY 1500"
        );
    }

    #[test]
    fn test_serde_rejects_bad_currency() {
        let parsed: Result<Money, _> =
            serde_json::from_str(r#"{"minor": 100, "currency": "cedi"}"#);
        assert!(parsed.is_err());
    }
}
