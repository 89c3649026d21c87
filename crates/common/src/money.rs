//! Currency codes and minor-unit formatting.

use serde::{Deserialize, Serialize};

/// ISO 4217 currency code, normalized to upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

/// Error returned for a malformed currency code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyError(pub String);

impl std::fmt::Display for CurrencyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid currency code: {:?}", self.0)
    }
}

impl std::error::Error for CurrencyError {}

/// Currencies whose minor unit equals the major unit.
const ZERO_DECIMAL: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

impl Currency {
    /// Parses a three-letter code, case-insensitively.
    pub fn parse(code: &str) -> Result<Self, CurrencyError> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(CurrencyError(code.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    /// Returns the upper-case code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Number of decimal places in the currency's minor unit.
    pub fn exponent(&self) -> u32 {
        if ZERO_DECIMAL.contains(&self.0.as_str()) {
            0
        } else {
            2
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Currency {
    type Error = CurrencyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(c: Currency) -> Self {
        c.0
    }
}

/// Formats a minor-unit amount as a human-readable string, e.g. `24.99 CAD`.
pub fn format_amount(amount_minor: i64, currency: &Currency) -> String {
    let exponent = currency.exponent();
    if exponent == 0 {
        return format!("{amount_minor} {currency}");
    }
    let divisor = 10_i64.pow(exponent);
    let sign = if amount_minor < 0 { "-" } else { "" };
    let abs = amount_minor.unsigned_abs();
    let major = abs / divisor as u64;
    let minor = abs % divisor as u64;
    format!(
        "{sign}{major}.{minor:0width$} {currency}",
        width = exponent as usize
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes_case() {
        let c = Currency::parse("cad").unwrap();
        assert_eq!(c.code(), "CAD");
    }

    #[test]
    fn parse_rejects_bad_codes() {
        assert!(Currency::parse("CA").is_err());
        assert!(Currency::parse("CADX").is_err());
        assert!(Currency::parse("C4D").is_err());
    }

    #[test]
    fn format_two_decimal_amounts() {
        let cad = Currency::parse("CAD").unwrap();
        assert_eq!(format_amount(2499, &cad), "24.99 CAD");
        assert_eq!(format_amount(5, &cad), "0.05 CAD");
        assert_eq!(format_amount(-150, &cad), "-1.50 CAD");
    }

    #[test]
    fn format_zero_decimal_amounts() {
        let jpy = Currency::parse("jpy").unwrap();
        assert_eq!(format_amount(1200, &jpy), "1200 JPY");
    }

    #[test]
    fn deserialization_validates() {
        let ok: Currency = serde_json::from_str("\"usd\"").unwrap();
        assert_eq!(ok.code(), "USD");
        assert!(serde_json::from_str::<Currency>("\"dollars\"").is_err());
    }
}
