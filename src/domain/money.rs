use std::fmt;

/// Money is held as integer minor units (two decimal places), so 530.00 = 53000.
pub type Cents = i64;

/// Largest magnitude accepted for a single amount or a stored balance
/// (100 billion in major units). Sums of a few bounded amounts stay far
/// from `i64` overflow, in Rust and in SQLite integer arithmetic.
pub const MAX_AMOUNT: Cents = 10_000_000_000_000;

/// Format cents as a decimal string.
/// Example: 53000 -> "530.00", -1234 -> "-12.34"
pub fn format_cents(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs_cents = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs_cents / 100, abs_cents % 100)
}

/// Parse a decimal string into cents.
/// Accepts "530", "530.5" and "530.50". More than two decimal places is an
/// error rather than a silent truncation.
pub fn parse_cents(input: &str) -> Result<Cents, ParseCentsError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseCentsError::Empty);
    }

    let (negative, digits) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input),
    };

    let (units_str, decimal_str) = match digits.split_once('.') {
        Some((units, decimals)) => (units, decimals),
        None => (digits, ""),
    };

    if units_str.is_empty() && decimal_str.is_empty() {
        return Err(ParseCentsError::InvalidFormat);
    }
    if !units_str.chars().all(|c| c.is_ascii_digit())
        || !decimal_str.chars().all(|c| c.is_ascii_digit())
    {
        return Err(ParseCentsError::InvalidFormat);
    }
    if decimal_str.len() > 2 {
        return Err(ParseCentsError::TooPrecise);
    }

    let units: i64 = if units_str.is_empty() {
        0
    } else {
        units_str.parse().map_err(|_| ParseCentsError::Overflow)?
    };
    let decimal_cents: i64 = match decimal_str.len() {
        0 => 0,
        1 => decimal_str.parse::<i64>().map_err(|_| ParseCentsError::InvalidFormat)? * 10,
        _ => decimal_str.parse().map_err(|_| ParseCentsError::InvalidFormat)?,
    };

    let cents = units
        .checked_mul(100)
        .and_then(|c| c.checked_add(decimal_cents))
        .filter(|c| *c <= MAX_AMOUNT)
        .ok_or(ParseCentsError::Overflow)?;
    Ok(if negative { -cents } else { cents })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseCentsError {
    Empty,
    InvalidFormat,
    TooPrecise,
    Overflow,
}

impl fmt::Display for ParseCentsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseCentsError::Empty => write!(f, "empty money amount"),
            ParseCentsError::InvalidFormat => write!(f, "invalid money format"),
            ParseCentsError::TooPrecise => write!(f, "money amounts allow at most two decimal places"),
            ParseCentsError::Overflow => write!(f, "money amount out of range"),
        }
    }
}

impl std::error::Error for ParseCentsError {}

/// Serde adapter: cents on the wire as a decimal string ("530.00").
/// Deserialization also accepts JSON numbers expressed in major units.
pub mod decimal {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{Cents, MAX_AMOUNT, format_cents, parse_cents};

    pub fn serialize<S: Serializer>(cents: &Cents, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_cents(*cents))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Cents, D::Error> {
        let raw = Raw::deserialize(deserializer)?;
        raw.into_cents().map_err(serde::de::Error::custom)
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    pub(super) enum Raw {
        Text(String),
        Integer(i64),
        Float(f64),
    }

    impl Raw {
        pub(super) fn into_cents(self) -> Result<Cents, String> {
            match self {
                Raw::Text(s) => parse_cents(&s).map_err(|e| e.to_string()),
                Raw::Integer(units) => units
                    .checked_mul(100)
                    .filter(|c| c.abs() <= MAX_AMOUNT)
                    .ok_or_else(|| "money amount out of range".to_string()),
                Raw::Float(value) => parse_cents(&format!("{value:.2}")).map_err(|e| e.to_string()),
            }
        }
    }
}

/// Same as [`decimal`] for optional amounts.
pub mod decimal_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::decimal::Raw;
    use super::{Cents, format_cents};

    pub fn serialize<S: Serializer>(
        cents: &Option<Cents>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match cents {
            Some(c) => serializer.serialize_some(&format_cents(*c)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Cents>, D::Error> {
        let raw = Option::<Raw>::deserialize(deserializer)?;
        raw.map(Raw::into_cents)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}
