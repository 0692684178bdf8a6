//! Order number validation
//!
//! Order numbers are strings of decimal digits guarded by the Luhn checksum.
//! They are never converted to a machine integer, so there is no length cap.

use std::fmt;

/// Validation errors for order numbers
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum OrderNumberError {
    #[error("Order number is empty")]
    Empty,

    #[error("Order number must contain digits only: got '{0}'")]
    NotDigits(String),

    #[error("Order number fails the Luhn checksum: '{0}'")]
    BadChecksum(String),
}

/// Validated order number (digits only, Luhn-valid)
///
/// The inner string is private to force validation through [`OrderNumber::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Parse and validate a raw order number
    ///
    /// Surrounding ASCII whitespace is trimmed (request bodies often end with a
    /// newline). Anything else that is not a digit is rejected, including signs.
    ///
    /// # Examples
    /// ```
    /// use loyalty_ledger::order::OrderNumber;
    ///
    /// let number = OrderNumber::parse("12345678903").unwrap();
    /// assert_eq!(number.as_str(), "12345678903");
    ///
    /// assert!(OrderNumber::parse("12345678904").is_err());
    /// ```
    pub fn parse(raw: &str) -> Result<Self, OrderNumberError> {
        let raw = raw.trim_matches(|c: char| c.is_ascii_whitespace());

        if raw.is_empty() {
            return Err(OrderNumberError::Empty);
        }

        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(OrderNumberError::NotDigits(raw.to_string()));
        }

        if luhn_sum(raw) % 10 != 0 {
            return Err(OrderNumberError::BadChecksum(raw.to_string()));
        }

        Ok(Self(raw.to_string()))
    }

    /// Get the validated number as &str
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert into owned String
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for OrderNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for OrderNumber {
    type Error = OrderNumberError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        OrderNumber::parse(value)
    }
}

impl serde::Serialize for OrderNumber {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Check a raw string against the Luhn checksum without trimming
///
/// Empty strings and strings with any non-digit character are invalid.
pub fn is_valid_luhn(raw: &str) -> bool {
    !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) && luhn_sum(raw) % 10 == 0
}

/// Luhn digit sum; caller guarantees `digits` is ASCII digits only
fn luhn_sum(digits: &str) -> u32 {
    digits
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let d = u32::from(b - b'0');
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum()
}
