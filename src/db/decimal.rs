// Exact Decimal Values
// Fixed-point numbers as reported by NUMERIC/DECIMAL columns, kept as digit strings

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a string is not a plain decimal literal
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid decimal literal: '{0}'")]
pub struct DecimalParseError(pub String);

/// An exact decimal number.
///
/// The integer part never has leading zeros (except a single `0`), the
/// fractional part keeps every digit the source reported so that its length is
/// the scale. Zero is never negative.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Decimal {
    negative: bool,
    int_digits: String,
    frac_digits: String,
}

impl Decimal {
    /// Parse a literal such as `3.75`, `-0.5`, `+12` or `.25`
    pub fn parse(input: &str) -> Result<Self, DecimalParseError> {
        let invalid = || DecimalParseError(input.to_string());
        let trimmed = input.trim();

        let (negative, body) = match trimmed.as_bytes().first() {
            Some(b'-') => (true, &trimmed[1..]),
            Some(b'+') => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };

        let (int_part, frac_part) = match body.split_once('.') {
            Some((i, f)) => (i, f),
            None => (body, ""),
        };

        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        Ok(Self::from_digits(negative, int_part, frac_part.to_string()))
    }

    /// Build from an unscaled integer and a scale: `(375, 2)` is `3.75`
    pub fn from_unscaled(value: i128, scale: u32) -> Self {
        let digits = value.unsigned_abs().to_string();
        let scale = scale as usize;
        let padded = if digits.len() <= scale {
            format!("{}{}", "0".repeat(scale + 1 - digits.len()), digits)
        } else {
            digits
        };
        let split = padded.len() - scale;
        Self::from_digits(value < 0, &padded[..split], padded[split..].to_string())
    }

    fn from_digits(negative: bool, int_part: &str, frac_digits: String) -> Self {
        let stripped = int_part.trim_start_matches('0');
        let int_digits = if stripped.is_empty() {
            "0".to_string()
        } else {
            stripped.to_string()
        };
        let is_zero = int_digits == "0" && frac_digits.bytes().all(|b| b == b'0');
        Self {
            negative: negative && !is_zero,
            int_digits,
            frac_digits,
        }
    }

    /// Number of fractional digits
    pub fn scale(&self) -> u32 {
        self.frac_digits.len() as u32
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    /// Digits left of the decimal point, without sign
    pub fn int_digits(&self) -> &str {
        &self.int_digits
    }

    /// Digits right of the decimal point
    pub fn frac_digits(&self) -> &str {
        &self.frac_digits
    }

    /// Unscaled value and scale, if they fit the i128 / u8 range used by SQL Server
    pub fn to_unscaled(&self) -> Option<(i128, u8)> {
        let scale = u8::try_from(self.frac_digits.len()).ok()?;
        let digits = format!("{}{}", self.int_digits, self.frac_digits);
        let magnitude = digits.parse::<i128>().ok()?;
        Some((if self.negative { -magnitude } else { magnitude }, scale))
    }

    /// Return this value with exactly `scale` fractional digits.
    ///
    /// Extra digits are rounded half away from zero; missing digits are padded with zeros.
    pub fn with_scale(&self, scale: u32) -> Self {
        let scale = scale as usize;
        if self.frac_digits.len() <= scale {
            let mut frac = self.frac_digits.clone();
            frac.push_str(&"0".repeat(scale - self.frac_digits.len()));
            return Self::from_digits(self.negative, &self.int_digits, frac);
        }

        let round_up = self.frac_digits.as_bytes()[scale] >= b'5';
        let mut digits: Vec<u8> = self
            .int_digits
            .bytes()
            .chain(self.frac_digits.bytes().take(scale))
            .collect();

        if round_up {
            let mut carry = true;
            for digit in digits.iter_mut().rev() {
                if *digit == b'9' {
                    *digit = b'0';
                } else {
                    *digit += 1;
                    carry = false;
                    break;
                }
            }
            if carry {
                digits.insert(0, b'1');
            }
        }

        let split = digits.len() - scale;
        // Digits are ASCII by construction
        let int_part = String::from_utf8_lossy(&digits[..split]).into_owned();
        let frac_part = String::from_utf8_lossy(&digits[split..]).into_owned();
        Self::from_digits(self.negative, &int_part, frac_part)
    }

    /// Lossy conversion for floating point targets
    pub fn to_f64(&self) -> f64 {
        self.to_string().parse().unwrap_or(f64::NAN)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        f.write_str(&self.int_digits)?;
        if !self.frac_digits.is_empty() {
            write!(f, ".{}", self.frac_digits)?;
        }
        Ok(())
    }
}

impl FromStr for Decimal {
    type Err = DecimalParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<i64> for Decimal {
    fn from(value: i64) -> Self {
        Self::from_unscaled(value as i128, 0)
    }
}
