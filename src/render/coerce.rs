// Cell Coercion
// Converts typed cell values into their display text

use crate::db::decimal::Decimal;
use crate::db::schema::ColumnInfo;
use crate::db::CellValue;
use std::fmt::Write as _;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S%.f";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
pub const TIMESTAMP_TZ_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f%:z";

/// Coerce a cell with the default null token and no column scale
pub fn coerce(cell: &CellValue) -> String {
    CellCoercer::default().coerce(cell, None)
}

/// Applies the cell display rules with a configured null token
#[derive(Debug, Clone, PartialEq)]
pub struct CellCoercer {
    null_token: String,
}

impl Default for CellCoercer {
    fn default() -> Self {
        Self::new("NULL")
    }
}

impl CellCoercer {
    pub fn new(null_token: impl Into<String>) -> Self {
        Self {
            null_token: null_token.into(),
        }
    }

    pub fn null_token(&self) -> &str {
        &self.null_token
    }

    /// Display text for a cell of the given column
    pub fn coerce_in(&self, cell: &CellValue, column: &ColumnInfo) -> String {
        self.coerce(cell, column.display_scale())
    }

    /// Display text for a cell; `scale` forces that many fractional digits on numbers
    pub fn coerce(&self, cell: &CellValue, scale: Option<u32>) -> String {
        match cell {
            CellValue::Null => self.null_token.clone(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Int(i) => match scale {
                Some(s) => Decimal::from(*i).with_scale(s).to_string(),
                None => i.to_string(),
            },
            CellValue::Decimal(d) => match scale {
                Some(s) => d.with_scale(s).to_string(),
                None => d.to_string(),
            },
            CellValue::Float(f) => format_float(*f, scale),
            CellValue::Text(s) => s.clone(),
            CellValue::Date(d) => d.format(DATE_FORMAT).to_string(),
            CellValue::Time(t) => t.format(TIME_FORMAT).to_string(),
            CellValue::Timestamp(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
            CellValue::TimestampTz(ts) => ts.format(TIMESTAMP_TZ_FORMAT).to_string(),
            CellValue::Binary(bytes) => format_binary(bytes),
        }
    }
}

fn format_float(f: f64, scale: Option<u32>) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let shortest = f.to_string();
    match scale.and_then(|s| Decimal::parse(&shortest).ok().map(|d| d.with_scale(s))) {
        Some(d) => d.to_string(),
        None => shortest,
    }
}

fn format_binary(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(2 + bytes.len() * 2);
    hex.push_str("0x");
    for b in bytes {
        let _ = write!(hex, "{:02X}", b);
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDate, NaiveTime, TimeZone};

    #[test]
    fn test_null_uses_configured_token() {
        assert_eq!(coerce(&CellValue::Null), "NULL");
        assert_eq!(CellCoercer::new("").coerce(&CellValue::Null, None), "");
        assert_eq!(CellCoercer::new("null").coerce(&CellValue::Null, Some(2)), "null");
    }

    #[test]
    fn test_booleans_are_lowercase() {
        assert_eq!(coerce(&CellValue::Bool(true)), "true");
        assert_eq!(coerce(&CellValue::Bool(false)), "false");
    }

    #[test]
    fn test_numbers_without_scale() {
        assert_eq!(coerce(&CellValue::Int(-17)), "-17");
        assert_eq!(coerce(&CellValue::Decimal(Decimal::parse("3.750").unwrap())), "3.750");
        assert_eq!(coerce(&CellValue::Float(100.5)), "100.5");
        assert_eq!(coerce(&CellValue::Float(2.0)), "2");
        assert_eq!(coerce(&CellValue::Float(0.1 + 0.2)), "0.30000000000000004");
    }

    #[test]
    fn test_column_scale_is_applied() {
        let price = ColumnInfo::new("PRICE", "numeric(6,2)");
        let coercer = CellCoercer::default();
        assert_eq!(
            coercer.coerce_in(&CellValue::Decimal(Decimal::parse("3.75").unwrap()), &price),
            "3.75"
        );
        assert_eq!(
            coercer.coerce_in(&CellValue::Decimal(Decimal::parse("3.7").unwrap()), &price),
            "3.70"
        );
        assert_eq!(coercer.coerce_in(&CellValue::Int(3), &price), "3.00");
        assert_eq!(coercer.coerce_in(&CellValue::Float(2.345), &price), "2.35");
        assert_eq!(coercer.coerce_in(&CellValue::Float(f64::NAN), &price), "NaN");
    }

    #[test]
    fn test_float_specials() {
        assert_eq!(coerce(&CellValue::Float(f64::INFINITY)), "Infinity");
        assert_eq!(coerce(&CellValue::Float(f64::NEG_INFINITY)), "-Infinity");
        assert_eq!(coerce(&CellValue::Float(f64::NAN)), "NaN");
    }

    #[test]
    fn test_text_passes_through() {
        assert_eq!(coerce(&CellValue::from("Ресторан #2")), "Ресторан #2");
        assert_eq!(coerce(&CellValue::from("a\tb")), "a\tb");
    }

    #[test]
    fn test_temporal_formats() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(coerce(&CellValue::Date(date)), "2024-02-29");

        let time = NaiveTime::from_hms_opt(13, 5, 9).unwrap();
        assert_eq!(coerce(&CellValue::Time(time)), "13:05:09");

        let with_millis = NaiveTime::from_hms_milli_opt(13, 5, 9, 250).unwrap();
        assert_eq!(coerce(&CellValue::Time(with_millis)), "13:05:09.250");

        let ts = date.and_hms_micro_opt(8, 30, 0, 123456).unwrap();
        assert_eq!(coerce(&CellValue::Timestamp(ts)), "2024-02-29 08:30:00.123456");

        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let tz = offset.with_ymd_and_hms(2024, 2, 29, 8, 30, 0).unwrap();
        assert_eq!(coerce(&CellValue::TimestampTz(tz)), "2024-02-29 08:30:00+02:00");
    }

    #[test]
    fn test_binary_is_upper_hex() {
        assert_eq!(coerce(&CellValue::Binary(vec![0xde, 0xad, 0x01])), "0xDEAD01");
        assert_eq!(coerce(&CellValue::Binary(Vec::new())), "0x");
    }
}
