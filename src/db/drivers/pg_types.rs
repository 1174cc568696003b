// PostgreSQL Value Codec
// Binary wire format decoding into CellValue, including exact NUMERIC, and parameter encoding

use crate::db::decimal::Decimal;
use crate::db::traits::CellValue;
use crate::render::coerce;
use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use std::error::Error;
use std::net::IpAddr;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, Kind, ToSql, Type};

type BoxError = Box<dyn Error + Sync + Send>;

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;
const NBASE_DIGITS: usize = 4;

/// Undecoded column value; accepts every type so unknown types can still be read
pub struct RawValue<'a>(pub &'a [u8]);

impl<'a> FromSql<'a> for RawValue<'a> {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(RawValue(raw))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Decode one binary column value by its type name
pub fn cell_from_sql(ty: &Type, raw: Option<&[u8]>) -> Result<CellValue, BoxError> {
    let Some(raw) = raw else {
        return Ok(CellValue::Null);
    };

    let cell = match ty.name() {
        "bool" => CellValue::Bool(bool::from_sql(ty, raw)?),
        "int2" => CellValue::Int(i16::from_sql(ty, raw)?.into()),
        "int4" => CellValue::Int(i32::from_sql(ty, raw)?.into()),
        "int8" => CellValue::Int(i64::from_sql(ty, raw)?),
        "oid" => CellValue::Int(u32::from_sql(ty, raw)?.into()),
        "float4" => CellValue::Float(f32::from_sql(ty, raw)?.into()),
        "float8" => CellValue::Float(f64::from_sql(ty, raw)?),
        "numeric" => decode_numeric(raw)?,
        // money is an int8 count of cents
        "money" => CellValue::Decimal(Decimal::from_unscaled(i64::from_sql(ty, raw)?.into(), 2)),
        // 'infinity' and '-infinity' are stored as the extreme values
        "date" => match i32::from_sql(ty, raw)? {
            i32::MAX => infinity(true),
            i32::MIN => infinity(false),
            _ => CellValue::Date(NaiveDate::from_sql(ty, raw)?),
        },
        "timestamp" | "timestamptz" => match i64::from_sql(ty, raw)? {
            i64::MAX => infinity(true),
            i64::MIN => infinity(false),
            _ if ty.name() == "timestamp" => CellValue::Timestamp(NaiveDateTime::from_sql(ty, raw)?),
            _ => CellValue::TimestampTz(DateTime::<FixedOffset>::from_sql(ty, raw)?),
        },
        "time" => CellValue::Time(NaiveTime::from_sql(ty, raw)?),
        "timetz" => CellValue::Text(decode_timetz(raw)?),
        "interval" => CellValue::Text(decode_interval(raw)?),
        "inet" | "cidr" => CellValue::Text(decode_inet(raw)?),
        "uuid" => CellValue::Text(uuid::Uuid::from_slice(raw)?.to_string()),
        "jsonb" => match raw.split_first() {
            Some((1, body)) => CellValue::Text(std::str::from_utf8(body)?.to_string()),
            _ => return Err("unsupported jsonb version".into()),
        },
        "bytea" => CellValue::Binary(raw.to_vec()),
        _ => match ty.kind() {
            Kind::Array(member) => CellValue::Text(decode_array(member, raw)?),
            Kind::Domain(base) => return cell_from_sql(base, Some(raw)),
            _ if is_text_like(ty) => match std::str::from_utf8(raw) {
                Ok(text) => CellValue::Text(text.to_string()),
                Err(_) => CellValue::Binary(raw.to_vec()),
            },
            _ => CellValue::Binary(raw.to_vec()),
        },
    };
    Ok(cell)
}

/// Types whose binary representation is their UTF-8 text
fn is_text_like(ty: &Type) -> bool {
    matches!(ty.kind(), Kind::Enum(_))
        || matches!(
            ty.name(),
            "text" | "varchar" | "bpchar" | "char" | "name" | "json" | "xml" | "citext"
                | "unknown" | "ltree" | "lquery"
        )
}

fn infinity(positive: bool) -> CellValue {
    CellValue::Text(if positive { "infinity" } else { "-infinity" }.to_string())
}

fn take_i32(buf: &mut &[u8]) -> Result<i32, BoxError> {
    if buf.remaining() < 4 {
        return Err("value too short".into());
    }
    Ok(buf.get_i32())
}

fn take_i64(buf: &mut &[u8]) -> Result<i64, BoxError> {
    if buf.remaining() < 8 {
        return Err("value too short".into());
    }
    Ok(buf.get_i64())
}

/// `HH:MM:SS[.ffffff]` from microseconds, with a leading `-` for negative spans
fn format_clock(micros: i64) -> String {
    let sign = if micros < 0 { "-" } else { "" };
    let micros = micros.unsigned_abs();
    let secs = micros / 1_000_000;
    let mut text = format!("{}{:02}:{:02}:{:02}", sign, secs / 3600, secs / 60 % 60, secs % 60);
    let frac = micros % 1_000_000;
    if frac != 0 {
        text.push_str(format!(".{:06}", frac).trim_end_matches('0'));
    }
    text
}

/// Interval as microseconds, days and months, rendered the way PostgreSQL prints it
fn decode_interval(raw: &[u8]) -> Result<String, BoxError> {
    let mut buf = raw;
    let micros = take_i64(&mut buf)?;
    let days = take_i32(&mut buf)?;
    let months = take_i32(&mut buf)?;

    let plural = |n: i32, unit: &str, units: &str| {
        format!("{} {}", n, if n == 1 { unit } else { units })
    };
    let mut parts = Vec::new();
    if months / 12 != 0 {
        parts.push(plural(months / 12, "year", "years"));
    }
    if months % 12 != 0 {
        parts.push(plural(months % 12, "mon", "mons"));
    }
    if days != 0 {
        parts.push(plural(days, "day", "days"));
    }
    if micros != 0 || parts.is_empty() {
        parts.push(format_clock(micros));
    }
    Ok(parts.join(" "))
}

/// Time of day plus the zone offset, which the wire format stores in seconds west of UTC
fn decode_timetz(raw: &[u8]) -> Result<String, BoxError> {
    let mut buf = raw;
    let micros = take_i64(&mut buf)?;
    let west = take_i32(&mut buf)?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(
        u32::try_from(micros / 1_000_000)?,
        u32::try_from(micros % 1_000_000 * 1000)?,
    )
    .ok_or("time of day out of range")?;
    let offset = FixedOffset::west_opt(west).ok_or("zone offset out of range")?;
    Ok(format!("{}{}", time.format(coerce::TIME_FORMAT), offset))
}

/// Address family, netmask bits, cidr flag, address length, then the address bytes
fn decode_inet(raw: &[u8]) -> Result<String, BoxError> {
    let [_family, bits, is_cidr, len, addr @ ..] = raw else {
        return Err("inet value too short".into());
    };
    let ip = match (*len, addr.len()) {
        (4, 4) => IpAddr::from(<[u8; 4]>::try_from(addr)?),
        (16, 16) => IpAddr::from(<[u8; 16]>::try_from(addr)?),
        _ => return Err("invalid inet address length".into()),
    };
    let full = if ip.is_ipv4() { 32 } else { 128 };
    if *bits == full && *is_cidr == 0 {
        Ok(ip.to_string())
    } else {
        Ok(format!("{}/{}", ip, bits))
    }
}

/// Array in PostgreSQL's text form, e.g. `{1,2}` or `{{a,NULL},{"b c",d}}`
fn decode_array(member: &Type, raw: &[u8]) -> Result<String, BoxError> {
    let mut buf = raw;
    let ndim = usize::try_from(take_i32(&mut buf)?)?;
    let _has_nulls = take_i32(&mut buf)?;
    let _element_oid = take_i32(&mut buf)?;

    let mut dims = Vec::with_capacity(ndim);
    for _ in 0..ndim {
        dims.push(usize::try_from(take_i32(&mut buf)?)?);
        let _lower_bound = take_i32(&mut buf)?;
    }

    let count: usize = if dims.is_empty() { 0 } else { dims.iter().product() };
    let mut elements = Vec::with_capacity(count);
    for _ in 0..count {
        let len = take_i32(&mut buf)?;
        if len < 0 {
            elements.push("NULL".to_string());
            continue;
        }
        let len = usize::try_from(len)?;
        if buf.remaining() < len {
            return Err("array element truncated".into());
        }
        let cell = cell_from_sql(member, Some(&buf[..len]))?;
        buf.advance(len);
        elements.push(quote_array_element(coerce::coerce(&cell)));
    }

    let mut out = String::new();
    let mut elements = elements.into_iter();
    write_array_dims(&dims, &mut elements, &mut out);
    if dims.is_empty() {
        out.push_str("{}");
    }
    Ok(out)
}

fn write_array_dims(dims: &[usize], elements: &mut impl Iterator<Item = String>, out: &mut String) {
    let Some((len, inner)) = dims.split_first() else {
        return;
    };
    out.push('{');
    for i in 0..*len {
        if i > 0 {
            out.push(',');
        }
        if inner.is_empty() {
            out.push_str(&elements.next().unwrap_or_default());
        } else {
            write_array_dims(inner, elements, out);
        }
    }
    out.push('}');
}

fn quote_array_element(text: String) -> String {
    let needs_quotes = text.is_empty()
        || text.eq_ignore_ascii_case("null")
        || text
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '{' | '}' | ',' | '"' | '\\'));
    if !needs_quotes {
        return text;
    }
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Decode a NUMERIC value.
///
/// Layout: ndigits, weight, sign, dscale (all 16 bit) followed by ndigits base-10000
/// digits. The first digit is multiplied by 10000^weight.
pub fn decode_numeric(raw: &[u8]) -> Result<CellValue, BoxError> {
    if raw.len() < 8 {
        return Err("numeric value too short".into());
    }
    let mut buf = raw;
    let ndigits = buf.get_i16();
    let weight = buf.get_i16();
    let sign = buf.get_u16();
    let dscale = buf.get_u16() as usize;

    let ndigits = usize::try_from(ndigits).map_err(|_| "negative numeric digit count")?;
    if buf.len() != ndigits * 2 {
        return Err("numeric digit count does not match value length".into());
    }

    let negative = match sign {
        NUMERIC_POS => false,
        NUMERIC_NEG => true,
        NUMERIC_NAN => return Ok(CellValue::Float(f64::NAN)),
        NUMERIC_PINF => return Ok(CellValue::Float(f64::INFINITY)),
        NUMERIC_NINF => return Ok(CellValue::Float(f64::NEG_INFINITY)),
        other => return Err(format!("invalid numeric sign 0x{:04X}", other).into()),
    };

    let mut digits = Vec::with_capacity(ndigits);
    for _ in 0..ndigits {
        let digit = buf.get_i16();
        if !(0..10000).contains(&digit) {
            return Err(format!("invalid numeric digit {}", digit).into());
        }
        digits.push(digit);
    }
    let digit_at = |pos: i32| -> i16 {
        usize::try_from(pos)
            .ok()
            .and_then(|p| digits.get(p).copied())
            .unwrap_or(0)
    };

    let weight = i32::from(weight);
    let mut int_part = String::new();
    for pos in 0..=weight {
        if pos == 0 {
            int_part.push_str(&digit_at(pos).to_string());
        } else {
            int_part.push_str(&format!("{:04}", digit_at(pos)));
        }
    }
    if int_part.is_empty() {
        int_part.push('0');
    }

    let mut frac_part = String::with_capacity(dscale + NBASE_DIGITS);
    let mut pos = weight + 1;
    while frac_part.len() < dscale {
        frac_part.push_str(&format!("{:04}", digit_at(pos)));
        pos += 1;
    }
    frac_part.truncate(dscale);

    let literal = format!("{}{}.{}", if negative { "-" } else { "" }, int_part, frac_part);
    Ok(CellValue::Decimal(Decimal::parse(&literal)?))
}

/// Encode a decimal as a binary NUMERIC value
pub fn encode_numeric(value: &Decimal, out: &mut BytesMut) -> Result<(), BoxError> {
    let int = value.int_digits();
    let frac = value.frac_digits();
    let int_str = format!("{}{}", "0".repeat((NBASE_DIGITS - int.len() % NBASE_DIGITS) % NBASE_DIGITS), int);
    let frac_str = format!("{}{}", frac, "0".repeat((NBASE_DIGITS - frac.len() % NBASE_DIGITS) % NBASE_DIGITS));

    let group = |chunk: &[u8]| chunk.iter().fold(0i16, |acc, b| acc * 10 + i16::from(b - b'0'));
    let mut groups: Vec<i16> = int_str
        .as_bytes()
        .chunks(NBASE_DIGITS)
        .chain(frac_str.as_bytes().chunks(NBASE_DIGITS))
        .map(group)
        .collect();

    let mut weight = (int_str.len() / NBASE_DIGITS) as i32 - 1;
    let leading = groups.iter().take_while(|g| **g == 0).count();
    groups.drain(..leading);
    weight -= leading as i32;
    while groups.last() == Some(&0) {
        groups.pop();
    }
    if groups.is_empty() {
        weight = 0;
    }

    out.put_i16(i16::try_from(groups.len())?);
    out.put_i16(i16::try_from(weight)?);
    out.put_u16(if value.is_negative() { NUMERIC_NEG } else { NUMERIC_POS });
    out.put_u16(u16::try_from(frac.len())?);
    for g in groups {
        out.put_i16(g);
    }
    Ok(())
}

fn int_to_sql(value: i64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => i16::try_from(value)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(value)?.to_sql(ty, out),
        Type::INT8 => value.to_sql(ty, out),
        Type::OID => u32::try_from(value)?.to_sql(ty, out),
        Type::FLOAT4 => (value as f32).to_sql(ty, out),
        Type::FLOAT8 => (value as f64).to_sql(ty, out),
        Type::BOOL => (value != 0).to_sql(ty, out),
        Type::NUMERIC => {
            encode_numeric(&Decimal::from(value), out)?;
            Ok(IsNull::No)
        }
        _ => text_to_sql(&value.to_string(), ty, out),
    }
}

fn float_to_sql(value: f64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::FLOAT4 => (value as f32).to_sql(ty, out),
        Type::FLOAT8 => value.to_sql(ty, out),
        Type::NUMERIC => {
            encode_numeric(&Decimal::parse(&value.to_string())?, out)?;
            Ok(IsNull::No)
        }
        Type::INT2 | Type::INT4 | Type::INT8 if value.fract() == 0.0 => int_to_sql(value as i64, ty, out),
        _ => text_to_sql(&value.to_string(), ty, out),
    }
}

fn decimal_to_sql(value: &Decimal, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::NUMERIC => {
            encode_numeric(value, out)?;
            Ok(IsNull::No)
        }
        Type::FLOAT4 | Type::FLOAT8 => float_to_sql(value.to_f64(), ty, out),
        _ => text_to_sql(&value.to_string(), ty, out),
    }
}

/// Encode text for the parameter type the server inferred
fn text_to_sql(text: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => int_to_sql(text.trim().parse()?, ty, out),
        Type::FLOAT4 | Type::FLOAT8 => float_to_sql(text.trim().parse()?, ty, out),
        Type::NUMERIC => decimal_to_sql(&Decimal::parse(text)?, ty, out),
        Type::BOOL => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "on" | "1" => true.to_sql(ty, out),
            "false" | "f" | "no" | "off" | "0" => false.to_sql(ty, out),
            _ => Err(format!("invalid boolean '{}'", text).into()),
        },
        Type::DATE => NaiveDate::parse_from_str(text, coerce::DATE_FORMAT)?.to_sql(ty, out),
        Type::TIME => NaiveTime::parse_from_str(text, coerce::TIME_FORMAT)?.to_sql(ty, out),
        Type::TIMESTAMP => NaiveDateTime::parse_from_str(text, coerce::TIMESTAMP_FORMAT)?.to_sql(ty, out),
        Type::TIMESTAMPTZ => DateTime::parse_from_str(text, coerce::TIMESTAMP_TZ_FORMAT)
            .or_else(|_| DateTime::parse_from_rfc3339(text))?
            .to_sql(ty, out),
        Type::UUID => {
            out.put_slice(uuid::Uuid::parse_str(text)?.as_bytes());
            Ok(IsNull::No)
        }
        Type::JSONB => {
            out.put_u8(1);
            out.put_slice(text.as_bytes());
            Ok(IsNull::No)
        }
        _ => {
            out.put_slice(text.as_bytes());
            Ok(IsNull::No)
        }
    }
}

impl ToSql for CellValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            CellValue::Null => Ok(IsNull::Yes),
            CellValue::Bool(b) => match *ty {
                Type::BOOL => b.to_sql(ty, out),
                Type::INT2 | Type::INT4 | Type::INT8 => int_to_sql(i64::from(*b), ty, out),
                _ => text_to_sql(if *b { "true" } else { "false" }, ty, out),
            },
            CellValue::Int(i) => int_to_sql(*i, ty, out),
            CellValue::Decimal(d) => decimal_to_sql(d, ty, out),
            CellValue::Float(f) => float_to_sql(*f, ty, out),
            CellValue::Text(s) => text_to_sql(s, ty, out),
            CellValue::Date(d) if *ty == Type::DATE => d.to_sql(ty, out),
            CellValue::Time(t) if *ty == Type::TIME => t.to_sql(ty, out),
            CellValue::Timestamp(ts) if *ty == Type::TIMESTAMP => ts.to_sql(ty, out),
            CellValue::TimestampTz(ts) if *ty == Type::TIMESTAMPTZ => ts.to_sql(ty, out),
            CellValue::Binary(b) => {
                out.put_slice(b);
                Ok(IsNull::No)
            }
            other => text_to_sql(&coerce::coerce(other), ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}
