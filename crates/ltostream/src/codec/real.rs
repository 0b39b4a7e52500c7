//! Real constants as canonical hexadecimal strings.
//!
//! The text is an exact rendering of the IEEE double, so reading it back
//! reproduces every bit, signed zeros and NaN payloads included.

use crate::error::{Result, StreamError};

const MANTISSA_BITS: u32 = 52;
const MANTISSA_MASK: u64 = (1 << MANTISSA_BITS) - 1;
const EXP_MASK: u64 = 0x7ff;
const EXP_BIAS: i64 = 1023;
const MANTISSA_DIGITS: usize = 13;

pub fn format_real(bits: u64) -> String {
    let sign = if bits >> 63 != 0 { "-" } else { "" };
    let exp = (bits >> MANTISSA_BITS) & EXP_MASK;
    let mantissa = bits & MANTISSA_MASK;
    match (exp, mantissa) {
        (EXP_MASK, 0) => format!("{sign}inf"),
        (EXP_MASK, payload) => format!("{sign}nan:0x{payload:x}"),
        (0, 0) => format!("{sign}0x0p+0"),
        (0, m) => format!("{sign}0x0.{m:013x}p-1022"),
        (e, m) => {
            let digits = format!("{m:013x}");
            let digits = digits.trim_end_matches('0');
            let e = e as i64 - EXP_BIAS;
            if digits.is_empty() {
                format!("{sign}0x1p{e:+}")
            } else {
                format!("{sign}0x1.{digits}p{e:+}")
            }
        }
    }
}

fn bad(text: &str) -> StreamError {
    StreamError::BadReal(text.to_string())
}

/// Mantissa digits, right-padded to the full 52 bits.
fn parse_digits(text: &str, digits: &str) -> Result<u64> {
    if digits.is_empty()
        || digits.len() > MANTISSA_DIGITS
        || !digits.bytes().all(|b| b.is_ascii_hexdigit())
    {
        return Err(bad(text));
    }
    let value = u64::from_str_radix(digits, 16).map_err(|_| bad(text))?;
    Ok(value << (4 * (MANTISSA_DIGITS - digits.len())))
}

pub fn parse_real(text: &str) -> Result<u64> {
    let (sign, body) = match text.strip_prefix('-') {
        Some(rest) => (1u64 << 63, rest),
        None => (0, text),
    };
    let magnitude = if body == "inf" {
        EXP_MASK << MANTISSA_BITS
    } else if let Some(payload) = body.strip_prefix("nan:0x") {
        let payload = u64::from_str_radix(payload, 16).map_err(|_| bad(text))?;
        if payload == 0 || payload > MANTISSA_MASK {
            return Err(bad(text));
        }
        (EXP_MASK << MANTISSA_BITS) | payload
    } else if body == "0x0p+0" {
        0
    } else if let Some(digits) = body
        .strip_prefix("0x0.")
        .and_then(|rest| rest.strip_suffix("p-1022"))
    {
        parse_digits(text, digits)?
    } else if let Some(rest) = body.strip_prefix("0x1") {
        let (digits, exp) = rest.split_once('p').ok_or_else(|| bad(text))?;
        let mantissa = match digits.strip_prefix('.') {
            Some(d) => parse_digits(text, d)?,
            None if digits.is_empty() => 0,
            None => return Err(bad(text)),
        };
        let exp: i64 = exp.parse().map_err(|_| bad(text))?;
        if !(1 - EXP_BIAS..=EXP_BIAS).contains(&exp) {
            return Err(bad(text));
        }
        (((exp + EXP_BIAS) as u64) << MANTISSA_BITS) | mantissa
    } else {
        return Err(bad(text));
    };
    Ok(sign | magnitude)
}
