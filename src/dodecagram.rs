/// Dodecagram (base-12) codec
///
/// Encodes arbitrary-length big-endian byte strings and `u64` values as
/// base-12 text using the digit alphabet `0123456789ab`. Decoding accepts
/// `A`/`B` as aliases for `a`/`b` and skips `_` and space as visual
/// separators. A leading `+` or `-` is accepted and dropped; the byte
/// representation carries no sign.
///
/// Scaled forms place a radix point: `encode_bytes_scaled(&[20], 1)` yields
/// `"1.8"`, and [`decode_scaled`] reports the number of fractional digits
/// alongside the magnitude so the pair round-trips.
use crate::types::{Result, RuntimeError};

const DIGITS: &[u8; 12] = b"0123456789ab";

/// Encode a big-endian byte string as base-12 text. Leading zero bytes do
/// not affect the result; empty and all-zero inputs encode as `"0"`.
pub fn encode_bytes(bytes: &[u8]) -> String {
    let mut n: Vec<u8> = bytes.iter().copied().skip_while(|&b| b == 0).collect();
    if n.is_empty() {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while !n.is_empty() {
        // long division of the big-endian byte string by 12
        let mut rem = 0u32;
        let mut quotient = Vec::with_capacity(n.len());
        for &byte in &n {
            let acc = rem * 256 + byte as u32;
            quotient.push((acc / 12) as u8);
            rem = acc % 12;
        }
        digits.push(DIGITS[rem as usize] as char);
        let leading = quotient.iter().take_while(|&&b| b == 0).count();
        quotient.drain(..leading);
        n = quotient;
    }
    digits.iter().rev().collect()
}

/// Encode with `scale` fractional digits, e.g. scale 2 turns `"18"` into
/// `"0.18"`. Scale 0 is the plain integer form.
pub fn encode_bytes_scaled(bytes: &[u8], scale: usize) -> String {
    let s = encode_bytes(bytes);
    if scale == 0 {
        return s;
    }
    if s.len() <= scale {
        format!("0.{}{}", "0".repeat(scale - s.len()), s)
    } else {
        format!("{}.{}", &s[..s.len() - scale], &s[s.len() - scale..])
    }
}

/// Decode base-12 text into a minimal big-endian byte string. Zero decodes
/// to a single `0x00` byte. A radix point is not accepted here; use
/// [`decode_scaled`] for fractional forms.
pub fn decode(text: &str) -> Result<Vec<u8>> {
    let (bytes, scale) = decode_scaled(text)?;
    if scale != 0 {
        return Err(RuntimeError::InvalidArgument(
            "dodecagram decode: unexpected radix point".to_string(),
        ));
    }
    Ok(bytes)
}

/// Decode base-12 text that may carry a radix point, returning the
/// magnitude as a minimal big-endian byte string together with the number
/// of fractional digits.
pub fn decode_scaled(text: &str) -> Result<(Vec<u8>, usize)> {
    let s = text.trim();
    if s.is_empty() {
        return Err(RuntimeError::InvalidArgument(
            "dodecagram decode: empty input".to_string(),
        ));
    }
    // sign is accepted but not represented in the byte form
    let s = s.strip_prefix(['+', '-']).unwrap_or(s);
    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s, ""),
    };

    let mut acc: Vec<u8> = Vec::new();
    let mut scale = 0;
    for (part, fractional) in [(int_part, false), (frac_part, true)] {
        for c in part.chars() {
            if c == '_' || c == ' ' {
                continue;
            }
            let d = digit_value(c)?;
            mul12_add(&mut acc, d);
            if fractional {
                scale += 1;
            }
        }
    }
    if acc.is_empty() {
        acc.push(0);
    }
    Ok((acc, scale))
}

/// Encode a `u64` as base-12 text.
pub fn encode_u64(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n != 0 {
        digits.push(DIGITS[(n % 12) as usize] as char);
        n /= 12;
    }
    digits.iter().rev().collect()
}

/// Decode base-12 text into a `u64`, failing on overflow. Separators and a
/// leading sign are handled as in [`decode`]; the sign is dropped.
pub fn decode_u64(text: &str) -> Result<u64> {
    let s = text.trim();
    if s.is_empty() {
        return Err(RuntimeError::InvalidArgument(
            "dodecagram decode: empty input".to_string(),
        ));
    }
    let s = s.strip_prefix(['+', '-']).unwrap_or(s);
    let mut val: u64 = 0;
    let mut seen = false;
    for c in s.chars() {
        if c == '_' || c == ' ' {
            continue;
        }
        let d = digit_value(c)?;
        val = val
            .checked_mul(12)
            .and_then(|v| v.checked_add(d as u64))
            .ok_or_else(|| {
                RuntimeError::InvalidArgument(format!(
                    "dodecagram decode: '{}' overflows u64",
                    text.trim()
                ))
            })?;
        seen = true;
    }
    if !seen {
        return Err(RuntimeError::InvalidArgument(
            "dodecagram decode: no digits".to_string(),
        ));
    }
    Ok(val)
}

fn digit_value(c: char) -> Result<u32> {
    match c {
        '0'..='9' => Ok(c as u32 - '0' as u32),
        'a' | 'A' => Ok(10),
        'b' | 'B' => Ok(11),
        other => Err(RuntimeError::InvalidArgument(format!(
            "dodecagram decode: invalid digit '{}'",
            other
        ))),
    }
}

/// Multiply the big-endian accumulator by 12 and add a digit.
fn mul12_add(acc: &mut Vec<u8>, d: u32) {
    let mut carry = d;
    for byte in acc.iter_mut().rev() {
        let v = *byte as u32 * 12 + carry;
        *byte = (v & 0xff) as u8;
        carry = v >> 8;
    }
    while carry > 0 {
        acc.insert(0, (carry & 0xff) as u8);
        carry >>= 8;
    }
}
