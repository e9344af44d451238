use std::collections::BTreeMap;

use super::{BencodeError, Value};

/// Deepest container nesting accepted by [`decode`].
pub const MAX_DEPTH: usize = 256;

/// Decodes exactly one value starting at `start`.
///
/// Returns the value and the offset of the first byte after it, so callers can
/// keep decoding from there. Containers nested deeper than [`MAX_DEPTH`] are
/// rejected with [`BencodeError::TooDeep`].
pub fn decode(buf: &[u8], start: usize) -> Result<(Value, usize), BencodeError> {
    decode_nested(buf, start, 0)
}

fn decode_nested(buf: &[u8], start: usize, depth: usize) -> Result<(Value, usize), BencodeError> {
    match buf.get(start) {
        None => Err(BencodeError::UnexpectedEof(start)),
        Some(b'i') => decode_integer(buf, start),
        Some(b'l' | b'd') if depth == MAX_DEPTH => Err(BencodeError::TooDeep(start)),
        Some(b'l') => decode_list(buf, start, depth + 1),
        Some(b'd') => decode_dict(buf, start, depth + 1),
        Some(b'0'..=b'9') => {
            let (bytes, next) = decode_bytes(buf, start)?;
            Ok((Value::Bytes(bytes.to_vec()), next))
        }
        Some(&byte) => Err(BencodeError::UnexpectedByte {
            byte,
            offset: start,
        }),
    }
}

/// Decodes a buffer that must hold a single value and nothing else.
pub fn decode_all(buf: &[u8]) -> Result<Value, BencodeError> {
    let (value, next) = decode(buf, 0)?;
    if next != buf.len() {
        return Err(BencodeError::TrailingData(buf.len() - next));
    }
    Ok(value)
}

fn decode_integer(buf: &[u8], start: usize) -> Result<(Value, usize), BencodeError> {
    let body_start = start + 1;
    let end = find(buf, body_start, b'e')?;
    let text = std::str::from_utf8(&buf[body_start..end]).map_err(|_| {
        BencodeError::InvalidInteger {
            text: String::from_utf8_lossy(&buf[body_start..end]).into_owned(),
            offset: start,
        }
    })?;
    let i = text
        .parse::<i64>()
        .map_err(|_| BencodeError::InvalidInteger {
            text: text.to_string(),
            offset: start,
        })?;
    Ok((Value::Integer(i), end + 1))
}

/// Parses `<len>:<bytes>` and returns the borrowed content plus the next offset.
pub(super) fn decode_bytes(buf: &[u8], start: usize) -> Result<(&[u8], usize), BencodeError> {
    let colon = find(buf, start, b':')?;
    let digits = &buf[start..colon];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(BencodeError::InvalidLength(start));
    }
    let len = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or(BencodeError::InvalidLength(start))?;

    let content_start = colon + 1;
    let content_end = content_start
        .checked_add(len)
        .filter(|&end| end <= buf.len())
        .ok_or(BencodeError::UnexpectedEof(buf.len()))?;
    Ok((&buf[content_start..content_end], content_end))
}

fn decode_list(buf: &[u8], start: usize, depth: usize) -> Result<(Value, usize), BencodeError> {
    let mut pos = start + 1;
    let mut list = Vec::new();
    loop {
        match buf.get(pos) {
            None => return Err(BencodeError::UnexpectedEof(pos)),
            Some(b'e') => return Ok((Value::List(list), pos + 1)),
            Some(_) => {
                let (value, next) = decode_nested(buf, pos, depth)?;
                list.push(value);
                pos = next;
            }
        }
    }
}

fn decode_dict(buf: &[u8], start: usize, depth: usize) -> Result<(Value, usize), BencodeError> {
    let mut pos = start + 1;
    let mut dict = BTreeMap::new();
    loop {
        match buf.get(pos) {
            None => return Err(BencodeError::UnexpectedEof(pos)),
            Some(b'e') => return Ok((Value::Dict(dict), pos + 1)),
            Some(b'0'..=b'9') => {
                let (key, next) = decode_bytes(buf, pos)?;
                let (value, next) = decode_nested(buf, next, depth)?;
                dict.insert(key.to_vec(), value);
                pos = next;
            }
            Some(_) => return Err(BencodeError::NonStringKey(pos)),
        }
    }
}

fn find(buf: &[u8], from: usize, needle: u8) -> Result<usize, BencodeError> {
    buf.get(from..)
        .and_then(|rest| rest.iter().position(|&b| b == needle))
        .map(|i| from + i)
        .ok_or(BencodeError::UnexpectedEof(buf.len()))
}
