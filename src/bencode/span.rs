use std::ops::Range;

use super::{decode::decode_bytes, BencodeError};

/// Finds the byte range of the value stored under `key_path`, starting at the
/// top-level dictionary of `buf`.
///
/// Nothing is materialized: values are skipped by tracking open containers.
/// Returns `Ok(None)` if a key along the path is missing or a value on the
/// path is not a dictionary.
pub fn locate_value_span(
    buf: &[u8],
    key_path: &[&[u8]],
) -> Result<Option<Range<usize>>, BencodeError> {
    let mut dict_start = 0;
    for (depth, key) in key_path.iter().enumerate() {
        let Some(span) = find_in_dict(buf, dict_start, key)? else {
            return Ok(None);
        };
        if depth + 1 == key_path.len() {
            return Ok(Some(span));
        }
        if buf[span.start] != b'd' {
            return Ok(None);
        }
        dict_start = span.start;
    }
    Ok(None)
}

/// Scans the dictionary starting at `start` for `key`.
fn find_in_dict(buf: &[u8], start: usize, key: &[u8]) -> Result<Option<Range<usize>>, BencodeError> {
    match buf.get(start) {
        Some(b'd') => {}
        Some(&byte) => {
            return Err(BencodeError::UnexpectedByte {
                byte,
                offset: start,
            })
        }
        None => return Err(BencodeError::UnexpectedEof(start)),
    }

    let mut pos = start + 1;
    loop {
        match buf.get(pos) {
            None => return Err(BencodeError::UnexpectedEof(pos)),
            Some(b'e') => return Ok(None),
            Some(b'0'..=b'9') => {
                let (k, value_start) = decode_bytes(buf, pos)?;
                let value_end = skip_value(buf, value_start)?;
                if k == key {
                    return Ok(Some(value_start..value_end));
                }
                pos = value_end;
            }
            Some(_) => return Err(BencodeError::NonStringKey(pos)),
        }
    }
}

/// Returns the offset right after the value starting at `start`.
fn skip_value(buf: &[u8], start: usize) -> Result<usize, BencodeError> {
    // open `l`/`d` markers
    let mut stack: Vec<u8> = Vec::new();
    let mut pos = start;
    loop {
        let byte = *buf.get(pos).ok_or(BencodeError::UnexpectedEof(pos))?;
        match byte {
            b'l' | b'd' => {
                stack.push(byte);
                pos += 1;
            }
            b'e' => {
                if stack.pop().is_none() {
                    return Err(BencodeError::Unbalanced(pos));
                }
                pos += 1;
            }
            b'i' => {
                let end = buf[pos..]
                    .iter()
                    .position(|&b| b == b'e')
                    .ok_or(BencodeError::UnexpectedEof(buf.len()))?;
                pos += end + 1;
            }
            b'0'..=b'9' => {
                let (_, next) = decode_bytes(buf, pos)?;
                pos = next;
            }
            byte => return Err(BencodeError::UnexpectedByte { byte, offset: pos }),
        }
        if stack.is_empty() {
            return Ok(pos);
        }
    }
}
