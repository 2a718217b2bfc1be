use super::{BencodeValue, Dict};
use crate::error::{BittorrentError, Result};

/// Nesting limit for lists and dictionaries
const MAX_DEPTH: usize = 64;

/// Decode bencoded data into a BencodeValue
pub fn decode(data: &[u8]) -> Result<BencodeValue> {
    let mut pos = 0;
    decode_value(data, &mut pos, 0)
}

fn decode_value(data: &[u8], pos: &mut usize, depth: usize) -> Result<BencodeValue> {
    if *pos >= data.len() {
        return Err(BittorrentError::BencodeError(
            "Unexpected end of input".to_string(),
        ));
    }

    if depth > MAX_DEPTH {
        return Err(BittorrentError::BencodeError(
            "Nesting too deep".to_string(),
        ));
    }

    match data[*pos] {
        b'i' => decode_integer(data, pos),
        b'l' => decode_list(data, pos, depth),
        b'd' => decode_dict(data, pos, depth),
        b'0'..=b'9' => decode_string(data, pos).map(BencodeValue::String),
        c => Err(BittorrentError::BencodeError(format!(
            "Invalid bencode token: {}",
            c as char
        ))),
    }
}

fn decode_integer(data: &[u8], pos: &mut usize) -> Result<BencodeValue> {
    *pos += 1; // Skip 'i'

    let start = *pos;
    while *pos < data.len() && data[*pos] != b'e' {
        *pos += 1;
    }

    if *pos >= data.len() {
        return Err(BittorrentError::BencodeError(
            "Unterminated integer".to_string(),
        ));
    }

    let digits = &data[start..*pos];

    // i-0e and leading zeros would not re-encode to the same bytes
    let canonical = match digits {
        [] | [b'-'] => false,
        [b'-', b'0', ..] => false,
        [b'0', _, ..] => false,
        _ => true,
    };
    if !canonical {
        return Err(BittorrentError::BencodeError(format!(
            "Non-canonical integer: {}",
            String::from_utf8_lossy(digits)
        )));
    }

    let num = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| BittorrentError::BencodeError("Invalid integer".to_string()))?;

    *pos += 1; // Skip 'e'

    Ok(BencodeValue::Integer(num))
}

fn decode_string(data: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    let start = *pos;
    while *pos < data.len() && data[*pos] != b':' {
        *pos += 1;
    }

    if *pos >= data.len() {
        return Err(BittorrentError::BencodeError(
            "Invalid string length".to_string(),
        ));
    }

    let digits = &data[start..*pos];
    // Same rule as integers: only the shortest decimal form re-encodes identically
    let canonical = match digits {
        [] => false,
        [b'0', _, ..] => false,
        _ => digits.iter().all(u8::is_ascii_digit),
    };
    if !canonical {
        return Err(BittorrentError::BencodeError(format!(
            "Non-canonical string length: {}",
            String::from_utf8_lossy(digits)
        )));
    }
    let len = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| BittorrentError::BencodeError("Invalid string length".to_string()))?;

    *pos += 1; // Skip ':'

    if len > data.len() - *pos {
        return Err(BittorrentError::BencodeError(
            "String length exceeds data".to_string(),
        ));
    }

    let string = data[*pos..*pos + len].to_vec();
    *pos += len;

    Ok(string)
}

fn decode_list(data: &[u8], pos: &mut usize, depth: usize) -> Result<BencodeValue> {
    *pos += 1; // Skip 'l'

    let mut list = Vec::new();

    while *pos < data.len() && data[*pos] != b'e' {
        list.push(decode_value(data, pos, depth + 1)?);
    }

    if *pos >= data.len() {
        return Err(BittorrentError::BencodeError(
            "Unterminated list".to_string(),
        ));
    }

    *pos += 1; // Skip 'e'

    Ok(BencodeValue::List(list))
}

fn decode_dict(data: &[u8], pos: &mut usize, depth: usize) -> Result<BencodeValue> {
    *pos += 1; // Skip 'd'

    let mut dict = Dict::new();

    while *pos < data.len() && data[*pos] != b'e' {
        // Keys must be strings
        if !data[*pos].is_ascii_digit() {
            return Err(BittorrentError::BencodeError(
                "Dictionary key must be a string".to_string(),
            ));
        }
        let key = decode_string(data, pos)?;
        if dict.contains_key(&key) {
            return Err(BittorrentError::BencodeError(format!(
                "Duplicate dictionary key: {}",
                String::from_utf8_lossy(&key)
            )));
        }

        let value = decode_value(data, pos, depth + 1)?;
        dict.insert(key, value);
    }

    if *pos >= data.len() {
        return Err(BittorrentError::BencodeError(
            "Unterminated dictionary".to_string(),
        ));
    }

    *pos += 1; // Skip 'e'

    Ok(BencodeValue::Dict(dict))
}
