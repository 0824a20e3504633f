//! MIME encoding and decoding utilities.
//!
//! Supports Base64, Quoted-Printable, and RFC 2047 header encoding.

use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Maximum encoded line length for Base64 and Quoted-Printable bodies (RFC 2045).
pub const MAX_LINE_LENGTH: usize = 76;

/// Longest run of raw bytes packed into one RFC 2047 encoded word.
///
/// 45 bytes encode to 60 Base64 characters, which together with the
/// `=?utf-8?B?` prefix and `?=` suffix stays under the 75 character limit.
const ENCODED_WORD_CHUNK: usize = 45;

const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Encodes data as Base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Encodes data as Base64, wrapped into CRLF-separated lines of 76 characters.
#[must_use]
pub fn encode_base64_wrapped(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut result = String::with_capacity(encoded.len() + encoded.len() / MAX_LINE_LENGTH * 2);

    // Base64 output is pure ASCII, so byte-chunking never splits a character.
    for (i, chunk) in encoded.as_bytes().chunks(MAX_LINE_LENGTH).enumerate() {
        if i > 0 {
            result.push_str("\r\n");
        }
        result.extend(chunk.iter().map(|&b| char::from(b)));
    }

    result
}

/// Decodes Base64 data.
///
/// Whitespace (including line breaks) is ignored.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(cleaned).map_err(Into::into)
}

/// Encodes text using Quoted-Printable encoding (RFC 2045).
///
/// Line breaks in the input (`\n` or `\r\n`) become hard CRLF line breaks in
/// the output; every other byte that is not printable ASCII is escaped.
/// Trailing whitespace on a line is escaped so transports cannot strip it.
#[must_use]
pub fn encode_quoted_printable(text: &str) -> String {
    let mut result = String::with_capacity(text.len() + text.len() / 8);

    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            result.push_str("\r\n");
        }
        let line = line.strip_suffix('\r').unwrap_or(line);
        encode_qp_line(line.as_bytes(), &mut result);
    }

    result
}

/// Encodes arbitrary bytes using Quoted-Printable encoding.
///
/// Unlike [`encode_quoted_printable`], CR and LF bytes are escaped so the
/// exact input bytes survive a round trip. Use this for text attachments
/// whose line endings must be preserved.
#[must_use]
pub fn encode_quoted_printable_bytes(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len() + data.len() / 8);
    encode_qp_line(data, &mut result);
    result
}

fn encode_qp_line(line: &[u8], out: &mut String) {
    let mut column = 0;

    for (i, &byte) in line.iter().enumerate() {
        let is_last = i + 1 == line.len();
        let literal = match byte {
            b'!'..=b'<' | b'>'..=b'~' => true,
            b' ' | b'\t' => !is_last,
            _ => false,
        };
        let width = if literal { 1 } else { 3 };

        // Leave room for the trailing '=' of a soft line break.
        if column + width > MAX_LINE_LENGTH - 1 {
            out.push_str("=\r\n");
            column = 0;
        }

        if literal {
            out.push(char::from(byte));
        } else {
            out.push('=');
            out.push(char::from(HEX[usize::from(byte >> 4)]));
            out.push(char::from(HEX[usize::from(byte & 0x0F)]));
        }
        column += width;
    }
}

/// Decodes Quoted-Printable data into raw bytes (RFC 2045).
///
/// # Errors
///
/// Returns an error if the input contains invalid escape sequences.
pub fn decode_quoted_printable_bytes(text: &str) -> Result<Vec<u8>> {
    let bytes = text.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let byte = bytes[i];
        if byte != b'=' {
            result.push(byte);
            i += 1;
            continue;
        }

        // Soft line break
        match bytes.get(i + 1..i + 3) {
            Some([b'\r', b'\n']) => {
                i += 3;
                continue;
            }
            Some([b'\n', _]) => {
                i += 2;
                continue;
            }
            _ => {}
        }
        if bytes.get(i + 1) == Some(&b'\n') {
            i += 2;
            continue;
        }

        // Hex encoded byte
        let hex = bytes
            .get(i + 1..i + 3)
            .ok_or_else(|| Error::InvalidEncoding("Incomplete escape sequence".to_string()))?;
        let high = hex_value(hex[0])?;
        let low = hex_value(hex[1])?;
        result.push((high << 4) | low);
        i += 3;
    }

    Ok(result)
}

/// Decodes Quoted-Printable text (RFC 2045).
///
/// # Errors
///
/// Returns an error if the input contains invalid escape sequences or the
/// decoded bytes are not valid UTF-8.
pub fn decode_quoted_printable(text: &str) -> Result<String> {
    let bytes = decode_quoted_printable_bytes(text)?;
    String::from_utf8(bytes).map_err(Into::into)
}

fn hex_value(byte: u8) -> Result<u8> {
    match byte {
        b'0'..=b'9' => Ok(byte - b'0'),
        b'a'..=b'f' => Ok(byte - b'a' + 10),
        b'A'..=b'F' => Ok(byte - b'A' + 10),
        _ => Err(Error::InvalidEncoding(format!(
            "Invalid hex digit: {:?}",
            char::from(byte)
        ))),
    }
}

/// Returns true if a header value can be written without RFC 2047 encoding.
#[must_use]
pub fn is_header_safe(text: &str) -> bool {
    text.bytes()
        .all(|b| (b' '..=b'~').contains(&b) || b == b'\t')
        && !text.contains("=?")
}

/// Encodes a header value using RFC 2047 encoding.
///
/// Format: `=?charset?B?encoded-text?=`. Long values are split into several
/// encoded words separated by a space, never splitting a UTF-8 character.
///
/// # Arguments
///
/// * `text` - Text to encode
/// * `charset` - Character set (e.g., "utf-8")
///
/// # Errors
///
/// Returns an error if the charset name is empty.
pub fn encode_rfc2047(text: &str, charset: &str) -> Result<String> {
    // Only encode if necessary (contains non-ASCII)
    if is_header_safe(text) {
        return Ok(text.to_string());
    }
    if charset.is_empty() {
        return Err(Error::InvalidEncoding("Empty charset".to_string()));
    }

    let mut words = Vec::new();
    let mut chunk_start = 0;
    let mut chunk_len = 0;

    for (idx, ch) in text.char_indices() {
        let len = ch.len_utf8();
        if chunk_len + len > ENCODED_WORD_CHUNK {
            words.push(encoded_word(&text[chunk_start..idx], charset));
            chunk_start = idx;
            chunk_len = 0;
        }
        chunk_len += len;
    }
    if chunk_start < text.len() {
        words.push(encoded_word(&text[chunk_start..], charset));
    }

    Ok(words.join(" "))
}

fn encoded_word(text: &str, charset: &str) -> String {
    format!("=?{charset}?B?{}?=", encode_base64(text.as_bytes()))
}

/// Decodes an RFC 2047 header value.
///
/// Handles values mixing plain text and encoded words; whitespace between
/// two adjacent encoded words is dropped as the RFC requires.
///
/// # Errors
///
/// Returns an error if an encoded word is malformed.
pub fn decode_rfc2047(text: &str) -> Result<String> {
    if !text.contains("=?") {
        return Ok(text.to_string());
    }

    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    let mut previous_was_word = false;

    while let Some(start) = rest.find("=?") {
        let before = &rest[..start];
        let Some((word, consumed)) = split_encoded_word(&rest[start..]) else {
            // Not an encoded word after all; keep it literally.
            result.push_str(&rest[..start + 2]);
            rest = &rest[start + 2..];
            previous_was_word = false;
            continue;
        };

        if !(previous_was_word && before.trim().is_empty()) {
            result.push_str(before);
        }
        result.push_str(&decode_encoded_word(word)?);
        rest = &rest[start + consumed..];
        previous_was_word = true;
    }
    result.push_str(rest);

    Ok(result)
}

/// Splits `=?charset?enc?text?=` off the front of `input`.
///
/// Returns the inner `charset?enc?text` slice and the number of bytes
/// consumed including delimiters.
fn split_encoded_word(input: &str) -> Option<(&str, usize)> {
    let inner = input.strip_prefix("=?")?;
    let charset_end = inner.find('?')?;
    let after_charset = &inner[charset_end + 1..];
    let encoding_end = after_charset.find('?')?;
    let after_encoding = &after_charset[encoding_end + 1..];
    let text_end = after_encoding.find("?=")?;
    let inner_len = charset_end + 1 + encoding_end + 1 + text_end;
    Some((&inner[..inner_len], inner_len + 4))
}

fn decode_encoded_word(word: &str) -> Result<String> {
    let parts: Vec<&str> = word.splitn(3, '?').collect();
    let [_charset, encoding, encoded_text] = parts.as_slice() else {
        return Err(Error::InvalidEncoding(
            "Invalid RFC 2047 format".to_string(),
        ));
    };

    let bytes = match encoding.to_ascii_uppercase().as_str() {
        "B" => decode_base64(encoded_text)?,
        // Quoted-Printable (with underscore for space)
        "Q" => decode_quoted_printable_bytes(&encoded_text.replace('_', " "))?,
        other => {
            return Err(Error::InvalidEncoding(format!(
                "Unknown encoding: {other}"
            )));
        }
    };

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_base64_encode_decode() {
        let data = b"Hello, World!";
        let encoded = encode_base64(data);
        assert_eq!(encoded, "SGVsbG8sIFdvcmxkIQ==");

        let decoded = decode_base64(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_base64_wrapped_line_length() {
        let data = vec![0xAB_u8; 300];
        let encoded = encode_base64_wrapped(&data);
        assert!(encoded.split("\r\n").all(|line| line.len() <= MAX_LINE_LENGTH));
        assert_eq!(decode_base64(&encoded).unwrap(), data);
    }

    #[test]
    fn test_quoted_printable_encode() {
        assert_eq!(encode_quoted_printable("Hello, World!"), "Hello, World!");

        let encoded = encode_quoted_printable("Héllo, Wørld!");
        assert!(encoded.contains("=C3"));
    }

    #[test]
    fn test_quoted_printable_hard_line_breaks() {
        let encoded = encode_quoted_printable("line one\nline two\r\nend");
        assert_eq!(encoded, "line one\r\nline two\r\nend");
    }

    #[test]
    fn test_quoted_printable_trailing_space() {
        assert_eq!(encode_quoted_printable("trailing \nnext"), "trailing=20\r\nnext");
    }

    #[test]
    fn test_quoted_printable_soft_breaks_long_lines() {
        let text = "a".repeat(200);
        let encoded = encode_quoted_printable(&text);
        assert!(encoded.split("\r\n").all(|line| line.len() <= MAX_LINE_LENGTH));
        assert_eq!(decode_quoted_printable(&encoded).unwrap(), text);
    }

    #[test]
    fn test_quoted_printable_decode() {
        assert_eq!(decode_quoted_printable("Hello, World!").unwrap(), "Hello, World!");
        assert_eq!(decode_quoted_printable("H=C3=A9llo").unwrap(), "Héllo");
    }

    #[test]
    fn test_quoted_printable_soft_line_break() {
        let decoded = decode_quoted_printable("Hello=\r\nWorld").unwrap();
        assert_eq!(decoded, "HelloWorld");
    }

    #[test]
    fn test_quoted_printable_invalid_escape() {
        assert!(decode_quoted_printable("bad=ZZ").is_err());
        assert!(decode_quoted_printable("bad=4").is_err());
    }

    #[test]
    fn test_quoted_printable_bytes_preserve_line_endings() {
        let data = b"a\r\nb\nc\x00";
        let encoded = encode_quoted_printable_bytes(data);
        assert_eq!(decode_quoted_printable_bytes(&encoded).unwrap(), data);
    }

    #[test]
    fn test_rfc2047_encode() {
        assert_eq!(encode_rfc2047("Hello", "utf-8").unwrap(), "Hello");

        let encoded = encode_rfc2047("Héllo", "utf-8").unwrap();
        assert!(encoded.starts_with("=?utf-8?B?"));
        assert!(encoded.ends_with("?="));
    }

    #[test]
    fn test_rfc2047_long_value_split_into_words() {
        let text = "日本語のとても長い件名".repeat(5);
        let encoded = encode_rfc2047(&text, "utf-8").unwrap();
        let words: Vec<&str> = encoded.split(' ').collect();
        assert!(words.len() > 1);
        assert!(words.iter().all(|w| w.len() <= 75));
        assert_eq!(decode_rfc2047(&encoded).unwrap(), text);
    }

    #[test]
    fn test_rfc2047_decode() {
        assert_eq!(decode_rfc2047("Hello").unwrap(), "Hello");
        assert_eq!(decode_rfc2047("=?utf-8?B?SMOpbGxv?=").unwrap(), "Héllo");
    }

    #[test]
    fn test_rfc2047_quoted_printable() {
        assert_eq!(decode_rfc2047("=?utf-8?Q?H=C3=A9llo?=").unwrap(), "Héllo");
    }

    #[test]
    fn test_rfc2047_mixed_text() {
        let decoded = decode_rfc2047("Re: =?utf-8?Q?caf=C3=A9?= meeting").unwrap();
        assert_eq!(decoded, "Re: café meeting");
    }

    proptest! {
        #[test]
        fn prop_quoted_printable_text_roundtrip(text in "[^\r]{0,300}") {
            let encoded = encode_quoted_printable(&text);
            prop_assert!(encoded.split("\r\n").all(|line| line.len() <= MAX_LINE_LENGTH));
            let decoded = decode_quoted_printable(&encoded).unwrap();
            prop_assert_eq!(decoded, text.replace('\n', "\r\n"));
        }

        #[test]
        fn prop_quoted_printable_bytes_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let encoded = encode_quoted_printable_bytes(&data);
            prop_assert_eq!(decode_quoted_printable_bytes(&encoded).unwrap(), data);
        }

        #[test]
        fn prop_rfc2047_roundtrip(text in "\\PC{0,120}") {
            let encoded = encode_rfc2047(&text, "utf-8").unwrap();
            prop_assert_eq!(decode_rfc2047(&encoded).unwrap(), text);
        }
    }
}
