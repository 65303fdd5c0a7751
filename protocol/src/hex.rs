//! Byte-level helpers shared by the request builders and decoders.
//!
//! Operator input arrives as loosely formatted hex text, e.g. `"12 40 5c1"`.
//! It is cleaned with [`sanitize`] and then split into bytes with [`parse_bytes`].

use alloc::{string::String, vec::Vec};
use core::fmt::Write as _;

/// Removes every character that is neither a hex digit nor a space.
///
/// Invalid characters are dropped rather than rejected, so partially typed
/// input stays usable.
#[must_use]
pub fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_hexdigit() || *c == ' ')
        .collect()
}

/// Parses sanitized hex text into bytes.
///
/// The text is split on spaces. Tokens of up to two characters become a single
/// byte, so a leading zero may be omitted (`"5"` is `0x05`). Longer tokens are
/// split into two-character chunks (`"123"` is `[0x12, 0x03]`).
///
/// Empty tokens are skipped. Callers must pass the text through [`sanitize`]
/// first; characters that are still not hex digits are skipped as well.
#[must_use]
pub fn parse_bytes(text: &str) -> Vec<u8> {
    let mut bytes = Vec::new();

    for token in text.split(' ').filter(|token| !token.is_empty()) {
        if token.len() <= 2 {
            bytes.extend(u8::from_str_radix(token, 16).ok());
        } else {
            bytes.extend(
                token
                    .as_bytes()
                    .chunks(2)
                    .filter_map(|chunk| core::str::from_utf8(chunk).ok())
                    .filter_map(|chunk| u8::from_str_radix(chunk, 16).ok()),
            );
        }
    }

    bytes
}

/// Computes the CRC-8 checksum used by BEAN frames.
///
/// Polynomial `0x13`, initial value `0x00`, MSB first, no final XOR.
#[must_use]
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0x00, |crc, &byte| {
        (0..8).fold(crc ^ byte, |crc, _| {
            if crc & 0x80 == 0 {
                crc << 1
            } else {
                (crc << 1) ^ 0x13
            }
        })
    })
}

/// Zero-pads or truncates `bytes` to exactly `len` bytes.
#[must_use]
pub fn pad_or_truncate(mut bytes: Vec<u8>, len: usize) -> Vec<u8> {
    bytes.resize(len, 0x00);
    bytes
}

/// Formats bytes as lowercase hex without leading zeros, separated by `sep`.
///
/// This matches the raw report dumps written to the console log, e.g. `"3 0 1f"`.
#[must_use]
pub fn format_bytes(bytes: &[u8], sep: &str) -> String {
    let mut out = String::new();

    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push_str(sep);
        }

        let _ = write!(out, "{byte:x}");
    }

    out
}

/// Formats bytes as zero-padded uppercase hex, separated by `sep`.
#[must_use]
pub fn format_bytes_padded(bytes: &[u8], sep: &str) -> String {
    let mut out = String::new();

    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push_str(sep);
        }

        let _ = write!(out, "{byte:02X}");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_non_hex() {
        assert_eq!(
            sanitize("0x12, zz 4G0 |ab"),
            "012  40 ab",
            "sanitized text should be correct"
        );
    }

    #[test]
    fn parse_short_and_long_tokens() {
        assert_eq!(
            parse_bytes("5 12 abcd 123"),
            [0x05, 0x12, 0xab, 0xcd, 0x12, 0x03],
            "parsed bytes should be correct"
        );
    }

    #[test]
    fn parse_skips_empty_tokens() {
        assert_eq!(parse_bytes(""), [], "empty text should yield no bytes");
        assert_eq!(
            parse_bytes("  01   02 "),
            [0x01, 0x02],
            "repeated spaces should be ignored"
        );
    }

    #[test]
    fn parse_is_idempotent_after_one_pass() {
        let text = sanitize("1 0203 f, xx4 abc");
        let bytes = parse_bytes(&text);
        let again = parse_bytes(&sanitize(&format_bytes(&bytes, " ")));

        assert_eq!(bytes, again, "re-parsing formatted bytes should be stable");
    }

    #[test]
    fn crc8_golden_values() {
        assert_eq!(crc8(&[]), 0x00, "checksum of nothing should be zero");
        assert_eq!(
            crc8(&[0x10, 0x01, 0x02, 0x03]),
            0x20,
            "checksum should be correct"
        );
        assert_eq!(
            crc8(&[0x13, 0x01, 0x02, 0x03]),
            0x29,
            "checksum should be correct"
        );
    }

    #[test]
    fn pad_and_truncate() {
        assert_eq!(
            pad_or_truncate(alloc::vec![0x01, 0x02], 4),
            [0x01, 0x02, 0x00, 0x00],
            "short input should be padded"
        );
        assert_eq!(
            pad_or_truncate(alloc::vec![0x01, 0x02, 0x03, 0x04], 3),
            [0x01, 0x02, 0x03],
            "long input should be truncated"
        );
    }

    #[test]
    fn format_variants() {
        assert_eq!(format_bytes(&[0x03, 0x00, 0x1f], " "), "3 0 1f");
        assert_eq!(format_bytes_padded(&[0x03, 0x00, 0x1f], "-"), "03-00-1F");
    }
}
