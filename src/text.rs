//! Text boundary helpers: UTF-8/UTF-32 transcoding, NFKC normalization and
//! the locale check.
//!
//! Everything past this boundary works on UTF-32 code points (`u32`), which
//! is what the engine uploads to the device.

use unicode_normalization::UnicodeNormalization;

use crate::{Error, Result};

/// Decode a UTF-8 string into a UTF-32 code point buffer.
pub fn to_utf32(s: &str) -> Vec<u32> {
    s.chars().map(|c| c as u32).collect()
}

/// Render a UTF-32 buffer back into a string, mapping invalid scalars to
/// U+FFFD. Only used for diagnostics.
pub fn from_utf32(s: &[u32]) -> String {
    s.iter()
        .map(|&c| char::from_u32(c).unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Decode raw file bytes as UTF-8.
pub fn decode_utf8(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|_| Error::user("input file is not valid UTF-8"))
}

/// Apply Unicode NFKC normalization.
pub fn nfkc(s: &str) -> String {
    s.nfkc().collect()
}

/// Verify that the process locale selects a UTF-8 encoding.
///
/// Checks `LC_ALL`, `LC_CTYPE` and `LANG` in that order, the usual POSIX
/// precedence.
pub fn ensure_utf8_locale() -> Result<()> {
    let locale = ["LC_ALL", "LC_CTYPE", "LANG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|val| !val.is_empty());

    match locale {
        Some(val) if is_utf8_locale(&val) => Ok(()),
        _ => Err(Error::user("sorry, this program only works on UTF8 systems")),
    }
}

fn is_utf8_locale(val: &str) -> bool {
    let lower = val.to_ascii_lowercase();
    lower.ends_with("utf-8") || lower.ends_with("utf8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_utf32() {
        assert_eq!(to_utf32("ab"), vec![0x61, 0x62]);
        assert_eq!(to_utf32("ä"), vec![0xe4]);
        assert_eq!(to_utf32("🦀"), vec![0x1f980]);
        assert!(to_utf32("").is_empty());
    }

    #[test]
    fn test_from_utf32_roundtrip() {
        let s = "grep 🦀 ümlaut";
        assert_eq!(from_utf32(&to_utf32(s)), s);
    }

    #[test]
    fn test_from_utf32_invalid_scalar() {
        // surrogate and out-of-range values render as U+FFFD
        assert_eq!(from_utf32(&[0xd800]), "\u{fffd}");
        assert_eq!(from_utf32(&[0xffff_ffff]), "\u{fffd}");
    }

    #[test]
    fn test_decode_utf8_rejects_garbage() {
        assert!(decode_utf8(vec![0xff, 0xfe]).is_err());
        assert_eq!(decode_utf8(b"ok".to_vec()).unwrap(), "ok");
    }

    #[test]
    fn test_nfkc() {
        // U+FB01 LATIN SMALL LIGATURE FI decomposes under NFKC
        assert_eq!(nfkc("\u{fb01}"), "fi");
    }

    #[test]
    fn test_is_utf8_locale() {
        assert!(is_utf8_locale("en_US.UTF-8"));
        assert!(is_utf8_locale("C.utf8"));
        assert!(!is_utf8_locale("C"));
        assert!(!is_utf8_locale("POSIX"));
    }
}
