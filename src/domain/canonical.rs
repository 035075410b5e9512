use std::borrow::Cow;

use crate::domain::encoding::{Charset, ColumnEncoding, Compression};
use crate::error::DecompressionError;

/// Marks a code point the comparison charset cannot store. Never appears in
/// UTF-8, so an escaped value can't equal any representable text.
const UNREPRESENTABLE: u8 = 0xFF;
/// Marks bytes that are not valid in their declared charset; the bytes follow
/// verbatim.
const UNDECODABLE: u8 = 0xFE;

/// Decompressed, charset-normalized form of one column value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CanonicalValue {
    Null,
    Bytes(Vec<u8>),
}

/// Normalize one raw value so that logically equal values compare equal
/// across storage charsets, collations and compressed encodings.
///
/// Steps, in order:
/// 1. NULL stays NULL (distinct from the empty string).
/// 2. Compressed values are decompressed; the compressed bytes themselves are
///    never compared.
/// 3. Text is decoded from its stored charset, trailing spaces are dropped
///    under PAD SPACE collations, and characters are case folded under `_ci`
///    collations.
/// 4. Characters the comparison charset cannot represent are escaped instead
///    of being substituted, so lossy conversion shows up as a difference.
pub fn canonicalize(
    raw: Option<&[u8]>,
    encoding: &ColumnEncoding,
) -> Result<CanonicalValue, DecompressionError> {
    let Some(raw) = raw else {
        return Ok(CanonicalValue::Null);
    };

    let bytes: Cow<'_, [u8]> = match encoding.compression {
        Some(Compression::Snappy) => Cow::Owned(decompress_snappy(raw)?),
        None => Cow::Borrowed(raw),
    };

    let charset = match encoding.charset {
        Some(c) if c != Charset::Binary => c,
        _ => return Ok(CanonicalValue::Bytes(bytes.into_owned())),
    };
    let collation = encoding.collation.as_ref();
    if collation.map_or(false, |c| c.is_binary()) {
        return Ok(CanonicalValue::Bytes(bytes.into_owned()));
    }

    let Some(text) = charset.decode(&bytes) else {
        let mut out = Vec::with_capacity(bytes.len() + 1);
        out.push(UNDECODABLE);
        out.extend_from_slice(&bytes);
        return Ok(CanonicalValue::Bytes(out));
    };

    let compare_charset = collation.map_or(charset, |c| c.charset());
    let fold_case = collation.map_or(false, |c| c.is_case_insensitive());
    let text = if collation.map_or(false, |c| c.is_pad_space()) {
        text.trim_end_matches(' ')
    } else {
        text.as_str()
    };

    let mut out = Vec::with_capacity(text.len());
    let mut buf = [0u8; 4];
    for c in text.chars() {
        if !compare_charset.can_represent(c) {
            out.push(UNREPRESENTABLE);
            out.extend_from_slice(&(c as u32).to_be_bytes());
        } else if fold_case {
            for lower in c.to_lowercase() {
                out.extend_from_slice(lower.encode_utf8(&mut buf).as_bytes());
            }
        } else {
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        }
    }
    Ok(CanonicalValue::Bytes(out))
}

fn decompress_snappy(raw: &[u8]) -> Result<Vec<u8>, DecompressionError> {
    snap::raw::Decoder::new()
        .decompress_vec(raw)
        .map_err(|e| DecompressionError {
            algorithm: Compression::Snappy,
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::encoding::Collation;

    fn text(charset: Charset, collation: &str) -> ColumnEncoding {
        ColumnEncoding {
            charset: Some(charset),
            collation: Some(Collation::parse(collation).unwrap()),
            compression: None,
        }
    }

    fn snappy() -> ColumnEncoding {
        ColumnEncoding {
            compression: Some(Compression::Snappy),
            ..Default::default()
        }
    }

    fn canon(raw: &[u8], enc: &ColumnEncoding) -> CanonicalValue {
        canonicalize(Some(raw), enc).unwrap()
    }

    #[test]
    fn null_is_not_empty_string() {
        let enc = text(Charset::Utf8mb4, "utf8mb4_unicode_ci");
        assert_eq!(canonicalize(None, &enc).unwrap(), CanonicalValue::Null);
        assert_ne!(canon(b"", &enc), CanonicalValue::Null);
    }

    #[test]
    fn ascii_is_identical_across_utf8_variants() {
        let mb3 = text(Charset::Utf8mb3, "utf8mb4_unicode_ci");
        let mb4 = text(Charset::Utf8mb4, "utf8mb4_unicode_ci");
        assert_eq!(canon(b"foobar", &mb3), canon(b"foobar", &mb4));
    }

    #[test]
    fn bmp_text_survives_utf8mb3_comparison() {
        let s = "これは普通なストリングです";
        let from_mb4 = text(Charset::Utf8mb4, "utf8_unicode_ci");
        let from_mb3 = text(Charset::Utf8mb3, "utf8_unicode_ci");
        assert_eq!(canon(s.as_bytes(), &from_mb4), canon(s.as_bytes(), &from_mb3));
    }

    #[test]
    fn supplementary_characters_do_not_match_substitution() {
        let source = text(Charset::Utf8mb4, "utf8_unicode_ci");
        let target = text(Charset::Utf8mb3, "utf8_unicode_ci");
        assert_ne!(canon("𠜎𠜱".as_bytes(), &source), canon(b"??", &target));
    }

    #[test]
    fn case_insensitive_collation_folds() {
        let enc = text(Charset::Utf8mb4, "utf8mb4_unicode_ci");
        assert_eq!(canon(b"FooBar", &enc), canon(b"foobar", &enc));
    }

    #[test]
    fn bin_collation_keeps_case() {
        let enc = text(Charset::Utf8mb4, "utf8mb4_bin");
        assert_ne!(canon(b"FooBar", &enc), canon(b"foobar", &enc));
    }

    #[test]
    fn pad_space_ignores_trailing_blanks() {
        let pad = text(Charset::Utf8mb4, "utf8mb4_unicode_ci");
        assert_eq!(canon(b"abc  ", &pad), canon(b"abc", &pad));
        let no_pad = text(Charset::Utf8mb4, "utf8mb4_0900_ai_ci");
        assert_ne!(canon(b"abc  ", &no_pad), canon(b"abc", &no_pad));
    }

    #[test]
    fn latin1_and_utf8_agree_on_accented_text() {
        let latin = text(Charset::Latin1, "utf8mb4_unicode_ci");
        let utf8 = text(Charset::Utf8mb4, "utf8mb4_unicode_ci");
        assert_eq!(canon(&[0x63, 0x61, 0x66, 0xE9], &latin), canon("café".as_bytes(), &utf8));
    }

    #[test]
    fn invalid_utf8_is_kept_verbatim_and_tagged() {
        let enc = text(Charset::Utf8mb4, "utf8mb4_unicode_ci");
        assert_eq!(
            canon(&[0xC3], &enc),
            CanonicalValue::Bytes(vec![UNDECODABLE, 0xC3])
        );
    }

    #[test]
    fn binary_columns_compare_verbatim() {
        let enc = ColumnEncoding::default();
        assert_eq!(canon(&[0, 1, 2], &enc), CanonicalValue::Bytes(vec![0, 1, 2]));
    }

    #[test]
    fn differently_compressed_blocks_canonicalize_identically() {
        let copy_encoded = b"\x08\x0cabcd\x01\x02"; // abcdcdcd
        let literal_only = b"\x08\x1cabcdcdcd";
        assert_eq!(canon(copy_encoded, &snappy()), canon(literal_only, &snappy()));
        assert_eq!(
            canon(copy_encoded, &snappy()),
            CanonicalValue::Bytes(b"abcdcdcd".to_vec())
        );
    }

    #[test]
    fn compressed_blocks_with_different_payloads_differ() {
        let a = b"\x08\x0cabcd\x01\x02"; // abcdcdcd
        let b = b"\x08\x0cabcd\x01\x01"; // abcddddd
        assert_ne!(canon(a, &snappy()), canon(b, &snappy()));
    }

    #[test]
    fn malformed_block_is_a_decompression_error() {
        let err = canonicalize(Some(b"\x08\x0cab"), &snappy()).unwrap_err();
        assert_eq!(err.algorithm, Compression::Snappy);
    }
}
