use encoding_rs::WINDOWS_1252;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Character set a text column is stored in.
///
/// Names follow MySQL; `utf8` is accepted as the historical alias of
/// `utf8mb3`. PostgreSQL text is read back as UTF-8 and maps to `Utf8mb4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Charset {
    Utf8mb4,
    Utf8mb3,
    Latin1,
    Ascii,
    Binary,
}

impl Charset {
    /// Whether a value in this charset can hold `c` at all.
    pub fn can_represent(self, c: char) -> bool {
        match self {
            Charset::Utf8mb4 | Charset::Binary => true,
            Charset::Utf8mb3 => (c as u32) <= 0xFFFF,
            Charset::Ascii => c.is_ascii(),
            Charset::Latin1 => {
                if (c as u32) < 0x80 {
                    return true;
                }
                let mut buf = [0u8; 4];
                let (_, _, had_errors) = WINDOWS_1252.encode(c.encode_utf8(&mut buf));
                !had_errors
            }
        }
    }

    /// Decode raw stored bytes into text. `None` when the bytes are not valid
    /// in this charset (or the charset is `binary`).
    pub fn decode(self, raw: &[u8]) -> Option<String> {
        match self {
            Charset::Utf8mb4 => std::str::from_utf8(raw).ok().map(str::to_owned),
            // 4-byte sequences cannot be stored in utf8mb3; reject them so they
            // fall through to the verbatim path instead of comparing equal.
            Charset::Utf8mb3 => std::str::from_utf8(raw)
                .ok()
                .filter(|s| s.chars().all(|c| (c as u32) <= 0xFFFF))
                .map(str::to_owned),
            Charset::Ascii => std::str::from_utf8(raw)
                .ok()
                .filter(|s| s.is_ascii())
                .map(str::to_owned),
            // MySQL's latin1 is cp1252.
            Charset::Latin1 => Some(
                WINDOWS_1252
                    .decode_without_bom_handling(raw)
                    .0
                    .into_owned(),
            ),
            Charset::Binary => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Charset::Utf8mb4 => "utf8mb4",
            Charset::Utf8mb3 => "utf8mb3",
            Charset::Latin1 => "latin1",
            Charset::Ascii => "ascii",
            Charset::Binary => "binary",
        }
    }
}

impl FromStr for Charset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf8mb4" => Ok(Charset::Utf8mb4),
            "utf8mb3" | "utf8" => Ok(Charset::Utf8mb3),
            "latin1" => Ok(Charset::Latin1),
            "ascii" => Ok(Charset::Ascii),
            "binary" => Ok(Charset::Binary),
            other => Err(anyhow::anyhow!("unsupported charset: {}", other)),
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Comparison collation, parsed from a MySQL collation name such as
/// `utf8mb4_unicode_ci`, `utf8_unicode_ci`, `latin1_bin` or
/// `utf8mb4_0900_ai_ci`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Collation {
    name: String,
    charset: Charset,
    case_insensitive: bool,
    pad_space: bool,
}

impl Collation {
    pub fn parse(name: &str) -> anyhow::Result<Self> {
        let lower = name.to_ascii_lowercase();
        if lower == "binary" {
            return Ok(Self {
                name: lower,
                charset: Charset::Binary,
                case_insensitive: false,
                pad_space: false,
            });
        }
        let prefix = lower
            .split('_')
            .next()
            .ok_or_else(|| anyhow::anyhow!("malformed collation name: {}", name))?;
        let charset: Charset = prefix.parse()?;
        Ok(Self {
            charset,
            case_insensitive: lower.ends_with("_ci"),
            // The UCA 9.0.0 collations are NO PAD; everything older is PAD SPACE.
            pad_space: !lower.contains("_0900_"),
            name: lower,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Charset the comparison side stores its values in.
    pub fn charset(&self) -> Charset {
        self.charset
    }

    pub fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    pub fn is_pad_space(&self) -> bool {
        self.pad_space
    }

    pub fn is_binary(&self) -> bool {
        self.charset == Charset::Binary
    }
}

impl TryFrom<String> for Collation {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Collation::parse(&value)
    }
}

impl From<Collation> for String {
    fn from(c: Collation) -> Self {
        c.name
    }
}

impl fmt::Display for Collation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Block compression applied by the application before writing a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Snappy raw block format (no framing).
    Snappy,
}

impl FromStr for Compression {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "snappy" => Ok(Compression::Snappy),
            other => Err(anyhow::anyhow!("unsupported compression: {}", other)),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::Snappy => f.write_str("snappy"),
        }
    }
}

/// Everything the canonicalizer needs to know about one value.
///
/// `charset` is the charset the bytes were *stored* in (the side they were
/// read from); `collation` is the comparison collation, always the target
/// column's, so both sides are folded the same way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnEncoding {
    pub charset: Option<Charset>,
    pub collation: Option<Collation>,
    pub compression: Option<Compression>,
}
