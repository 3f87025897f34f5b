//! Decoding of raw line bytes.

use crate::error::{FileError, Result};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Character encodings a fixture file may be declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileEncoding {
    #[default]
    Utf8,
    Latin1,
    Ascii,
}

impl FileEncoding {
    /// Parse a charset name. Blank means UTF-8.
    pub fn parse(name: Option<&str>) -> Result<Self> {
        let name = match name.map(str::trim) {
            None | Some("") => return Ok(FileEncoding::Utf8),
            Some(n) => n,
        };
        match name.to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(FileEncoding::Utf8),
            "iso-8859-1" | "latin1" | "latin-1" => Ok(FileEncoding::Latin1),
            "us-ascii" | "ascii" => Ok(FileEncoding::Ascii),
            _ => Err(FileError::UnsupportedEncoding(name.to_string())),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            FileEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            FileEncoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            FileEncoding::Ascii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { '\u{FFFD}' })
                .collect(),
        }
    }
}

/// Strip a UTF-8 byte-order mark, if present.
pub fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!(FileEncoding::parse(None).unwrap(), FileEncoding::Utf8);
        assert_eq!(FileEncoding::parse(Some(" ")).unwrap(), FileEncoding::Utf8);
        assert_eq!(
            FileEncoding::parse(Some("ISO_8859-1")).unwrap(),
            FileEncoding::Latin1
        );
        assert!(matches!(
            FileEncoding::parse(Some("GBK")),
            Err(FileError::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn test_decode_latin1() {
        assert_eq!(FileEncoding::Latin1.decode(&[0x63, 0x61, 0x66, 0xE9]), "café");
    }

    #[test]
    fn test_strip_bom() {
        assert_eq!(strip_bom(b"\xEF\xBB\xBFh1,h2"), b"h1,h2");
        assert_eq!(strip_bom(b"h1,h2"), b"h1,h2");
    }
}
