//! Fixed-width text fields in a legacy code page.
//!
//! Korean cadastral exports are CP949 (a superset of EUC-KR) more often than
//! not, but they're frequently inconsistent. Decoding therefore never fails:
//! undecodable bytes become U+FFFD and the caller is told a fallback happened.

use std::fmt;
use encoding::all;
use encoding::label::encoding_from_whatwg_label;
use encoding::{DecoderTrap, EncoderTrap, Encoding, EncodingRef};
use regex::Regex;

/// Code page number, codec, and the ".dbf" language driver IDs that mean it.
/// The first language driver listed is the one we write.
static CODE_PAGES: &[(u16, EncodingRef, &[u8])] = &[
    (949, all::WINDOWS_949, &[ 0x79, 0x4e ]),
    (1252, all::WINDOWS_1252, &[ 0x57, 0x03 ]),
    (1250, all::WINDOWS_1250, &[ 0xc8 ]),
    (1251, all::WINDOWS_1251, &[ 0xc9 ]),
    (1253, all::WINDOWS_1253, &[ 0xcb ]),
    (1254, all::WINDOWS_1254, &[ 0xca ]),
    (874, all::WINDOWS_874, &[ 0x7c ]),
    (866, all::IBM866, &[ 0x65 ]),
    (932, all::WINDOWS_31J, &[ 0x7b, 0x13 ]),
    (936, all::GBK, &[ 0x7a, 0x4d ]),
    (950, all::BIG5_2003, &[ 0x78, 0x4f ]),
    (65001, all::UTF_8, &[]),
];

lazy_static! {
    // "CP949", "949", "ANSI 1252", "OEM 866", "windows-949", ...
    static ref CODE_PAGE_LABEL: Regex = Regex::new(r"(?i)^(?:cp|windows-?|ansi\s*|oem\s*|ibm|ms)?(\d{3,5})$").unwrap();
}

/// How `TextCodec::encode` pads a value shorter than its field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Justify {
    /// Value first, then spaces: Character, Date and Logical fields.
    Left,
    /// Spaces first, then value: Numeric and Float fields.
    Right,
}

#[derive(Clone, Copy)]
pub struct TextCodec {
    encoding: EncodingRef,
    code_page: Option<u16>,
}

// encoding::EncodingRef does not implement std::fmt::Debug
impl fmt::Debug for TextCodec {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("TextCodec")
            .field("encoding", &self.encoding.name())
            .field("code_page", &self.code_page)
            .finish()
    }
}

impl PartialEq for TextCodec {
    fn eq(&self, other: &TextCodec) -> bool {
        self.encoding.name() == other.encoding.name()
    }
}

impl Default for TextCodec {
    fn default() -> TextCodec {
        TextCodec::korean()
    }
}

impl TextCodec {
    /// CP949, the code page of Korean cadastral ".dbf" files.
    pub fn korean() -> TextCodec {
        TextCodec::with_encoding(all::WINDOWS_949)
    }

    pub fn utf8() -> TextCodec {
        TextCodec::with_encoding(all::UTF_8)
    }

    pub fn with_encoding(encoding: EncodingRef) -> TextCodec {
        let code_page = CODE_PAGES.iter()
            .find(|&&(_, e, _)| e.name() == encoding.name())
            .map(|&(cp, _, _)| cp);
        TextCodec {
            encoding: encoding,
            code_page: code_page,
        }
    }

    pub fn from_code_page(code_page: u16) -> Option<TextCodec> {
        CODE_PAGES.iter()
            .find(|&&(cp, _, _)| cp == code_page)
            .map(|&(cp, e, _)| TextCodec { encoding: e, code_page: Some(cp) })
    }

    /// Parses a ".cpg"-style label: "CP949", "949", "ANSI 1252", "UTF-8",
    /// "EUC-KR", ...
    pub fn from_label(label: &str) -> Option<TextCodec> {
        let label = label.trim();
        if let Some(caps) = CODE_PAGE_LABEL.captures(label) {
            return caps[1].parse::<u16>().ok().and_then(TextCodec::from_code_page);
        }
        encoding_from_whatwg_label(label).map(TextCodec::with_encoding)
    }

    /// Maps the ".dbf" language driver ID (header byte 29).
    pub fn from_language_driver(ldid: u8) -> Option<TextCodec> {
        CODE_PAGES.iter()
            .find(|&&(_, _, ids)| ids.contains(&ldid))
            .map(|&(cp, e, _)| TextCodec { encoding: e, code_page: Some(cp) })
    }

    /// The language driver ID to write for this codec, or 0 ("unspecified").
    pub fn language_driver(&self) -> u8 {
        self.code_page
            .and_then(|cp| CODE_PAGES.iter().find(|&&(c, _, _)| c == cp))
            .and_then(|&(_, _, ids)| ids.first().cloned())
            .unwrap_or(0)
    }

    /// The label we write to a ".cpg" file.
    pub fn label(&self) -> String {
        match self.code_page {
            Some(65001) => "UTF-8".to_string(),
            Some(cp) => format!("CP{}", cp),
            None => self.encoding.name().to_string(),
        }
    }

    pub fn code_page(&self) -> Option<u16> {
        self.code_page
    }

    /// Decodes a fixed-width field, dropping trailing spaces and NULs.
    pub fn decode(&self, bytes: &[u8]) -> String {
        self.decode_checked(bytes).0
    }

    /// Like `decode()`, but also returns `true` when replacement characters
    /// had to be substituted.
    pub fn decode_checked(&self, bytes: &[u8]) -> (String, bool) {
        let end = bytes.iter().rposition(|&b| b != b' ' && b != 0).map(|i| i + 1).unwrap_or(0);
        let bytes = &bytes[..end];

        match self.encoding.decode(bytes, DecoderTrap::Strict) {
            Ok(s) => (s, false),
            Err(_) => {
                // DecoderTrap::Replace cannot fail
                let s = self.encoding.decode(bytes, DecoderTrap::Replace)
                    .unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned());
                (s, true)
            }
        }
    }

    /// Encodes to exactly `width` bytes.
    ///
    /// Truncation counts bytes, not characters, so a multi-byte character can
    /// be cut in half. Legacy writers do the same.
    pub fn encode(&self, text: &str, width: usize, justify: Justify) -> Vec<u8> {
        self.encode_checked(text, width, justify).0
    }

    /// Like `encode()`, but also returns `true` when unencodable characters
    /// were dropped.
    pub fn encode_checked(&self, text: &str, width: usize, justify: Justify) -> (Vec<u8>, bool) {
        let (mut bytes, lossy) = match self.encoding.encode(text, EncoderTrap::Strict) {
            Ok(b) => (b, false),
            Err(_) => {
                let b = self.encoding.encode(text, EncoderTrap::Ignore).unwrap_or_else(|_| Vec::new());
                (b, true)
            }
        };

        bytes.truncate(width);
        let padding = width - bytes.len();
        let ret = match justify {
            Justify::Left => {
                bytes.resize(width, b' ');
                bytes
            }
            Justify::Right => {
                let mut ret = vec![ b' '; padding ];
                ret.extend_from_slice(&bytes);
                ret
            }
        };
        (ret, lossy)
    }
}
