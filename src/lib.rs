//! A schema-driven decoder for ISO/IEC 8211 Data Descriptive Files (DDF).
//!
//! An ISO 8211 file carries its own schema: the first record (the DDR) lists
//! every field tag that may appear in the file together with the names of its
//! subfields and a format-control string describing how to cut each field's
//! bytes into typed values. [`Iso8211Reader`] decodes that schema once and then
//! reads the data records that follow, one at a time.
//!
//! ```no_run
//! use iso8211::Iso8211Reader;
//!
//! # fn main() -> iso8211::Result<()> {
//! let mut reader = Iso8211Reader::open("CATALOG.031")?;
//! while let Some(record) = reader.read_record()? {
//!     for field in record.fields() {
//!         for (name, value) in field.subfields()?.iter() {
//!             println!("{}.{name} = {value}", field.tag());
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```
use snafu::{prelude::*, Backtrace};
use std::str::FromStr;

/// Shorthand for `return SomeSnafu { .. }.fail()`.
macro_rules! fail {
    ($selector:expr) => {
        return $selector.fail()
    };
}

pub mod directory;
pub mod field_schema;
pub mod field_tree;
pub mod format;
pub mod leader;
pub mod reader;
pub mod record;
pub mod source;
pub mod subfield;

#[cfg(test)]
mod test_support;

pub use field_schema::{DataStructure, FieldSchema, HeaderSchema};
pub use field_tree::FieldTree;
pub use leader::{Leader, LeaderKind, LEADER_SIZE};
pub use reader::{BinaryDecoding, BinaryWidth, Iso8211Reader, ReaderOptions};
pub use record::{Field, Record};
pub use source::{ByteSource, MappedFile, SliceSource, StreamSource};
pub use subfield::{BinaryFormat, DataKind, SubfieldRule, SubfieldValue, SubfieldWidth, Subfields};

/// Terminates every field, and the directory.
pub const FIELD_TERMINATOR: u8 = 0x1E;
/// Terminates variable length subfields, and is the default subfield delimiter.
pub const UNIT_TERMINATOR: u8 = 0x1F;

const SPACE: u8 = b' ';

/// The character encoding used to turn subfield bytes into text.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LexicalLevel {
    /// ASCII. Bytes that are not valid UTF-8 are read as Windows-1252.
    #[default]
    Level0,
    /// Latin 1 - ISO 8859 (read as Windows-1252, its superset).
    Level1,
    /// UCS-2, little endian.
    Level2,
}
impl LexicalLevel {
    /// Maps the truncated escape sequence of a field's controls to a lexical level.
    pub fn for_character_set_indicator(input: [char; 3]) -> Option<Self> {
        match input {
            [' ', ' ', ' '] => Some(Self::Level0),
            ['-', 'A', ' '] => Some(Self::Level1),
            ['%', '/', 'A'] => Some(Self::Level2),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct DecodingContext {
    lexical_level: LexicalLevel,
}
impl DecodingContext {
    pub(crate) fn with_lexical_level(self, lexical_level: LexicalLevel) -> Self {
        Self { lexical_level }
    }

    pub(crate) fn bytes_to_string(&self, bytes: &[u8]) -> String {
        match self.lexical_level {
            LexicalLevel::Level0 => match std::str::from_utf8(bytes) {
                Ok(s) => s.to_string(),
                Err(_) => {
                    let (cow, _) = encoding_rs::WINDOWS_1252.decode_without_bom_handling(bytes);
                    cow.into_owned()
                }
            },
            LexicalLevel::Level1 => {
                let (cow, _) = encoding_rs::WINDOWS_1252.decode_without_bom_handling(bytes);
                cow.into_owned()
            }
            LexicalLevel::Level2 => {
                // A dangling odd byte is the single byte delimiter left behind by the
                // double byte scan; it is not part of the text.
                let two_byte_buffer: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
                    .collect();
                String::from_utf16_lossy(&two_byte_buffer)
            }
        }
    }
}

/// Leader, directory and field control bytes are always plain ASCII.
pub(crate) const DDR_DECODING_CONTEXT: DecodingContext = DecodingContext {
    lexical_level: LexicalLevel::Level0,
};

pub type Result<T> = std::result::Result<T, DdfError>;

/// Everything that can go wrong while decoding a DDF.
///
/// All variants are terminal for the record (or header) being decoded.
/// Unparseable reals and fixed width subfields that run past the end of their
/// field are tolerated and never surface here.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DdfError {
    #[snafu(display("Invalid leader: {description}"))]
    InvalidLeader {
        description: String,
        backtrace: Backtrace,
    },
    #[snafu(display("ISO 8211 record leader appears to be corrupt: {description}"))]
    CorruptLeader {
        description: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Leader is short at offset {offset}: got {actual} of 24 bytes"))]
    ShortLeader {
        offset: u64,
        actual: usize,
        backtrace: Backtrace,
    },
    #[snafu(display(
        "Data record is short at offset {offset}: expected {expected} bytes but got {actual}"
    ))]
    ShortRecord {
        offset: u64,
        expected: usize,
        actual: usize,
        backtrace: Backtrace,
    },
    #[snafu(display(
        "Data record at offset {offset} appears to be corrupt (record length {record_length}, field area start {field_area_start}). Ensure the file was uncompressed without modifying line endings."
    ))]
    CorruptRecord {
        offset: u64,
        record_length: usize,
        field_area_start: usize,
        backtrace: Backtrace,
    },
    #[snafu(display("Invalid directory entry at byte {offset}: {description}"))]
    InvalidDirectoryEntry {
        offset: usize,
        description: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Invalid field tree: {description}"))]
    InvalidFieldTree {
        description: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Undefined field '{tag}' encountered in data record"))]
    UndefinedField { tag: String, backtrace: Backtrace },
    #[snafu(display(
        "Not enough bytes for field '{tag}': {length} bytes at offset {offset}, but only {available} available"
    ))]
    FieldOutOfBounds {
        tag: String,
        offset: usize,
        length: usize,
        available: usize,
        backtrace: Backtrace,
    },
    #[snafu(display("Unrecognised data_struct_code value '{code}' for field '{tag}'"))]
    UnrecognisedDataStructCode {
        tag: String,
        code: char,
        backtrace: Backtrace,
    },
    #[snafu(display("Unrecognised data_type_code value '{code}' for field '{tag}'"))]
    UnrecognisedDataTypeCode {
        tag: String,
        code: char,
        backtrace: Backtrace,
    },
    #[snafu(display("Malformed format controls '{format}': {description}"))]
    MalformedFormat {
        format: String,
        description: String,
        backtrace: Backtrace,
    },
    #[snafu(display(
        "Got more formats ({formats}) than subfields ({subfields}) for field '{tag}'"
    ))]
    TooManyFormats {
        tag: String,
        formats: usize,
        subfields: usize,
        backtrace: Backtrace,
    },
    #[snafu(display(
        "Got less formats ({formats}) than subfields ({subfields}) for field '{tag}'"
    ))]
    TooFewFormats {
        tag: String,
        formats: usize,
        subfields: usize,
        backtrace: Backtrace,
    },
    #[snafu(display("Format type of '{format}' is not supported"))]
    UnsupportedFormat {
        format: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Format type of '{format}' is not recognised"))]
    UnrecognisedFormat {
        format: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Subfield '{subfield}' should be an integer but contained '{text}'"))]
    InvalidIntegerSubfield {
        subfield: String,
        text: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Error reading bytes: {source}"))]
    Io {
        source: std::io::Error,
        backtrace: Backtrace,
    },
}

impl From<std::io::Error> for DdfError {
    fn from(source: std::io::Error) -> Self {
        DdfError::Io {
            source,
            backtrace: Backtrace::capture(),
        }
    }
}

/// Helpers to read the ASCII digit strings and characters of leaders and directories.
trait DdfSliceExt {
    /// Parse the whole slice as a decimal number.
    fn parse_number<N: FromStr>(&self) -> Option<N>;

    /// Same as [`parse_number`](DdfSliceExt::parse_number) but an all blank slice is `Some(None)`.
    fn parse_number_option<N: FromStr>(&self) -> Option<Option<N>>;

    fn read_char(&self, pos: usize) -> char;

    fn take_chars<const NUM: usize>(&self, offset: usize) -> [char; NUM];
}

impl DdfSliceExt for [u8] {
    fn parse_number<N: FromStr>(&self) -> Option<N> {
        let digits = self.trim_ascii();
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return None;
        }
        // Only digits, so this is valid UTF-8.
        std::str::from_utf8(digits).ok()?.parse().ok()
    }

    fn parse_number_option<N: FromStr>(&self) -> Option<Option<N>> {
        if self.iter().all(|c| c == &SPACE) {
            return Some(None);
        }
        self.parse_number().map(Some)
    }

    fn read_char(&self, pos: usize) -> char {
        char::from(self[pos])
    }

    fn take_chars<const NUM: usize>(&self, offset: usize) -> [char; NUM] {
        std::array::from_fn(|i| char::from(self[offset + i]))
    }
}
