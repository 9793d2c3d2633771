//! Interpretation of single format tokens, and decoding of the subfield values they describe.
use super::*;
use crate::reader::{BinaryDecoding, BinaryWidth};
use byteorder::{ByteOrder, LE};
use delegate::delegate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of value a subfield decodes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataKind {
    Integer,
    Real,
    String,
    BinaryString,
}

/// The binary form given by the subtype digit of a `b`/`B` format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryFormat {
    NotBinary = 0,
    UnsignedInt = 1,
    SignedInt = 2,
    FixedPointReal = 3,
    FloatReal = 4,
    FloatComplex = 5,
}
impl BinaryFormat {
    fn from_subtype(subtype: char) -> Option<Self> {
        match subtype {
            '0' => Some(Self::NotBinary),
            '1' => Some(Self::UnsignedInt),
            '2' => Some(Self::SignedInt),
            '3' => Some(Self::FixedPointReal),
            '4' => Some(Self::FloatReal),
            '5' => Some(Self::FloatComplex),
            _ => None,
        }
    }

    fn is_integer(&self) -> bool {
        matches!(self, Self::UnsignedInt | Self::SignedInt)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubfieldWidth {
    /// Exactly this many bytes.
    Fixed(usize),
    /// Runs until the delimiter or the field terminator.
    Variable,
}
impl SubfieldWidth {
    pub fn fixed(&self) -> Option<usize> {
        match self {
            Self::Fixed(width) => Some(*width),
            Self::Variable => None,
        }
    }
}

/// What a single format token says about its subfield.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubfieldFormat {
    pub kind: DataKind,
    pub width: SubfieldWidth,
    pub binary_format: BinaryFormat,
}

/// Format classes by leading character.
enum FormatKind {
    Text(DataKind),
    Binary,
    Filler,
    Unknown,
}
impl FormatKind {
    fn for_leading(c: char) -> Self {
        match c {
            'A' | 'C' => Self::Text(DataKind::String),
            'R' => Self::Text(DataKind::Real),
            'I' | 'S' => Self::Text(DataKind::Integer),
            'B' | 'b' => Self::Binary,
            'X' => Self::Filler,
            _ => Self::Unknown,
        }
    }
}

/// Interpret one expanded format token, e.g. `A(10)`, `I`, `B(16)` or `b12`.
pub fn classify(token: &str) -> Result<SubfieldFormat> {
    classify_with(token, BinaryWidth::default())
}

/// Like [`classify`], with `binary_width` deciding the width of `b` formats.
pub fn classify_with(token: &str, binary_width: BinaryWidth) -> Result<SubfieldFormat> {
    let Some(leading) = token.chars().next() else {
        fail!(UnrecognisedFormatSnafu { format: token });
    };
    match FormatKind::for_leading(leading) {
        FormatKind::Text(kind) => {
            let width = match token.find('(') {
                Some(open) => match digits_in(token, &token[open..])? {
                    0 => SubfieldWidth::Variable,
                    width => SubfieldWidth::Fixed(width),
                },
                None => SubfieldWidth::Variable,
            };
            Ok(SubfieldFormat {
                kind,
                width,
                binary_format: BinaryFormat::NotBinary,
            })
        }
        FormatKind::Binary => classify_binary(token, &token[leading.len_utf8()..], binary_width),
        FormatKind::Filler => UnsupportedFormatSnafu { format: token }.fail(),
        FormatKind::Unknown => UnrecognisedFormatSnafu { format: token }.fail(),
    }
}

fn classify_binary(token: &str, rest: &str, binary_width: BinaryWidth) -> Result<SubfieldFormat> {
    let mut chars = rest.chars();
    match chars.next() {
        Some('(') => {
            // Width is given in bits.
            let width = digits_in(token, rest)? / 8;
            let kind = if width < 5 {
                DataKind::Integer
            } else {
                DataKind::BinaryString
            };
            Ok(SubfieldFormat {
                kind,
                width: SubfieldWidth::Fixed(width),
                binary_format: BinaryFormat::SignedInt,
            })
        }
        Some(subtype) if subtype.is_ascii_digit() => {
            let binary_format = BinaryFormat::from_subtype(subtype)
                .with_context(|| UnrecognisedFormatSnafu { format: token })?;
            let width = match binary_width {
                BinaryWidth::AllDigits => digits_in(token, rest)?,
                BinaryWidth::AfterSubtype => digits_in(token, chars.as_str())?,
            };
            let kind = if binary_format.is_integer() {
                DataKind::Integer
            } else {
                DataKind::Real
            };
            Ok(SubfieldFormat {
                kind,
                width: SubfieldWidth::Fixed(width),
                binary_format,
            })
        }
        Some(_) => UnrecognisedFormatSnafu { format: token }.fail(),
        None => MalformedFormatSnafu {
            format: token,
            description: "binary format without width",
        }
        .fail(),
    }
}

/// The number formed by all the decimal digits in `part`.
fn digits_in(token: &str, part: &str) -> Result<usize> {
    let digits: String = part.chars().filter(char::is_ascii_digit).collect();
    ensure!(
        !digits.is_empty(),
        MalformedFormatSnafu {
            format: token,
            description: "width contains no digits",
        }
    );
    digits.parse().ok().with_context(|| MalformedFormatSnafu {
        format: token,
        description: format!("width {digits} is out of range"),
    })
}

/// The bytes of one subfield occurrence, cut from the remaining bytes of its field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Extracted<'a> {
    pub content: &'a [u8],
    /// Bytes to skip to get to the next subfield. Includes the delimiter.
    pub consumed: usize,
    /// A fixed width subfield ran past the end of its field.
    pub truncated: bool,
    /// The field looked like two-byte text.
    pub double_byte: bool,
}

/// How to cut one named subfield out of a field, and how to decode it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubfieldRule {
    name: String,
    format: String,
    kind: DataKind,
    width: SubfieldWidth,
    delimiter: u8,
    binary_format: BinaryFormat,
}

impl SubfieldRule {
    pub fn new(name: impl Into<String>, format: impl Into<String>) -> Result<Self> {
        Self::with_binary_width(name, format, BinaryWidth::default())
    }

    pub fn with_binary_width(
        name: impl Into<String>,
        format: impl Into<String>,
        binary_width: BinaryWidth,
    ) -> Result<Self> {
        let format = format.into();
        let SubfieldFormat {
            kind,
            width,
            binary_format,
        } = classify_with(&format, binary_width)?;
        Ok(Self {
            name: name.into(),
            format,
            kind,
            width,
            delimiter: UNIT_TERMINATOR,
            binary_format,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The format token this rule was built from.
    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn kind(&self) -> DataKind {
        self.kind
    }

    pub fn width(&self) -> SubfieldWidth {
        self.width
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub fn binary_format(&self) -> BinaryFormat {
        self.binary_format
    }

    /// Cut this subfield from the front of `remaining`.
    ///
    /// Fixed width subfields that do not fit are shortened to what is left.
    /// Variable width subfields run up to the delimiter or a field terminator,
    /// unless `remaining` ends in a terminator followed by `0x00`, in which case
    /// the field is taken to hold two-byte text and only a terminator followed
    /// by `0x00` ends the subfield.
    pub fn extract<'a>(&self, remaining: &'a [u8]) -> Extracted<'a> {
        match self.width {
            SubfieldWidth::Fixed(width) if width > remaining.len() => {
                log::warn!(
                    "Only {} bytes available for subfield '{}' with format '{}', returning shortened data.",
                    remaining.len(),
                    self.name,
                    self.format
                );
                Extracted {
                    content: remaining,
                    consumed: remaining.len(),
                    truncated: true,
                    double_byte: false,
                }
            }
            SubfieldWidth::Fixed(width) => Extracted {
                content: &remaining[..width],
                consumed: width,
                truncated: false,
                double_byte: false,
            },
            SubfieldWidth::Variable => self.extract_delimited(remaining),
        }
    }

    fn extract_delimited<'a>(&self, remaining: &'a [u8]) -> Extracted<'a> {
        let max = remaining.len();
        let double_byte =
            max > 1 && self.is_terminator(remaining[max - 2]) && remaining[max - 1] == 0;

        let mut length = 0;
        let mut extra = 0;
        while length < max {
            if double_byte {
                if length > 0 && self.is_terminator(remaining[length - 1]) && remaining[length] == 0
                {
                    // Swallow a field terminator right behind the two byte delimiter,
                    // or it reads as the start of another subfield.
                    if remaining.get(length + 1) == Some(&FIELD_TERMINATOR) {
                        extra += 1;
                    }
                    break;
                }
            } else if self.is_terminator(remaining[length]) {
                break;
            }
            length += 1;
        }
        let consumed = if max == 0 { 0 } else { length + extra + 1 };
        Extracted {
            content: &remaining[..length],
            consumed,
            truncated: false,
            double_byte,
        }
    }

    fn is_terminator(&self, b: u8) -> bool {
        b == self.delimiter || b == FIELD_TERMINATOR
    }

    /// Extract and decode the subfield at the front of `remaining`.
    ///
    /// Returns the value and the number of bytes consumed.
    pub(crate) fn decode(
        &self,
        remaining: &[u8],
        text: DecodingContext,
        binary: BinaryDecoding,
    ) -> Result<(SubfieldValue, usize)> {
        let extracted = self.extract(remaining);
        let text = if extracted.double_byte {
            text.with_lexical_level(LexicalLevel::Level2)
        } else {
            text
        };
        let content = extracted.content;
        let raw_binary = binary == BinaryDecoding::LittleEndian;
        let value = match self.kind {
            DataKind::Integer if raw_binary && self.binary_format.is_integer() => {
                SubfieldValue::Integer(self.binary_integer(content)?)
            }
            DataKind::Integer => SubfieldValue::Integer(self.text_integer(&text.bytes_to_string(content))?),
            DataKind::Real if raw_binary && self.binary_format == BinaryFormat::FloatReal => {
                SubfieldValue::Real(self.binary_real(content, text))
            }
            DataKind::Real => SubfieldValue::Real(self.text_real(&text.bytes_to_string(content))),
            DataKind::String => SubfieldValue::String(text.bytes_to_string(content)),
            DataKind::BinaryString => SubfieldValue::Binary(content.to_vec()),
        };
        Ok((value, extracted.consumed))
    }

    fn text_integer(&self, text: &str) -> Result<i64> {
        text.trim()
            .parse()
            .ok()
            .with_context(|| InvalidIntegerSubfieldSnafu {
                subfield: self.name.as_str(),
                text,
            })
    }

    fn text_real(&self, text: &str) -> f64 {
        match text.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                log::debug!(
                    "Subfield '{}' is not a real number: '{text}', using 0",
                    self.name
                );
                0.0
            }
        }
    }

    fn binary_integer(&self, content: &[u8]) -> Result<i64> {
        ensure!(
            (1..=8).contains(&content.len()),
            InvalidIntegerSubfieldSnafu {
                subfield: self.name.as_str(),
                text: format!("{content:02x?}"),
            }
        );
        let value = match self.binary_format {
            BinaryFormat::UnsignedInt => LE::read_uint(content, content.len()) as i64,
            _ => LE::read_int(content, content.len()),
        };
        Ok(value)
    }

    fn binary_real(&self, content: &[u8], text: DecodingContext) -> f64 {
        match content.len() {
            4 => LE::read_f32(content) as f64,
            8 => LE::read_f64(content),
            _ => self.text_real(&text.bytes_to_string(content)),
        }
    }
}

/// One decoded subfield value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SubfieldValue {
    Integer(i64),
    Real(f64),
    String(String),
    Binary(Vec<u8>),
}
impl SubfieldValue {
    pub fn kind(&self) -> DataKind {
        match self {
            Self::Integer(_) => DataKind::Integer,
            Self::Real(_) => DataKind::Real,
            Self::String(_) => DataKind::String,
            Self::Binary(_) => DataKind::BinaryString,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Reals, and integers converted to reals.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Real(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(value) => Some(value),
            _ => None,
        }
    }

    /// Normalized text form. Binary strings map each byte to one character.
    pub fn to_text(&self) -> String {
        self.to_string()
    }
}
impl fmt::Display for SubfieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::String(value) => f.write_str(value),
            Self::Binary(value) => value.iter().try_for_each(|b| write!(f, "{}", char::from(*b))),
        }
    }
}

/// The subfield values of one field occurrence, in schema order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Subfields {
    entries: Vec<(String, SubfieldValue)>,
}
impl Subfields {
    delegate! {
        to self.entries {
            pub fn len(&self) -> usize;
            pub fn is_empty(&self) -> bool;
        }
    }

    pub fn get(&self, name: &str) -> Option<&SubfieldValue> {
        self.entries
            .iter()
            .find(|(entry_name, _)| entry_name == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SubfieldValue)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Take the value of `name` out.
    pub fn remove(&mut self, name: &str) -> Option<SubfieldValue> {
        let index = self
            .entries
            .iter()
            .position(|(entry_name, _)| entry_name == name)?;
        Some(self.entries.remove(index).1)
    }

    pub(crate) fn push(&mut self, name: impl Into<String>, value: SubfieldValue) {
        self.entries.push((name.into(), value));
    }
}
impl FromIterator<(String, SubfieldValue)> for Subfields {
    fn from_iter<I: IntoIterator<Item = (String, SubfieldValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
