//! Field definitions from the data descriptive record.
use super::*;
use crate::{
    directory::DirectoryEntryReader, field_tree::FieldTree, reader::BinaryWidth,
    subfield::SubfieldRule,
};
use rustc_hash::FxHashMap;

/// Tag of the file control field.
pub const CONTROL_FIELD_TAG: &str = "0000";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataStructure {
    /// A single value, or no subfields at all.
    Elementary,
    Vector,
    Array,
    Concatenated,
}
impl DataStructure {
    fn from_code(code: char) -> Option<Self> {
        match code {
            ' ' | '0' => Some(Self::Elementary),
            '1' => Some(Self::Vector),
            '2' => Some(Self::Array),
            '3' => Some(Self::Concatenated),
            _ => None,
        }
    }
}

/// The leading control bytes of a data descriptive field.
///
/// Fields that are missing because the field control length is short are blank.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldControls {
    pub data_structure_code: char,
    pub data_type_code: char,
    pub auxiliary_controls: [char; 2],
    pub printable_graphics: [char; 2],
    pub truncated_escape_sequence: [char; 3],
}
impl FieldControls {
    const LENGTH: usize = 9;

    fn parse(data: &[u8]) -> Self {
        let mut padded = [SPACE; Self::LENGTH];
        let available = data.len().min(Self::LENGTH);
        padded[..available].copy_from_slice(&data[..available]);
        let data = padded.as_slice();
        FieldControls {
            data_structure_code: data.read_char(0),
            data_type_code: data.read_char(1),
            auxiliary_controls: data.take_chars(2),
            printable_graphics: data.take_chars(4),
            truncated_escape_sequence: data.take_chars(6),
        }
    }
}

/// The decoding rules for every occurrence of one field tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSchema {
    tag: String,
    name: String,
    controls: FieldControls,
    data_structure: DataStructure,
    array_descriptor: String,
    format_controls: String,
    repeating: bool,
    subfields: Vec<SubfieldRule>,
    fixed_width: usize,
}

impl FieldSchema {
    /// Build the schema of the field `tag`, whose `field_length` bytes start at
    /// `field_offset` in `header_bytes`.
    pub fn build(
        leader: &Leader,
        tag: &str,
        field_length: usize,
        header_bytes: &[u8],
        field_offset: usize,
        binary_width: BinaryWidth,
    ) -> Result<Self> {
        let field = field_offset
            .checked_add(field_length)
            .and_then(|end| header_bytes.get(field_offset..end))
            .filter(|field| field.len() >= 2)
            .with_context(|| FieldOutOfBoundsSnafu {
                tag,
                offset: field_offset,
                length: field_length,
                available: header_bytes.len(),
            })?;

        let control_length = leader.field_control_length.unwrap_or(0).min(field.len());
        let controls = FieldControls::parse(&field[..control_length.max(2)]);
        let data_structure = DataStructure::from_code(controls.data_structure_code).with_context(
            || UnrecognisedDataStructCodeSnafu {
                tag,
                code: controls.data_structure_code,
            },
        )?;
        ensure!(
            matches!(controls.data_type_code, ' ' | '0'..='6'),
            UnrecognisedDataTypeCodeSnafu {
                tag,
                code: controls.data_type_code,
            }
        );

        let mut pos = control_length;
        let (name, consumed) = read_delimited_string(&field[pos..], field_length - pos);
        pos += consumed;
        let (array_descriptor, consumed) = read_delimited_string(&field[pos..], field_length - pos);
        pos += consumed;
        let (format_controls, _) = read_delimited_string(&field[pos..], field_length - pos);

        let mut schema = FieldSchema {
            tag: tag.to_string(),
            name,
            controls,
            data_structure,
            array_descriptor,
            format_controls,
            repeating: false,
            subfields: Vec::new(),
            fixed_width: 0,
        };
        if data_structure != DataStructure::Elementary {
            schema.build_subfields(binary_width)?;
        }
        log::debug!(
            "Field '{}' ({}): {} subfields, fixed width {}",
            schema.tag,
            schema.name,
            schema.subfields.len(),
            schema.fixed_width
        );
        Ok(schema)
    }

    fn build_subfields(&mut self, binary_width: BinaryWidth) -> Result<()> {
        let names_start = self.array_descriptor.rfind('*').unwrap_or(0);
        let mut names = &self.array_descriptor[names_start..];
        if let Some(stripped) = names.strip_prefix('*') {
            self.repeating = true;
            names = stripped;
        }
        let names: Vec<&str> = names.split('!').collect();

        let formats = format::tokenize(&self.format_controls)?;
        ensure!(
            formats.len() <= names.len(),
            TooManyFormatsSnafu {
                tag: self.tag.as_str(),
                formats: formats.len(),
                subfields: names.len(),
            }
        );
        ensure!(
            formats.len() >= names.len(),
            TooFewFormatsSnafu {
                tag: self.tag.as_str(),
                formats: formats.len(),
                subfields: names.len(),
            }
        );

        self.subfields = names
            .into_iter()
            .zip(formats)
            .map(|(name, format)| SubfieldRule::with_binary_width(name, format, binary_width))
            .collect::<Result<_>>()?;
        self.fixed_width = self
            .subfields
            .iter()
            .map(|rule| rule.width().fixed().filter(|width| *width > 0))
            .sum::<Option<usize>>()
            .unwrap_or(0);
        Ok(())
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn controls(&self) -> &FieldControls {
        &self.controls
    }

    pub fn data_structure(&self) -> DataStructure {
        self.data_structure
    }

    /// The subfield names, or the tag pairs for the file control field.
    pub fn array_descriptor(&self) -> &str {
        &self.array_descriptor
    }

    pub fn format_controls(&self) -> &str {
        &self.format_controls
    }

    /// Whether the subfield group may repeat within one field.
    pub fn is_repeating(&self) -> bool {
        self.repeating
    }

    pub fn subfields(&self) -> &[SubfieldRule] {
        &self.subfields
    }

    pub fn subfield(&self, name: &str) -> Option<&SubfieldRule> {
        self.subfields.iter().find(|rule| rule.name() == name)
    }

    /// Sum of all subfield widths, or 0 if any of them is variable.
    pub fn fixed_width(&self) -> usize {
        self.fixed_width
    }

    /// The character set announced in the field controls, if any.
    pub fn lexical_level(&self) -> Option<LexicalLevel> {
        LexicalLevel::for_character_set_indicator(self.controls.truncated_escape_sequence)
            .filter(|_| self.controls.truncated_escape_sequence != [' ', ' ', ' '])
    }
}

/// Read text up to a unit or field terminator, looking at no more than `max_chars - 1` bytes.
///
/// Returns the text and the number of bytes consumed, which includes the
/// terminator if one was found.
pub(crate) fn read_delimited_string(bytes: &[u8], max_chars: usize) -> (String, usize) {
    let max_chars = max_chars.min(bytes.len());
    let is_terminator = |b: &u8| *b == UNIT_TERMINATOR || *b == FIELD_TERMINATOR;
    let scan_limit = max_chars.saturating_sub(1);
    let length = bytes[..scan_limit]
        .iter()
        .position(is_terminator)
        .unwrap_or(scan_limit);
    let consumed = if length < max_chars && is_terminator(&bytes[length]) {
        length + 1
    } else {
        length
    };
    (DDR_DECODING_CONTEXT.bytes_to_string(&bytes[..length]), consumed)
}

/// All field definitions of a file, decoded once from its DDR.
#[derive(Clone, Debug)]
pub struct HeaderSchema {
    leader: Leader,
    fields: Vec<FieldSchema>,
    index: FxHashMap<String, usize>,
}

impl HeaderSchema {
    pub fn new(leader: Leader, fields: Vec<FieldSchema>) -> Self {
        let mut index = FxHashMap::default();
        for (i, field) in fields.iter().enumerate() {
            index.entry(field.tag.clone()).or_insert(i);
        }
        Self {
            leader,
            fields,
            index,
        }
    }

    /// Decode the field definitions of a DDR.
    ///
    /// `record` holds the whole record, starting with its leader.
    pub fn parse(leader: Leader, record: &[u8], binary_width: BinaryWidth) -> Result<Self> {
        let entry_reader = DirectoryEntryReader::for_leader(&leader);
        let entries = entry_reader.read_entries(record, LEADER_SIZE, record.len())?;
        let fields = entries
            .iter()
            .map(|entry| {
                FieldSchema::build(
                    &leader,
                    &entry.tag,
                    entry.length,
                    record,
                    leader.field_area_start + entry.position,
                    binary_width,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(leader, fields))
    }

    pub fn leader(&self) -> &Leader {
        &self.leader
    }

    pub fn schema(&self, tag: &str) -> Option<&FieldSchema> {
        self.index_of(tag).map(|i| &self.fields[i])
    }

    pub fn schemas(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub(crate) fn index_of(&self, tag: &str) -> Option<usize> {
        self.index.get(tag).copied()
    }

    pub(crate) fn schema_at(&self, index: usize) -> &FieldSchema {
        &self.fields[index]
    }

    /// The file title from the file control field.
    pub fn file_title(&self) -> Option<&str> {
        self.schema(CONTROL_FIELD_TAG).map(FieldSchema::name)
    }

    /// The parent/child structure of the field tags, from the file control field.
    ///
    /// Empty if the file has no file control field.
    pub fn field_tree(&self) -> Result<FieldTree<()>> {
        match self.schema(CONTROL_FIELD_TAG) {
            Some(control) => {
                FieldTree::parse_from_str(control.array_descriptor(), self.leader.size_of_field_tag)
            }
            None => Ok(FieldTree::Empty),
        }
    }
}
