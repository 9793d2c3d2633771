//! Builders for small synthetic DDF files.
use super::*;
use crate::{field_schema::HeaderSchema, reader::BinaryWidth};

/// Directory entries are tag, length and position, four bytes each.
const ENTRY_SIZES: (usize, usize, usize) = (4, 4, 4);

/// Lay out leader, directory and field area for `fields`.
fn assemble(mut leader: Leader, fields: &[(String, Vec<u8>)]) -> Vec<u8> {
    let (length_size, position_size, tag_size) = ENTRY_SIZES;
    leader.size_of_field_length = length_size;
    leader.size_of_field_position = position_size;
    leader.size_of_field_tag = tag_size;

    let mut directory = Vec::new();
    let mut field_area = Vec::new();
    for (tag, data) in fields {
        assert_eq!(tag_size, tag.len(), "tag '{tag}' has the wrong size");
        directory.extend_from_slice(tag.as_bytes());
        directory.extend_from_slice(format!("{:04}", data.len()).as_bytes());
        directory.extend_from_slice(format!("{:04}", field_area.len()).as_bytes());
        field_area.extend_from_slice(data);
    }
    directory.push(FIELD_TERMINATOR);

    leader.field_area_start = LEADER_SIZE + directory.len();
    leader.record_length = leader.field_area_start + field_area.len();
    let mut record = leader.to_bytes().to_vec();
    record.extend_from_slice(&directory);
    record.extend_from_slice(&field_area);
    record
}

fn leader_with(interchange_level: char, leader_identifier: char) -> Leader {
    Leader {
        record_length: 0,
        interchange_level,
        leader_identifier,
        in_line_code_ext_indicator: ' ',
        version: ' ',
        application_indicator: ' ',
        field_control_length: None,
        field_area_start: 0,
        extended_character_set: [' ', ' ', ' '],
        size_of_field_length: 0,
        size_of_field_position: 0,
        reserved: '0',
        size_of_field_tag: 0,
    }
}

/// Builds a data descriptive record.
#[derive(Debug, Default)]
pub(crate) struct DdrBuilder {
    fields: Vec<(String, Vec<u8>)>,
}
impl DdrBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds the `0000` file control field.
    pub(crate) fn control_field(self, title: &str, tag_pairs: &str) -> Self {
        self.field("0000", "0000;&   ", title, tag_pairs, "")
    }

    pub(crate) fn field(
        mut self,
        tag: &str,
        controls: &str,
        name: &str,
        array_descriptor: &str,
        format: &str,
    ) -> Self {
        let mut data = Vec::new();
        data.extend_from_slice(controls.as_bytes());
        data.extend_from_slice(name.as_bytes());
        data.push(UNIT_TERMINATOR);
        data.extend_from_slice(array_descriptor.as_bytes());
        data.push(UNIT_TERMINATOR);
        data.extend_from_slice(format.as_bytes());
        data.push(FIELD_TERMINATOR);
        self.fields.push((tag.to_string(), data));
        self
    }

    pub(crate) fn build(self) -> Vec<u8> {
        let leader = Leader {
            in_line_code_ext_indicator: 'E',
            version: '1',
            field_control_length: Some(9),
            extended_character_set: [' ', '!', ' '],
            ..leader_with('3', 'L')
        };
        assemble(leader, &self.fields)
    }
}

/// Builds a data record.
#[derive(Debug, Default)]
pub(crate) struct DrBuilder {
    fields: Vec<(String, Vec<u8>)>,
    reuse: bool,
}
impl DrBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Mark the record as one whose leader and directory the following records reuse.
    pub(crate) fn reuse(mut self) -> Self {
        self.reuse = true;
        self
    }

    /// Adds a field holding `data` and a field terminator.
    pub(crate) fn field(mut self, tag: &str, data: &[u8]) -> Self {
        let mut data = data.to_vec();
        data.push(FIELD_TERMINATOR);
        self.fields.push((tag.to_string(), data));
        self
    }

    pub(crate) fn build(self) -> Vec<u8> {
        let identifier = if self.reuse { 'R' } else { 'D' };
        assemble(leader_with(' ', identifier), &self.fields)
    }
}

/// A DDR with one field definition of every shape the decoder handles.
pub(crate) fn sample_ddr() -> Vec<u8> {
    DdrBuilder::new()
        .control_field("Sample file", "0001TEST0001NAME0001SG2D0001ATTF0001NOTE")
        .field("0001", "1100;&   ", "Record identifier", "RCID", "(I(5))")
        .field("TEST", "1000;&   ", "Test field", "VAL", "(A(3))")
        .field("NAME", "1600;&   ", "Feature name", "OBJNAM!NATSUR", "(A,A)")
        .field("SG2D", "2500;&   ", "2-D coordinate", "*YCOO!XCOO", "(2b24)")
        .field("ATTF", "2600;&   ", "Feature attributes", "*ATTL!ATVL", "(A,A)")
        .field("NOTE", "0000;&   ", "Note", "", "")
        .build()
}

/// The schema of [`sample_ddr`], with `b` widths read the S-57 way.
pub(crate) fn sample_schema() -> HeaderSchema {
    let ddr = sample_ddr();
    let leader = Leader::parse(&ddr, LeaderKind::Module).expect("sample leader");
    HeaderSchema::parse(leader, &ddr, BinaryWidth::AfterSubtype).expect("sample schema")
}
