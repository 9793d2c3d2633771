//! Data records and views on their fields.
use super::*;
use crate::{
    directory::DirectoryEntryReader,
    field_schema::{FieldSchema, HeaderSchema},
    reader::BinaryDecoding,
    subfield::{SubfieldValue, Subfields},
};
use std::sync::Arc;

/// How subfield bytes are turned into values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct DecodeSettings {
    pub(crate) binary_decoding: BinaryDecoding,
    pub(crate) lexical_level: LexicalLevel,
}

/// The location of one field in the body of its record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldInstance {
    pub tag: String,
    /// Offset into the record body, i.e. not counting the leader.
    pub offset: usize,
    pub length: usize,
    schema_index: usize,
}

/// One decoded data record.
///
/// Owns the record's bytes; every [`Field`] borrows from it.
#[derive(Clone, Debug)]
pub struct Record {
    leader: Leader,
    body: Vec<u8>,
    instances: Vec<FieldInstance>,
    schema: Arc<HeaderSchema>,
    settings: DecodeSettings,
}

impl Record {
    /// Bind the directory in `body` (the record without its leader) to `schema`.
    pub(crate) fn decode(
        leader: Leader,
        body: Vec<u8>,
        schema: Arc<HeaderSchema>,
        settings: DecodeSettings,
    ) -> Result<Self> {
        let entry_reader = DirectoryEntryReader::for_leader(&leader);
        let entries = entry_reader.read_entries(&body, 0, body.len())?;
        let instances = entries
            .into_iter()
            .map(|entry| -> Result<FieldInstance> {
                let schema_index = schema
                    .index_of(&entry.tag)
                    .context(UndefinedFieldSnafu {
                        tag: entry.tag.as_str(),
                    })?;
                let offset = (leader.field_area_start + entry.position)
                    .checked_sub(LEADER_SIZE)
                    .filter(|offset| {
                        offset
                            .checked_add(entry.length)
                            .is_some_and(|end| end <= body.len())
                    })
                    .with_context(|| FieldOutOfBoundsSnafu {
                        tag: entry.tag.as_str(),
                        offset: leader.field_area_start + entry.position,
                        length: entry.length,
                        available: body.len(),
                    })?;
                Ok(FieldInstance {
                    tag: entry.tag,
                    offset,
                    length: entry.length,
                    schema_index,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            leader,
            body,
            instances,
            schema,
            settings,
        })
    }

    pub fn leader(&self) -> &Leader {
        &self.leader
    }

    /// The record bytes after the leader: directory and field area.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn schema(&self) -> &Arc<HeaderSchema> {
        &self.schema
    }

    pub fn instances(&self) -> &[FieldInstance] {
        &self.instances
    }

    pub fn field_count(&self) -> usize {
        self.instances.len()
    }

    pub fn field(&self, index: usize) -> Option<Field<'_>> {
        self.instances.get(index).map(|instance| self.view(instance))
    }

    /// All fields, in directory order.
    pub fn fields(&self) -> impl Iterator<Item = Field<'_>> {
        self.instances.iter().map(|instance| self.view(instance))
    }

    /// The first field with `tag`.
    pub fn field_with_tag<'a>(&'a self, tag: &'a str) -> Option<Field<'a>> {
        self.fields_with_tag(tag).next()
    }

    pub fn fields_with_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = Field<'a>> {
        self.instances
            .iter()
            .filter(move |instance| instance.tag == tag)
            .map(|instance| self.view(instance))
    }

    fn view<'a>(&'a self, instance: &'a FieldInstance) -> Field<'a> {
        Field {
            record: self,
            instance,
        }
    }
}

/// A field of a [`Record`], together with its schema.
#[derive(Clone, Copy, Debug)]
pub struct Field<'r> {
    record: &'r Record,
    instance: &'r FieldInstance,
}

impl<'r> Field<'r> {
    pub fn tag(&self) -> &'r str {
        &self.instance.tag
    }

    pub fn schema(&self) -> &'r FieldSchema {
        self.record.schema.schema_at(self.instance.schema_index)
    }

    /// The raw field bytes, including the trailing field terminator.
    pub fn bytes(&self) -> &'r [u8] {
        let start = self.instance.offset;
        &self.record.body[start..start + self.instance.length]
    }

    /// Decode the first occurrence of the field's subfields.
    pub fn subfields(&self) -> Result<Subfields> {
        let mut remaining = self.bytes();
        self.decode_occurrence(&mut remaining)
    }

    /// Decode every occurrence of a repeating field.
    ///
    /// Non-repeating fields give exactly one group.
    pub fn subfield_groups(&self) -> Result<Vec<Subfields>> {
        let schema = self.schema();
        if !schema.is_repeating() || schema.subfields().is_empty() {
            return Ok(vec![self.subfields()?]);
        }
        let mut remaining = self.bytes();
        let mut groups = Vec::new();
        while !is_exhausted(remaining) {
            let before = remaining.len();
            groups.push(self.decode_occurrence(&mut remaining)?);
            if remaining.len() == before {
                break;
            }
        }
        Ok(groups)
    }

    /// The value of the subfield `name` in the first occurrence.
    pub fn subfield(&self, name: &str) -> Result<Option<SubfieldValue>> {
        let mut subfields = self.subfields()?;
        Ok(subfields.remove(name))
    }

    /// The field bytes as text, without the field terminator.
    ///
    /// Mostly useful for elementary fields, which have no subfields.
    pub fn text(&self) -> String {
        let bytes = self.bytes();
        let bytes = bytes.strip_suffix(&[FIELD_TERMINATOR]).unwrap_or(bytes);
        self.decoding_context().bytes_to_string(bytes)
    }

    fn decoding_context(&self) -> DecodingContext {
        let lexical_level = self
            .schema()
            .lexical_level()
            .unwrap_or(self.record.settings.lexical_level);
        DecodingContext::default().with_lexical_level(lexical_level)
    }

    fn decode_occurrence(&self, remaining: &mut &'r [u8]) -> Result<Subfields> {
        let text = self.decoding_context();
        let binary = self.record.settings.binary_decoding;
        let mut subfields = Subfields::default();
        for rule in self.schema().subfields() {
            let bytes: &'r [u8] = *remaining;
            let (value, consumed) = rule.decode(bytes, text, binary)?;
            *remaining = bytes.get(consumed..).unwrap_or_default();
            subfields.push(rule.name(), value);
        }
        Ok(subfields)
    }
}

/// Nothing but a (one or two byte) field terminator left.
fn is_exhausted(remaining: &[u8]) -> bool {
    matches!(remaining, [] | [FIELD_TERMINATOR] | [FIELD_TERMINATOR, 0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    fn decode(body: Vec<u8>, settings: DecodeSettings) -> Result<Record> {
        let schema = Arc::new(sample_schema());
        let leader = Leader::parse(&body, LeaderKind::Record)?;
        Record::decode(leader, body[LEADER_SIZE..].to_vec(), schema, settings)
    }

    #[test]
    fn fields_in_directory_order() {
        let record = decode(
            DrBuilder::new()
                .field("0001", b"00001")
                .field("TEST", b"ABC")
                .field("NAME", b"Lake\x1fMUD\x1f")
                .build(),
            DecodeSettings::default(),
        )
        .unwrap();
        assert_eq!(3, record.field_count());
        let tags: Vec<&str> = record.fields().map(|f| f.tag()).collect();
        assert_eq!(vec!["0001", "TEST", "NAME"], tags);

        let test = record.field_with_tag("TEST").unwrap();
        assert_eq!(b"ABC\x1e", test.bytes());
        assert_eq!("Test field", test.schema().name());
        let subfields = test.subfields().unwrap();
        assert_eq!(1, subfields.len());
        assert_eq!(Some(&SubfieldValue::String("ABC".to_string())), subfields.get("VAL"));

        let name = record.field_with_tag("NAME").unwrap();
        let subfields = name.subfields().unwrap();
        assert_eq!(
            vec![
                ("OBJNAM", &SubfieldValue::String("Lake".to_string())),
                ("NATSUR", &SubfieldValue::String("MUD".to_string())),
            ],
            subfields.iter().collect::<Vec<_>>()
        );
        assert_eq!(
            Some(SubfieldValue::Integer(1)),
            record.field(0).unwrap().subfield("RCID").unwrap()
        );
        assert!(record.field_with_tag("FRID").is_none());
    }

    #[test]
    fn field_lookup_with_owned_tag() {
        let record = decode(
            DrBuilder::new()
                .field("NAME", b"Lake\x1fMUD\x1f")
                .field("NAME", b"Pond\x1fSAND\x1f")
                .build(),
            DecodeSettings::default(),
        )
        .unwrap();
        let tag = String::from("NAME");
        let first = record.field_with_tag(&tag).unwrap();
        assert_eq!(
            Some(SubfieldValue::String("Lake".to_string())),
            first.subfield("OBJNAM").unwrap()
        );
        let natures: Vec<String> = record
            .fields_with_tag(&tag)
            .map(|f| f.subfield("NATSUR").unwrap().unwrap().to_text())
            .collect();
        assert_eq!(vec!["MUD", "SAND"], natures);
    }

    #[test]
    fn decoding_twice_gives_same_values() {
        let body = DrBuilder::new()
            .field("0001", b"00042")
            .field("NAME", b"Sand\x1fFINE\x1f")
            .build();
        let first = decode(body.clone(), DecodeSettings::default()).unwrap();
        let second = decode(body, DecodeSettings::default()).unwrap();
        let values = |record: &Record| -> Vec<Subfields> {
            record.fields().map(|f| f.subfields().unwrap()).collect()
        };
        assert_eq!(values(&first), values(&second));
        assert_eq!(values(&first), values(&first));
    }

    #[test]
    fn undefined_field() {
        let res = decode(
            DrBuilder::new().field("XXXX", b"1").build(),
            DecodeSettings::default(),
        );
        assert!(
            matches!(&res, Err(DdfError::UndefinedField { tag, .. }) if tag == "XXXX"),
            "{res:?}"
        );
    }

    #[test]
    fn field_out_of_bounds() {
        let mut body = DrBuilder::new().field("TEST", b"ABC").build();
        // Claim a field length of 99 bytes in the directory.
        let length_pos = LEADER_SIZE + 4;
        body[length_pos..length_pos + 4].copy_from_slice(b"0099");
        let res = decode(body, DecodeSettings::default());
        assert!(
            matches!(&res, Err(DdfError::FieldOutOfBounds { tag, length: 99, .. }) if tag == "TEST"),
            "{res:?}"
        );
    }

    #[test]
    fn repeating_groups() {
        let mut data = Vec::new();
        for (y, x) in [(1i32, -1i32), (2, -2), (3, -3)] {
            data.extend_from_slice(&y.to_le_bytes());
            data.extend_from_slice(&x.to_le_bytes());
        }
        let settings = DecodeSettings {
            binary_decoding: BinaryDecoding::LittleEndian,
            ..Default::default()
        };
        let record = decode(DrBuilder::new().field("SG2D", &data).build(), settings).unwrap();
        let field = record.field_with_tag("SG2D").unwrap();
        let groups = field.subfield_groups().unwrap();
        assert_eq!(3, groups.len());
        let coordinates: Vec<(i64, i64)> = groups
            .iter()
            .map(|g| {
                (
                    g.get("YCOO").and_then(SubfieldValue::as_i64).unwrap(),
                    g.get("XCOO").and_then(SubfieldValue::as_i64).unwrap(),
                )
            })
            .collect();
        assert_eq!(vec![(1, -1), (2, -2), (3, -3)], coordinates);
        // A single occurrence is just the first group.
        assert_eq!(groups[0], field.subfields().unwrap());
    }

    #[test]
    fn repeating_variable_groups() {
        let record = decode(
            DrBuilder::new()
                .field("ATTF", b"1\x1fone\x1f2\x1ftwo\x1f")
                .build(),
            DecodeSettings::default(),
        )
        .unwrap();
        let groups = record
            .field_with_tag("ATTF")
            .unwrap()
            .subfield_groups()
            .unwrap();
        let pairs: Vec<String> = groups
            .iter()
            .map(|g| format!("{}={}", g.get("ATTL").unwrap(), g.get("ATVL").unwrap()))
            .collect();
        assert_eq!(vec!["1=one", "2=two"], pairs);
    }

    #[test]
    fn elementary_field_text() {
        let record = decode(
            DrBuilder::new().field("NOTE", b"free text").build(),
            DecodeSettings::default(),
        )
        .unwrap();
        let note = record.field_with_tag("NOTE").unwrap();
        assert!(note.subfields().unwrap().is_empty());
        assert_eq!("free text", note.text());
    }

    #[test]
    fn exhausted_bytes() {
        assert!(is_exhausted(&[]));
        assert!(is_exhausted(&[FIELD_TERMINATOR]));
        assert!(is_exhausted(&[FIELD_TERMINATOR, 0]));
        assert!(!is_exhausted(&[b'A', FIELD_TERMINATOR]));
    }
}
