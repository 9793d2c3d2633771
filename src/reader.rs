//! Opening a DDF and reading its records one at a time.
use super::*;
use crate::{
    field_schema::HeaderSchema,
    leader::is_leader_valid,
    record::{DecodeSettings, Record},
    source::{ByteSource, MappedFile, SliceSource, StreamSource},
};
use std::{fs::File, io::BufReader, path::Path, sync::Arc};

/// How the bytes of binary (`b`/`B`) subfields become numbers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BinaryDecoding {
    /// Read the extracted bytes as text, like every other subfield.
    #[default]
    Text,
    /// Read integers and floats least significant byte first, as S-57 does.
    LittleEndian,
}

/// How many bytes a `b` format with a subtype digit, like `b12`, covers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BinaryWidth {
    /// Every digit of the token is part of the width, `b12` is 12 bytes.
    #[default]
    AllDigits,
    /// The first digit is the subtype, the rest the width. `b12` is a two
    /// byte unsigned integer, as S-57 writes it.
    AfterSubtype,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReaderOptions {
    pub binary_decoding: BinaryDecoding,
    pub binary_width: BinaryWidth,
    /// Data records claiming to be longer than this are corrupt.
    pub max_record_length: usize,
    /// Data records whose field area starts further in than this are corrupt.
    pub max_field_area_start: usize,
    /// Text encoding for fields that do not announce their own.
    pub lexical_level: LexicalLevel,
}
impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            binary_decoding: BinaryDecoding::default(),
            binary_width: BinaryWidth::default(),
            max_record_length: 100_000_000,
            max_field_area_start: 100_000,
            lexical_level: LexicalLevel::default(),
        }
    }
}
impl ReaderOptions {
    pub fn with_binary_decoding(self, binary_decoding: BinaryDecoding) -> Self {
        Self {
            binary_decoding,
            ..self
        }
    }

    pub fn with_binary_width(self, binary_width: BinaryWidth) -> Self {
        Self {
            binary_width,
            ..self
        }
    }

    pub fn with_max_record_length(self, max_record_length: usize) -> Self {
        Self {
            max_record_length,
            ..self
        }
    }

    pub fn with_max_field_area_start(self, max_field_area_start: usize) -> Self {
        Self {
            max_field_area_start,
            ..self
        }
    }

    pub fn with_lexical_level(self, lexical_level: LexicalLevel) -> Self {
        Self {
            lexical_level,
            ..self
        }
    }

    fn decode_settings(&self) -> DecodeSettings {
        DecodeSettings {
            binary_decoding: self.binary_decoding,
            lexical_level: self.lexical_level,
        }
    }
}

/// Leader and directory of an `'R'` record, shared by every record after it.
#[derive(Clone, Debug)]
struct ReusedHeader {
    leader: Leader,
    directory: Vec<u8>,
}

/// Reads the DDR of a file once, then its data records in order.
#[derive(Debug)]
pub struct Iso8211Reader<S> {
    source: S,
    options: ReaderOptions,
    schema: Arc<HeaderSchema>,
    reuse: Option<ReusedHeader>,
}

impl Iso8211Reader<StreamSource<BufReader<File>>> {
    /// Open `path` and read its DDR.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_options(path, ReaderOptions::default())
    }

    pub fn open_with_options<P: AsRef<Path>>(path: P, options: ReaderOptions) -> Result<Self> {
        let file = File::open(path)?;
        let source = StreamSource::new(BufReader::new(file))?;
        Self::new(source, options)
    }
}

impl Iso8211Reader<SliceSource<MappedFile>> {
    /// Memory map `path` and read its DDR.
    pub fn open_mapped<P: AsRef<Path>>(path: P, options: ReaderOptions) -> Result<Self> {
        let source = SliceSource::new(MappedFile::open(path)?);
        Self::new(source, options)
    }
}

impl<S> Iso8211Reader<S>
where
    S: ByteSource,
{
    /// Read the DDR from the current position of `source`.
    pub fn new(mut source: S, options: ReaderOptions) -> Result<Self> {
        let offset = source.position();
        let mut leader_bytes = [0u8; LEADER_SIZE];
        let read = source.read_bytes(&mut leader_bytes)?;
        ensure!(
            read == LEADER_SIZE,
            ShortLeaderSnafu {
                offset,
                actual: read,
            }
        );
        ensure!(
            is_leader_valid(&leader_bytes),
            InvalidLeaderSnafu {
                description: format!(
                    "'{}' does not look like the leader of an ISO 8211 file",
                    String::from_utf8_lossy(&leader_bytes)
                ),
            }
        );
        let leader = Leader::parse(&leader_bytes, LeaderKind::Module)?;

        let mut record = vec![0u8; leader.record_length.max(LEADER_SIZE)];
        record[..LEADER_SIZE].copy_from_slice(&leader_bytes);
        let expected = record.len() - LEADER_SIZE;
        let read = source.read_bytes(&mut record[LEADER_SIZE..])?;
        ensure!(
            read == expected,
            ShortRecordSnafu {
                offset,
                expected,
                actual: read,
            }
        );
        let schema = HeaderSchema::parse(leader, &record, options.binary_width)?;
        log::debug!(
            "Read DDR of {} bytes with {} field definitions",
            record.len(),
            schema.schemas().len()
        );
        Ok(Self {
            source,
            options,
            schema: Arc::new(schema),
            reuse: None,
        })
    }

    pub fn schema(&self) -> &Arc<HeaderSchema> {
        &self.schema
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Read the next data record, or `None` at the end of the source.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        if self.source.is_at_end() {
            return Ok(None);
        }
        let offset = self.source.position();
        let (leader, body) = match &self.reuse {
            Some(reused) => {
                let (leader, directory) = (reused.leader.clone(), reused.directory.clone());
                self.read_reused(offset, leader, directory)?
            }
            None => self.read_fresh(offset)?,
        };
        if self.reuse.is_none() && leader.requests_reuse() {
            let directory_length = leader.field_area_start.saturating_sub(LEADER_SIZE);
            self.reuse = Some(ReusedHeader {
                directory: body[..directory_length.min(body.len())].to_vec(),
                leader: leader.clone(),
            });
        }
        let record = Record::decode(
            leader,
            body,
            self.schema.clone(),
            self.options.decode_settings(),
        )?;
        log::trace!(
            "Read record at offset {offset} with {} fields",
            record.field_count()
        );
        Ok(Some(record))
    }

    /// All remaining records. Stops after the first error.
    pub fn records(&mut self) -> impl Iterator<Item = Result<Record>> + '_ {
        let mut failed = false;
        std::iter::from_fn(move || {
            if failed {
                return None;
            }
            let next = self.read_record().transpose();
            failed = matches!(next, Some(Err(_)));
            next
        })
    }

    fn read_fresh(&mut self, offset: u64) -> Result<(Leader, Vec<u8>)> {
        let mut leader_bytes = [0u8; LEADER_SIZE];
        let read = self.source.read_bytes(&mut leader_bytes)?;
        ensure!(
            read == LEADER_SIZE,
            ShortLeaderSnafu {
                offset,
                actual: read,
            }
        );
        let leader = Leader::parse(&leader_bytes, LeaderKind::Record)?;
        self.check_sanity(offset, &leader)?;
        if leader.record_length == 0 {
            return Ok((leader, Vec::new()));
        }
        let body = self.read_body(offset, leader.record_length - LEADER_SIZE)?;
        Ok((leader, body))
    }

    /// Only the field area follows in the source; leader and directory are
    /// those of the record that requested reuse.
    fn read_reused(
        &mut self,
        offset: u64,
        leader: Leader,
        mut body: Vec<u8>,
    ) -> Result<(Leader, Vec<u8>)> {
        let field_area_length = leader
            .record_length
            .saturating_sub(LEADER_SIZE + body.len());
        let field_area = self.read_body(offset, field_area_length)?;
        body.extend_from_slice(&field_area);
        Ok((leader, body))
    }

    fn check_sanity(&self, offset: u64, leader: &Leader) -> Result<()> {
        let Leader {
            record_length,
            field_area_start,
            ..
        } = *leader;
        let corrupt = record_length != 0
            && (record_length < LEADER_SIZE
                || record_length > self.options.max_record_length
                || field_area_start < LEADER_SIZE
                || field_area_start > self.options.max_field_area_start);
        ensure!(
            !corrupt,
            CorruptRecordSnafu {
                offset,
                record_length,
                field_area_start,
            }
        );
        Ok(())
    }

    fn read_body(&mut self, offset: u64, expected: usize) -> Result<Vec<u8>> {
        let mut body = vec![0u8; expected];
        let read = self.source.read_bytes(&mut body)?;
        ensure!(
            read == expected,
            ShortRecordSnafu {
                offset,
                expected,
                actual: read,
            }
        );
        if expected > 0 {
            self.complete_field_terminator(offset, &mut body)?;
        }
        Ok(body)
    }

    /// Some writers get the record length wrong by a byte or two. Read on
    /// until the record ends in a field terminator (possibly followed by one
    /// more byte).
    fn complete_field_terminator(&mut self, offset: u64, body: &mut Vec<u8>) -> Result<()> {
        let mut extra = 0usize;
        while !ends_with_field_terminator(body) {
            let mut byte = [0u8; 1];
            let read = self.source.read_bytes(&mut byte)?;
            ensure!(
                read == 1,
                ShortRecordSnafu {
                    offset,
                    expected: body.len() + 1,
                    actual: body.len(),
                }
            );
            body.push(byte[0]);
            extra += 1;
        }
        if extra > 0 {
            log::warn!(
                "Record at offset {offset} did not end in a field terminator, read {extra} more bytes"
            );
        }
        Ok(())
    }
}

fn ends_with_field_terminator(body: &[u8]) -> bool {
    matches!(body, [.., FIELD_TERMINATOR] | [.., FIELD_TERMINATOR, _])
}
