use super::*;
use bytes::Buf;

/// Counts the directory entries in `buffer`.
///
/// Walks in strides of `entry_width` from `offset` and stops at the first stride
/// that starts with the field terminator, or at `limit` (or the end of the buffer).
pub fn count_entries(buffer: &[u8], offset: usize, limit: usize, entry_width: usize) -> usize {
    if entry_width == 0 {
        return 0;
    }
    let limit = limit.min(buffer.len());
    (offset..limit)
        .step_by(entry_width)
        .take_while(|&i| buffer[i] != FIELD_TERMINATOR)
        .count()
}

/// Where the bytes of one field live within a record.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DirectoryEntry {
    pub tag: String,
    pub length: usize,
    /// Relative to the start of the field area.
    pub position: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirectoryEntryReader {
    tag_size: usize,
    field_length_size: usize,
    field_position_size: usize,
}
impl DirectoryEntryReader {
    pub fn for_leader(leader: &Leader) -> Self {
        Self {
            tag_size: leader.size_of_field_tag,
            field_length_size: leader.size_of_field_length,
            field_position_size: leader.size_of_field_position,
        }
    }

    pub fn entry_width(&self) -> usize {
        self.tag_size + self.field_length_size + self.field_position_size
    }

    /// Read the entry that starts at `offset` in `buffer`.
    pub fn read_entry(&self, buffer: &[u8], offset: usize) -> Result<DirectoryEntry> {
        let end = offset + self.entry_width();
        ensure!(
            end <= buffer.len(),
            InvalidDirectoryEntrySnafu {
                offset,
                description: format!(
                    "entry of {} bytes runs past the end of the record ({} bytes)",
                    self.entry_width(),
                    buffer.len()
                ),
            }
        );
        let mut data = &buffer[offset..end];
        let tag = DDR_DECODING_CONTEXT.bytes_to_string(&data[..self.tag_size]);
        data.advance(self.tag_size);
        let length = Self::read_number(&mut data, self.field_length_size, offset, "length")?;
        let position = Self::read_number(&mut data, self.field_position_size, offset, "position")?;
        debug_assert!(!data.has_remaining());
        Ok(DirectoryEntry {
            tag,
            length,
            position,
        })
    }

    /// Count and read all entries between `offset` and `limit`.
    pub fn read_entries(
        &self,
        buffer: &[u8],
        offset: usize,
        limit: usize,
    ) -> Result<Vec<DirectoryEntry>> {
        let width = self.entry_width();
        let num_entries = count_entries(buffer, offset, limit, width);
        (0..num_entries)
            .map(|i| self.read_entry(buffer, offset + i * width))
            .collect()
    }

    fn read_number(data: &mut &[u8], size: usize, offset: usize, what: &str) -> Result<usize> {
        let digits = &data.chunk()[..size];
        let number = digits
            .parse_number()
            .with_context(|| InvalidDirectoryEntrySnafu {
                offset,
                description: format!(
                    "field {what} is not a number: '{}'",
                    String::from_utf8_lossy(digits)
                ),
            })?;
        data.advance(size);
        Ok(number)
    }
}
