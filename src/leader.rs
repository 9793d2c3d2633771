use super::*;
use std::ops::Range;

/// Number of bytes in every leader, of the DDR and of each DR.
pub const LEADER_SIZE: usize = 24;

/// Which rules a leader is checked against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LeaderKind {
    /// The leader of the DDR at the start of the file.
    Module,
    /// The leader of a data record.
    Record,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Leader {
    pub record_length: usize,
    pub interchange_level: char,
    /// `'L'` for the DDR, `'D'` for a data record, `'R'` for a data record whose
    /// leader and directory are reused by the records that follow it.
    pub leader_identifier: char,
    pub in_line_code_ext_indicator: char,
    pub version: char,
    pub application_indicator: char,
    /// Blank in most data record leaders.
    pub field_control_length: Option<usize>,
    /// Start address of field area (number of bytes in leader and directory)
    pub field_area_start: usize,
    pub extended_character_set: [char; 3],
    pub size_of_field_length: usize,
    pub size_of_field_position: usize,
    pub reserved: char,
    pub size_of_field_tag: usize,
}

impl Leader {
    /// Decode the first [`LEADER_SIZE`] bytes of `data`.
    pub fn parse(data: &[u8], kind: LeaderKind) -> Result<Self> {
        ensure!(
            data.len() >= LEADER_SIZE,
            ShortLeaderSnafu {
                offset: 0u64,
                actual: data.len(),
            }
        );
        let data = &data[..LEADER_SIZE];
        match kind {
            LeaderKind::Module => Self::parse_module(data),
            LeaderKind::Record => Self::parse_record(data),
        }
    }

    fn parse_module(data: &[u8]) -> Result<Self> {
        let number = |range: Range<usize>, name: &str| -> Result<usize> {
            data[range.clone()]
                .parse_number()
                .with_context(|| InvalidLeaderSnafu {
                    description: format!(
                        "{name} is not a number: '{}'",
                        String::from_utf8_lossy(&data[range])
                    ),
                })
        };
        let field_control_length = data[10..12]
            .parse_number_option()
            .with_context(|| InvalidLeaderSnafu {
                description: format!(
                    "field control length is not a number: '{}'",
                    String::from_utf8_lossy(&data[10..12])
                ),
            })?;
        let leader = Leader {
            record_length: number(0..5, "record length")?,
            interchange_level: data.read_char(5),
            leader_identifier: data.read_char(6),
            in_line_code_ext_indicator: data.read_char(7),
            version: data.read_char(8),
            application_indicator: data.read_char(9),
            field_control_length,
            field_area_start: number(12..17, "field area start")?,
            extended_character_set: data.take_chars(17),
            size_of_field_length: number(20..21, "size of field length")?,
            size_of_field_position: number(21..22, "size of field position")?,
            reserved: data.read_char(22),
            size_of_field_tag: number(23..24, "size of field tag")?,
        };
        ensure!(
            leader.record_length >= 12
                && leader.field_control_length.unwrap_or(0) != 0
                && leader.field_area_start >= LEADER_SIZE
                && leader.size_of_field_length != 0
                && leader.size_of_field_position != 0
                && leader.size_of_field_tag != 0,
            InvalidLeaderSnafu {
                description: format!("File is invalid, structural fields out of range: {leader:?}"),
            }
        );
        Ok(leader)
    }

    fn parse_record(data: &[u8]) -> Result<Self> {
        let number = |range: Range<usize>, name: &str| -> Result<usize> {
            data[range.clone()]
                .parse_number()
                .with_context(|| CorruptLeaderSnafu {
                    description: format!(
                        "{name} is not a number: '{}'",
                        String::from_utf8_lossy(&data[range])
                    ),
                })
        };
        // Each directory width is one byte, so anything that parses is already within 0..=9.
        let width = |pos: usize, name: &str| -> Result<usize> {
            let c = data.read_char(pos);
            c.to_digit(10)
                .map(|d| d as usize)
                .with_context(|| CorruptLeaderSnafu {
                    description: format!("{name} must be a single digit, but was '{c}'"),
                })
        };
        let leader = Leader {
            record_length: number(0..5, "record length")?,
            interchange_level: data.read_char(5),
            leader_identifier: data.read_char(6),
            in_line_code_ext_indicator: data.read_char(7),
            version: data.read_char(8),
            application_indicator: data.read_char(9),
            field_control_length: data[10..12].parse_number_option().flatten(),
            field_area_start: number(12..17, "field area start")?,
            extended_character_set: data.take_chars(17),
            size_of_field_length: width(20, "size of field length")?,
            size_of_field_position: width(21, "size of field position")?,
            reserved: data.read_char(22),
            size_of_field_tag: width(23, "size of field tag")?,
        };
        Ok(leader)
    }

    /// Width in bytes of one directory entry.
    pub fn field_entry_width(&self) -> usize {
        self.size_of_field_length + self.size_of_field_position + self.size_of_field_tag
    }

    /// Whether the records following this one reuse its leader and directory.
    pub fn requests_reuse(&self) -> bool {
        self.leader_identifier == 'R'
    }

    /// Encode the leader back into its 24 byte form.
    ///
    /// Numbers are zero padded to their width. An absent field control length is
    /// written as blanks.
    pub fn to_bytes(&self) -> [u8; LEADER_SIZE] {
        let mut out = [SPACE; LEADER_SIZE];
        write_digits(&mut out[0..5], self.record_length);
        out[5] = char_to_byte(self.interchange_level);
        out[6] = char_to_byte(self.leader_identifier);
        out[7] = char_to_byte(self.in_line_code_ext_indicator);
        out[8] = char_to_byte(self.version);
        out[9] = char_to_byte(self.application_indicator);
        if let Some(field_control_length) = self.field_control_length {
            write_digits(&mut out[10..12], field_control_length);
        }
        write_digits(&mut out[12..17], self.field_area_start);
        for (i, c) in self.extended_character_set.iter().enumerate() {
            out[17 + i] = char_to_byte(*c);
        }
        write_digits(&mut out[20..21], self.size_of_field_length);
        write_digits(&mut out[21..22], self.size_of_field_position);
        out[22] = char_to_byte(self.reserved);
        write_digits(&mut out[23..24], self.size_of_field_tag);
        out
    }
}

/// Quick sanity check of a DDR leader before it is parsed.
///
/// Rejects leaders with non printable bytes, an unknown interchange level, a
/// leader identifier other than `'L'`, or an unknown version. This catches files
/// that are not ISO 8211 at all, or that were mangled in transfer.
pub fn is_leader_valid(leader: &[u8]) -> bool {
    if leader.len() < LEADER_SIZE {
        return false;
    }
    if leader[..LEADER_SIZE].iter().any(|b| !(32..=126).contains(b)) {
        return false;
    }
    matches!(leader[5], b'1' | b'2' | b'3') && leader[6] == b'L' && matches!(leader[8], b'1' | b' ')
}

/// Writes the lowest `out.len()` decimal digits of `value`.
fn write_digits(out: &mut [u8], value: usize) {
    let text = format!("{value:0width$}", width = out.len());
    let bytes = text.as_bytes();
    out.copy_from_slice(&bytes[bytes.len() - out.len()..]);
}

fn char_to_byte(c: char) -> u8 {
    u8::try_from(c).unwrap_or(b'?')
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DDR_LEADER: &[u8; 24] = b"015813LE1 0900073 ! 3404";
    const DR_LEADER: &[u8; 24] = b"00123 D     00045   5504";

    #[test]
    fn parse_module_leader() {
        assert!(is_leader_valid(DDR_LEADER));
        let leader = Leader::parse(DDR_LEADER, LeaderKind::Module).unwrap();
        assert_eq!(1581, leader.record_length);
        assert_eq!('3', leader.interchange_level);
        assert_eq!('L', leader.leader_identifier);
        assert_eq!('E', leader.in_line_code_ext_indicator);
        assert_eq!('1', leader.version);
        assert_eq!(Some(9), leader.field_control_length);
        assert_eq!(73, leader.field_area_start);
        assert_eq!([' ', '!', ' '], leader.extended_character_set);
        assert_eq!(3, leader.size_of_field_length);
        assert_eq!(4, leader.size_of_field_position);
        assert_eq!(4, leader.size_of_field_tag);
        assert_eq!(11, leader.field_entry_width());
        assert!(!leader.requests_reuse());
    }

    #[test]
    fn parse_record_leader() {
        let leader = Leader::parse(DR_LEADER, LeaderKind::Record).unwrap();
        assert_eq!(123, leader.record_length);
        assert_eq!('D', leader.leader_identifier);
        assert_eq!(None, leader.field_control_length);
        assert_eq!(45, leader.field_area_start);
        assert_eq!(5, leader.size_of_field_length);
        assert_eq!(5, leader.size_of_field_position);
        assert_eq!(4, leader.size_of_field_tag);
        assert_eq!(14, leader.field_entry_width());
        assert_eq!(DR_LEADER, &leader.to_bytes());
    }

    #[test]
    fn record_leader_requesting_reuse() {
        let leader = Leader::parse(b"00123 R     00045   5504", LeaderKind::Record).unwrap();
        assert!(leader.requests_reuse());
    }

    #[test]
    fn module_leader_requires_structure() {
        // Field control length of zero.
        let res = Leader::parse(b"015813LE1 0000073 ! 3404", LeaderKind::Module);
        assert!(matches!(res, Err(DdfError::InvalidLeader { .. })), "{res:?}");
        // Field area starts inside the leader.
        let res = Leader::parse(b"015813LE1 0900020 ! 3404", LeaderKind::Module);
        assert!(matches!(res, Err(DdfError::InvalidLeader { .. })), "{res:?}");
        // Record length below 12.
        let res = Leader::parse(b"000113LE1 0900073 ! 3404", LeaderKind::Module);
        assert!(matches!(res, Err(DdfError::InvalidLeader { .. })), "{res:?}");
        // Zero tag width.
        let res = Leader::parse(b"015813LE1 0900073 ! 3400", LeaderKind::Module);
        assert!(matches!(res, Err(DdfError::InvalidLeader { .. })), "{res:?}");
        // Garbage in a numeric field.
        let res = Leader::parse(b"01x813LE1 0900073 ! 3404", LeaderKind::Module);
        assert!(matches!(res, Err(DdfError::InvalidLeader { .. })), "{res:?}");
    }

    #[test]
    fn record_leader_with_bad_widths_is_corrupt() {
        let res = Leader::parse(b"00123 D     00045   x504", LeaderKind::Record);
        assert!(matches!(res, Err(DdfError::CorruptLeader { .. })), "{res:?}");
        let res = Leader::parse(b"00123 D     00045   550 ", LeaderKind::Record);
        assert!(matches!(res, Err(DdfError::CorruptLeader { .. })), "{res:?}");
    }

    #[test]
    fn bad_numbers_are_corrupt_in_records_and_invalid_in_modules() {
        let leader = b"0x123 D     00045   5504";
        let res = Leader::parse(leader, LeaderKind::Record);
        assert!(
            matches!(&res, Err(DdfError::CorruptLeader { description, .. }) if description.contains("record length")),
            "{res:?}"
        );
        let res = Leader::parse(leader, LeaderKind::Module);
        assert!(matches!(res, Err(DdfError::InvalidLeader { .. })), "{res:?}");

        let res = Leader::parse(b"00123 D     0004x   5504", LeaderKind::Record);
        assert!(
            matches!(&res, Err(DdfError::CorruptLeader { description, .. }) if description.contains("field area start")),
            "{res:?}"
        );
    }

    #[test]
    fn short_leader() {
        let res = Leader::parse(&DDR_LEADER[..20], LeaderKind::Module);
        assert!(
            matches!(res, Err(DdfError::ShortLeader { actual: 20, .. })),
            "{res:?}"
        );
    }

    #[test]
    fn leader_validity_check() {
        assert!(!is_leader_valid(b"015813LE1 0900073 ! 340\x01"));
        assert!(!is_leader_valid(b"015814LE1 0900073 ! 3404"));
        assert!(!is_leader_valid(b"015813DE1 0900073 ! 3404"));
        assert!(!is_leader_valid(b"015813LE2 0900073 ! 3404"));
        assert!(is_leader_valid(b"015813LE  0900073 ! 3404"));
        assert!(!is_leader_valid(b"0158"));
    }

    proptest! {
        #[test]
        fn numeric_layout_round_trips(
            record_length in 12usize..=99_999,
            field_control_length in 1usize..=99,
            field_area_start in 24usize..=99_999,
            size_of_field_length in 1usize..=9,
            size_of_field_position in 1usize..=9,
            size_of_field_tag in 1usize..=9,
        ) {
            let text = format!(
                "{record_length:05}3LE1 {field_control_length:02}{field_area_start:05} ! {size_of_field_length}{size_of_field_position}0{size_of_field_tag}"
            );
            let leader = Leader::parse(text.as_bytes(), LeaderKind::Module).unwrap();
            let encoded = leader.to_bytes();
            prop_assert_eq!(text.as_bytes(), &encoded[..]);
        }
    }
}
