use std::fmt::Display;
use std::fmt::Error;
use std::fmt::Formatter;

use crate::error::{ZError, ZResult};

/// Byte offsets of the header fields the interpreter cares about.
pub const OFF_FLAGS1: u32 = 0x01;
pub const OFF_FLAGS2: u32 = 0x10;
pub const OFF_SCREEN_HEIGHT: u32 = 0x20;
pub const OFF_SCREEN_WIDTH: u32 = 0x21;

/// The structural fields of a story header, parsed once at load.
///
/// Mutable header state (flags, screen geometry) is read live out of memory
/// instead, so this overlay never goes stale.
pub struct Header {
    pub version: u8,
    pub release: u16,
    pub serial: String,
    pub base_high_mem: u16,
    pub base_static_mem: u16,
    pub initial_pc: u16,
    pub dictionary: u16,
    pub object_table: u16,
    pub global_variables: u16,
    pub abbrev_table: u16,
    pub len_file: usize,
    pub checksum_file: u16,
    /// Routine packed-address offset, v6/7 only (header 0x28).
    pub routines_offset: u16,
    /// String packed-address offset, v6/7 only (header 0x2a).
    pub strings_offset: u16,
    pub alphabet_table: u16,
    pub header_ext: u16,
}

fn word_at(bytes: &[u8], offset: usize) -> u16 {
    ((bytes[offset] as u16) << 8) | bytes[offset + 1] as u16
}

impl Header {
    /// Parse the 64-byte header. `bytes` must hold at least 64 bytes; the
    /// loader checks that before calling.
    pub fn parse(bytes: &[u8]) -> ZResult<Header> {
        let version = bytes[0];
        if !(1..=8).contains(&version) {
            return Err(ZError::UnknownVersion(version));
        }

        let serial = bytes[0x12..0x18]
            .iter()
            .map(|b| *b as char)
            .collect::<String>();

        // The file-length word counts version-dependent units.
        let len_scale = match version {
            1..=3 => 2,
            4..=5 => 4,
            _ => 8,
        };

        Ok(Header {
            version,
            release: word_at(bytes, 0x02),
            serial,
            base_high_mem: word_at(bytes, 0x04),
            base_static_mem: word_at(bytes, 0x0e),
            initial_pc: word_at(bytes, 0x06),
            dictionary: word_at(bytes, 0x08),
            object_table: word_at(bytes, 0x0a),
            global_variables: word_at(bytes, 0x0c),
            abbrev_table: word_at(bytes, 0x18),
            len_file: word_at(bytes, 0x1a) as usize * len_scale,
            checksum_file: word_at(bytes, 0x1c),
            routines_offset: word_at(bytes, 0x28),
            strings_offset: word_at(bytes, 0x2a),
            alphabet_table: word_at(bytes, 0x34),
            header_ext: word_at(bytes, 0x36),
        })
    }
}

impl Display for Header {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(
            f,
            "
Z-code version:           {}
Release number:           {}
Serial number:            {}
Size of resident memory:  {:#06x}
Start PC:                 {:#06x}
Dictionary address:       {:#06x}
Object table address:     {:#06x}
Global variables address: {:#06x}
Size of dynamic memory:   {:#06x}
Abbreviations address:    {:#06x}
File size:                {:#06x}
Checksum:                 {:#06x}
",
            self.version,
            self.release,
            self.serial,
            self.base_high_mem,
            self.initial_pc,
            self.dictionary,
            self.object_table,
            self.global_variables,
            self.base_static_mem,
            self.abbrev_table,
            self.len_file,
            self.checksum_file,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_header() -> Vec<u8> {
        let mut bytes = vec![0u8; 0x40];
        bytes[0x00] = 3; // version
        bytes[0x03] = 0x58; // release 88
        bytes[0x04] = 0x4e;
        bytes[0x05] = 0x37; // high memory
        bytes[0x06] = 0x4f;
        bytes[0x07] = 0x05; // initial PC
        bytes[0x0a] = 0x02;
        bytes[0x0b] = 0xb0; // object table
        bytes[0x0e] = 0x2e;
        bytes[0x0f] = 0x53; // static memory
        for (i, b) in b"880429".iter().enumerate() {
            bytes[0x12 + i] = *b;
        }
        bytes
    }

    #[test]
    fn parses_structural_fields() {
        let header = Header::parse(&minimal_header()).unwrap();
        assert_eq!(header.version, 3);
        assert_eq!(header.release, 88);
        assert_eq!(header.serial, "880429");
        assert_eq!(header.base_high_mem, 0x4e37);
        assert_eq!(header.initial_pc, 0x4f05);
        assert_eq!(header.object_table, 0x02b0);
        assert_eq!(header.base_static_mem, 0x2e53);
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = minimal_header();
        bytes[0] = 9;
        assert!(matches!(
            Header::parse(&bytes),
            Err(ZError::UnknownVersion(9))
        ));
    }

    #[test]
    fn file_length_scales_with_version() {
        let mut bytes = minimal_header();
        bytes[0x1a] = 0x01; // 0x100 units
        let header = Header::parse(&bytes).unwrap();
        assert_eq!(header.len_file, 0x200);

        bytes[0x00] = 5;
        let header = Header::parse(&bytes).unwrap();
        assert_eq!(header.len_file, 0x400);

        bytes[0x00] = 8;
        let header = Header::parse(&bytes).unwrap();
        assert_eq!(header.len_file, 0x800);
    }
}
