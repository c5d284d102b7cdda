//! The fixed 60-byte AMX file header.

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};

use crate::cell::Cell;
use crate::error::LoadError;

use super::{AMX_VERSION, FILE_VERSION};

pub(crate) const HEADER_BYTES: usize = 60;

bitflags! {
    /// Flag bits at offset 8 of the header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u16 {
        const OVERLAY = 1 << 0;
        const DEBUG = 1 << 1;
        const NOCHECKS = 1 << 2;
        const SLEEP = 1 << 3;
        const DSEG_INIT = 1 << 5;
    }
}

/// All header fields, decoded but not yet judged.
#[derive(Debug, Clone)]
pub(crate) struct FileHeader {
    pub size: u32,
    pub magic: u16,
    pub file_version: u8,
    pub amx_version: u8,
    pub flags: HeaderFlags,
    /// Record size of the public/native/pubvar tables.
    pub defsize: u16,
    pub cod: u32,
    pub dat: u32,
    pub hea: u32,
    pub stp: u32,
    pub cip: u32,
    pub publics: u32,
    pub natives: u32,
    pub libraries: u32,
    pub pubvars: u32,
    pub tags: u32,
}

impl FileHeader {
    pub fn parse(buf: &[u8]) -> Result<Self, LoadError> {
        if buf.len() < HEADER_BYTES {
            return Err(LoadError::InvalidFile);
        }
        Ok(Self {
            size: LittleEndian::read_u32(&buf[0..4]),
            magic: LittleEndian::read_u16(&buf[4..6]),
            file_version: buf[6],
            amx_version: buf[7],
            flags: HeaderFlags::from_bits_retain(LittleEndian::read_u16(&buf[8..10])),
            defsize: LittleEndian::read_u16(&buf[10..12]),
            cod: LittleEndian::read_u32(&buf[12..16]),
            dat: LittleEndian::read_u32(&buf[16..20]),
            hea: LittleEndian::read_u32(&buf[20..24]),
            stp: LittleEndian::read_u32(&buf[24..28]),
            cip: LittleEndian::read_u32(&buf[28..32]),
            publics: LittleEndian::read_u32(&buf[32..36]),
            natives: LittleEndian::read_u32(&buf[36..40]),
            libraries: LittleEndian::read_u32(&buf[40..44]),
            pubvars: LittleEndian::read_u32(&buf[44..48]),
            tags: LittleEndian::read_u32(&buf[48..52]),
            // nametable (52) and overlays (56) are not consulted here.
        })
    }

    pub fn validate<C: Cell>(&self, buf_len: usize) -> Result<(), LoadError> {
        if self.magic != C::FILE_MAGIC {
            // A known magic of another width is a width mismatch, anything
            // else is not an AMX file at all.
            return Err(match self.magic {
                0xF1E0 | 0xF1E1 | 0xF1E2 => LoadError::WrongCellSize,
                _ => LoadError::InvalidFile,
            });
        }
        if self.size as usize > buf_len {
            return Err(LoadError::InvalidFile);
        }
        if self.file_version != FILE_VERSION {
            return Err(LoadError::UnsupportedFileVersion);
        }
        if self.amx_version > AMX_VERSION {
            return Err(LoadError::UnsupportedAmxVersion);
        }
        if self
            .flags
            .intersects(HeaderFlags::OVERLAY | HeaderFlags::SLEEP)
        {
            return Err(LoadError::FeatureNotSupported);
        }
        if self.flags.contains(HeaderFlags::NOCHECKS) {
            // The machine checks every access regardless.
            log::debug!("image requests nochecks; ignored");
        }
        if self.defsize < 8 {
            return Err(LoadError::InvalidFile);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_header() -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_BYTES];
        LittleEndian::write_u32(&mut buf[0..4], HEADER_BYTES as u32);
        LittleEndian::write_u16(&mut buf[4..6], 0xF1E0);
        buf[6] = FILE_VERSION;
        buf[7] = AMX_VERSION;
        LittleEndian::write_u16(&mut buf[10..12], 8);
        for field in [12, 16, 20, 24, 32, 36, 40, 44, 48] {
            LittleEndian::write_u32(&mut buf[field..field + 4], HEADER_BYTES as u32);
        }
        buf
    }

    fn check(buf: &[u8]) -> Result<(), LoadError> {
        FileHeader::parse(buf)?.validate::<u32>(buf.len())
    }

    #[test]
    fn a_minimal_header_passes() {
        assert_eq!(check(&raw_header()), Ok(()));
    }

    #[test]
    fn short_buffers_are_invalid() {
        assert_eq!(check(&[0u8; 59]), Err(LoadError::InvalidFile));
    }

    #[test]
    fn magic_distinguishes_width_mismatch_from_garbage() {
        let mut buf = raw_header();
        LittleEndian::write_u16(&mut buf[4..6], 0xF1E1);
        assert_eq!(check(&buf), Err(LoadError::WrongCellSize));
        LittleEndian::write_u16(&mut buf[4..6], 0x1234);
        assert_eq!(check(&buf), Err(LoadError::InvalidFile));
    }

    #[test]
    fn declared_size_must_fit_the_buffer() {
        let mut buf = raw_header();
        let bad_size = buf.len() as u32 + 1;
        LittleEndian::write_u32(&mut buf[0..4], bad_size);
        assert_eq!(check(&buf), Err(LoadError::InvalidFile));
    }

    #[test]
    fn version_fields_gate_the_load() {
        let mut buf = raw_header();
        buf[6] = 10;
        assert_eq!(check(&buf), Err(LoadError::UnsupportedFileVersion));
        let mut buf = raw_header();
        buf[7] = AMX_VERSION + 1;
        assert_eq!(check(&buf), Err(LoadError::UnsupportedAmxVersion));
    }

    #[test]
    fn overlay_and_sleep_are_out_of_scope() {
        for bits in [
            HeaderFlags::OVERLAY,
            HeaderFlags::SLEEP,
            HeaderFlags::OVERLAY | HeaderFlags::DEBUG,
        ] {
            let mut buf = raw_header();
            LittleEndian::write_u16(&mut buf[8..10], bits.bits());
            assert_eq!(check(&buf), Err(LoadError::FeatureNotSupported));
        }
        // Debug, dseg-init and nochecks are accepted.
        let accepted = HeaderFlags::DEBUG | HeaderFlags::NOCHECKS | HeaderFlags::DSEG_INIT;
        let mut buf = raw_header();
        LittleEndian::write_u16(&mut buf[8..10], accepted.bits());
        assert_eq!(check(&buf), Ok(()));
    }

    #[test]
    fn records_narrower_than_two_words_are_invalid() {
        let mut buf = raw_header();
        LittleEndian::write_u16(&mut buf[10..12], 7);
        assert_eq!(check(&buf), Err(LoadError::InvalidFile));
    }
}
