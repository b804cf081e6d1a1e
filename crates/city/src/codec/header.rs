// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! City stream header.
//!
//! ```text
//! 0   magic "ICTY"          4
//! 4   version_major         2
//! 6   version_minor         2
//! 8   size_info             1   high nibble: type id width - 1
//!                               low nibble: pointer offset width - 1
//! 9   reserved              3
//! 12  data_ptr              4   start of the data section
//! 16  count_types           4   type dictionary entries
//! ```

use super::error::FormatError;
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};

pub const MAGIC: [u8; 4] = *b"ICTY";
pub const VERSION_MAJOR: u16 = 1;
pub const VERSION_MINOR: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CityHeader {
    pub version_major: u16,
    pub version_minor: u16,
    pub size_info: u8,
    pub data_ptr: u32,
    pub count_types: u32,
}

impl CityHeader {
    pub const SIZE: usize = 20;

    pub fn new(type_id_width: u8, pointer_width: u8, data_ptr: u32, count_types: u32) -> Self {
        Self {
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            size_info: (type_id_width.saturating_sub(1) << 4) | (pointer_width.saturating_sub(1) & 0x0F),
            data_ptr,
            count_types,
        }
    }

    pub fn type_id_width(&self) -> usize {
        usize::from(self.size_info >> 4) + 1
    }

    pub fn pointer_width(&self) -> usize {
        usize::from(self.size_info & 0x0F) + 1
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        LittleEndian::write_u16(&mut buf[4..6], self.version_major);
        LittleEndian::write_u16(&mut buf[6..8], self.version_minor);
        buf[8] = self.size_info;
        LittleEndian::write_u32(&mut buf[12..16], self.data_ptr);
        LittleEndian::write_u32(&mut buf[16..20], self.count_types);
        buf
    }

    /// Parse and check the magic. Version and widths are checked by the
    /// reader so that a newer major version is reported as such.
    pub fn parse(bytes: &[u8]) -> Result<Self, FormatError> {
        let mut r = bytes;
        let mut magic = [0u8; 4];
        std::io::Read::read_exact(&mut r, &mut magic).map_err(|_| FormatError::Truncated("header"))?;
        if magic != MAGIC {
            return Err(FormatError::BadMagic(magic));
        }

        let truncated = |_| FormatError::Truncated("header");
        let version_major = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let version_minor = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let size_info = r.read_u8().map_err(truncated)?;
        let _reserved = r.read_u24::<LittleEndian>().map_err(truncated)?;
        let data_ptr = r.read_u32::<LittleEndian>().map_err(truncated)?;
        let count_types = r.read_u32::<LittleEndian>().map_err(truncated)?;

        Ok(Self {
            version_major,
            version_minor,
            size_info,
            data_ptr,
            count_types,
        })
    }

    /// Widths as `(type_id, pointer)`, rejecting values this decoder cannot
    /// read.
    pub fn widths(&self) -> Result<(usize, usize), FormatError> {
        let ids = self.type_id_width();
        let pointers = self.pointer_width();
        if ids > 4 || pointers > 8 {
            return Err(FormatError::BadSizeInfo(self.size_info));
        }
        Ok((ids, pointers))
    }
}
