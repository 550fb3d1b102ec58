//! The fixed 80-byte file header

use crate::error::{Result, ZimError};
use crate::types::{NO_PAGE, ZIM_MAGIC};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

/// Parsed archive header.
#[derive(Debug, Clone)]
pub struct ZimHeader {
    pub major_version: u16,
    pub minor_version: u16,
    pub uuid: [u8; 16],
    pub entry_count: u32,
    pub cluster_count: u32,
    pub url_ptr_pos: u64,
    pub title_ptr_pos: u64,
    pub cluster_ptr_pos: u64,
    pub mime_list_pos: u64,
    pub main_page: u32,
    pub layout_page: u32,
    pub checksum_pos: u64,
}

impl ZimHeader {
    /// Size of the serialized header in bytes.
    pub const SIZE: u64 = 80;

    /// Parse and validate the header from the first bytes of the file.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE as usize {
            return Err(ZimError::InvalidFormat(
                "file too small to contain a header".into(),
            ));
        }

        let mut cursor = Cursor::new(data);
        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != ZIM_MAGIC {
            return Err(ZimError::InvalidFormat(format!(
                "bad magic number {magic:#010x}"
            )));
        }

        let major_version = cursor.read_u16::<LittleEndian>()?;
        let minor_version = cursor.read_u16::<LittleEndian>()?;
        let mut uuid = [0u8; 16];
        cursor.read_exact(&mut uuid)?;
        let entry_count = cursor.read_u32::<LittleEndian>()?;
        let cluster_count = cursor.read_u32::<LittleEndian>()?;
        let url_ptr_pos = cursor.read_u64::<LittleEndian>()?;
        let title_ptr_pos = cursor.read_u64::<LittleEndian>()?;
        let cluster_ptr_pos = cursor.read_u64::<LittleEndian>()?;
        let mime_list_pos = cursor.read_u64::<LittleEndian>()?;
        let main_page = cursor.read_u32::<LittleEndian>()?;
        let layout_page = cursor.read_u32::<LittleEndian>()?;
        let checksum_pos = cursor.read_u64::<LittleEndian>()?;

        Ok(Self {
            major_version,
            minor_version,
            uuid,
            entry_count,
            cluster_count,
            url_ptr_pos,
            title_ptr_pos,
            cluster_ptr_pos,
            mime_list_pos,
            main_page,
            layout_page,
            checksum_pos,
        })
    }

    /// Whether the archive carries a trailing checksum.
    pub fn has_checksum(&self) -> bool {
        self.checksum_pos != 0
    }

    pub fn main_page_index(&self) -> Option<u32> {
        (self.main_page != NO_PAGE).then_some(self.main_page)
    }

    pub fn layout_page_index(&self) -> Option<u32> {
        (self.layout_page != NO_PAGE).then_some(self.layout_page)
    }
}
