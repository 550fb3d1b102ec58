//! Clusters: groups of blobs stored back to back
//!
//! A cluster starts with one info byte (compression nibble plus the
//! extended flag), followed by an offset table and the concatenated
//! blob bytes. Uncompressed clusters are read lazily straight from the
//! file; compressed clusters are decoded into memory as a whole, since
//! only the codec knows the decompressed size.

use crate::compression::{self, CompressionType, DecodedStream};
use crate::error::{Result, ZimError};
use crate::reader::{Blob, Buffer, BufferReader, Reader};
use crate::types::BlobIndex;
use tracing::trace;

/// Info-byte flag selecting 64-bit offset table entries.
const EXTENDED_FLAG: u8 = 0x10;

pub struct Cluster {
    compression: CompressionType,
    extended: bool,
    /// Byte size of the offset table (the table's own first entry).
    table_size: u64,
    /// Blob offsets relative to the end of the offset table;
    /// `offsets[i]..offsets[i + 1]` spans blob `i`.
    offsets: Vec<u64>,
    /// Reader over the data region that follows the offset table.
    data: Box<dyn Reader>,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("compression", &self.compression)
            .field("extended", &self.extended)
            .field("table_size", &self.table_size)
            .field("offsets", &self.offsets)
            .finish()
    }
}

impl Cluster {
    /// Parse the cluster starting at `offset` within `reader`.
    pub fn read(reader: &dyn Reader, offset: u64) -> Result<Self> {
        let info = reader.read_u8(offset)?;
        let compression = CompressionType::from_nibble(info & 0x0F)?;
        let extended = info & EXTENDED_FLAG != 0;
        trace!("cluster at {offset}: compression {compression:?}, extended {extended}");

        let body_size = reader.size() - (offset + 1);
        match compression {
            CompressionType::None | CompressionType::Default => {
                let body = reader.sub_reader(offset + 1, body_size)?;
                Self::parse(body, compression, extended)
            }
            CompressionType::Lzma | CompressionType::Zstd | CompressionType::Zip => {
                let encoded = reader.sub_reader(offset + 1, body_size)?;
                let decoder = compression::new_decoder(compression)?;
                let plain = DecodedStream::new(decoder, &*encoded).read_to_end()?;
                trace!("decompressed cluster to {} bytes", plain.len());
                let body: Box<dyn Reader> = Box::new(BufferReader::new(Buffer::from_vec(plain)));
                Self::parse(body, compression, extended)
            }
            CompressionType::Bzip2 => Err(ZimError::UnsupportedCompression(
                CompressionType::Bzip2 as u8,
            )),
        }
    }

    fn parse(body: Box<dyn Reader>, compression: CompressionType, extended: bool) -> Result<Self> {
        let width: u64 = if extended { 8 } else { 4 };
        let read_entry = |position: u64| -> Result<u64> {
            if extended {
                body.read_u64_le(position)
            } else {
                body.read_u32_le(position).map(u64::from)
            }
        };

        // the first entry is the table's own size, which also fixes the
        // number of entries to read
        let table_size = read_entry(0)?;
        if table_size < width || table_size % width != 0 {
            return Err(ZimError::InvalidFormat(format!(
                "invalid cluster offset table size {table_size}"
            )));
        }
        let entries = table_size / width;

        let mut offsets = Vec::with_capacity(entries as usize);
        offsets.push(0);
        let mut previous = table_size;
        for i in 1..entries {
            let next = read_entry(i * width)?;
            if next < previous {
                return Err(ZimError::InvalidFormat(format!(
                    "cluster blob offsets not monotonic: {next} after {previous}"
                )));
            }
            if next > body.size() {
                return Err(ZimError::InvalidFormat(format!(
                    "cluster blob offset {next} beyond cluster size {}",
                    body.size()
                )));
            }
            offsets.push(next - table_size);
            previous = next;
        }

        let data_size = offsets.last().copied().unwrap_or(0);
        let data = body.sub_reader(table_size, data_size)?;
        Ok(Self {
            compression,
            extended,
            table_size,
            offsets,
            data,
        })
    }

    pub fn compression(&self) -> CompressionType {
        self.compression
    }

    pub fn is_compressed(&self) -> bool {
        self.compression.is_compressed()
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    /// Number of blobs in this cluster.
    pub fn blob_count(&self) -> u32 {
        (self.offsets.len() - 1) as u32
    }

    fn span(&self, index: BlobIndex) -> Option<(u64, u64)> {
        let i = index.value() as usize;
        if i + 1 >= self.offsets.len() {
            return None;
        }
        Some((self.offsets[i], self.offsets[i + 1] - self.offsets[i]))
    }

    /// Size of blob `index` in bytes.
    pub fn blob_size(&self, index: BlobIndex) -> Result<u64> {
        self.span(index)
            .map(|(_, size)| size)
            .ok_or(ZimError::OutOfRange {
                what: "blob",
                index: u64::from(index.value()),
                count: u64::from(self.blob_count()),
            })
    }

    /// Full payload of blob `index`. Out-of-range indices and blobs
    /// whose declared size exceeds the native size limit yield an empty
    /// blob.
    pub fn blob(&self, index: BlobIndex) -> Result<Blob> {
        let Some((start, size)) = self.span(index) else {
            return Ok(Buffer::empty());
        };
        if usize::try_from(size).is_err() {
            return Ok(Buffer::empty());
        }
        self.data.get_buffer(start, size)
    }

    /// Sub-range of blob `index`: `size` is clamped to the bytes left
    /// after `offset`, and an `offset` past the blob end yields an
    /// empty blob.
    pub fn blob_range(&self, index: BlobIndex, offset: u64, size: u64) -> Result<Blob> {
        let Some((start, blob_size)) = self.span(index) else {
            return Ok(Buffer::empty());
        };
        if offset > blob_size {
            return Ok(Buffer::empty());
        }
        let size = size.min(blob_size - offset);
        if usize::try_from(size).is_err() {
            return Ok(Buffer::empty());
        }
        self.data.get_buffer(start + offset, size)
    }

    /// Offset of blob `index` relative to the start of the cluster body
    /// (info byte excluded). Compressed clusters hold their blobs in
    /// memory, not in the file, so the query is invalid there.
    pub fn blob_offset(&self, index: BlobIndex) -> Result<u64> {
        if self.is_compressed() {
            return Err(ZimError::InvalidOperation(
                "blob offsets are undefined for compressed clusters",
            ));
        }
        let (start, _) = self.span(index).ok_or(ZimError::OutOfRange {
            what: "blob",
            index: u64::from(index.value()),
            count: u64::from(self.blob_count()),
        })?;
        Ok(self.table_size + start)
    }
}
