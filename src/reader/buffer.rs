//! Shared immutable byte buffers
//!
//! A `Buffer` is a view into reference-counted backing storage, either
//! owned memory or a memory-mapped file region. Sub-buffers share the
//! backing with their parent, so a mapping stays alive until the last
//! view referencing it drops.

use crate::error::{Result, ZimError};
use memmap2::Mmap;
use std::fmt;
use std::sync::Arc;

enum Backing {
    Memory(Vec<u8>),
    Mmap(Arc<Mmap>),
}

impl Backing {
    fn as_slice(&self) -> &[u8] {
        match self {
            Backing::Memory(data) => data,
            Backing::Mmap(map) => map,
        }
    }
}

/// Immutable byte span with shared ownership of its backing storage.
#[derive(Clone)]
pub struct Buffer {
    backing: Arc<Backing>,
    offset: usize,
    size: usize,
}

/// Raw payload of a single entry inside a cluster.
pub type Blob = Buffer;

impl Buffer {
    /// Buffer owning a memory allocation.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let size = data.len();
        Self {
            backing: Arc::new(Backing::Memory(data)),
            offset: 0,
            size,
        }
    }

    pub fn empty() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Buffer aliasing a region of a shared file mapping.
    pub(crate) fn from_mmap(map: Arc<Mmap>, offset: usize, size: usize) -> Self {
        debug_assert!(offset + size <= map.len());
        Self {
            backing: Arc::new(Backing::Mmap(map)),
            offset,
            size,
        }
    }

    pub fn size(&self) -> u64 {
        self.size as u64
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.backing.as_slice()[self.offset..self.offset + self.size]
    }

    /// View of `[offset, offset + size)` sharing the backing with this
    /// buffer.
    pub fn sub_buffer(&self, offset: u64, size: u64) -> Result<Buffer> {
        let end = offset.checked_add(size);
        if end.is_none() || end.is_some_and(|e| e > self.size as u64) {
            return Err(ZimError::InvalidFormat(format!(
                "read beyond buffer bounds: offset={offset}, size={size}, buffer size={}",
                self.size
            )));
        }
        Ok(Buffer {
            backing: Arc::clone(&self.backing),
            offset: self.offset + offset as usize,
            size: size as usize,
        })
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("offset", &self.offset)
            .field("size", &self.size)
            .finish()
    }
}
