//! Multi-part archive files presented as a single logical byte stream
//!
//! An archive is either one file or a run of split parts named
//! `<stem>aa`, `<stem>ab`, ... concatenated in suffix order. Parts are
//! memory-mapped when possible, with positional reads as the fallback.

use crate::error::{Result, ZimError};
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

/// One physical part of a compound archive.
pub struct FilePart {
    path: PathBuf,
    file: File,
    mmap: Option<Arc<Mmap>>,
    offset: u64,
    size: u64,
}

impl FilePart {
    fn open(path: PathBuf, offset: u64) -> Result<Self> {
        let file = File::open(&path)?;
        let size = file.metadata()?.len();

        let mmap = if size > 0 && usize::try_from(size).is_ok() {
            match unsafe { Mmap::map(&file) } {
                Ok(map) => Some(Arc::new(map)),
                Err(e) => {
                    debug!("failed to mmap {:?}, using positional reads: {}", path, e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            path,
            file,
            mmap,
            offset,
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Starting offset of this part within the logical file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn mapping(&self) -> Option<&Arc<Mmap>> {
        self.mmap.as_ref()
    }

    /// Read exactly `buf.len()` bytes at `offset` within this part.
    pub(crate) fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        if let Some(map) = &self.mmap {
            let start = offset as usize;
            buf.copy_from_slice(&map[start..start + buf.len()]);
            return Ok(());
        }
        read_exact_at(&self.file, buf, offset)
    }

    fn mtime(&self) -> Result<SystemTime> {
        Ok(self.file.metadata()?.modified()?)
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)?;
    Ok(())
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        let n = file.seek_read(buf, offset)?;
        if n == 0 {
            return Err(ZimError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "short read from archive part",
            )));
        }
        buf = &mut buf[n..];
        offset += n as u64;
    }
    Ok(())
}

/// A range of bytes within a single part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    /// Index of the part within the compound.
    pub part: usize,
    /// Offset within the part.
    pub offset: u64,
    /// Number of bytes covered.
    pub size: u64,
}

/// 1..N physical file parts presented as one logical byte stream.
pub struct FileCompound {
    parts: Vec<FilePart>,
    size: u64,
}

impl FileCompound {
    /// Open `path` as a single file, or as a split archive by probing
    /// two-letter suffixes `aa`..`zz` in lexicographic order. The run of
    /// existing parts ending at the first missing suffix forms the
    /// compound.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.is_file() {
            let part = FilePart::open(path.to_path_buf(), 0)?;
            let size = part.size();
            return Ok(Self {
                parts: vec![part],
                size,
            });
        }

        let mut parts = Vec::new();
        let mut offset = 0u64;
        'probe: for first in b'a'..=b'z' {
            for second in b'a'..=b'z' {
                let mut name = path.as_os_str().to_os_string();
                name.push(format!("{}{}", first as char, second as char));
                let candidate = PathBuf::from(name);
                if !candidate.is_file() {
                    break 'probe;
                }
                let part = FilePart::open(candidate, offset)?;
                offset += part.size();
                parts.push(part);
            }
        }

        if parts.is_empty() {
            return Err(ZimError::InvalidFormat(format!(
                "cannot open archive {path:?}: no such file or split parts"
            )));
        }

        debug!(
            "opened compound archive {:?}: {} part(s), {} bytes",
            path,
            parts.len(),
            offset
        );
        Ok(Self {
            parts,
            size: offset,
        })
    }

    /// Total logical size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_multi_part(&self) -> bool {
        self.parts.len() > 1
    }

    pub fn parts(&self) -> &[FilePart] {
        &self.parts
    }

    /// Most recent modification time across all parts.
    pub fn mtime(&self) -> Result<SystemTime> {
        let mut latest = SystemTime::UNIX_EPOCH;
        for part in &self.parts {
            let t = part.mtime()?;
            if t > latest {
                latest = t;
            }
        }
        Ok(latest)
    }

    /// Ordered part ranges fully covering `[offset, offset + size)`.
    pub fn locate(&self, offset: u64, size: u64) -> Result<Vec<PartRange>> {
        let end = offset.checked_add(size).ok_or_else(|| {
            ZimError::InvalidFormat(format!("range overflow: offset={offset}, size={size}"))
        })?;
        if end > self.size {
            return Err(ZimError::InvalidFormat(format!(
                "read beyond archive bounds: offset={offset}, size={size}, archive size={}",
                self.size
            )));
        }

        let mut ranges = Vec::new();
        if size == 0 {
            return Ok(ranges);
        }

        let mut idx = self
            .parts
            .partition_point(|p| p.offset + p.size <= offset);
        let mut pos = offset;
        while pos < end {
            let part = &self.parts[idx];
            let local = pos - part.offset;
            let take = (part.size - local).min(end - pos);
            if take == 0 {
                idx += 1;
                continue;
            }
            ranges.push(PartRange {
                part: idx,
                offset: local,
                size: take,
            });
            pos += take;
            idx += 1;
        }
        Ok(ranges)
    }

    /// Read exactly `buf.len()` bytes at logical `offset`, crossing part
    /// boundaries as needed.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let ranges = self.locate(offset, buf.len() as u64)?;
        let mut written = 0usize;
        for range in ranges {
            let part = &self.parts[range.part];
            let dst = &mut buf[written..written + range.size as usize];
            part.read_at(dst, range.offset)?;
            written += range.size as usize;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_single_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("single.zim");
        fs::write(&path, b"0123456789").unwrap();

        let compound = FileCompound::open(&path).unwrap();
        assert_eq!(compound.size(), 10);
        assert!(!compound.is_multi_part());

        let mut buf = [0u8; 4];
        compound.read_at(&mut buf, 3).unwrap();
        assert_eq!(&buf, b"3456");
    }

    #[test]
    fn test_split_parts() {
        let dir = TempDir::new().unwrap();
        let stem = dir.path().join("split.zim");
        fs::write(dir.path().join("split.zimaa"), b"01234").unwrap();
        fs::write(dir.path().join("split.zimab"), b"56789").unwrap();
        fs::write(dir.path().join("split.zimac"), b"ABCDE").unwrap();
        // a gap: `ad` missing, `ae` present but outside the run
        fs::write(dir.path().join("split.zimae"), b"XXXXX").unwrap();

        let compound = FileCompound::open(&stem).unwrap();
        assert!(compound.is_multi_part());
        assert_eq!(compound.parts().len(), 3);
        assert_eq!(compound.size(), 15);

        let mut buf = [0u8; 6];
        compound.read_at(&mut buf, 3).unwrap();
        assert_eq!(&buf, b"345678");
    }

    #[test]
    fn test_locate_across_boundary() {
        let dir = TempDir::new().unwrap();
        let stem = dir.path().join("arc");
        fs::write(dir.path().join("arcaa"), b"aaaa").unwrap();
        fs::write(dir.path().join("arcab"), b"bbbb").unwrap();

        let compound = FileCompound::open(&stem).unwrap();
        let ranges = compound.locate(2, 4).unwrap();
        assert_eq!(
            ranges,
            vec![
                PartRange {
                    part: 0,
                    offset: 2,
                    size: 2
                },
                PartRange {
                    part: 1,
                    offset: 0,
                    size: 2
                },
            ]
        );
    }

    #[test]
    fn test_locate_out_of_range() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.zim");
        fs::write(&path, b"abc").unwrap();

        let compound = FileCompound::open(&path).unwrap();
        assert!(compound.locate(0, 3).is_ok());
        assert!(compound.locate(1, 3).is_err());
        assert!(compound.locate(4, 0).is_err());
    }

    #[test]
    fn test_missing_archive() {
        let dir = TempDir::new().unwrap();
        let result = FileCompound::open(dir.path().join("nope.zim"));
        assert!(matches!(result, Err(ZimError::InvalidFormat(_))));
    }
}
