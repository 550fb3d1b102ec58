//! Directory entry records
//!
//! Dirents are variable-length: a fixed 8-byte head, a kind-specific
//! payload, two NUL-terminated strings and optional extra parameters.
//! Records are parsed out of a fixed scratch window, so running out of
//! bytes is reported distinctly from structural corruption and the
//! caller retries with a larger window.

use crate::types::{BlobIndex, ClusterIndex, EntryIndex};

/// Mime code marking a redirect dirent.
pub const REDIRECT_MIME: u16 = 0xFFFF;

/// Mime code marking a link target dirent.
pub const LINK_TARGET_MIME: u16 = 0xFFFE;

/// Mime code marking a deleted dirent.
pub const DELETED_MIME: u16 = 0xFFFD;

/// Byte offset of the cluster number within an article dirent.
pub(crate) const CLUSTER_FIELD_OFFSET: u64 = 8;

#[derive(Debug)]
pub(crate) enum DirentParseError {
    /// The record extends past the supplied window; retry with more
    /// bytes.
    Insufficient,
    /// The record is structurally invalid.
    Malformed(String),
}

type ParseResult<T> = std::result::Result<T, DirentParseError>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum DirentInfo {
    Article {
        cluster: ClusterIndex,
        blob: BlobIndex,
    },
    Redirect {
        target: EntryIndex,
    },
    LinkTarget,
    Deleted,
}

/// A parsed directory record.
#[derive(Debug, Clone)]
pub struct Dirent {
    mime_type: u16,
    namespace: u8,
    version: u32,
    info: DirentInfo,
    url: String,
    title: String,
    parameter: Vec<u8>,
    stored_size: usize,
}

impl Dirent {
    pub(crate) fn parse(data: &[u8]) -> ParseResult<Self> {
        let mut pos = 0usize;
        let mime_type = read_u16(data, &mut pos)?;
        let param_len = read_u8(data, &mut pos)? as usize;
        let namespace = read_u8(data, &mut pos)?;
        let version = read_u32(data, &mut pos)?;

        let info = match mime_type {
            REDIRECT_MIME => DirentInfo::Redirect {
                target: EntryIndex(read_u32(data, &mut pos)?),
            },
            LINK_TARGET_MIME => DirentInfo::LinkTarget,
            DELETED_MIME => DirentInfo::Deleted,
            _ => DirentInfo::Article {
                cluster: ClusterIndex(read_u32(data, &mut pos)?),
                blob: BlobIndex(read_u32(data, &mut pos)?),
            },
        };

        let url = read_string(data, &mut pos)?;
        let title = read_string(data, &mut pos)?;

        if pos + param_len > data.len() {
            return Err(DirentParseError::Insufficient);
        }
        let parameter = data[pos..pos + param_len].to_vec();
        pos += param_len;

        Ok(Self {
            mime_type,
            namespace,
            version,
            info,
            url,
            title,
            parameter,
            stored_size: pos,
        })
    }

    pub fn mime_type(&self) -> u16 {
        self.mime_type
    }

    pub fn namespace(&self) -> char {
        self.namespace as char
    }

    pub(crate) fn namespace_byte(&self) -> u8 {
        self.namespace
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn is_article(&self) -> bool {
        matches!(self.info, DirentInfo::Article { .. })
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.info, DirentInfo::Redirect { .. })
    }

    pub fn is_link_target(&self) -> bool {
        matches!(self.info, DirentInfo::LinkTarget)
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self.info, DirentInfo::Deleted)
    }

    /// Cluster holding this entry's blob; articles only.
    pub fn cluster_number(&self) -> Option<ClusterIndex> {
        match self.info {
            DirentInfo::Article { cluster, .. } => Some(cluster),
            _ => None,
        }
    }

    /// Blob position within the cluster; articles only.
    pub fn blob_number(&self) -> Option<BlobIndex> {
        match self.info {
            DirentInfo::Article { blob, .. } => Some(blob),
            _ => None,
        }
    }

    /// Target entry of a redirect.
    pub fn redirect_index(&self) -> Option<EntryIndex> {
        match self.info {
            DirentInfo::Redirect { target } => Some(target),
            _ => None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Title of the entry; an empty stored title aliases the url.
    pub fn title(&self) -> &str {
        if self.title.is_empty() {
            &self.url
        } else {
            &self.title
        }
    }

    pub fn parameter(&self) -> &[u8] {
        &self.parameter
    }

    /// Number of bytes the record occupies in the file.
    pub fn stored_size(&self) -> usize {
        self.stored_size
    }
}

fn read_u8(data: &[u8], pos: &mut usize) -> ParseResult<u8> {
    let Some(&byte) = data.get(*pos) else {
        return Err(DirentParseError::Insufficient);
    };
    *pos += 1;
    Ok(byte)
}

fn read_u16(data: &[u8], pos: &mut usize) -> ParseResult<u16> {
    let end = *pos + 2;
    if end > data.len() {
        return Err(DirentParseError::Insufficient);
    }
    let value = u16::from_le_bytes([data[*pos], data[*pos + 1]]);
    *pos = end;
    Ok(value)
}

fn read_u32(data: &[u8], pos: &mut usize) -> ParseResult<u32> {
    let end = *pos + 4;
    if end > data.len() {
        return Err(DirentParseError::Insufficient);
    }
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[*pos..end]);
    *pos = end;
    Ok(u32::from_le_bytes(bytes))
}

fn read_string(data: &[u8], pos: &mut usize) -> ParseResult<String> {
    let rest = &data[*pos..];
    let Some(len) = rest.iter().position(|&b| b == 0) else {
        return Err(DirentParseError::Insufficient);
    };
    let s = std::str::from_utf8(&rest[..len])
        .map_err(|e| DirentParseError::Malformed(format!("string is not valid UTF-8: {e}")))?
        .to_owned();
    *pos += len + 1;
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article_record(namespace: u8, url: &str, title: &str, cluster: u32, blob: u32) -> Vec<u8> {
        let mut record = Vec::new();
        record.extend_from_slice(&0u16.to_le_bytes());
        record.push(0); // no extra parameters
        record.push(namespace);
        record.extend_from_slice(&0u32.to_le_bytes());
        record.extend_from_slice(&cluster.to_le_bytes());
        record.extend_from_slice(&blob.to_le_bytes());
        record.extend_from_slice(url.as_bytes());
        record.push(0);
        record.extend_from_slice(title.as_bytes());
        record.push(0);
        record
    }

    #[test]
    fn test_parse_article() {
        let record = article_record(b'A', "greet", "Greeting", 3, 7);
        let dirent = Dirent::parse(&record).unwrap();

        assert!(dirent.is_article());
        assert_eq!(dirent.namespace(), 'A');
        assert_eq!(dirent.url(), "greet");
        assert_eq!(dirent.title(), "Greeting");
        assert_eq!(dirent.cluster_number(), Some(ClusterIndex(3)));
        assert_eq!(dirent.blob_number(), Some(BlobIndex(7)));
        assert_eq!(dirent.stored_size(), record.len());
    }

    #[test]
    fn test_title_aliases_url() {
        let record = article_record(b'A', "greet", "", 0, 0);
        let dirent = Dirent::parse(&record).unwrap();
        assert_eq!(dirent.title(), "greet");
    }

    #[test]
    fn test_parse_redirect() {
        let mut record = Vec::new();
        record.extend_from_slice(&REDIRECT_MIME.to_le_bytes());
        record.push(0);
        record.push(b'A');
        record.extend_from_slice(&0u32.to_le_bytes());
        record.extend_from_slice(&9u32.to_le_bytes());
        record.extend_from_slice(b"old\0Old name\0");

        let dirent = Dirent::parse(&record).unwrap();
        assert!(dirent.is_redirect());
        assert_eq!(dirent.redirect_index(), Some(EntryIndex(9)));
        assert_eq!(dirent.cluster_number(), None);
        assert_eq!(dirent.url(), "old");
    }

    #[test]
    fn test_parse_link_target_and_deleted() {
        for (mime, check) in [
            (LINK_TARGET_MIME, Dirent::is_link_target as fn(&Dirent) -> bool),
            (DELETED_MIME, Dirent::is_deleted as fn(&Dirent) -> bool),
        ] {
            let mut record = Vec::new();
            record.extend_from_slice(&mime.to_le_bytes());
            record.push(0);
            record.push(b'X');
            record.extend_from_slice(&0u32.to_le_bytes());
            record.extend_from_slice(b"u\0t\0");

            let dirent = Dirent::parse(&record).unwrap();
            assert!(check(&dirent));
            assert_eq!(dirent.stored_size(), record.len());
        }
    }

    #[test]
    fn test_insufficient_at_every_truncation() {
        let record = article_record(b'A', "some/url", "Some title", 1, 2);
        for cut in 0..record.len() {
            match Dirent::parse(&record[..cut]) {
                Err(DirentParseError::Insufficient) => {}
                other => panic!("truncation at {cut} gave {other:?}"),
            }
        }
        assert!(Dirent::parse(&record).is_ok());
    }

    #[test]
    fn test_extra_parameters() {
        let mut record = article_record(b'A', "u", "t", 0, 0);
        record[2] = 3; // param_len
        record.extend_from_slice(&[0xDE, 0xAD, 0xBE]);

        let dirent = Dirent::parse(&record).unwrap();
        assert_eq!(dirent.parameter(), &[0xDE, 0xAD, 0xBE]);
        assert_eq!(dirent.stored_size(), record.len());
    }

    #[test]
    fn test_malformed_utf8() {
        let mut record = Vec::new();
        record.extend_from_slice(&0u16.to_le_bytes());
        record.push(0);
        record.push(b'A');
        record.extend_from_slice(&0u32.to_le_bytes());
        record.extend_from_slice(&0u32.to_le_bytes());
        record.extend_from_slice(&0u32.to_le_bytes());
        record.extend_from_slice(&[0xFF, 0xFE, 0x00]); // invalid UTF-8 url
        record.extend_from_slice(b"t\0");

        match Dirent::parse(&record) {
            Err(DirentParseError::Malformed(_)) => {}
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut record = article_record(b'A', "u", "t", 0, 0);
        let expected = record.len();
        record.extend_from_slice(b"garbage after the record");

        let dirent = Dirent::parse(&record).unwrap();
        assert_eq!(dirent.stored_size(), expected);
    }
}
