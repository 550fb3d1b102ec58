//! Main ZIM storage implementation

use crate::cache::{ConcurrentCache, DirentCache};
use crate::cluster::Cluster;
use crate::compound::{FileCompound, PartRange};
use crate::config::ZimConfig;
use crate::dirent::{self, Dirent, DirentParseError};
use crate::error::{Result, ZimError};
use crate::header::ZimHeader;
use crate::reader::{BufferReader, FileReader, Reader};
use crate::types::{BlobIndex, ClusterIndex, EntryIndex, TitleIndex, MIME_LIST_CAP};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, trace, warn};

/// Initial size and growth step of the dirent scratch window.
const DIRENT_SCRATCH_STEP: u64 = 256;

/// Read chunk for checksum streaming.
const VERIFY_CHUNK: usize = 64 * 1024;

/// An opened archive: header, pointer tables, mime table and the read
/// operations over them. Safe to share across threads.
pub struct ZimStorage {
    compound: Arc<FileCompound>,
    reader: FileReader,
    header: ZimHeader,
    path: PathBuf,
    mime_types: Vec<String>,

    url_ptr_reader: Box<dyn Reader>,
    title_ptr_reader: Box<dyn Reader>,
    cluster_ptr_reader: Box<dyn Reader>,

    dirent_cache: Mutex<DirentCache>,
    /// Scratch window shared by all dirent misses; holding its lock for
    /// the whole miss keeps the allocation from churning.
    dirent_scratch: Mutex<Vec<u8>>,

    cluster_cache: ConcurrentCache<ClusterIndex, Arc<Cluster>>,
    cache_uncompressed_clusters: bool,

    namespace_begin_cache: Mutex<BTreeMap<u8, EntryIndex>>,
    namespace_end_cache: Mutex<BTreeMap<u8, EntryIndex>>,

    /// (cluster, entry) pairs sorted by cluster, built on first use.
    entries_by_cluster: OnceCell<Vec<(u32, u32)>>,
}

impl ZimStorage {
    /// Open an archive with configuration taken from the environment.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, ZimConfig::from_env())
    }

    pub fn open_with_config<P: AsRef<Path>>(path: P, config: ZimConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!("opening archive {:?}", path);

        let compound = Arc::new(FileCompound::open(&path)?);
        let reader = FileReader::new(Arc::clone(&compound));

        if reader.size() < ZimHeader::SIZE {
            return Err(ZimError::InvalidFormat(
                "file too small to contain a header".into(),
            ));
        }
        let header_buffer = reader.get_buffer(0, ZimHeader::SIZE)?;
        let header = ZimHeader::parse(header_buffer.as_slice())?;

        let url_ptr_reader = Self::pointer_table_reader(
            &reader,
            header.url_ptr_pos,
            u64::from(header.entry_count) * 8,
            config.preload_pointer_tables,
        )?;
        let title_ptr_reader = Self::pointer_table_reader(
            &reader,
            header.title_ptr_pos,
            u64::from(header.entry_count) * 4,
            config.preload_pointer_tables,
        )?;
        let cluster_ptr_reader = Self::pointer_table_reader(
            &reader,
            header.cluster_ptr_pos,
            u64::from(header.cluster_count) * 8,
            config.preload_pointer_tables,
        )?;

        if header.cluster_count == 0 {
            warn!("archive {:?} has no clusters", path);
        } else {
            let last = cluster_ptr_reader
                .read_u64_le(u64::from(header.cluster_count - 1) * 8)?;
            if last > compound.size() {
                return Err(ZimError::InvalidFormat(format!(
                    "last cluster offset {last} beyond file size {}",
                    compound.size()
                )));
            }
        }

        if header.has_checksum() && header.checksum_pos != compound.size().saturating_sub(16) {
            return Err(ZimError::InvalidFormat(
                "checksum position is not valid".into(),
            ));
        }

        let mime_types = Self::parse_mime_list(&reader, &header)?;
        debug!(
            "archive {:?}: {} entries, {} clusters, {} mime types",
            path,
            header.entry_count,
            header.cluster_count,
            mime_types.len()
        );

        Ok(Self {
            compound,
            reader,
            header,
            path,
            mime_types,
            url_ptr_reader,
            title_ptr_reader,
            cluster_ptr_reader,
            dirent_cache: Mutex::new(DirentCache::new(config.dirent_cache_size)),
            dirent_scratch: Mutex::new(vec![0u8; DIRENT_SCRATCH_STEP as usize]),
            cluster_cache: ConcurrentCache::new(config.cluster_cache_size),
            cache_uncompressed_clusters: config.cache_uncompressed_clusters,
            namespace_begin_cache: Mutex::new(BTreeMap::new()),
            namespace_end_cache: Mutex::new(BTreeMap::new()),
            entries_by_cluster: OnceCell::new(),
        })
    }

    fn pointer_table_reader(
        reader: &FileReader,
        position: u64,
        size: u64,
        preload: bool,
    ) -> Result<Box<dyn Reader>> {
        if !reader.can_read(position, size) {
            return Err(ZimError::InvalidFormat(format!(
                "pointer table at {position} (+{size}) extends beyond the archive"
            )));
        }
        if preload {
            Ok(Box::new(BufferReader::new(reader.get_buffer(position, size)?)))
        } else {
            reader.sub_reader(position, size)
        }
    }

    fn parse_mime_list(reader: &FileReader, header: &ZimHeader) -> Result<Vec<String>> {
        let end = header.url_ptr_pos.min(MIME_LIST_CAP);
        if end < header.mime_list_pos {
            return Err(ZimError::InvalidFormat(
                "mime list position beyond its end bound".into(),
            ));
        }
        let buffer = reader.get_buffer(header.mime_list_pos, end - header.mime_list_pos)?;
        let bytes = buffer.as_slice();

        let mut mime_types = Vec::new();
        let mut pos = 0usize;
        while pos < bytes.len() {
            let Some(len) = bytes[pos..].iter().position(|&b| b == 0) else {
                return Err(ZimError::InvalidFormat(
                    "unterminated mime type list".into(),
                ));
            };
            if len == 0 {
                break;
            }
            let mime = std::str::from_utf8(&bytes[pos..pos + len])
                .map_err(|_| ZimError::InvalidFormat("mime type is not valid UTF-8".into()))?;
            mime_types.push(mime.to_owned());
            pos += len + 1;
        }
        Ok(mime_types)
    }

    pub fn header(&self) -> &ZimHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total logical size of the archive in bytes.
    pub fn file_size(&self) -> u64 {
        self.compound.size()
    }

    /// Most recent modification time across all parts.
    pub fn mtime(&self) -> Result<SystemTime> {
        self.compound.mtime()
    }

    pub fn is_multi_part(&self) -> bool {
        self.compound.is_multi_part()
    }

    /// Part ranges covering `[offset, offset + size)` of the logical
    /// file.
    pub fn file_parts(&self, offset: u64, size: u64) -> Result<Vec<PartRange>> {
        self.compound.locate(offset, size)
    }

    pub fn entry_count(&self) -> u32 {
        self.header.entry_count
    }

    pub fn cluster_count(&self) -> u32 {
        self.header.cluster_count
    }

    fn url_ptr(&self, index: EntryIndex) -> Result<u64> {
        self.url_ptr_reader
            .read_u64_le(u64::from(index.value()) * 8)
    }

    fn check_entry(&self, index: EntryIndex, what: &'static str) -> Result<()> {
        if index.value() >= self.header.entry_count {
            return Err(ZimError::OutOfRange {
                what,
                index: u64::from(index.value()),
                count: u64::from(self.header.entry_count),
            });
        }
        Ok(())
    }

    /// The dirent at `index` of the URL ordering.
    pub fn dirent(&self, index: EntryIndex) -> Result<Arc<Dirent>> {
        trace!("dirent({index})");
        self.check_entry(index, "entry")?;

        {
            let mut cache = self.dirent_cache.lock();
            if let Some(dirent) = cache.get(index) {
                return Ok(dirent);
            }
            let stats = cache.stats();
            debug!(
                "dirent {} not in cache; hits {} misses {} fills {}",
                index, stats.hits, stats.misses, stats.fills
            );
        }

        let offset = self.url_ptr(index)?;
        let dirent = Arc::new(self.read_dirent_at(offset)?);

        self.dirent_cache.lock().put(index, Arc::clone(&dirent));
        Ok(dirent)
    }

    /// Parse the dirent at `offset`, growing the shared scratch window
    /// until the whole record fits. The record length is unknown up
    /// front (urls, titles and parameters are variable), so parse
    /// failures from a too-small window drive the growth.
    fn read_dirent_at(&self, offset: u64) -> Result<Dirent> {
        let total = self.reader.size();
        if offset >= total {
            return Err(ZimError::InvalidFormat(format!(
                "dirent offset {offset} beyond archive size {total}"
            )));
        }

        let mut scratch = self.dirent_scratch.lock();
        let mut window = DIRENT_SCRATCH_STEP.min(total - offset);
        loop {
            if scratch.len() < window as usize {
                scratch.resize(window as usize, 0);
            }
            let buf = &mut scratch[..window as usize];
            self.reader.read(buf, offset)?;
            match Dirent::parse(buf) {
                Ok(dirent) => return Ok(dirent),
                Err(DirentParseError::Insufficient) => {
                    if offset + window >= total {
                        return Err(ZimError::MalformedDirent(
                            "record extends beyond the end of the archive".into(),
                        ));
                    }
                    window = (window + DIRENT_SCRATCH_STEP).min(total - offset);
                }
                Err(DirentParseError::Malformed(msg)) => {
                    return Err(ZimError::MalformedDirent(msg));
                }
            }
        }
    }

    /// Entry index for position `index` of the title ordering.
    pub fn index_by_title(&self, index: TitleIndex) -> Result<EntryIndex> {
        if index.value() >= self.header.entry_count {
            return Err(ZimError::OutOfRange {
                what: "title",
                index: u64::from(index.value()),
                count: u64::from(self.header.entry_count),
            });
        }
        Ok(EntryIndex(
            self.title_ptr_reader
                .read_u32_le(u64::from(index.value()) * 4)?,
        ))
    }

    /// The dirent at `index` of the title ordering.
    pub fn dirent_by_title(&self, index: TitleIndex) -> Result<Arc<Dirent>> {
        self.dirent(self.index_by_title(index)?)
    }

    /// Binary search by `(namespace, url)` over the URL ordering. On a
    /// miss the returned index is the position where the key would be
    /// inserted.
    pub fn find_by_url(&self, namespace: char, url: &str) -> Result<(bool, EntryIndex)> {
        trace!("find_by_url({namespace}, {url:?})");
        let key = (namespace as u8, url.as_bytes());

        let mut low = 0u32;
        let mut high = self.header.entry_count;
        while low < high {
            let probe = low + (high - low) / 2;
            let dirent = self.dirent(EntryIndex(probe))?;
            match key.cmp(&(dirent.namespace_byte(), dirent.url().as_bytes())) {
                Ordering::Less => high = probe,
                Ordering::Greater => low = probe + 1,
                Ordering::Equal => return Ok((true, EntryIndex(probe))),
            }
        }
        Ok((false, EntryIndex(low)))
    }

    /// Look up a `"/N/rest"` or `"N/rest"` style path.
    pub fn find_by_path(&self, path: &str) -> Result<(bool, EntryIndex)> {
        let bytes = path.as_bytes();
        let start = usize::from(bytes.first() == Some(&b'/'));
        if bytes.len() < start + 2 || bytes[start + 1] != b'/' || !bytes[start].is_ascii() {
            return Ok((false, EntryIndex(0)));
        }
        self.find_by_url(bytes[start] as char, &path[start + 2..])
    }

    /// Binary search by `(namespace, title)` over the title ordering,
    /// bounded by the namespace range.
    pub fn find_by_title(&self, namespace: char, title: &str) -> Result<(bool, TitleIndex)> {
        trace!("find_by_title({namespace}, {title:?})");

        let mut low = self.namespace_begin_offset(namespace)?.value();
        let mut high = self.namespace_end_offset(namespace)?.value();
        if low == high {
            trace!("namespace {namespace} not found");
            return Ok((false, TitleIndex(0)));
        }

        let key = (namespace as u8, title.as_bytes());
        while high - low > 1 {
            let probe = low + (high - low) / 2;
            let dirent = self.dirent_by_title(TitleIndex(probe))?;
            match key.cmp(&(dirent.namespace_byte(), dirent.title().as_bytes())) {
                Ordering::Less => high = probe,
                Ordering::Greater => low = probe,
                Ordering::Equal => return Ok((true, TitleIndex(probe))),
            }
        }

        let dirent = self.dirent_by_title(TitleIndex(low))?;
        match title.as_bytes().cmp(dirent.title().as_bytes()) {
            Ordering::Equal => Ok((true, TitleIndex(low))),
            Ordering::Less => Ok((false, TitleIndex(low))),
            Ordering::Greater => Ok((false, TitleIndex(high))),
        }
    }

    /// Entry index of the `index`-th entry when entries are ordered by
    /// the cluster they point into. Redirects, link targets and deleted
    /// entries sort with cluster 0.
    pub fn find_by_cluster_order(&self, index: EntryIndex) -> Result<(bool, EntryIndex)> {
        let list = self
            .entries_by_cluster
            .get_or_try_init(|| self.build_cluster_order())?;
        match list.get(index.value() as usize) {
            Some(&(_, entry)) => Ok((true, EntryIndex(entry))),
            None => Ok((false, EntryIndex(0))),
        }
    }

    fn build_cluster_order(&self) -> Result<Vec<(u32, u32)>> {
        let count = self.header.entry_count;
        debug!("building cluster-order entry list for {count} entries");

        let mut list = Vec::with_capacity(count as usize);
        for i in 0..count {
            let offset = self.url_ptr(EntryIndex(i))?;
            // the mime code alone tells the dirent kind, no full parse
            let mime = self.reader.read_u16_le(offset)?;
            let cluster = match mime {
                dirent::REDIRECT_MIME | dirent::LINK_TARGET_MIME | dirent::DELETED_MIME => 0,
                _ => self
                    .reader
                    .read_u32_le(offset + dirent::CLUSTER_FIELD_OFFSET)?,
            };
            list.push((cluster, i));
        }
        list.sort_unstable();
        Ok(list)
    }

    /// File offset of the cluster header.
    pub fn cluster_offset(&self, index: ClusterIndex) -> Result<u64> {
        if index.value() >= self.header.cluster_count {
            return Err(ZimError::OutOfRange {
                what: "cluster",
                index: u64::from(index.value()),
                count: u64::from(self.header.cluster_count),
            });
        }
        self.cluster_ptr_reader
            .read_u64_le(u64::from(index.value()) * 8)
    }

    /// The cluster at `index`. Concurrent callers for the same index
    /// share one read and one decompression.
    pub fn cluster(&self, index: ClusterIndex) -> Result<Arc<Cluster>> {
        if index.value() >= self.header.cluster_count {
            return Err(ZimError::OutOfRange {
                what: "cluster",
                index: u64::from(index.value()),
                count: u64::from(self.header.cluster_count),
            });
        }

        let cluster = self
            .cluster_cache
            .get_or_put(index, || self.read_cluster(index).map(Arc::new))?;

        if !self.cache_uncompressed_clusters && !cluster.is_compressed() {
            self.cluster_cache.remove(index);
        }
        Ok(cluster)
    }

    fn read_cluster(&self, index: ClusterIndex) -> Result<Cluster> {
        let offset = self.cluster_offset(index)?;
        trace!("read cluster {index} from offset {offset}");
        Cluster::read(&self.reader, offset)
    }

    /// File offset of a blob, or 0 when the cluster is compressed and
    /// the blob has no file offset.
    pub fn blob_offset(&self, cluster_index: ClusterIndex, blob_index: BlobIndex) -> Result<u64> {
        let cluster = self.cluster(cluster_index)?;
        if cluster.is_compressed() {
            return Ok(0);
        }
        Ok(self.cluster_offset(cluster_index)? + 1 + cluster.blob_offset(blob_index)?)
    }

    /// First index of the URL ordering whose namespace is `>= ch`.
    fn namespace_lower_bound(&self, ch: u8) -> Result<EntryIndex> {
        let mut low = 0u32;
        let mut high = self.header.entry_count;
        while low < high {
            let probe = low + (high - low) / 2;
            let dirent = self.dirent(EntryIndex(probe))?;
            if dirent.namespace_byte() < ch {
                low = probe + 1;
            } else {
                high = probe;
            }
        }
        Ok(EntryIndex(low))
    }

    pub fn namespace_begin_offset(&self, namespace: char) -> Result<EntryIndex> {
        let key = namespace as u8;
        if let Some(&found) = self.namespace_begin_cache.lock().get(&key) {
            return Ok(found);
        }
        let result = self.namespace_lower_bound(key)?;
        self.namespace_begin_cache.lock().insert(key, result);
        Ok(result)
    }

    pub fn namespace_end_offset(&self, namespace: char) -> Result<EntryIndex> {
        let key = namespace as u8;
        if let Some(&found) = self.namespace_end_cache.lock().get(&key) {
            return Ok(found);
        }
        let result = if key == u8::MAX {
            EntryIndex(self.header.entry_count)
        } else {
            self.namespace_lower_bound(key + 1)?
        };
        self.namespace_end_cache.lock().insert(key, result);
        Ok(result)
    }

    pub fn namespace_count(&self, namespace: char) -> Result<u32> {
        Ok(self.namespace_end_offset(namespace)?.value()
            - self.namespace_begin_offset(namespace)?.value())
    }

    pub fn has_namespace(&self, namespace: char) -> Result<bool> {
        Ok(self.namespace_count(namespace)? > 0)
    }

    /// Distinct namespace characters in URL order.
    pub fn namespaces(&self) -> Result<String> {
        let mut namespaces = String::new();
        if self.header.entry_count == 0 {
            return Ok(namespaces);
        }

        let mut dirent = self.dirent(EntryIndex(0))?;
        namespaces.push(dirent.namespace());
        loop {
            let next = self.namespace_end_offset(dirent.namespace())?;
            if next.value() >= self.header.entry_count {
                break;
            }
            dirent = self.dirent(next)?;
            namespaces.push(dirent.namespace());
        }
        Ok(namespaces)
    }

    /// Mime type string for `code`.
    pub fn mime_type(&self, code: u16) -> Result<&str> {
        if usize::from(code) > self.mime_types.len() {
            return Err(ZimError::OutOfRange {
                what: "mime type",
                index: u64::from(code),
                count: self.mime_types.len() as u64,
            });
        }
        self.mime_types
            .get(usize::from(code))
            .map(String::as_str)
            .ok_or_else(|| ZimError::InvalidFormat(format!("unknown mime type code {code}")))
    }

    pub fn mime_types(&self) -> &[String] {
        &self.mime_types
    }

    /// Archive checksum as lowercase hex, or an empty string when the
    /// archive carries none or it cannot be read.
    pub fn checksum(&self) -> String {
        if !self.header.has_checksum() {
            return String::new();
        }
        match self.reader.get_buffer(self.header.checksum_pos, 16) {
            Ok(buffer) => hex::encode(buffer.as_slice()),
            Err(e) => {
                warn!("error reading checksum: {e}");
                String::new()
            }
        }
    }

    /// Recompute the MD5 of every part up to the checksum position and
    /// compare against the stored digest. Returns false on mismatch, on
    /// a missing checksum, and when the file cannot be read that far.
    pub fn verify(&self) -> bool {
        if !self.header.has_checksum() {
            return false;
        }
        let checksum_pos = self.header.checksum_pos;

        let mut context = md5::Context::new();
        let mut chunk = vec![0u8; VERIFY_CHUNK];
        let mut pos = 0u64;
        while pos < checksum_pos {
            let n = (checksum_pos - pos).min(VERIFY_CHUNK as u64) as usize;
            if self.compound.read_at(&mut chunk[..n], pos).is_err() {
                return false;
            }
            context.consume(&chunk[..n]);
            pos += n as u64;
        }

        let stored = match self.reader.get_buffer(checksum_pos, 16) {
            Ok(buffer) => buffer,
            Err(_) => return false,
        };
        let computed = context.compute();
        stored.as_slice() == &computed.0[..]
    }
}
