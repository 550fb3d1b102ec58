//! Byte-level construction of test archives
//!
//! Builds complete archives in memory: header, mime list, dirents,
//! pointer tables, clusters and the trailing MD5 checksum. Entries are
//! sorted into URL and title order the way a writer would emit them.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const ZIM_MAGIC: u32 = 0x044D_495A;
const NO_PAGE: u32 = 0xFFFF_FFFF;
const REDIRECT_MIME: u16 = 0xFFFF;

#[derive(Clone)]
pub enum EntryKind {
    Article { cluster: u32, blob: u32 },
    Redirect { target: u32 },
}

#[derive(Clone)]
pub struct TestEntry {
    pub namespace: u8,
    pub url: String,
    pub title: String,
    pub mime: u16,
    pub kind: EntryKind,
}

impl TestEntry {
    fn mime_code(&self) -> u16 {
        match self.kind {
            EntryKind::Article { .. } => self.mime,
            EntryKind::Redirect { .. } => REDIRECT_MIME,
        }
    }

    fn effective_title(&self) -> &str {
        if self.title.is_empty() {
            &self.url
        } else {
            &self.title
        }
    }
}

#[derive(Clone)]
pub enum TestCluster {
    Plain(Vec<Vec<u8>>),
    Lzma(Vec<Vec<u8>>),
    Zstd(Vec<Vec<u8>>),
    Zlib(Vec<Vec<u8>>),
    /// Info byte claims bzip2; the body stays uncompressed.
    Bzip2(Vec<Vec<u8>>),
}

pub struct ArchiveBuilder {
    mime_types: Vec<String>,
    entries: Vec<TestEntry>,
    clusters: Vec<TestCluster>,
    with_checksum: bool,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self {
            mime_types: vec!["text/html".to_owned()],
            entries: Vec::new(),
            clusters: Vec::new(),
            with_checksum: true,
        }
    }

    pub fn article(mut self, namespace: char, url: &str, title: &str, cluster: u32, blob: u32) -> Self {
        self.entries.push(TestEntry {
            namespace: namespace as u8,
            url: url.to_owned(),
            title: title.to_owned(),
            mime: 0,
            kind: EntryKind::Article { cluster, blob },
        });
        self
    }

    pub fn redirect(mut self, namespace: char, url: &str, title: &str, target: u32) -> Self {
        self.entries.push(TestEntry {
            namespace: namespace as u8,
            url: url.to_owned(),
            title: title.to_owned(),
            mime: 0,
            kind: EntryKind::Redirect { target },
        });
        self
    }

    pub fn cluster(mut self, cluster: TestCluster) -> Self {
        self.clusters.push(cluster);
        self
    }

    pub fn without_checksum(mut self) -> Self {
        self.with_checksum = false;
        self
    }

    /// Serialize the archive. Entry indices follow `(namespace, url)`
    /// order; the title pointer table follows `(namespace, title)`.
    pub fn build(&self) -> Vec<u8> {
        let mut entries = self.entries.clone();
        entries.sort_by(|a, b| {
            (a.namespace, a.url.as_bytes()).cmp(&(b.namespace, b.url.as_bytes()))
        });

        let mut out = vec![0u8; 80];

        let mime_list_pos = out.len() as u64;
        for mime in &self.mime_types {
            out.extend_from_slice(mime.as_bytes());
            out.push(0);
        }
        out.push(0);

        let mut dirent_offsets = Vec::new();
        for entry in &entries {
            dirent_offsets.push(out.len() as u64);
            out.extend_from_slice(&entry.mime_code().to_le_bytes());
            out.push(0); // no extra parameters
            out.push(entry.namespace);
            out.extend_from_slice(&0u32.to_le_bytes()); // version
            match entry.kind {
                EntryKind::Article { cluster, blob } => {
                    out.extend_from_slice(&cluster.to_le_bytes());
                    out.extend_from_slice(&blob.to_le_bytes());
                }
                EntryKind::Redirect { target } => {
                    out.extend_from_slice(&target.to_le_bytes());
                }
            }
            out.extend_from_slice(entry.url.as_bytes());
            out.push(0);
            out.extend_from_slice(entry.title.as_bytes());
            out.push(0);
        }

        let url_ptr_pos = out.len() as u64;
        for offset in &dirent_offsets {
            out.extend_from_slice(&offset.to_le_bytes());
        }

        let title_ptr_pos = out.len() as u64;
        let mut title_order: Vec<u32> = (0..entries.len() as u32).collect();
        title_order.sort_by(|&a, &b| {
            let ea = &entries[a as usize];
            let eb = &entries[b as usize];
            (ea.namespace, ea.effective_title().as_bytes())
                .cmp(&(eb.namespace, eb.effective_title().as_bytes()))
        });
        for index in &title_order {
            out.extend_from_slice(&index.to_le_bytes());
        }

        let cluster_ptr_pos = out.len() as u64;
        let table_at = out.len();
        out.resize(out.len() + 8 * self.clusters.len(), 0);
        let mut cluster_offsets = Vec::new();
        for cluster in &self.clusters {
            cluster_offsets.push(out.len() as u64);
            out.extend_from_slice(&serialize_cluster(cluster));
        }
        for (i, offset) in cluster_offsets.iter().enumerate() {
            out[table_at + i * 8..table_at + (i + 1) * 8].copy_from_slice(&offset.to_le_bytes());
        }

        let checksum_pos = if self.with_checksum {
            out.len() as u64
        } else {
            0
        };

        let header = &mut out[0..80];
        header[0..4].copy_from_slice(&ZIM_MAGIC.to_le_bytes());
        header[4..6].copy_from_slice(&6u16.to_le_bytes());
        header[6..8].copy_from_slice(&1u16.to_le_bytes());
        header[8..24].copy_from_slice(&[0x42; 16]);
        header[24..28].copy_from_slice(&(entries.len() as u32).to_le_bytes());
        header[28..32].copy_from_slice(&(self.clusters.len() as u32).to_le_bytes());
        header[32..40].copy_from_slice(&url_ptr_pos.to_le_bytes());
        header[40..48].copy_from_slice(&title_ptr_pos.to_le_bytes());
        header[48..56].copy_from_slice(&cluster_ptr_pos.to_le_bytes());
        header[56..64].copy_from_slice(&mime_list_pos.to_le_bytes());
        header[64..68].copy_from_slice(&NO_PAGE.to_le_bytes());
        header[68..72].copy_from_slice(&NO_PAGE.to_le_bytes());
        header[72..80].copy_from_slice(&checksum_pos.to_le_bytes());

        if self.with_checksum {
            let digest = md5::compute(&out);
            out.extend_from_slice(&digest.0);
        }
        out
    }

    pub fn write_to(&self, path: &Path) {
        fs::write(path, self.build()).unwrap();
    }

    /// Write the archive as two split parts, cutting at `split_at`.
    /// Returns the stem path to open.
    pub fn write_split(&self, dir: &Path, stem: &str, split_at: usize) -> PathBuf {
        let bytes = self.build();
        assert!(split_at > 0 && split_at < bytes.len());

        let mut first = dir.join(stem).into_os_string();
        first.push("aa");
        fs::write(first, &bytes[..split_at]).unwrap();

        let mut second = dir.join(stem).into_os_string();
        second.push("ab");
        fs::write(second, &bytes[split_at..]).unwrap();

        dir.join(stem)
    }
}

fn cluster_body(blobs: &[Vec<u8>]) -> Vec<u8> {
    let table_size = (blobs.len() as u32 + 1) * 4;
    let mut body = Vec::new();
    let mut position = table_size;
    body.extend_from_slice(&position.to_le_bytes());
    for blob in blobs {
        position += blob.len() as u32;
        body.extend_from_slice(&position.to_le_bytes());
    }
    for blob in blobs {
        body.extend_from_slice(blob);
    }
    body
}

fn serialize_cluster(cluster: &TestCluster) -> Vec<u8> {
    match cluster {
        TestCluster::Plain(blobs) => {
            let mut bytes = vec![0x00];
            bytes.extend_from_slice(&cluster_body(blobs));
            bytes
        }
        TestCluster::Lzma(blobs) => {
            let mut encoder = xz2::write::XzEncoder::new(vec![0x04], 6);
            encoder.write_all(&cluster_body(blobs)).unwrap();
            encoder.finish().unwrap()
        }
        TestCluster::Zstd(blobs) => {
            let mut bytes = vec![0x05];
            bytes.extend_from_slice(&zstd::encode_all(&cluster_body(blobs)[..], 3).unwrap());
            bytes
        }
        TestCluster::Zlib(blobs) => {
            let mut encoder = flate2::write::ZlibEncoder::new(
                vec![0x02],
                flate2::Compression::default(),
            );
            encoder.write_all(&cluster_body(blobs)).unwrap();
            encoder.finish().unwrap()
        }
        TestCluster::Bzip2(blobs) => {
            let mut bytes = vec![0x03];
            bytes.extend_from_slice(&cluster_body(blobs));
            bytes
        }
    }
}
