//! Cluster compression codecs
//!
//! A cluster is compressed as one continuous stream. Every codec is
//! driven through the same step interface so `DecodedStream` can refill
//! input in fixed-size chunks without knowing which codec runs below.

mod stream;

pub use stream::DecodedStream;

use crate::error::{Result, ZimError};

/// Compression type from the low nibble of the cluster info byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionType {
    /// Uncompressed (nibble 0).
    None = 0,
    /// Uncompressed, writer default (nibble 1).
    Default = 1,
    /// zlib/DEFLATE stream (nibble 2).
    Zip = 2,
    /// bzip2 (nibble 3), recognized but not supported.
    Bzip2 = 3,
    /// LZMA/xz stream (nibble 4).
    Lzma = 4,
    /// Zstandard frame (nibble 5).
    Zstd = 5,
}

impl CompressionType {
    /// Decode the low nibble of a cluster info byte.
    pub fn from_nibble(nibble: u8) -> Result<Self> {
        match nibble {
            0 => Ok(Self::None),
            1 => Ok(Self::Default),
            2 => Ok(Self::Zip),
            3 => Ok(Self::Bzip2),
            4 => Ok(Self::Lzma),
            5 => Ok(Self::Zstd),
            other => Err(ZimError::InvalidFormat(format!(
                "invalid compression flag {other}"
            ))),
        }
    }

    /// Whether cluster data sits behind a compressed stream.
    pub fn is_compressed(self) -> bool {
        !matches!(self, Self::None | Self::Default)
    }
}

/// Outcome of a single decode step.
#[derive(Debug, Clone, Copy)]
pub struct StreamStep {
    /// Input bytes consumed by this step.
    pub consumed: usize,
    /// Output bytes produced by this step.
    pub produced: usize,
    /// The codec reached the end of the compressed stream.
    pub end: bool,
}

/// Streaming decoder operating on caller-supplied input and output
/// windows. `finish` tells the codec no further input exists.
pub trait StreamDecoder: Send + std::fmt::Debug {
    fn step(&mut self, input: &[u8], output: &mut [u8], finish: bool) -> Result<StreamStep>;
}

/// Construct the stream decoder for a compressed cluster.
pub fn new_decoder(compression: CompressionType) -> Result<Box<dyn StreamDecoder>> {
    match compression {
        CompressionType::Lzma => Ok(Box::new(LzmaDecoder::new()?)),
        CompressionType::Zstd => Ok(Box::new(ZstdDecoder::new()?)),
        CompressionType::Zip => Ok(Box::new(ZlibDecoder::new())),
        CompressionType::Bzip2 => Err(ZimError::UnsupportedCompression(
            CompressionType::Bzip2 as u8,
        )),
        CompressionType::None | CompressionType::Default => Err(ZimError::InvalidOperation(
            "uncompressed clusters have no stream decoder",
        )),
    }
}

struct LzmaDecoder {
    stream: xz2::stream::Stream,
}

impl std::fmt::Debug for LzmaDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LzmaDecoder").finish()
    }
}

impl LzmaDecoder {
    fn new() -> Result<Self> {
        let stream = xz2::stream::Stream::new_stream_decoder(u64::MAX, 0)
            .map_err(|e| ZimError::Decompression(format!("lzma decoder init failed: {e}")))?;
        Ok(Self { stream })
    }
}

impl StreamDecoder for LzmaDecoder {
    fn step(&mut self, input: &[u8], output: &mut [u8], finish: bool) -> Result<StreamStep> {
        use xz2::stream::{Action, Status};

        let before_in = self.stream.total_in();
        let before_out = self.stream.total_out();
        let action = if finish { Action::Finish } else { Action::Run };
        let status = self
            .stream
            .process(input, output, action)
            .map_err(|e| ZimError::Decompression(format!("lzma decode failed: {e}")))?;

        Ok(StreamStep {
            consumed: (self.stream.total_in() - before_in) as usize,
            produced: (self.stream.total_out() - before_out) as usize,
            end: matches!(status, Status::StreamEnd),
        })
    }
}

#[derive(Debug)]
struct ZlibDecoder {
    inner: flate2::Decompress,
}

impl ZlibDecoder {
    fn new() -> Self {
        Self {
            inner: flate2::Decompress::new(true),
        }
    }
}

impl StreamDecoder for ZlibDecoder {
    fn step(&mut self, input: &[u8], output: &mut [u8], finish: bool) -> Result<StreamStep> {
        use flate2::{FlushDecompress, Status};

        let before_in = self.inner.total_in();
        let before_out = self.inner.total_out();
        let flush = if finish {
            FlushDecompress::Finish
        } else {
            FlushDecompress::None
        };
        let status = self
            .inner
            .decompress(input, output, flush)
            .map_err(|e| ZimError::Decompression(format!("zlib decode failed: {e}")))?;

        Ok(StreamStep {
            consumed: (self.inner.total_in() - before_in) as usize,
            produced: (self.inner.total_out() - before_out) as usize,
            end: matches!(status, Status::StreamEnd),
        })
    }
}

struct ZstdDecoder {
    inner: zstd::stream::raw::Decoder<'static>,
}

impl std::fmt::Debug for ZstdDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZstdDecoder").finish()
    }
}

impl ZstdDecoder {
    fn new() -> Result<Self> {
        let inner = zstd::stream::raw::Decoder::new()
            .map_err(|e| ZimError::Decompression(format!("zstd decoder init failed: {e}")))?;
        Ok(Self { inner })
    }
}

impl StreamDecoder for ZstdDecoder {
    fn step(&mut self, input: &[u8], output: &mut [u8], _finish: bool) -> Result<StreamStep> {
        use zstd::stream::raw::{InBuffer, Operation, OutBuffer};

        let mut in_buffer = InBuffer::around(input);
        let mut out_buffer = OutBuffer::around(output);
        // a zero hint means the current frame is complete
        let hint = self
            .inner
            .run(&mut in_buffer, &mut out_buffer)
            .map_err(|e| ZimError::Decompression(format!("zstd decode failed: {e}")))?;

        Ok(StreamStep {
            consumed: in_buffer.pos,
            produced: out_buffer.pos(),
            end: hint == 0,
        })
    }
}
