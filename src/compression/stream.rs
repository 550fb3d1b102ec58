//! Streaming decode of a compressed reader region
//!
//! `DecodedStream` drives a `StreamDecoder` over the bytes of a reader,
//! refilling a fixed input chunk as the codec drains it. The compressed
//! size is not known up front; the codec reports when the stream ends.

use super::StreamDecoder;
use crate::error::{Result, ZimError};
use crate::reader::Reader;

/// Input refill chunk size.
const CHUNK_SIZE: usize = 1024;

pub struct DecodedStream<'a> {
    decoder: Box<dyn StreamDecoder>,
    source: &'a dyn Reader,
    /// Next read position within `source`.
    read_pos: u64,
    chunk: [u8; CHUNK_SIZE],
    chunk_start: usize,
    chunk_len: usize,
    finished: bool,
}

impl<'a> DecodedStream<'a> {
    pub fn new(decoder: Box<dyn StreamDecoder>, source: &'a dyn Reader) -> Self {
        Self {
            decoder,
            source,
            read_pos: 0,
            chunk: [0; CHUNK_SIZE],
            chunk_start: 0,
            chunk_len: 0,
            finished: false,
        }
    }

    fn input_exhausted(&self) -> bool {
        self.chunk_start == self.chunk_len && self.read_pos == self.source.size()
    }

    fn refill(&mut self) -> Result<()> {
        if self.chunk_start < self.chunk_len {
            return Ok(());
        }
        let left = self.source.size() - self.read_pos;
        let n = (CHUNK_SIZE as u64).min(left) as usize;
        self.chunk_start = 0;
        self.chunk_len = n;
        if n > 0 {
            self.source.read(&mut self.chunk[..n], self.read_pos)?;
            self.read_pos += n as u64;
        }
        Ok(())
    }

    /// Decode exactly `dst.len()` bytes. The stream ending first is a
    /// `TruncatedStream` error.
    pub fn read_exact(&mut self, dst: &mut [u8]) -> Result<()> {
        let mut filled = 0usize;
        while filled < dst.len() {
            if self.finished {
                return Err(ZimError::TruncatedStream {
                    expected: dst.len() as u64,
                    actual: filled as u64,
                });
            }
            self.refill()?;
            let finish = self.input_exhausted();
            let step = self.decoder.step(
                &self.chunk[self.chunk_start..self.chunk_len],
                &mut dst[filled..],
                finish,
            )?;
            self.chunk_start += step.consumed;
            filled += step.produced;
            if step.end {
                self.finished = true;
            } else if finish && step.consumed == 0 && step.produced == 0 {
                // the codec wants input that does not exist
                return Err(ZimError::TruncatedStream {
                    expected: dst.len() as u64,
                    actual: filled as u64,
                });
            }
        }
        Ok(())
    }

    /// Decode until the codec reports the end of the stream, returning
    /// the whole plaintext.
    pub fn read_to_end(mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut scratch = [0u8; 4 * CHUNK_SIZE];
        loop {
            self.refill()?;
            let finish = self.input_exhausted();
            let step = self.decoder.step(
                &self.chunk[self.chunk_start..self.chunk_len],
                &mut scratch,
                finish,
            )?;
            self.chunk_start += step.consumed;
            out.extend_from_slice(&scratch[..step.produced]);
            if step.end {
                return Ok(out);
            }
            if finish && step.consumed == 0 && step.produced == 0 {
                return Err(ZimError::Decompression(
                    "compressed stream ended without a stream-end marker".into(),
                ));
            }
        }
    }
}
