//! Input stream decoding for .fpl logs.
//!
//! An .fpl log is a plain concatenation of frames (see [`parse_frame`]) that may be
//! interspersed with noise: recording glitches, truncated writes, or bytes
//! that happen to look like a sync pattern.
//!
//! ## Pipeline
//!
//! 1. [`SourceReader`] pulls fixed-size chunks from any [`Read`] source
//! 2. [`StreamAssembler`] accumulates them in a bounded working buffer
//! 3. [`parse_frame`] recognizes one frame at the front of the buffer
//!
//! Bytes that do not start a valid frame are skipped one at a time until the
//! stream resynchronizes. Frames always come out in stream order.

mod assembler;
mod wire;

use crate::error::{Error, Result};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use tracing::debug;

pub use assembler::StreamAssembler;
pub use wire::{
    checksum, encode_frame, parse_frame, Frame, ParseOutcome, CHECKSUM_SIZE, HEADER_SIZE,
    MAX_FRAME_SIZE, SYNC_1, SYNC_2,
};

/// Configuration for reading a frame stream
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Largest payload accepted as a real frame
    pub max_payload_size: usize,
    /// Capacity of the working buffer
    pub buffer_capacity: usize,
    /// Number of bytes requested from the source per read
    pub read_chunk_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_FRAME_SIZE,
            buffer_capacity: 5 * MAX_FRAME_SIZE,
            read_chunk_size: MAX_FRAME_SIZE,
        }
    }
}

impl StreamConfig {
    /// Creates a new stream config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the largest accepted payload size
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Sets the working buffer capacity
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Sets the read chunk size
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }
}

/// Pulls frames out of a byte source
///
/// Once the source is exhausted, or after any error, the reader releases the
/// source and yields no further frames.
pub struct SourceReader<R> {
    source: Option<R>,
    assembler: StreamAssembler,
    chunk: Vec<u8>,
}

impl SourceReader<File> {
    /// Opens an input log file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, StreamConfig::default())
    }

    /// Opens an input log file with custom configuration
    pub fn open_with_config(path: impl AsRef<Path>, config: StreamConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::source_open(path, e))?;
        debug!("Opened input {}", path.display());
        Ok(Self::with_config(file, config))
    }
}

impl<R: Read> SourceReader<R> {
    /// Creates a reader over any byte source with default configuration
    pub fn new(source: R) -> Self {
        Self::with_config(source, StreamConfig::default())
    }

    /// Creates a reader over any byte source with custom configuration
    pub fn with_config(source: R, config: StreamConfig) -> Self {
        Self {
            source: Some(source),
            assembler: StreamAssembler::new(config.buffer_capacity, config.max_payload_size),
            chunk: vec![0u8; config.read_chunk_size],
        }
    }

    /// Returns the next frame, or `None` once the stream is finished
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.assembler.process() {
                return Ok(Some(frame));
            }

            let Some(source) = self.source.as_mut() else {
                return Ok(None);
            };

            let read = match source.read(&mut self.chunk) {
                Ok(0) => {
                    debug!(
                        leftover = self.assembler.len(),
                        "Input exhausted after {} frames",
                        self.assembler.frames_decoded()
                    );
                    self.source = None;
                    return Ok(None);
                }
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.source = None;
                    return Err(Error::SourceRead(e));
                }
            };

            if let Err(e) = self.assembler.add(&self.chunk[..read]) {
                self.source = None;
                return Err(e);
            }
        }
    }

    /// Returns true while the source is still held
    pub fn is_open(&self) -> bool {
        self.source.is_some()
    }

    /// Total number of bytes discarded while resynchronizing
    pub fn bytes_skipped(&self) -> u64 {
        self.assembler.bytes_skipped()
    }

    /// Total number of frames decoded so far
    pub fn frames_decoded(&self) -> u64 {
        self.assembler.frames_decoded()
    }
}

impl<R: Read> Iterator for SourceReader<R> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}
