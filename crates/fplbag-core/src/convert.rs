//! Routing of decoded frames into a bag.
//!
//! Only two frame kinds carry bag content; every other `(type, code)` pair
//! in an .fpl log is skipped.
//!
//! ```no_run
//! use fplbag_core::{convert, BagConfig, BagWriter, SourceReader};
//!
//! let mut reader = SourceReader::open("recording.fpl")?;
//! let mut writer = BagWriter::create("recording.bag", BagConfig::default())?;
//! let stats = convert(&mut reader, &mut writer)?;
//! writer.close()?;
//! println!("{} messages", stats.records);
//! # Ok::<(), fplbag_core::Error>(())
//! ```

use crate::bag::BagWriter;
use crate::error::Result;
use crate::stream::{Frame, SourceReader};
use std::fmt;
use std::io::{Read, Seek, Write};
use tracing::trace;

/// Classification of a frame by its `(type, code)` tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Connection declaration, tag `(1, 1)`
    Connection,
    /// Timestamped message record, tag `(2, 1)`
    Record,
    /// Anything else
    Other,
}

impl FrameKind {
    /// Classifies a `(type, code)` tag
    pub fn from_tag(frame_type: u8, code: u8) -> Self {
        match (frame_type, code) {
            (1, 1) => FrameKind::Connection,
            (2, 1) => FrameKind::Record,
            _ => FrameKind::Other,
        }
    }

    /// Classifies a decoded frame
    pub fn of(frame: &Frame) -> Self {
        Self::from_tag(frame.frame_type(), frame.code())
    }
}

/// Destination for classified frame payloads.
///
/// [`BagWriter`] is the production sink; other implementations can observe
/// or filter the stream.
pub trait FrameSink {
    /// Handles a connection declaration. Returns `false` for a repeated topic.
    fn add_connection(&mut self, payload: &[u8]) -> Result<bool>;

    /// Handles a message record
    fn add_record(&mut self, payload: &[u8]) -> Result<()>;
}

impl<W: Write + Seek> FrameSink for BagWriter<W> {
    fn add_connection(&mut self, payload: &[u8]) -> Result<bool> {
        BagWriter::add_connection(self, payload)
    }

    fn add_record(&mut self, payload: &[u8]) -> Result<()> {
        BagWriter::add_record(self, payload)
    }
}

/// Counters for one conversion run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvertStats {
    /// Frames decoded from the input
    pub frames: u64,
    /// Connections registered
    pub connections: u64,
    /// Connection declarations ignored as repeats
    pub duplicate_connections: u64,
    /// Message records written
    pub records: u64,
    /// Frames with an unrelated tag
    pub ignored: u64,
    /// Input bytes discarded while resynchronizing
    pub bytes_skipped: u64,
}

impl fmt::Display for ConvertStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames, {} connections ({} repeated), {} messages, {} ignored, {} bytes skipped",
            self.frames,
            self.connections,
            self.duplicate_connections,
            self.records,
            self.ignored,
            self.bytes_skipped
        )
    }
}

/// Routes frames to a [`FrameSink`] by tag
pub struct Dispatcher<'a, S: ?Sized> {
    sink: &'a mut S,
    stats: ConvertStats,
}

impl<'a, S: FrameSink + ?Sized> Dispatcher<'a, S> {
    /// Creates a dispatcher feeding `sink`
    pub fn new(sink: &'a mut S) -> Self {
        Self {
            sink,
            stats: ConvertStats::default(),
        }
    }

    /// Routes one frame. Any sink error ends the run.
    pub fn dispatch(&mut self, frame: &Frame) -> Result<FrameKind> {
        let kind = FrameKind::of(frame);
        trace!(
            frame_type = frame.frame_type(),
            code = frame.code(),
            len = frame.payload().len(),
            "{kind:?} frame"
        );

        self.stats.frames += 1;
        match kind {
            FrameKind::Connection => {
                if self.sink.add_connection(frame.payload())? {
                    self.stats.connections += 1;
                } else {
                    self.stats.duplicate_connections += 1;
                }
            }
            FrameKind::Record => {
                self.sink.add_record(frame.payload())?;
                self.stats.records += 1;
            }
            FrameKind::Other => self.stats.ignored += 1,
        }
        Ok(kind)
    }

    /// Counters so far
    pub fn stats(&self) -> ConvertStats {
        self.stats
    }
}

/// Pulls every frame from `reader` into `sink`, stopping at the first error
pub fn convert<R, S>(reader: &mut SourceReader<R>, sink: &mut S) -> Result<ConvertStats>
where
    R: Read,
    S: FrameSink + ?Sized,
{
    let mut dispatcher = Dispatcher::new(sink);
    while let Some(frame) = reader.next_frame()? {
        dispatcher.dispatch(&frame)?;
    }

    let mut stats = dispatcher.stats();
    stats.bytes_skipped = reader.bytes_skipped();
    Ok(stats)
}
