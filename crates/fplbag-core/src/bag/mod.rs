//! ROS bag v2.0 output.
//!
//! [`BagWriter`] keeps the registry of declared connections and appends
//! message records to the bag as they arrive.
//!
//! ## File layout
//!
//! ```text
//! #ROSBAG V2.0\n
//! bag header          (4096 bytes, rewritten on close)
//! chunk               connection + message data records, optionally compressed
//! index data ...      one per connection in the preceding chunk
//! chunk / index data  ...
//! connection ...      one per connection used  <- index_pos
//! chunk info ...      one per chunk
//! ```
//!
//! A connection only becomes part of the bag when its first message is
//! written; declarations without messages leave no trace in the file.

mod compression;
mod record;

use crate::error::{Error, Result};
use crate::message::{Connection, MessageRecord, Time};
use crate::stream::MAX_FRAME_SIZE;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, warn};

pub use compression::Compression;
pub use record::{op, ChunkInfo, Header, BAG_HEADER_SIZE, MAGIC};

/// Default uncompressed chunk size at which a chunk is closed
pub const DEFAULT_CHUNK_THRESHOLD: usize = 768 * 1024;

/// Largest accepted chunk threshold.
///
/// Chunk sizes and in-chunk offsets are u32 fields, and a chunk may overrun
/// the threshold by one connection record plus one message.
pub const MAX_CHUNK_THRESHOLD: usize = u32::MAX as usize - 4 * MAX_FRAME_SIZE;

/// Configuration for bag output
#[derive(Debug, Clone)]
pub struct BagConfig {
    /// Chunk compression
    pub compression: Compression,
    /// Uncompressed chunk size at which a chunk is written out
    pub chunk_threshold: usize,
}

impl Default for BagConfig {
    fn default() -> Self {
        Self {
            compression: Compression::None,
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
        }
    }
}

impl BagConfig {
    /// Creates a new bag config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the chunk compression
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Sets the chunk size threshold, capped at [`MAX_CHUNK_THRESHOLD`]
    pub fn chunk_threshold(mut self, threshold: usize) -> Self {
        self.chunk_threshold = threshold.min(MAX_CHUNK_THRESHOLD);
        self
    }
}

/// Counters kept by the writer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Connections registered
    pub connections: usize,
    /// Declarations ignored because the topic was already registered
    pub duplicate_connections: usize,
    /// Message records written
    pub messages: u64,
    /// Chunk records written
    pub chunks: usize,
}

#[derive(Debug)]
struct Registered {
    connection: Connection,
    id: Option<u32>,
}

#[derive(Debug)]
struct OpenChunk {
    data: Vec<u8>,
    start: Time,
    end: Time,
    index: BTreeMap<u32, Vec<(Time, u32)>>,
}

impl OpenChunk {
    fn new(time: Time) -> Self {
        Self {
            data: Vec::new(),
            start: time,
            end: time,
            index: BTreeMap::new(),
        }
    }
}

/// Writes a ROS bag from connection declarations and message records
///
/// The bag is finalized by [`BagWriter::close`] or [`BagWriter::finish`];
/// a writer dropped without either is finalized on a best-effort basis.
///
/// After a failed write to the output the writer refuses further messages
/// and leaves the bag unindexed rather than writing an index that points
/// into a partial chunk.
pub struct BagWriter<W: Write + Seek> {
    out: Option<W>,
    pos: u64,
    header_pos: u64,
    config: BagConfig,
    registry: HashMap<String, Registered>,
    /// Topics of written connections, indexed by connection id
    topics: Vec<String>,
    chunk: Option<OpenChunk>,
    chunk_infos: Vec<ChunkInfo>,
    stats: WriterStats,
    failed: bool,
}

impl BagWriter<BufWriter<File>> {
    /// Creates a bag file at `path`, replacing any existing file
    pub fn create(path: impl AsRef<Path>, config: BagConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| Error::container_open(path, e))?;
        let writer = Self::new(BufWriter::new(file), config)
            .map_err(|e| match e {
                Error::ContainerWrite(source) => Error::container_open(path, source),
                other => other,
            })?;
        debug!(
            "Opened output {} ({} compression)",
            path.display(),
            writer.config.compression.name()
        );
        Ok(writer)
    }
}

impl<W: Write + Seek> BagWriter<W> {
    /// Starts a bag at the current position of `out`
    pub fn new(mut out: W, mut config: BagConfig) -> Result<Self> {
        config.chunk_threshold = config.chunk_threshold.min(MAX_CHUNK_THRESHOLD);
        let start = out.stream_position()?;
        out.write_all(MAGIC)?;
        let header_pos = start + MAGIC.len() as u64;
        let header_len = record::write_bag_header(&mut out, 0, 0, 0)?;

        Ok(Self {
            out: Some(out),
            pos: header_pos + header_len,
            header_pos,
            config,
            registry: HashMap::new(),
            topics: Vec::new(),
            chunk: None,
            chunk_infos: Vec::new(),
            stats: WriterStats::default(),
            failed: false,
        })
    }

    /// Registers a connection from a declaration payload.
    ///
    /// Returns `false` if the topic was already registered; the first
    /// declaration of a topic wins. A malformed payload leaves the registry
    /// untouched.
    pub fn add_connection(&mut self, payload: &[u8]) -> Result<bool> {
        let connection = Connection::parse(payload).inspect_err(|e| warn!("{e}"))?;
        Ok(self.register(connection))
    }

    /// Registers an already parsed connection
    pub fn register(&mut self, connection: Connection) -> bool {
        if self.registry.contains_key(&connection.topic) {
            debug!(topic = %connection.topic, "Ignoring repeated connection header");
            self.stats.duplicate_connections += 1;
            return false;
        }

        debug!(
            "Connection {}, {}, {}",
            connection.topic, connection.msg_type, connection.md5sum
        );
        self.registry.insert(
            connection.topic.clone(),
            Registered {
                connection,
                id: None,
            },
        );
        self.stats.connections += 1;
        true
    }

    /// Appends a message from a record payload
    pub fn add_record(&mut self, payload: &[u8]) -> Result<()> {
        let record = MessageRecord::parse(payload).inspect_err(|e| warn!("{e}"))?;
        self.write_message(&record)
    }

    /// Appends a parsed message record under its topic's connection
    pub fn write_message(&mut self, record: &MessageRecord<'_>) -> Result<()> {
        if self.out.is_none() {
            return Err(Error::WriterClosed);
        }
        if self.failed {
            return Err(Error::WriterFailed);
        }

        let entry = self.registry.get_mut(record.topic).ok_or_else(|| {
            warn!("Missing connection header for {}", record.topic);
            Error::unregistered_topic(record.topic)
        })?;

        let chunk = self
            .chunk
            .get_or_insert_with(|| OpenChunk::new(record.time));

        let id = match entry.id {
            Some(id) => id,
            None => {
                let id = self.topics.len() as u32;
                record::write_connection(&mut chunk.data, id, &entry.connection)?;
                entry.id = Some(id);
                self.topics.push(record.topic.to_string());
                id
            }
        };

        let offset = chunk.data.len() as u32;
        record::write_message(&mut chunk.data, id, record.time, record.data)?;
        chunk.index.entry(id).or_default().push((record.time, offset));
        chunk.start = chunk.start.min(record.time);
        chunk.end = chunk.end.max(record.time);
        self.stats.messages += 1;

        if chunk.data.len() >= self.config.chunk_threshold {
            self.flush_chunk()?;
        }
        Ok(())
    }

    /// Returns true if a connection for `topic` has been registered
    pub fn is_registered(&self, topic: &str) -> bool {
        self.registry.contains_key(topic)
    }

    /// Counters for this writer
    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    /// Writer configuration
    pub fn config(&self) -> &BagConfig {
        &self.config
    }

    /// Finalizes the bag and releases the output.
    ///
    /// Calling `close` again after it returned is a no-op. The output is
    /// released even if finalizing fails.
    pub fn close(&mut self) -> Result<()> {
        if self.out.is_none() {
            return Ok(());
        }
        let result = self.finalize();
        self.out = None;
        result
    }

    /// Finalizes the bag and returns the underlying output
    pub fn finish(mut self) -> Result<W> {
        let result = self.finalize();
        let out = self.out.take();
        result?;
        out.ok_or(Error::WriterClosed)
    }

    /// Writes out the open chunk. A failure poisons the writer: the chunk is
    /// gone and the output position is unknown.
    fn flush_chunk(&mut self) -> Result<()> {
        let result = self.write_chunk();
        if let Err(e) = &result {
            warn!("Chunk write failed, bag will not be indexed: {e}");
            self.failed = true;
        }
        result
    }

    fn write_chunk(&mut self) -> Result<()> {
        let Some(chunk) = self.chunk.take() else {
            return Ok(());
        };
        let out = self.out.as_mut().ok_or(Error::WriterClosed)?;

        let chunk_pos = self.pos;
        let compression = self.config.compression;
        let packed = compression.compress(&chunk.data)?;
        self.pos += record::write_chunk(out, compression, chunk.data.len(), &packed)?;

        let mut counts = Vec::with_capacity(chunk.index.len());
        for (id, entries) in &chunk.index {
            self.pos += record::write_index(out, *id, entries)?;
            counts.push((*id, entries.len() as u32));
        }

        debug!(
            pos = chunk_pos,
            size = chunk.data.len(),
            packed = packed.len(),
            "Wrote chunk"
        );
        self.chunk_infos.push(ChunkInfo {
            pos: chunk_pos,
            start: chunk.start,
            end: chunk.end,
            counts,
        });
        self.stats.chunks += 1;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        if self.failed {
            return Err(Error::WriterFailed);
        }
        self.flush_chunk()?;
        let out = self.out.as_mut().ok_or(Error::WriterClosed)?;

        let index_pos = self.pos;
        for (id, topic) in self.topics.iter().enumerate() {
            let connection = &self.registry[topic].connection;
            self.pos += record::write_connection(out, id as u32, connection)?;
        }
        for info in &self.chunk_infos {
            self.pos += record::write_chunk_info(out, info)?;
        }

        out.seek(SeekFrom::Start(self.header_pos))?;
        record::write_bag_header(
            out,
            index_pos,
            self.topics.len() as u32,
            self.chunk_infos.len() as u32,
        )?;
        out.seek(SeekFrom::Start(self.pos))?;
        out.flush()?;

        debug!(
            "Closed bag: {} connections, {} chunks, {} messages",
            self.topics.len(),
            self.chunk_infos.len(),
            self.stats.messages
        );
        Ok(())
    }
}

impl<W: Write + Seek> Drop for BagWriter<W> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to finalize bag: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn writer() -> BagWriter<Cursor<Vec<u8>>> {
        BagWriter::new(Cursor::new(Vec::new()), BagConfig::default()).unwrap()
    }

    fn record_payload(sec: u32, nsec: u32, topic: &str, data: &[u8]) -> Vec<u8> {
        MessageRecord {
            time: Time::new(sec, nsec),
            topic,
            data,
        }
        .to_payload()
    }

    #[test]
    fn test_bag_config_builder() {
        let config = BagConfig::new()
            .compression(Compression::Lz4)
            .chunk_threshold(1024);
        assert_eq!(config.compression, Compression::Lz4);
        assert_eq!(config.chunk_threshold, 1024);
    }

    #[test]
    fn test_empty_bag_layout() {
        let bytes = writer().finish().unwrap().into_inner();
        assert!(bytes.starts_with(MAGIC));
        assert_eq!(bytes.len(), MAGIC.len() + BAG_HEADER_SIZE);
    }

    #[test]
    fn test_record_before_connection_fails() {
        let mut bag = writer();
        let err = bag.add_record(&record_payload(1, 0, "/t", b"x")).unwrap_err();
        assert!(matches!(err, Error::UnregisteredTopic { ref topic } if topic == "/t"));

        assert!(bag.add_connection(b"/t\0T\0m\0def\0").unwrap());
        bag.add_record(&record_payload(1, 0, "/t", b"x")).unwrap();
        assert_eq!(bag.stats().messages, 1);
    }

    #[test]
    fn test_duplicate_connection_first_wins() {
        let mut bag = writer();
        assert!(bag.add_connection(b"/t\0First\0m1\0def\0").unwrap());
        assert!(!bag.add_connection(b"/t\0Second\0m2\0def\0").unwrap());

        assert_eq!(bag.registry["/t"].connection.msg_type, "First");
        assert_eq!(
            bag.stats(),
            WriterStats {
                connections: 1,
                duplicate_connections: 1,
                messages: 0,
                chunks: 0,
            }
        );
    }

    #[test]
    fn test_malformed_connection_leaves_registry() {
        let mut bag = writer();
        assert!(bag.add_connection(b"/t\0T\0m\0unterminated").is_err());
        assert!(!bag.is_registered("/t"));
        assert_eq!(bag.stats().connections, 0);
    }

    #[test]
    fn test_chunk_threshold_splits_chunks() {
        let config = BagConfig::new().chunk_threshold(64);
        let mut bag = BagWriter::new(Cursor::new(Vec::new()), config).unwrap();
        bag.add_connection(b"/t\0T\0m\0def\0").unwrap();
        for i in 0..4 {
            bag.add_record(&record_payload(i, 0, "/t", &[0u8; 80])).unwrap();
        }
        assert_eq!(bag.stats().chunks, 4);

        bag.close().unwrap();
        assert_eq!(bag.chunk_infos.len(), 4);
        assert_eq!(bag.chunk_infos[2].counts, vec![(0, 1)]);
        assert_eq!(bag.chunk_infos[2].start, Time::new(2, 0));
    }

    #[test]
    fn test_connection_ids_follow_first_message() {
        let mut bag = writer();
        bag.add_connection(b"/a\0A\0m\0def\0").unwrap();
        bag.add_connection(b"/b\0B\0m\0def\0").unwrap();
        bag.add_record(&record_payload(1, 0, "/b", b"1")).unwrap();
        bag.add_record(&record_payload(2, 0, "/a", b"2")).unwrap();
        bag.add_record(&record_payload(3, 0, "/b", b"3")).unwrap();

        assert_eq!(bag.topics, vec!["/b".to_string(), "/a".to_string()]);
        let chunk = bag.chunk.as_ref().unwrap();
        assert_eq!(chunk.index[&0].len(), 2);
        assert_eq!(chunk.index[&1].len(), 1);
        assert_eq!((chunk.start, chunk.end), (Time::new(1, 0), Time::new(3, 0)));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut bag = writer();
        bag.close().unwrap();
        bag.close().unwrap();
        assert!(matches!(
            bag.add_record(&record_payload(1, 0, "/t", b"")),
            Err(Error::WriterClosed)
        ));
    }

    #[test]
    fn test_create_writes_file_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bag");
        {
            let mut bag = BagWriter::create(&path, BagConfig::default()).unwrap();
            bag.add_connection(b"/t\0T\0m\0def\0").unwrap();
            bag.add_record(&record_payload(1, 0, "/t", b"abc")).unwrap();
        }
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(MAGIC));
        assert!(bytes.len() > MAGIC.len() + BAG_HEADER_SIZE);
    }

    #[test]
    fn test_create_in_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = BagWriter::create(dir.path().join("no/such/out.bag"), BagConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::ContainerOpen { .. }));
    }

    #[test]
    fn test_chunk_threshold_is_capped() {
        let config = BagConfig::new().chunk_threshold(usize::MAX);
        assert_eq!(config.chunk_threshold, MAX_CHUNK_THRESHOLD);

        let mut config = BagConfig::new();
        config.chunk_threshold = usize::MAX;
        let bag = BagWriter::new(Cursor::new(Vec::new()), config).unwrap();
        assert_eq!(bag.config().chunk_threshold, MAX_CHUNK_THRESHOLD);
        assert!(MAX_CHUNK_THRESHOLD + 4 * MAX_FRAME_SIZE <= u32::MAX as usize);
    }

    /// Accepts writes up to `fail_at`, then fails a single write
    struct FlakySink {
        inner: Cursor<Vec<u8>>,
        fail_at: Option<u64>,
    }

    impl FlakySink {
        fn new(fail_at: usize) -> Self {
            Self {
                inner: Cursor::new(Vec::new()),
                fail_at: Some(fail_at as u64),
            }
        }
    }

    impl Write for FlakySink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let Some(limit) = self.fail_at {
                let pos = self.inner.position();
                if pos + buf.len() as u64 > limit {
                    let room = limit.saturating_sub(pos) as usize;
                    if room == 0 {
                        self.fail_at = None;
                        return Err(std::io::Error::other("disk hiccup"));
                    }
                    return self.inner.write(&buf[..room]);
                }
            }
            self.inner.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Seek for FlakySink {
        fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    fn placeholder_header() -> Vec<u8> {
        let mut out = MAGIC.to_vec();
        record::write_bag_header(&mut out, 0, 0, 0).unwrap();
        out
    }

    #[test]
    fn test_failed_chunk_write_poisons_writer() {
        // Fails partway through the first chunk record
        let mut sink = FlakySink::new(MAGIC.len() + BAG_HEADER_SIZE + 10);
        {
            let config = BagConfig::new().chunk_threshold(16);
            let mut bag = BagWriter::new(&mut sink, config).unwrap();
            bag.add_connection(b"/t\0T\0m\0def\0").unwrap();

            let err = bag.add_record(&record_payload(1, 0, "/t", b"abc")).unwrap_err();
            assert!(matches!(err, Error::ContainerWrite(_)));
            assert!(matches!(
                bag.add_record(&record_payload(2, 0, "/t", b"def")),
                Err(Error::WriterFailed)
            ));
            assert!(matches!(bag.close(), Err(Error::WriterFailed)));
            bag.close().unwrap();
        }

        // The header still marks the bag as unindexed
        let bytes = sink.inner.into_inner();
        let header = placeholder_header();
        assert_eq!(&bytes[..header.len()], &header[..]);
        assert!(bytes.len() < header.len() + 64);
    }

    #[test]
    fn test_failed_writer_is_not_indexed_on_drop() {
        let mut sink = FlakySink::new(MAGIC.len() + BAG_HEADER_SIZE + 10);
        {
            let config = BagConfig::new().chunk_threshold(16);
            let mut bag = BagWriter::new(&mut sink, config).unwrap();
            bag.add_connection(b"/t\0T\0m\0def\0").unwrap();
            assert!(bag.add_record(&record_payload(1, 0, "/t", b"abc")).is_err());
        }

        let bytes = sink.inner.into_inner();
        let header = placeholder_header();
        assert_eq!(&bytes[..header.len()], &header[..]);
    }

    #[test]
    fn test_failed_finish_returns_error() {
        let mut sink = FlakySink::new(MAGIC.len() + BAG_HEADER_SIZE + 10);
        let mut bag = BagWriter::new(&mut sink, BagConfig::default()).unwrap();
        bag.add_connection(b"/t\0T\0m\0def\0").unwrap();
        bag.add_record(&record_payload(1, 0, "/t", b"abc")).unwrap();

        // The chunk is only written on finish, which hits the failing write
        assert!(matches!(bag.finish(), Err(Error::ContainerWrite(_))));
    }
}
