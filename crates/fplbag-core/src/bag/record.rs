//! ROS bag v2.0 record encoding.
//!
//! Every record in a bag is
//!
//! ```text
//! header_len (u32 LE) | header | data_len (u32 LE) | data
//! ```
//!
//! where the header is a sequence of `field_len (u32 LE) | name=value`
//! entries. The `op` field identifies the record kind.

use super::compression::Compression;
use crate::message::{Connection, Time};
use byteorder::{LittleEndian, WriteBytesExt};
use bytes::{BufMut, BytesMut};
use std::io::{self, Write};

/// File magic line
pub const MAGIC: &[u8] = b"#ROSBAG V2.0\n";

/// The bag header record is padded to this many bytes so it can be rewritten
pub const BAG_HEADER_SIZE: usize = 4096;

/// Index and chunk info record version
const INDEX_VERSION: u32 = 1;

/// Record op codes
pub mod op {
    /// Message data
    pub const MSG_DATA: u8 = 0x02;
    /// Bag header
    pub const BAG_HEADER: u8 = 0x03;
    /// Index data
    pub const INDEX_DATA: u8 = 0x04;
    /// Chunk
    pub const CHUNK: u8 = 0x05;
    /// Chunk info
    pub const CHUNK_INFO: u8 = 0x06;
    /// Connection
    pub const CONNECTION: u8 = 0x07;
}

/// Builder for `name=value` header fields
#[derive(Debug, Default)]
pub struct Header {
    buf: BytesMut,
}

impl Header {
    /// Starts a record header with the given op code
    pub fn new(op: u8) -> Self {
        let mut header = Self::default();
        header.field("op", &[op]);
        header
    }

    /// Appends a raw field
    pub fn field(&mut self, name: &str, value: &[u8]) -> &mut Self {
        self.buf.put_u32_le((name.len() + 1 + value.len()) as u32);
        self.buf.put_slice(name.as_bytes());
        self.buf.put_u8(b'=');
        self.buf.put_slice(value);
        self
    }

    /// Appends a string field
    pub fn str(&mut self, name: &str, value: &str) -> &mut Self {
        self.field(name, value.as_bytes())
    }

    /// Appends a u32 field
    pub fn u32(&mut self, name: &str, value: u32) -> &mut Self {
        self.field(name, &value.to_le_bytes())
    }

    /// Appends a u64 field
    pub fn u64(&mut self, name: &str, value: u64) -> &mut Self {
        self.field(name, &value.to_le_bytes())
    }

    /// Appends a time field
    pub fn time(&mut self, name: &str, time: Time) -> &mut Self {
        self.field(name, &time_bytes(time))
    }

    /// The encoded header
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// Per-chunk summary written to the index section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    /// File position of the chunk record
    pub pos: u64,
    /// Earliest message time in the chunk
    pub start: Time,
    /// Latest message time in the chunk
    pub end: Time,
    /// Message count per connection id
    pub counts: Vec<(u32, u32)>,
}

fn time_bytes(time: Time) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[..4].copy_from_slice(&time.sec.to_le_bytes());
    out[4..].copy_from_slice(&time.nsec.to_le_bytes());
    out
}

/// Writes one record and returns the number of bytes written
pub(super) fn write_record<W: Write>(out: &mut W, header: &Header, data: &[u8]) -> io::Result<u64> {
    let header = header.as_bytes();
    out.write_u32::<LittleEndian>(header.len() as u32)?;
    out.write_all(header)?;
    out.write_u32::<LittleEndian>(data.len() as u32)?;
    out.write_all(data)?;
    Ok((8 + header.len() + data.len()) as u64)
}

/// Writes the fixed-size bag header record
pub(super) fn write_bag_header<W: Write>(
    out: &mut W,
    index_pos: u64,
    conn_count: u32,
    chunk_count: u32,
) -> io::Result<u64> {
    let mut header = Header::new(op::BAG_HEADER);
    header
        .u64("index_pos", index_pos)
        .u32("conn_count", conn_count)
        .u32("chunk_count", chunk_count);
    let padding = BAG_HEADER_SIZE - 8 - header.as_bytes().len();
    write_record(out, &header, &vec![b' '; padding])
}

/// Writes a connection record
pub(super) fn write_connection<W: Write>(out: &mut W, id: u32, conn: &Connection) -> io::Result<u64> {
    let mut header = Header::new(op::CONNECTION);
    header.str("topic", &conn.topic).u32("conn", id);

    let mut data = Header::default();
    data.str("topic", &conn.topic)
        .str("type", &conn.msg_type)
        .str("md5sum", &conn.md5sum)
        .str("message_definition", &conn.definition);
    write_record(out, &header, data.as_bytes())
}

/// Writes a message data record
pub(super) fn write_message<W: Write>(out: &mut W, id: u32, time: Time, data: &[u8]) -> io::Result<u64> {
    let mut header = Header::new(op::MSG_DATA);
    header.u32("conn", id).time("time", time);
    write_record(out, &header, data)
}

/// Writes a chunk record around already compressed chunk data
pub(super) fn write_chunk<W: Write>(
    out: &mut W,
    compression: Compression,
    uncompressed_size: usize,
    data: &[u8],
) -> io::Result<u64> {
    let mut header = Header::new(op::CHUNK);
    header
        .str("compression", compression.name())
        .u32("size", uncompressed_size as u32);
    write_record(out, &header, data)
}

/// Writes the index data record of one connection within a chunk
pub(super) fn write_index<W: Write>(out: &mut W, id: u32, entries: &[(Time, u32)]) -> io::Result<u64> {
    let mut header = Header::new(op::INDEX_DATA);
    header
        .u32("ver", INDEX_VERSION)
        .u32("conn", id)
        .u32("count", entries.len() as u32);

    let mut data = BytesMut::with_capacity(entries.len() * 12);
    for (time, offset) in entries {
        data.put_slice(&time_bytes(*time));
        data.put_u32_le(*offset);
    }
    write_record(out, &header, &data)
}

/// Writes a chunk info record
pub(super) fn write_chunk_info<W: Write>(out: &mut W, info: &ChunkInfo) -> io::Result<u64> {
    let mut header = Header::new(op::CHUNK_INFO);
    header
        .u32("ver", INDEX_VERSION)
        .u64("chunk_pos", info.pos)
        .time("start_time", info.start)
        .time("end_time", info.end)
        .u32("count", info.counts.len() as u32);

    let mut data = BytesMut::with_capacity(info.counts.len() * 8);
    for (id, count) in &info.counts {
        data.put_u32_le(*id);
        data.put_u32_le(*count);
    }
    write_record(out, &header, &data)
}
