//! Payload layouts carried inside .fpl frames.
//!
//! Two frame kinds matter for bag conversion:
//!
//! - A connection declaration: four NUL-terminated strings packed back to
//!   back (`topic`, `type`, `md5sum`, `message_definition`).
//! - A message record: `sec` (u32 LE), `nsec` (u32 LE), a NUL-terminated
//!   topic name, then the serialized ROS message up to the end of the payload.

use crate::error::{Error, Result};

/// Longest topic, type or md5sum string accepted in a payload
pub const MAX_FIELD_LEN: usize = 100;

/// Size of the timestamp prefix of a message record
const TIME_SIZE: usize = 8;

/// A ROS timestamp
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time {
    /// Seconds
    pub sec: u32,
    /// Nanoseconds
    pub nsec: u32,
}

impl Time {
    /// Creates a new timestamp
    pub fn new(sec: u32, nsec: u32) -> Self {
        Self { sec, nsec }
    }
}

/// A topic declaration with its message type metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Topic name, e.g. `/fusion/odometry`
    pub topic: String,
    /// Message type, e.g. `nav_msgs/Odometry`
    pub msg_type: String,
    /// MD5 sum of the message definition
    pub md5sum: String,
    /// Full message definition text
    pub definition: String,
}

impl Connection {
    /// Parses a connection declaration payload
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut fields = CStrFields::new(payload);

        let topic = fields.next_bounded("topic")?;
        let msg_type = fields.next_bounded("type")?;
        let md5sum = fields.next_bounded("md5sum")?;
        let definition = fields.next_field("message_definition")?;

        if fields.remaining() > 0 {
            return Err(Error::malformed_connection(format!(
                "{} trailing bytes after message_definition",
                fields.remaining()
            )));
        }

        Ok(Self {
            topic: topic.to_string(),
            msg_type: msg_type.to_string(),
            md5sum: md5sum.to_string(),
            definition: definition.to_string(),
        })
    }

    /// Serializes the connection back into its payload layout
    pub fn to_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.topic.len() + self.msg_type.len() + self.md5sum.len() + self.definition.len() + 4,
        );
        for field in [&self.topic, &self.msg_type, &self.md5sum, &self.definition] {
            out.extend_from_slice(field.as_bytes());
            out.push(0);
        }
        out
    }
}

/// A timestamped, serialized message bound to a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRecord<'a> {
    /// Recording time
    pub time: Time,
    /// Topic the message was published on
    pub topic: &'a str,
    /// Serialized message bytes, passed through untouched
    pub data: &'a [u8],
}

impl<'a> MessageRecord<'a> {
    /// Parses a message record payload
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        if payload.len() < TIME_SIZE {
            return Err(Error::malformed_record(format!(
                "{} bytes is too short for a timestamp",
                payload.len()
            )));
        }

        let sec = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let nsec = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);

        let rest = &payload[TIME_SIZE..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::malformed_record("topic name is not terminated"))?;
        if nul > MAX_FIELD_LEN {
            return Err(Error::malformed_record(format!(
                "topic name is {nul} bytes (max {MAX_FIELD_LEN})"
            )));
        }
        let topic = std::str::from_utf8(&rest[..nul])
            .map_err(|e| Error::malformed_record(format!("topic name: {e}")))?;

        Ok(Self {
            time: Time::new(sec, nsec),
            topic,
            data: &rest[nul + 1..],
        })
    }

    /// Serializes the record back into its payload layout
    pub fn to_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TIME_SIZE + self.topic.len() + 1 + self.data.len());
        out.extend_from_slice(&self.time.sec.to_le_bytes());
        out.extend_from_slice(&self.time.nsec.to_le_bytes());
        out.extend_from_slice(self.topic.as_bytes());
        out.push(0);
        out.extend_from_slice(self.data);
        out
    }
}

/// Cursor over consecutive NUL-terminated strings
struct CStrFields<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> CStrFields<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn next_field(&mut self, name: &str) -> Result<&'a str> {
        let rest = &self.data[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::malformed_connection(format!("{name} is not terminated")))?;
        let value = std::str::from_utf8(&rest[..nul])
            .map_err(|e| Error::malformed_connection(format!("{name}: {e}")))?;
        self.pos += nul + 1;
        Ok(value)
    }

    fn next_bounded(&mut self, name: &str) -> Result<&'a str> {
        let value = self.next_field(name)?;
        if value.len() > MAX_FIELD_LEN {
            return Err(Error::malformed_connection(format!(
                "{name} is {} bytes (max {MAX_FIELD_LEN})",
                value.len()
            )));
        }
        Ok(value)
    }
}
