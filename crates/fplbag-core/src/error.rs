//! Error types for the fplbag-core library.
//!
//! Framing noise (bad sync bytes, checksum mismatches) is never an error: the
//! stream layer recovers from it locally by skipping bytes. Everything in this
//! module is a condition that ends a conversion run.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for fplbag operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for all fplbag operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to open the input log
    #[error("failed to open input '{path}': {source}")]
    SourceOpen {
        /// Path to the input that failed to open
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to read from the input log
    #[error("failed to read input: {0}")]
    SourceRead(#[source] std::io::Error),

    /// The working buffer cannot take more bytes without losing data
    #[error(
        "working buffer overflow: {incoming} incoming bytes do not fit \
         (offset {offset}, length {length}, capacity {capacity})"
    )]
    BufferOverflow {
        /// Start of the unconsumed region
        offset: usize,
        /// Size of the unconsumed region
        length: usize,
        /// Number of bytes that were offered
        incoming: usize,
        /// Fixed buffer capacity
        capacity: usize,
    },

    /// A connection declaration payload violates the field layout
    #[error("bad connection header: {details}")]
    MalformedConnection {
        /// What was wrong with the payload
        details: String,
    },

    /// A data record payload violates the field layout
    #[error("bad message record: {details}")]
    MalformedRecord {
        /// What was wrong with the payload
        details: String,
    },

    /// A data record references a topic that was never declared
    #[error("missing connection header for topic '{topic}'")]
    UnregisteredTopic {
        /// The undeclared topic
        topic: String,
    },

    /// Failed to create the output bag
    #[error("failed to create output '{path}': {source}")]
    ContainerOpen {
        /// Path to the output that failed to open
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to write or finalize the output bag
    #[error("failed to write output: {0}")]
    ContainerWrite(#[from] std::io::Error),

    /// A chunk could not be compressed
    #[error("{codec} compression failed: {details}")]
    Compression {
        /// Name of the codec
        codec: &'static str,
        /// Codec error message
        details: String,
    },

    /// The bag writer was already closed
    #[error("bag writer is closed")]
    WriterClosed,

    /// An earlier write to the output failed, so the bag cannot be indexed
    #[error("bag output is incomplete after an earlier write failure")]
    WriterFailed,
}

impl Error {
    /// Creates a new input open error
    pub fn source_open(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::SourceOpen {
            path: path.into(),
            source,
        }
    }

    /// Creates a new output open error
    pub fn container_open(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ContainerOpen {
            path: path.into(),
            source,
        }
    }

    /// Creates a new malformed connection error
    pub fn malformed_connection(details: impl Into<String>) -> Self {
        Self::MalformedConnection {
            details: details.into(),
        }
    }

    /// Creates a new malformed record error
    pub fn malformed_record(details: impl Into<String>) -> Self {
        Self::MalformedRecord {
            details: details.into(),
        }
    }

    /// Creates a new unregistered topic error
    pub fn unregistered_topic(topic: impl Into<String>) -> Self {
        Self::UnregisteredTopic {
            topic: topic.into(),
        }
    }

    /// Creates a new compression error
    pub fn compression(codec: &'static str, details: impl ToString) -> Self {
        Self::Compression {
            codec,
            details: details.to_string(),
        }
    }

    /// Returns true if the error came from the payload contents rather than I/O
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedConnection { .. }
                | Self::MalformedRecord { .. }
                | Self::UnregisteredTopic { .. }
        )
    }
}
