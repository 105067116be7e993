//! # fplbag-core
//!
//! A library for converting Fixposition `.fpl` telemetry logs into ROS bags.
//!
//! This crate provides the core functionality for:
//! - Recovering frames from a noisy, arbitrarily chunked `.fpl` byte stream
//! - Parsing the connection and message record payloads carried in frames
//! - Writing a ROS bag v2.0 file with optional chunk compression
//!
//! ## Architecture
//!
//! - [`stream`]: Frame grammar, resynchronizing assembler and source reader
//! - [`message`]: Connection and message record payloads
//! - [`bag`]: ROS bag writer and connection registry
//! - [`convert`]: Routing of frames into the bag
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use fplbag_core::{convert, BagConfig, BagWriter, Compression, SourceReader};
//!
//! let mut reader = SourceReader::open("./fpl/recording.fpl")?;
//! let config = BagConfig::new().compression(Compression::Lz4);
//! let mut writer = BagWriter::create("./recording.bag", config)?;
//!
//! let stats = convert(&mut reader, &mut writer)?;
//! writer.close()?;
//! println!("{stats}");
//! # Ok::<(), fplbag_core::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod bag;
pub mod convert;
pub mod error;
pub mod message;
pub mod stream;

// Re-export primary types for convenience
pub use bag::{BagConfig, BagWriter, Compression, WriterStats};
pub use convert::{convert, ConvertStats, Dispatcher, FrameKind, FrameSink};
pub use error::{Error, Result};
pub use message::{Connection, MessageRecord, Time};
pub use stream::{Frame, ParseOutcome, SourceReader, StreamAssembler, StreamConfig, MAX_FRAME_SIZE};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
