//! Low-level .fpl frame format.
//!
//! Every message in the input log is framed as:
//!
//! ```text
//! ┌──────┬──────┬──────┬──────┬─────────────┬───────────┬─────┬─────┐
//! │ 0xAA │ 0x55 │ type │ code │ length (LE) │ payload   │ ck1 │ ck2 │
//! │ 1B   │ 1B   │ 1B   │ 1B   │ 4B          │ length B  │ 1B  │ 1B  │
//! └──────┴──────┴──────┴──────┴─────────────┴───────────┴─────┴─────┘
//! ```
//!
//! The checksum is a Fletcher-style pair of 8-bit running sums over the header
//! and payload: `ck1 += byte; ck2 += ck1`.

use bytes::{BufMut, Bytes, BytesMut};

/// First sync byte
pub const SYNC_1: u8 = 0xAA;

/// Second sync byte
pub const SYNC_2: u8 = 0x55;

/// Frame header: sync (2) + type (1) + code (1) + length (4) = 8 bytes
pub const HEADER_SIZE: usize = 8;

/// Trailing checksum bytes
pub const CHECKSUM_SIZE: usize = 2;

/// Largest payload a well-formed log contains
pub const MAX_FRAME_SIZE: usize = 1_500_000;

/// A decoded frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    frame_type: u8,
    code: u8,
    payload: Bytes,
}

impl Frame {
    /// Creates a new frame
    pub fn new(frame_type: u8, code: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            code,
            payload: payload.into(),
        }
    }

    /// Frame type (byte 2 of the header)
    pub fn frame_type(&self) -> u8 {
        self.frame_type
    }

    /// Frame code (byte 3 of the header)
    pub fn code(&self) -> u8 {
        self.code
    }

    /// The payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The total wire size of this frame (header + payload + checksum)
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len() + CHECKSUM_SIZE
    }
}

/// Result of trying to parse a frame at the start of a byte window
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// The window does not start with a valid frame; skip one byte
    NoMatch,
    /// The window starts like a frame but is incomplete; do not skip
    NeedMoreData,
    /// A complete, checksum-verified frame of `size` wire bytes
    Frame {
        /// Number of bytes the frame occupies in the window
        size: usize,
        /// The decoded frame
        frame: Frame,
    },
}

/// Compute the two checksum bytes over `data`
pub fn checksum(data: &[u8]) -> [u8; 2] {
    let (ck1, ck2) = data.iter().fold((0u8, 0u8), |(ck1, ck2), &byte| {
        let ck1 = ck1.wrapping_add(byte);
        (ck1, ck2.wrapping_add(ck1))
    });
    [ck1, ck2]
}

/// Parse one frame from the start of `window`.
///
/// Payload lengths above `max_payload` cannot belong to a real frame and are
/// reported as [`ParseOutcome::NoMatch`]. A checksum mismatch is also
/// `NoMatch`: a corrupted frame is indistinguishable from a sync pattern that
/// occurs by chance inside noise, and both are handled by resynchronizing.
pub fn parse_frame(window: &[u8], max_payload: usize) -> ParseOutcome {
    match window.first() {
        None => return ParseOutcome::NoMatch,
        Some(&byte) if byte != SYNC_1 => return ParseOutcome::NoMatch,
        Some(_) => {}
    }
    if window.len() < 2 {
        return ParseOutcome::NeedMoreData;
    }
    if window[1] != SYNC_2 {
        return ParseOutcome::NoMatch;
    }
    if window.len() < HEADER_SIZE {
        return ParseOutcome::NeedMoreData;
    }

    let payload_len = u32::from_le_bytes([window[4], window[5], window[6], window[7]]) as usize;
    if payload_len > max_payload {
        return ParseOutcome::NoMatch;
    }

    let body_len = HEADER_SIZE + payload_len;
    let total = body_len + CHECKSUM_SIZE;
    if window.len() < total {
        return ParseOutcome::NeedMoreData;
    }

    if checksum(&window[..body_len]) != [window[body_len], window[body_len + 1]] {
        return ParseOutcome::NoMatch;
    }

    ParseOutcome::Frame {
        size: total,
        frame: Frame {
            frame_type: window[2],
            code: window[3],
            payload: Bytes::copy_from_slice(&window[HEADER_SIZE..body_len]),
        },
    }
}

/// Encode a frame into the wire format, appending to `dst`
pub fn encode_frame(frame_type: u8, code: u8, payload: &[u8], dst: &mut BytesMut) {
    let start = dst.len();
    dst.reserve(HEADER_SIZE + payload.len() + CHECKSUM_SIZE);
    dst.put_u8(SYNC_1);
    dst.put_u8(SYNC_2);
    dst.put_u8(frame_type);
    dst.put_u8(code);
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
    let ck = checksum(&dst[start..]);
    dst.put_slice(&ck);
}
