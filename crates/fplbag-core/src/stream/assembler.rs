//! Bounded reassembly buffer.
//!
//! The assembler owns a fixed-capacity working buffer. Incoming bytes are
//! appended after the unconsumed region; [`StreamAssembler::process`] scans
//! the region for frames, skipping one byte at a time over anything that does
//! not parse, and compacts the buffer once per decoded frame.

use super::wire::{parse_frame, Frame, ParseOutcome};
use crate::error::{Error, Result};
use tracing::{trace, warn};

/// Fixed-capacity frame reassembly buffer
#[derive(Debug)]
pub struct StreamAssembler {
    buf: Box<[u8]>,
    offset: usize,
    length: usize,
    max_payload: usize,
    /// Bytes skipped since the last decoded frame
    pending_skip: usize,
    bytes_skipped: u64,
    frames_decoded: u64,
}

impl StreamAssembler {
    /// Creates an assembler with a working buffer of `capacity` bytes
    pub fn new(capacity: usize, max_payload: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            offset: 0,
            length: 0,
            max_payload,
            pending_skip: 0,
            bytes_skipped: 0,
            frames_decoded: 0,
        }
    }

    /// Appends `data` after the unconsumed region.
    ///
    /// Fails without touching the buffer if the bytes do not fit behind the
    /// current region. Space before `offset` is only reclaimed when a frame
    /// is decoded.
    pub fn add(&mut self, data: &[u8]) -> Result<()> {
        let end = self.offset + self.length;
        if end + data.len() > self.buf.len() {
            warn!(
                offset = self.offset,
                length = self.length,
                incoming = data.len(),
                "working buffer overflow"
            );
            return Err(Error::BufferOverflow {
                offset: self.offset,
                length: self.length,
                incoming: data.len(),
                capacity: self.buf.len(),
            });
        }

        self.buf[end..end + data.len()].copy_from_slice(data);
        self.length += data.len();
        Ok(())
    }

    /// Extracts the next frame from the buffered bytes, if one is complete
    pub fn process(&mut self) -> Option<Frame> {
        while self.length > 0 {
            let window = &self.buf[self.offset..self.offset + self.length];
            match parse_frame(window, self.max_payload) {
                ParseOutcome::NeedMoreData => return None,
                ParseOutcome::NoMatch => {
                    self.offset += 1;
                    self.length -= 1;
                    self.pending_skip += 1;
                    self.bytes_skipped += 1;
                }
                ParseOutcome::Frame { size, frame } => {
                    if self.pending_skip > 0 {
                        warn!(skipped = self.pending_skip, "resynchronized after bad data");
                        self.pending_skip = 0;
                    }
                    trace!(
                        frame_type = frame.frame_type(),
                        code = frame.code(),
                        size,
                        "decoded frame"
                    );

                    let rest = self.offset + size;
                    self.length -= size;
                    self.buf.copy_within(rest..rest + self.length, 0);
                    self.offset = 0;
                    self.frames_decoded += 1;
                    return Some(frame);
                }
            }
        }

        // Nothing left to keep, so the skipped prefix can be released in place
        self.offset = 0;
        None
    }

    /// Fixed buffer capacity
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Start of the unconsumed region
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Size of the unconsumed region
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns true if no unconsumed bytes are buffered
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Total number of bytes discarded while resynchronizing
    pub fn bytes_skipped(&self) -> u64 {
        self.bytes_skipped
    }

    /// Total number of frames decoded
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::wire::{encode_frame, MAX_FRAME_SIZE};
    use bytes::BytesMut;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn assembler() -> StreamAssembler {
        StreamAssembler::new(4096, 1024)
    }

    fn drain(asm: &mut StreamAssembler) -> Vec<Frame> {
        std::iter::from_fn(|| asm.process()).collect()
    }

    fn stream_of(frames: &[(u8, u8, Vec<u8>)]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for (frame_type, code, payload) in frames {
            encode_frame(*frame_type, *code, payload, &mut buf);
        }
        buf.to_vec()
    }

    #[test]
    fn test_single_frame() {
        let mut asm = assembler();
        asm.add(&stream_of(&[(1, 1, b"abc".to_vec())])).unwrap();

        let frame = asm.process().unwrap();
        assert_eq!(frame, Frame::new(1, 1, &b"abc"[..]));
        assert!(asm.is_empty());
        assert_eq!(asm.process(), None);
    }

    #[test]
    fn test_partial_frame_waits() {
        let wire = stream_of(&[(2, 1, b"payload".to_vec())]);
        let mut asm = assembler();

        asm.add(&wire[..5]).unwrap();
        assert_eq!(asm.process(), None);
        assert_eq!(asm.len(), 5);
        assert_eq!(asm.offset(), 0);

        asm.add(&wire[5..]).unwrap();
        assert_eq!(asm.process().unwrap().payload(), b"payload");
    }

    #[test]
    fn test_resync_after_garbage() {
        let garbage = [0x00, 0xAA, 0x13, 0x55, 0xAA, 0xAA, 0xFF];
        let mut input = garbage.to_vec();
        input.extend(stream_of(&[(2, 1, b"valid".to_vec())]));

        let mut asm = assembler();
        asm.add(&input).unwrap();

        assert_eq!(drain(&mut asm), vec![Frame::new(2, 1, &b"valid"[..])]);
        assert_eq!(asm.bytes_skipped(), garbage.len() as u64);
        assert!(asm.is_empty());
    }

    #[test]
    fn test_corrupted_frame_does_not_hide_next_frame() {
        let mut input = stream_of(&[(1, 1, b"first".to_vec())]);
        let last = input.len() - 1;
        input[last] ^= 0xFF;
        input.extend(stream_of(&[(1, 1, b"second".to_vec())]));

        let mut asm = assembler();
        asm.add(&input).unwrap();

        assert_eq!(drain(&mut asm), vec![Frame::new(1, 1, &b"second"[..])]);
        assert_eq!(asm.bytes_skipped(), (last + 1) as u64);
    }

    #[test]
    fn test_all_garbage_releases_offset() {
        let mut asm = StreamAssembler::new(16, 1024);
        asm.add(&[0x01; 16]).unwrap();
        assert_eq!(asm.process(), None);
        assert_eq!(asm.offset(), 0);
        assert!(asm.is_empty());
        asm.add(&[0x02; 16]).unwrap();
    }

    #[test]
    fn test_overflow_leaves_state_unchanged() {
        let mut asm = StreamAssembler::new(16, 1024);
        // Sync pattern with a long declared length keeps the assembler waiting
        asm.add(&[0xAA, 0x55, 0x01, 0x01, 0x40, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(asm.process(), None);

        let err = asm.add(&[0u8; 9]).unwrap_err();
        assert!(matches!(
            err,
            Error::BufferOverflow {
                offset: 0,
                length: 8,
                incoming: 9,
                capacity: 16
            }
        ));
        assert_eq!(asm.len(), 8);
        assert_eq!(asm.offset(), 0);

        asm.add(&[0u8; 8]).unwrap();
        assert_eq!(asm.len(), 16);
    }

    #[test]
    fn test_overflow_counts_skipped_prefix() {
        let mut asm = StreamAssembler::new(16, 1024);
        asm.add(&[0x00, 0x00, 0x00, 0x00, 0xAA, 0x55, 0x01, 0x01, 0x40, 0x00]).unwrap();
        assert_eq!(asm.process(), None);
        assert_eq!(asm.offset(), 4);
        assert_eq!(asm.len(), 6);

        assert!(asm.add(&[0u8; 7]).is_err());
        asm.add(&[0u8; 6]).unwrap();
    }

    #[test]
    fn test_compaction_keeps_following_frames() {
        let input = stream_of(&[
            (1, 1, b"one".to_vec()),
            (2, 1, b"two".to_vec()),
            (3, 3, b"three".to_vec()),
        ]);
        let mut asm = assembler();
        let mut garbage = vec![0x42; 3];
        garbage.extend(input);
        asm.add(&garbage).unwrap();

        let frames = drain(&mut asm);
        let payloads: Vec<&[u8]> = frames.iter().map(|f| f.payload()).collect();
        assert_eq!(payloads, vec![&b"one"[..], &b"two"[..], &b"three"[..]]);
        assert_eq!(asm.frames_decoded(), 3);
    }

    #[test]
    fn test_spurious_length_is_skipped() {
        let mut input = vec![0xAA, 0x55, 0x01, 0x01, 0xFF, 0xFF, 0xFF, 0x7F];
        input.extend(stream_of(&[(2, 1, b"real".to_vec())]));

        let mut asm = StreamAssembler::new(4096, MAX_FRAME_SIZE);
        asm.add(&input).unwrap();
        assert_eq!(drain(&mut asm), vec![Frame::new(2, 1, &b"real"[..])]);
    }

    fn arb_frames() -> impl Strategy<Value = Vec<(u8, u8, Vec<u8>)>> {
        prop::collection::vec(
            (any::<u8>(), any::<u8>(), prop::collection::vec(any::<u8>(), 0..64)),
            1..8,
        )
    }

    proptest! {
        #[test]
        fn prop_chunking_does_not_change_frames(
            frames in arb_frames(),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..16),
        ) {
            let input = stream_of(&frames);

            let mut whole = assembler();
            whole.add(&input).unwrap();
            let expected = drain(&mut whole);

            let mut points: Vec<usize> = cuts.iter().map(|c| c.index(input.len())).collect();
            points.push(input.len());
            points.sort_unstable();
            points.dedup();

            let mut chunked = assembler();
            let mut actual = Vec::new();
            let mut start = 0;
            for end in points {
                if end == start {
                    continue;
                }
                chunked.add(&input[start..end]).unwrap();
                actual.extend(drain(&mut chunked));
                start = end;
            }

            prop_assert_eq!(actual, expected.clone());
            prop_assert_eq!(expected.len(), frames.len());
        }

        #[test]
        fn prop_garbage_prefix_is_skipped(
            garbage in prop::collection::vec(any::<u8>().prop_filter("no sync", |b| *b != 0xAA), 0..64),
            payload in prop::collection::vec(any::<u8>(), 0..64),
        ) {
            let mut input = garbage.clone();
            input.extend(stream_of(&[(2, 1, payload.clone())]));

            let mut asm = assembler();
            asm.add(&input).unwrap();
            prop_assert_eq!(drain(&mut asm), vec![Frame::new(2, 1, payload)]);
            prop_assert_eq!(asm.bytes_skipped(), garbage.len() as u64);
        }
    }
}
