//! Properties of the byte-level building blocks.
//!
//! The read buffer and the write queue are driven with random operation
//! sequences and compared against a plain `Vec<u8>` model after every step.

use miniwebd::buffer::{ReadBuffer, WriteQueue};
use miniwebd::http::writer::{CHUNK_FOOTER_LEN, CHUNK_HEADER_LEN, LAST_CHUNK, frame_chunk};
use miniwebd::ws::frame::apply_mask;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum ReadOp {
    Extend(Vec<u8>),
    Consume { len: usize, keep: bool },
    ResetRelevant,
    Request(usize),
}

fn read_op() -> impl Strategy<Value = ReadOp> {
    prop_oneof![
        3 => prop::collection::vec(any::<u8>(), 0..48).prop_map(ReadOp::Extend),
        3 => (0usize..64, any::<bool>()).prop_map(|(len, keep)| ReadOp::Consume { len, keep }),
        1 => Just(ReadOp::ResetRelevant),
        2 => (0usize..200).prop_map(ReadOp::Request),
    ]
}

#[derive(Debug, Clone)]
enum WriteOp {
    Push(Vec<u8>),
    /// Allocates `len` bytes and commits the first `commit` of them.
    Allocate { len: usize, commit: usize },
    Pop,
}

fn write_op() -> impl Strategy<Value = WriteOp> {
    prop_oneof![
        3 => prop::collection::vec(any::<u8>(), 1..40).prop_map(WriteOp::Push),
        2 => (1usize..80, 0usize..90).prop_map(|(len, commit)| WriteOp::Allocate { len, commit }),
        3 => Just(WriteOp::Pop),
    ]
}

/// Decodes a chunked body, checking the terminator.
fn decode_chunked(mut encoded: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    loop {
        let line_end = encoded.windows(2).position(|w| w == b"\r\n").unwrap();
        let len = usize::from_str_radix(std::str::from_utf8(&encoded[..line_end]).unwrap(), 16).unwrap();
        encoded = &encoded[line_end + 2..];
        if len == 0 {
            assert_eq!(encoded, b"\r\n");
            return body;
        }
        body.extend_from_slice(&encoded[..len]);
        assert_eq!(&encoded[len..len + 2], b"\r\n");
        encoded = &encoded[len + 2..];
    }
}

fn fill(buf: &mut [u8], seed: u8) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte = seed.wrapping_add(i as u8);
    }
}

proptest! {
    #[test]
    fn prop_read_buffer_matches_model(ops in prop::collection::vec(read_op(), 1..80)) {
        let mut buf = ReadBuffer::<32>::new();
        let mut available: Vec<u8> = Vec::new();
        let mut relevant: Vec<u8> = Vec::new();

        for op in ops {
            match op {
                ReadOp::Extend(data) => {
                    buf.extend_from_slice(&data);
                    available.extend_from_slice(&data);
                }
                ReadOp::Consume { len, keep } => {
                    let in_bounds = buf.consume(len, keep);
                    prop_assert_eq!(in_bounds, len <= available.len());
                    let taken: Vec<u8> = available.drain(..len.min(available.len())).collect();
                    if keep {
                        relevant.extend(taken);
                    }
                }
                ReadOp::ResetRelevant => {
                    buf.reset_relevant();
                    relevant.clear();
                }
                ReadOp::Request(need) => {
                    let ready = buf.request_data(need);
                    prop_assert_eq!(ready, available.len() >= need);
                    if !ready {
                        prop_assert!(buf.free_len() >= need - available.len());
                        prop_assert_eq!(buf.required_len(), need - available.len());
                    }
                }
            }

            prop_assert_eq!(buf.available_data(), &available[..]);
            prop_assert_eq!(buf.relevant_data(), &relevant[..]);
            prop_assert_eq!(buf.relevant_len(), relevant.len());
        }
    }

    #[test]
    fn prop_write_queue_preserves_order(
        ops in prop::collection::vec(write_op(), 1..80),
        seed in any::<u8>(),
    ) {
        let mut queue = WriteQueue::<64>::new();
        let mut queued: Vec<u8> = Vec::new();
        let mut written: Vec<u8> = Vec::new();

        for (step, op) in ops.into_iter().enumerate() {
            match op {
                WriteOp::Push(data) => {
                    queue.push(&data);
                    queued.extend_from_slice(&data);
                }
                WriteOp::Allocate { len, commit } => {
                    let buf = queue.allocate(len);
                    prop_assert_eq!(buf.len(), len);
                    fill(buf, seed.wrapping_add(step as u8));
                    let committed = buf[..commit.min(len)].to_vec();
                    queue.commit(commit);
                    queued.extend_from_slice(&committed);
                }
                WriteOp::Pop => {
                    if let Some(bytes) = queue.pop() {
                        prop_assert!(!bytes.is_empty());
                        written.extend_from_slice(bytes);
                        queue.release();
                    }
                }
            }
            prop_assert!(queued.starts_with(&written));
        }

        while let Some(bytes) = queue.pop() {
            written.extend_from_slice(bytes);
            queue.release();
        }
        prop_assert_eq!(written, queued);
        prop_assert!(queue.is_empty());
    }

    #[test]
    fn prop_chunked_encoding_decodes(
        body in prop::collection::vec(any::<u8>(), 0..600),
        chunk in 1usize..128,
    ) {
        let mut encoded = Vec::new();
        for piece in body.chunks(chunk) {
            let mut buf = vec![0u8; CHUNK_HEADER_LEN + piece.len() + CHUNK_FOOTER_LEN];
            buf[CHUNK_HEADER_LEN..CHUNK_HEADER_LEN + piece.len()].copy_from_slice(piece);
            let framed = frame_chunk(&mut buf, piece.len());
            encoded.extend_from_slice(&buf[..framed]);
        }
        encoded.extend_from_slice(LAST_CHUNK);

        prop_assert!(encoded.ends_with(b"0\r\n\r\n"));
        prop_assert_eq!(decode_chunked(&encoded), body);
    }

    #[test]
    fn prop_mask_twice_is_identity(
        payload in prop::collection::vec(any::<u8>(), 0..300),
        key in any::<[u8; 4]>(),
    ) {
        let mut masked = payload.clone();
        apply_mask(&mut masked, key);
        apply_mask(&mut masked, key);
        prop_assert_eq!(masked, payload);
    }
}
