//! Incremental frame reader.
//!
//! Frames are parsed straight out of the connection's [`ReadBuffer`]. A frame
//! goes through three steps:
//!
//! ```text
//! awaiting length prefix -> awaiting full frame -> dispatch
//! ```
//!
//! The header is validated as soon as it is complete, so an oversized or
//! malformed frame is refused before its payload is buffered. Unfragmented
//! messages are handed out in place; fragments are collected in a side buffer
//! until the final continuation frame arrives.

use bytes::BytesMut;

use crate::buffer::ReadBuffer;
use crate::config::WebSocketConfig;
use crate::ws::frame::{
    CloseReason, FrameHeader, HeaderStatus, MAX_CONTROL_PAYLOAD, MessageKind, Opcode, apply_mask,
};

/// A complete frame or message, ready for the handler.
#[derive(Debug, PartialEq, Eq)]
pub enum Incoming<'a> {
    Message(MessageKind, &'a [u8]),
    Ping(&'a [u8]),
    Pong,
    /// A fragment was stored; the message is not complete yet.
    Fragment,
    /// The peer closed the connection with this status.
    Close(CloseReason),
}

pub struct FrameReader {
    max_frame_size: u64,
    max_fragmented_size: usize,
    allow_unmasked: bool,

    /// Type of the message being reassembled, if any.
    fragmented: Option<MessageKind>,
    fragments: BytesMut,
    /// Set once a reassembled message has been handed out.
    fragments_done: bool,
    /// Length of the frame handed out by the last `dispatch`.
    frame_len: usize,
}

impl FrameReader {
    pub fn new(config: &WebSocketConfig) -> Self {
        Self {
            max_frame_size: config.max_frame_size,
            max_fragmented_size: config.max_fragmented_size,
            allow_unmasked: config.allow_unmasked,
            fragmented: None,
            fragments: BytesMut::new(),
            fragments_done: false,
            frame_len: 0,
        }
    }

    /// True while a fragmented message is open.
    pub fn in_message(&self) -> bool {
        self.fragmented.is_some()
    }

    /// Looks for a complete frame at the start of the available data.
    ///
    /// Returns `Ok(None)` when more bytes are needed; the buffer has then been
    /// prepared to receive them. A protocol violation is reported as the close
    /// reason to send.
    pub fn poll_frame<const N: usize>(
        &mut self,
        buf: &mut ReadBuffer<N>,
    ) -> Result<Option<FrameHeader>, CloseReason> {
        let header = match FrameHeader::parse(buf.available_data()) {
            HeaderStatus::Complete(header) => header,
            HeaderStatus::Incomplete(need) => {
                buf.request_data(need);
                return Ok(None);
            }
        };

        self.validate(&header)?;

        let frame_len = header.frame_len().ok_or(CloseReason::MessageTooBig)?;
        if !buf.request_data(frame_len) {
            return Ok(None);
        }
        Ok(Some(header))
    }

    fn validate(&self, header: &FrameHeader) -> Result<(), CloseReason> {
        if header.rsv != 0 {
            return Err(CloseReason::ProtocolError);
        }
        if header.mask.is_none() && !self.allow_unmasked {
            return Err(CloseReason::ProtocolError);
        }
        let opcode = Opcode::from_u8(header.opcode).ok_or(CloseReason::ProtocolError)?;

        if opcode.is_control() {
            if !header.fin || header.payload_len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(CloseReason::ProtocolError);
            }
            return Ok(());
        }

        if header.payload_len > self.max_frame_size {
            return Err(CloseReason::MessageTooBig);
        }
        match (opcode, self.fragmented) {
            (Opcode::Continuation, None) => return Err(CloseReason::ProtocolError),
            (Opcode::Text | Opcode::Binary, Some(_)) => return Err(CloseReason::ProtocolError),
            _ => {}
        }

        let joins_fragments = opcode == Opcode::Continuation || !header.fin;
        if joins_fragments {
            let total = (self.fragments.len() as u64).saturating_add(header.payload_len);
            if total > self.max_fragmented_size as u64 {
                return Err(CloseReason::MessageTooBig);
            }
        }
        Ok(())
    }

    /// Unmasks the frame returned by [`FrameReader::poll_frame`] and turns it
    /// into the event to deliver. [`FrameReader::finish`] must be called once
    /// the event has been handled.
    pub fn dispatch<'a, const N: usize>(
        &'a mut self,
        header: FrameHeader,
        buf: &'a mut ReadBuffer<N>,
    ) -> Result<Incoming<'a>, CloseReason> {
        let payload_len = header.payload_len as usize;
        self.frame_len = header.header_len + payload_len;

        let payload = &mut buf.available_data_mut()[header.header_len..self.frame_len];
        if let Some(key) = header.mask {
            apply_mask(payload, key);
        }
        let payload = &*payload;

        let opcode = Opcode::from_u8(header.opcode).ok_or(CloseReason::ProtocolError)?;
        match opcode {
            Opcode::Ping => Ok(Incoming::Ping(payload)),
            Opcode::Pong => Ok(Incoming::Pong),
            Opcode::Close => parse_close(payload).map(Incoming::Close),
            Opcode::Text | Opcode::Binary => {
                let kind = if opcode == Opcode::Text {
                    MessageKind::Text
                } else {
                    MessageKind::Binary
                };
                if header.fin {
                    check_message(kind, payload)?;
                    Ok(Incoming::Message(kind, payload))
                } else {
                    self.fragmented = Some(kind);
                    self.fragments.clear();
                    self.fragments.extend_from_slice(payload);
                    Ok(Incoming::Fragment)
                }
            }
            Opcode::Continuation => {
                let kind = self.fragmented.ok_or(CloseReason::ProtocolError)?;
                self.fragments.extend_from_slice(payload);
                if !header.fin {
                    return Ok(Incoming::Fragment);
                }
                self.fragments_done = true;
                check_message(kind, &self.fragments)?;
                Ok(Incoming::Message(kind, &self.fragments))
            }
        }
    }

    /// Drops the dispatched frame from the buffer.
    pub fn finish<const N: usize>(&mut self, buf: &mut ReadBuffer<N>) {
        buf.consume(std::mem::take(&mut self.frame_len), false);
        if buf.available_len() == 0 {
            buf.reset();
        }
        if std::mem::take(&mut self.fragments_done) {
            self.fragmented = None;
            self.fragments.clear();
        }
    }
}

fn check_message(kind: MessageKind, payload: &[u8]) -> Result<(), CloseReason> {
    if kind == MessageKind::Text && std::str::from_utf8(payload).is_err() {
        return Err(CloseReason::InvalidData);
    }
    Ok(())
}

fn parse_close(payload: &[u8]) -> Result<CloseReason, CloseReason> {
    match payload {
        [] => Ok(CloseReason::NoStatus),
        [_] => Err(CloseReason::ProtocolError),
        [hi, lo, text @ ..] => {
            let code = u16::from_be_bytes([*hi, *lo]);
            if !CloseReason::is_valid_peer_code(code) {
                return Err(CloseReason::ProtocolError);
            }
            if std::str::from_utf8(text).is_err() {
                return Err(CloseReason::InvalidData);
            }
            Ok(CloseReason::from_code(code))
        }
    }
}
