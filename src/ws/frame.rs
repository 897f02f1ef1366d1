//! WebSocket frame format (RFC 6455, section 5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               | Masking-key, if MASK set to 1 |
//! +-------------------------------+-------------------------------+
//! ```

/// Largest payload of a control frame.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Longest possible frame header.
pub const MAX_HEADER_LEN: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// Type of a data message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
}

impl MessageKind {
    pub fn opcode(self) -> Opcode {
        match self {
            MessageKind::Text => Opcode::Text,
            MessageKind::Binary => Opcode::Binary,
        }
    }
}

/// Status code of a close frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// 1000
    Normal,
    /// 1001
    GoingAway,
    /// 1002
    ProtocolError,
    /// 1003
    UnsupportedData,
    /// 1005, reported when a close frame carries no code. Never sent.
    NoStatus,
    /// 1006, reported when the connection drops without a close frame. Never
    /// sent.
    Abnormal,
    /// 1007
    InvalidData,
    /// 1008
    PolicyViolation,
    /// 1009
    MessageTooBig,
    /// 1010
    MissingExtension,
    /// 1011
    InternalError,
    Other(u16),
}

impl CloseReason {
    pub fn code(self) -> u16 {
        match self {
            CloseReason::Normal => 1000,
            CloseReason::GoingAway => 1001,
            CloseReason::ProtocolError => 1002,
            CloseReason::UnsupportedData => 1003,
            CloseReason::NoStatus => 1005,
            CloseReason::Abnormal => 1006,
            CloseReason::InvalidData => 1007,
            CloseReason::PolicyViolation => 1008,
            CloseReason::MessageTooBig => 1009,
            CloseReason::MissingExtension => 1010,
            CloseReason::InternalError => 1011,
            CloseReason::Other(code) => code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            1000 => CloseReason::Normal,
            1001 => CloseReason::GoingAway,
            1002 => CloseReason::ProtocolError,
            1003 => CloseReason::UnsupportedData,
            1005 => CloseReason::NoStatus,
            1006 => CloseReason::Abnormal,
            1007 => CloseReason::InvalidData,
            1008 => CloseReason::PolicyViolation,
            1009 => CloseReason::MessageTooBig,
            1010 => CloseReason::MissingExtension,
            1011 => CloseReason::InternalError,
            other => CloseReason::Other(other),
        }
    }

    /// True for the codes that only exist locally and must not appear in a
    /// close frame.
    pub fn is_local_only(self) -> bool {
        matches!(self, CloseReason::NoStatus | CloseReason::Abnormal)
    }

    /// True if a peer may send `code` in a close frame: the defined codes
    /// other than 1004-1006 and 1015, plus the registered and private ranges.
    pub fn is_valid_peer_code(code: u16) -> bool {
        matches!(code, 1000..=1003 | 1007..=1014 | 3000..=4999)
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    /// RSV1-3 bits.
    pub rsv: u8,
    /// Raw opcode; unknown values are rejected by the frame reader.
    pub opcode: u8,
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
    pub header_len: usize,
}

/// Result of looking at the start of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderStatus {
    Complete(FrameHeader),
    /// The header needs this many bytes in total.
    Incomplete(usize),
}

impl FrameHeader {
    pub fn parse(bytes: &[u8]) -> HeaderStatus {
        if bytes.len() < 2 {
            return HeaderStatus::Incomplete(2);
        }

        let masked = bytes[1] & 0x80 != 0;
        let short_len = bytes[1] & 0x7F;
        let ext_len = match short_len {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        let header_len = 2 + ext_len + if masked { 4 } else { 0 };
        if bytes.len() < header_len {
            return HeaderStatus::Incomplete(header_len);
        }

        let payload_len = match ext_len {
            2 => u64::from(u16::from_be_bytes([bytes[2], bytes[3]])),
            8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes[2..10]);
                u64::from_be_bytes(raw)
            }
            _ => u64::from(short_len),
        };
        let mask = masked.then(|| {
            let at = 2 + ext_len;
            [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]
        });

        HeaderStatus::Complete(FrameHeader {
            fin: bytes[0] & 0x80 != 0,
            rsv: (bytes[0] >> 4) & 0x07,
            opcode: bytes[0] & 0x0F,
            mask,
            payload_len,
            header_len,
        })
    }

    /// Header plus payload length, if it fits in memory.
    pub fn frame_len(&self) -> Option<usize> {
        usize::try_from(self.payload_len)
            .ok()
            .and_then(|len| len.checked_add(self.header_len))
    }
}

/// Header length of an unmasked server frame with the given payload length.
pub fn header_len(payload_len: usize) -> usize {
    if payload_len < 126 {
        2
    } else if payload_len <= usize::from(u16::MAX) {
        4
    } else {
        10
    }
}

/// Writes an unmasked, final frame header into `buf`, which must hold at
/// least [`header_len`] bytes. Returns the header length.
pub fn write_header(buf: &mut [u8], opcode: Opcode, payload_len: usize) -> usize {
    buf[0] = 0x80 | opcode.as_u8();
    if payload_len < 126 {
        buf[1] = payload_len as u8;
        2
    } else if payload_len <= usize::from(u16::MAX) {
        buf[1] = 126;
        buf[2..4].copy_from_slice(&(payload_len as u16).to_be_bytes());
        4
    } else {
        buf[1] = 127;
        buf[2..10].copy_from_slice(&(payload_len as u64).to_be_bytes());
        10
    }
}

/// XORs `payload` with the mask key. Applying it twice restores the input.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_masked_short_frame() {
        // Masked "Hello" from RFC 6455, section 5.7.
        let frame = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
        let HeaderStatus::Complete(header) = FrameHeader::parse(&frame) else {
            panic!("header should be complete");
        };
        assert!(header.fin);
        assert_eq!(header.opcode, 0x1);
        assert_eq!(header.payload_len, 5);
        assert_eq!(header.header_len, 6);

        let mut payload = frame[6..].to_vec();
        apply_mask(&mut payload, header.mask.unwrap());
        assert_eq!(payload, b"Hello");
    }

    #[test]
    fn parse_reports_missing_header_bytes() {
        assert_eq!(FrameHeader::parse(&[0x82]), HeaderStatus::Incomplete(2));
        assert_eq!(FrameHeader::parse(&[0x82, 0xFE, 0x01]), HeaderStatus::Incomplete(8));
        assert_eq!(FrameHeader::parse(&[0x82, 0x7F]), HeaderStatus::Incomplete(10));
    }

    #[test]
    fn extended_lengths_round_trip() {
        for len in [0usize, 125, 126, 65535, 65536] {
            let mut buf = [0u8; MAX_HEADER_LEN];
            let written = write_header(&mut buf, Opcode::Binary, len);
            assert_eq!(written, header_len(len));

            let HeaderStatus::Complete(header) = FrameHeader::parse(&buf[..written]) else {
                panic!("header should be complete");
            };
            assert_eq!(header.payload_len, len as u64);
            assert_eq!(header.mask, None);
        }
    }

    #[test]
    fn close_codes() {
        assert_eq!(CloseReason::from_code(1009), CloseReason::MessageTooBig);
        assert_eq!(CloseReason::from_code(4000).code(), 4000);
        assert!(CloseReason::NoStatus.is_local_only());
    }

    #[test]
    fn peer_close_codes() {
        for code in [1000, 1003, 1007, 1011, 1014, 3000, 4999] {
            assert!(CloseReason::is_valid_peer_code(code), "{code}");
        }
        for code in [0, 999, 1004, 1005, 1006, 1015, 1016, 2000, 2999, 5000, u16::MAX] {
            assert!(!CloseReason::is_valid_peer_code(code), "{code}");
        }
    }
}
