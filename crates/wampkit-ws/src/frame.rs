//! RFC 6455 framing on top of `tungstenite`'s frame types
//!
//! Frames from clients must be masked. Frames written by the server are never
//! masked. Data messages may be fragmented; [`MessageBuffer`] reassembles
//! them and hands control frames out as they arrive, even between fragments.

use bytes::{Buf, Bytes, BytesMut};
use std::io::Cursor;
use tungstenite::protocol::frame::coding::{CloseCode, Data, OpCode};
use tungstenite::protocol::frame::{CloseFrame, Frame, FrameHeader};
use wampkit_core::{Error, Result};

/// Default limit for a reassembled message
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

const MAX_CONTROL_PAYLOAD: u64 = 125;

/// Serialize a server frame
pub fn encode(frame: Frame) -> Bytes {
    let mut out = Vec::with_capacity(frame.len());
    // Formatting into a Vec only fails on allocation failure.
    if let Err(err) = frame.format(&mut out) {
        tracing::error!(error = %err, "Failed to format WebSocket frame");
    }
    Bytes::from(out)
}

/// A final text frame
pub fn text_frame(payload: &[u8]) -> Frame {
    Frame::message(payload.to_vec(), OpCode::Data(Data::Text), true)
}

/// A close frame carrying `code` and no reason
pub fn close_frame(code: CloseCode) -> Frame {
    Frame::close(Some(CloseFrame {
        code,
        reason: "".into(),
    }))
}

/// The status code of a close frame, if it carries one
pub fn close_code(frame: &Frame) -> Option<CloseCode> {
    match frame.payload().as_slice() {
        [high, low, ..] => Some(CloseCode::from(u16::from_be_bytes([*high, *low]))),
        _ => None,
    }
}

/// Decode one masked client frame from the front of `buf`
///
/// Returns `Ok(None)` when `buf` does not hold a whole frame yet; nothing
/// is consumed in that case. The returned frame is unmasked.
pub fn decode_frame(buf: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    let mut cursor = Cursor::new(&buf[..]);
    let Some((mut header, length)) = FrameHeader::parse(&mut cursor)
        .map_err(|err| Error::invalid_frame(err.to_string()))?
    else {
        return Ok(None);
    };
    let header_len = cursor.position() as usize;

    if header.rsv1 || header.rsv2 || header.rsv3 {
        return Err(Error::invalid_frame("reserved bits must be zero"));
    }
    let Some(mask) = header.mask.take() else {
        return Err(Error::invalid_frame("client frames must be masked"));
    };
    if matches!(header.opcode, OpCode::Control(_))
        && (!header.is_final || length > MAX_CONTROL_PAYLOAD)
    {
        return Err(Error::invalid_frame(
            "control frames must be final and at most 125 bytes",
        ));
    }
    if length > max_payload as u64 {
        return Err(Error::invalid_frame(format!(
            "payload of {length} bytes exceeds the limit of {max_payload}"
        )));
    }

    let length = length as usize;
    if buf.len() < header_len + length {
        return Ok(None);
    }

    buf.advance(header_len);
    let mut payload = buf.split_to(length).to_vec();
    for (index, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[index % 4];
    }

    Ok(Some(Frame::from_payload(header, payload)))
}

/// A complete data message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    pub opcode: Data,
    pub payload: Bytes,
}

/// Something produced by the [`MessageBuffer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A reassembled text or binary message
    Message(DataMessage),
    /// A ping, pong or close frame
    Control(Frame),
}

/// Reassembles client frames into messages
#[derive(Debug)]
pub struct MessageBuffer {
    buffer: BytesMut,
    partial: Option<(Data, BytesMut)>,
    max_message_size: usize,
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl MessageBuffer {
    /// Create a buffer accepting messages up to `max_message_size` bytes
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            partial: None,
            max_message_size,
        }
    }

    /// Feed received bytes, returning everything they completed
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Incoming>> {
        self.buffer.extend_from_slice(data);

        let mut incoming = Vec::new();
        while let Some(frame) = decode_frame(&mut self.buffer, self.max_message_size)? {
            if let OpCode::Control(_) = frame.header().opcode {
                incoming.push(Incoming::Control(frame));
                continue;
            }
            if let Some(message) = self.push_data(frame)? {
                incoming.push(Incoming::Message(message));
            }
        }
        Ok(incoming)
    }

    fn push_data(&mut self, frame: Frame) -> Result<Option<DataMessage>> {
        let is_final = frame.header().is_final;
        let (opcode, payload) = match (frame.header().opcode, self.partial.take()) {
            (OpCode::Data(Data::Continue), Some((opcode, mut payload))) => {
                payload.extend_from_slice(frame.payload());
                (opcode, payload)
            }
            (OpCode::Data(Data::Continue), None) => {
                return Err(Error::invalid_frame("continuation without a started message"))
            }
            (_, Some(_)) => {
                return Err(Error::invalid_frame(
                    "new message started before the previous one finished",
                ))
            }
            (OpCode::Data(opcode), None) => (opcode, BytesMut::from(frame.payload().as_slice())),
            (OpCode::Control(_), None) => {
                return Err(Error::invalid_frame("control frame in the data path"))
            }
        };

        if payload.len() > self.max_message_size {
            return Err(Error::invalid_frame(format!(
                "message exceeds the limit of {} bytes",
                self.max_message_size
            )));
        }

        if !is_final {
            self.partial = Some((opcode, payload));
            return Ok(None);
        }

        if opcode == Data::Text && std::str::from_utf8(&payload).is_err() {
            return Err(Error::invalid_frame("text message is not valid UTF-8"));
        }

        Ok(Some(DataMessage {
            opcode,
            payload: payload.freeze(),
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;
    use tungstenite::protocol::frame::coding::Control;

    /// Encode a frame the way a client would
    pub(crate) fn client_frame(fin: bool, opcode: OpCode, payload: &[u8]) -> Vec<u8> {
        let header = FrameHeader {
            is_final: fin,
            opcode,
            mask: Some([0x37, 0xfa, 0x21, 0x3d]),
            ..FrameHeader::default()
        };
        let mut out = Vec::new();
        Frame::from_payload(header, payload.to_vec())
            .format(&mut out)
            .unwrap();
        out
    }

    pub(crate) const TEXT: OpCode = OpCode::Data(Data::Text);
    pub(crate) const BINARY: OpCode = OpCode::Data(Data::Binary);
    pub(crate) const CONTINUE: OpCode = OpCode::Data(Data::Continue);
    pub(crate) const PING: OpCode = OpCode::Control(Control::Ping);
    pub(crate) const PONG: OpCode = OpCode::Control(Control::Pong);
    pub(crate) const CLOSE: OpCode = OpCode::Control(Control::Close);

    #[test]
    fn decodes_masked_hello() {
        // RFC 6455 section 5.7
        let mut buf = BytesMut::from(
            &[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58][..],
        );
        let frame = decode_frame(&mut buf, 1024).unwrap().unwrap();
        assert!(frame.header().is_final);
        assert_eq!(frame.header().opcode, TEXT);
        assert_eq!(frame.header().mask, None);
        assert_eq!(frame.payload().as_slice(), b"Hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_consumes_nothing() {
        let data = client_frame(true, TEXT, b"Hello");
        let mut buf = BytesMut::from(&data[..data.len() - 1]);
        assert_eq!(decode_frame(&mut buf, 1024).unwrap(), None);
        assert_eq!(buf.len(), data.len() - 1);
    }

    #[test]
    fn encodes_unmasked_hello() {
        let encoded = encode(text_frame(b"Hello"));
        assert_eq!(&encoded[..], &[0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f]);
    }

    #[test]
    fn encodes_extended_lengths() {
        let medium = encode(text_frame(&[b'a'; 300]));
        assert_eq!(&medium[..4], &[0x81, 126, 0x01, 0x2c]);

        let large = encode(text_frame(&vec![b'a'; 70_000]));
        assert_eq!(large[1], 127);
        assert_eq!(&large[2..10], &70_000u64.to_be_bytes());
    }

    #[test]
    fn unmasked_client_frames_are_rejected() {
        let mut buf = BytesMut::from(&[0x81, 0x05, b'H', b'e', b'l', b'l', b'o'][..]);
        assert!(matches!(
            decode_frame(&mut buf, 1024),
            Err(Error::InvalidFrame(_))
        ));
    }

    #[test]
    fn reserved_opcode_is_rejected() {
        let mut buf = BytesMut::from(&[0x83, 0x80, 0, 0, 0, 0][..]);
        assert!(matches!(
            decode_frame(&mut buf, 1024),
            Err(Error::InvalidFrame(_))
        ));
    }

    #[test]
    fn fragmented_message_is_reassembled_around_control_frames() {
        let mut buffer = MessageBuffer::default();
        let mut data = client_frame(false, TEXT, b"Hel");
        data.extend(client_frame(true, PING, b"p"));
        data.extend(client_frame(true, CONTINUE, b"lo"));

        let incoming = buffer.feed(&data).unwrap();
        assert_eq!(incoming.len(), 2);
        match &incoming[0] {
            Incoming::Control(frame) => {
                assert_eq!(frame.header().opcode, PING);
                assert_eq!(frame.payload().as_slice(), b"p");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            incoming[1],
            Incoming::Message(DataMessage {
                opcode: Data::Text,
                payload: Bytes::from_static(b"Hello"),
            })
        );
    }

    #[test]
    fn close_code_is_read_back() {
        let mut buffer = MessageBuffer::default();
        let incoming = buffer
            .feed(&client_frame(true, CLOSE, &1001u16.to_be_bytes()))
            .unwrap();
        match &incoming[..] {
            [Incoming::Control(frame)] => assert_eq!(close_code(frame), Some(CloseCode::Away)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn close_frame_encodes_code() {
        let encoded = encode(close_frame(CloseCode::Normal));
        assert_eq!(&encoded[..], &[0x88, 0x02, 0x03, 0xe8]);
    }

    #[test]
    fn stray_continuation_is_rejected() {
        let mut buffer = MessageBuffer::default();
        let data = client_frame(true, CONTINUE, b"x");
        assert!(buffer.feed(&data).is_err());
    }

    #[test]
    fn invalid_utf8_text_is_rejected() {
        let mut buffer = MessageBuffer::default();
        let data = client_frame(true, TEXT, &[0xff, 0xfe]);
        assert!(matches!(buffer.feed(&data), Err(Error::InvalidFrame(_))));
    }

    #[test]
    fn oversized_message_is_rejected() {
        let mut buffer = MessageBuffer::new(4);
        let data = client_frame(true, BINARY, b"too long");
        assert!(buffer.feed(&data).is_err());
    }

    proptest! {
        #[test]
        fn any_byte_split_yields_the_same_message(
            payload in proptest::collection::vec(any::<u8>(), 0..400),
            split in 0usize..420,
        ) {
            let data = client_frame(true, BINARY, &payload);
            let split = split.min(data.len());
            let mut buffer = MessageBuffer::default();

            let mut incoming = buffer.feed(&data[..split]).unwrap();
            incoming.extend(buffer.feed(&data[split..]).unwrap());

            prop_assert_eq!(
                incoming,
                vec![Incoming::Message(DataMessage {
                    opcode: Data::Binary,
                    payload: Bytes::from(payload),
                })]
            );
        }
    }
}
