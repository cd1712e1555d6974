//! HTTP/2 framing (RFC 7540 §4): the 9-byte frame header plus the payload
//! shapes the multiplexer needs to move requests and responses.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Error;

pub(crate) const FRAME_HEADER_LEN: usize = 9;
pub(crate) const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

pub(crate) const FLAG_END_STREAM: u8 = 0x1;
pub(crate) const FLAG_ACK: u8 = 0x1;
pub(crate) const FLAG_END_HEADERS: u8 = 0x4;
pub(crate) const FLAG_PADDED: u8 = 0x8;
pub(crate) const FLAG_PRIORITY: u8 = 0x20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameType {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

impl FrameType {
    fn from_byte(b: u8) -> FrameType {
        match b {
            0x0 => FrameType::Data,
            0x1 => FrameType::Headers,
            0x2 => FrameType::Priority,
            0x3 => FrameType::RstStream,
            0x4 => FrameType::Settings,
            0x5 => FrameType::PushPromise,
            0x6 => FrameType::Ping,
            0x7 => FrameType::GoAway,
            0x8 => FrameType::WindowUpdate,
            0x9 => FrameType::Continuation,
            other => FrameType::Unknown(other),
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            FrameType::Data => 0x0,
            FrameType::Headers => 0x1,
            FrameType::Priority => 0x2,
            FrameType::RstStream => 0x3,
            FrameType::Settings => 0x4,
            FrameType::PushPromise => 0x5,
            FrameType::Ping => 0x6,
            FrameType::GoAway => 0x7,
            FrameType::WindowUpdate => 0x8,
            FrameType::Continuation => 0x9,
            FrameType::Unknown(b) => b,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameHeader {
    pub(crate) length: u32,
    pub(crate) frame_type: FrameType,
    pub(crate) flags: u8,
    pub(crate) stream_id: u32,
}

impl FrameHeader {
    pub(crate) fn parse(buf: &[u8]) -> FrameHeader {
        debug_assert!(buf.len() >= FRAME_HEADER_LEN);
        let length = (u32::from(buf[0]) << 16) | (u32::from(buf[1]) << 8) | u32::from(buf[2]);
        let frame_type = FrameType::from_byte(buf[3]);
        let flags = buf[4];
        let stream_id = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) & 0x7fff_ffff;
        FrameHeader { length, frame_type, flags, stream_id }
    }

    fn write(&self, out: &mut BytesMut) {
        out.put_u8((self.length >> 16) as u8);
        out.put_u8((self.length >> 8) as u8);
        out.put_u8(self.length as u8);
        out.put_u8(self.frame_type.to_byte());
        out.put_u8(self.flags);
        out.put_u32(self.stream_id & 0x7fff_ffff);
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Frame {
    Data { stream_id: u32, end_stream: bool, data: Bytes },
    Headers { stream_id: u32, end_stream: bool, end_headers: bool, header_block: Bytes },
    Priority { stream_id: u32 },
    RstStream { stream_id: u32, error_code: u32 },
    Settings { params: Vec<(u16, u32)>, ack: bool },
    Ping { opaque: [u8; 8], ack: bool },
    GoAway { last_stream_id: u32, error_code: u32, debug_data: Bytes },
    WindowUpdate { stream_id: u32, increment: u32 },
    Continuation { stream_id: u32, end_headers: bool, header_block: Bytes },
    Unknown,
}

impl Frame {
    pub(crate) fn decode(header: FrameHeader, mut payload: Bytes) -> Result<Frame, Error> {
        match header.frame_type {
            FrameType::Data => {
                let data = strip_padding(&mut payload, header.flags)?;
                Ok(Frame::Data { stream_id: header.stream_id, end_stream: header.flags & FLAG_END_STREAM != 0, data })
            }
            FrameType::Headers => {
                let mut data = strip_padding(&mut payload, header.flags)?;
                if header.flags & FLAG_PRIORITY != 0 {
                    if data.len() < 5 {
                        return Err(Error::protocol("truncated HEADERS priority prefix"));
                    }
                    data.advance(5);
                }
                Ok(Frame::Headers {
                    stream_id: header.stream_id,
                    end_stream: header.flags & FLAG_END_STREAM != 0,
                    end_headers: header.flags & FLAG_END_HEADERS != 0,
                    header_block: data,
                })
            }
            FrameType::Priority => Ok(Frame::Priority { stream_id: header.stream_id }),
            FrameType::RstStream => {
                if payload.len() < 4 {
                    return Err(Error::protocol("truncated RST_STREAM"));
                }
                Ok(Frame::RstStream { stream_id: header.stream_id, error_code: payload.get_u32() })
            }
            FrameType::Settings => {
                if header.flags & FLAG_ACK != 0 {
                    return Ok(Frame::Settings { params: Vec::new(), ack: true });
                }
                if payload.len() % 6 != 0 {
                    return Err(Error::protocol("SETTINGS payload not a multiple of 6"));
                }
                let mut params = Vec::with_capacity(payload.len() / 6);
                while payload.has_remaining() {
                    let id = payload.get_u16();
                    let value = payload.get_u32();
                    params.push((id, value));
                }
                Ok(Frame::Settings { params, ack: false })
            }
            FrameType::Ping => {
                if payload.len() != 8 {
                    return Err(Error::protocol("PING payload must be 8 bytes"));
                }
                let mut opaque = [0u8; 8];
                opaque.copy_from_slice(&payload[..8]);
                Ok(Frame::Ping { opaque, ack: header.flags & FLAG_ACK != 0 })
            }
            FrameType::GoAway => {
                if payload.len() < 8 {
                    return Err(Error::protocol("truncated GOAWAY"));
                }
                let last_stream_id = payload.get_u32() & 0x7fff_ffff;
                let error_code = payload.get_u32();
                Ok(Frame::GoAway { last_stream_id, error_code, debug_data: payload })
            }
            FrameType::WindowUpdate => {
                if payload.len() != 4 {
                    return Err(Error::protocol("truncated WINDOW_UPDATE"));
                }
                let increment = payload.get_u32() & 0x7fff_ffff;
                Ok(Frame::WindowUpdate { stream_id: header.stream_id, increment })
            }
            FrameType::Continuation => Ok(Frame::Continuation {
                stream_id: header.stream_id,
                end_headers: header.flags & FLAG_END_HEADERS != 0,
                header_block: payload,
            }),
            FrameType::PushPromise | FrameType::Unknown(_) => Ok(Frame::Unknown),
        }
    }

    pub(crate) fn encode(&self, max_frame_size: u32) -> BytesMut {
        let mut out = BytesMut::new();
        match self {
            Frame::Data { stream_id, end_stream, data } => {
                debug_assert!(data.len() as u32 <= max_frame_size);
                FrameHeader {
                    length: data.len() as u32,
                    frame_type: FrameType::Data,
                    flags: if *end_stream { FLAG_END_STREAM } else { 0 },
                    stream_id: *stream_id,
                }
                .write(&mut out);
                out.extend_from_slice(data);
            }
            Frame::Headers { stream_id, end_stream, end_headers, header_block } => {
                let mut flags = 0;
                if *end_stream {
                    flags |= FLAG_END_STREAM;
                }
                if *end_headers {
                    flags |= FLAG_END_HEADERS;
                }
                FrameHeader { length: header_block.len() as u32, frame_type: FrameType::Headers, flags, stream_id: *stream_id }
                    .write(&mut out);
                out.extend_from_slice(header_block);
            }
            Frame::RstStream { stream_id, error_code } => {
                FrameHeader { length: 4, frame_type: FrameType::RstStream, flags: 0, stream_id: *stream_id }.write(&mut out);
                out.put_u32(*error_code);
            }
            Frame::Settings { params, ack } => {
                let flags = if *ack { FLAG_ACK } else { 0 };
                let length = if *ack { 0 } else { (params.len() * 6) as u32 };
                FrameHeader { length, frame_type: FrameType::Settings, flags, stream_id: 0 }.write(&mut out);
                if !*ack {
                    for (id, value) in params {
                        out.put_u16(*id);
                        out.put_u32(*value);
                    }
                }
            }
            Frame::Ping { opaque, ack } => {
                FrameHeader { length: 8, frame_type: FrameType::Ping, flags: if *ack { FLAG_ACK } else { 0 }, stream_id: 0 }
                    .write(&mut out);
                out.extend_from_slice(opaque);
            }
            Frame::GoAway { last_stream_id, error_code, debug_data } => {
                FrameHeader {
                    length: 8 + debug_data.len() as u32,
                    frame_type: FrameType::GoAway,
                    flags: 0,
                    stream_id: 0,
                }
                .write(&mut out);
                out.put_u32(*last_stream_id & 0x7fff_ffff);
                out.put_u32(*error_code);
                out.extend_from_slice(debug_data);
            }
            Frame::WindowUpdate { stream_id, increment } => {
                FrameHeader { length: 4, frame_type: FrameType::WindowUpdate, flags: 0, stream_id: *stream_id }.write(&mut out);
                out.put_u32(*increment & 0x7fff_ffff);
            }
            Frame::Continuation { stream_id, end_headers, header_block } => {
                FrameHeader {
                    length: header_block.len() as u32,
                    frame_type: FrameType::Continuation,
                    flags: if *end_headers { FLAG_END_HEADERS } else { 0 },
                    stream_id: *stream_id,
                }
                .write(&mut out);
                out.extend_from_slice(header_block);
            }
            Frame::Priority { stream_id } => {
                FrameHeader { length: 0, frame_type: FrameType::Priority, flags: 0, stream_id: *stream_id }.write(&mut out);
            }
            Frame::Unknown => {}
        }
        out
    }
}

fn strip_padding(payload: &mut Bytes, flags: u8) -> Result<Bytes, Error> {
    if flags & FLAG_PADDED == 0 {
        return Ok(payload.split_off(0));
    }
    if payload.is_empty() {
        return Err(Error::protocol("PADDED flag set with empty payload"));
    }
    let pad_len = payload.get_u8() as usize;
    if pad_len > payload.len() {
        return Err(Error::protocol("padding length exceeds payload"));
    }
    let content_len = payload.len() - pad_len;
    Ok(payload.split_to(content_len))
}

pub(crate) const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(frame: Frame) -> Frame {
        let encoded = frame.encode(DEFAULT_MAX_FRAME_SIZE).freeze();
        let header = FrameHeader::parse(&encoded[..FRAME_HEADER_LEN]);
        Frame::decode(header, encoded.slice(FRAME_HEADER_LEN..)).unwrap()
    }

    #[test]
    fn data_frame_round_trips() {
        let frame = Frame::Data { stream_id: 3, end_stream: true, data: Bytes::from_static(b"hello") };
        match round_trip(frame) {
            Frame::Data { stream_id, end_stream, data } => {
                assert_eq!(stream_id, 3);
                assert!(end_stream);
                assert_eq!(data, Bytes::from_static(b"hello"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn settings_ack_has_no_payload() {
        let frame = Frame::Settings { params: Vec::new(), ack: true };
        match round_trip(frame) {
            Frame::Settings { params, ack } => {
                assert!(ack);
                assert!(params.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn settings_params_round_trip() {
        let frame = Frame::Settings { params: vec![(0x3, 100), (0x4, 65535)], ack: false };
        match round_trip(frame) {
            Frame::Settings { params, ack } => {
                assert!(!ack);
                assert_eq!(params, vec![(0x3, 100), (0x4, 65535)]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn window_update_masks_reserved_bit() {
        let frame = Frame::WindowUpdate { stream_id: 1, increment: 1000 };
        match round_trip(frame) {
            Frame::WindowUpdate { stream_id, increment } => {
                assert_eq!(stream_id, 1);
                assert_eq!(increment, 1000);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ping_round_trips_opaque_data() {
        let frame = Frame::Ping { opaque: [1, 2, 3, 4, 5, 6, 7, 8], ack: false };
        match round_trip(frame) {
            Frame::Ping { opaque, ack } => {
                assert!(!ack);
                assert_eq!(opaque, [1, 2, 3, 4, 5, 6, 7, 8]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn go_away_round_trips() {
        let frame = Frame::GoAway { last_stream_id: 7, error_code: 0, debug_data: Bytes::from_static(b"bye") };
        match round_trip(frame) {
            Frame::GoAway { last_stream_id, error_code, debug_data } => {
                assert_eq!(last_stream_id, 7);
                assert_eq!(error_code, 0);
                assert_eq!(debug_data, Bytes::from_static(b"bye"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn headers_with_priority_prefix_strips_it() {
        let mut payload = BytesMut::new();
        payload.put_u8(0); // PADDED: pad length
        payload.put_u32(0); // stream dependency
        payload.put_u8(0); // weight
        payload.extend_from_slice(b"header-block");
        let header = FrameHeader {
            length: payload.len() as u32,
            frame_type: FrameType::Headers,
            flags: FLAG_PADDED | FLAG_PRIORITY | FLAG_END_HEADERS,
            stream_id: 1,
        };
        match Frame::decode(header, payload.freeze()).unwrap() {
            Frame::Headers { header_block, end_headers, .. } => {
                assert!(end_headers);
                assert_eq!(&header_block[..], b"header-block");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
