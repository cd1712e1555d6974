//! Reassembles raw frames off the wire into whole messages (§4.5 reader
//! invariants): mask-direction enforcement, fragmentation/continuation
//! rules, control-frame interleaving, RSV1/permessage-deflate validation,
//! and UTF-8 validation of TEXT payloads.

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;

use crate::{
    error::Error,
    ws::{
        deflate::Inflater,
        frame::{self, Opcode, RawFrame},
        Role,
    },
};

/// A fully reassembled, delivery-ready unit: either an application message
/// or a control frame the connection driver must act on.
#[derive(Debug)]
pub(crate) enum ReadEvent {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close { code: Option<u16>, reason: String },
}

pub(crate) struct FrameReader<R> {
    io: R,
    role: Role,
    buf: BytesMut,
    inflater: Option<Inflater>,
}

enum InProgress {
    None,
    Text { rsv1: bool, parts: Vec<Bytes> },
    Binary { rsv1: bool, parts: Vec<Bytes> },
}

impl<R: AsyncReadExt + Unpin> FrameReader<R> {
    pub(crate) fn new(io: R, role: Role, inflater: Option<Inflater>) -> Self {
        FrameReader { io, role, buf: BytesMut::with_capacity(4096), inflater }
    }

    async fn fill(&mut self) -> Result<(), Error> {
        let mut chunk = [0u8; 8192];
        let n = self.io.read(&mut chunk).await.map_err(Error::io)?;
        if n == 0 {
            return Err(Error::connection_shutdown());
        }
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    async fn read_raw(&mut self) -> Result<RawFrame, Error> {
        loop {
            if let Some(parsed) = RawFrame::parse_header(&self.buf)? {
                let total = parsed.header_len + parsed.payload_len;
                let frame_bytes = self.buf.split_to(total);
                let masked_expected = matches!(self.role, Role::Server);
                if parsed.masked != masked_expected {
                    return Err(Error::protocol(if masked_expected {
                        "server reads require masked frames"
                    } else {
                        "client reads require unmasked frames"
                    }));
                }
                let mut payload = BytesMut::from(&frame_bytes[parsed.header_len..]);
                if let Some(key) = parsed.mask_key {
                    frame::apply_mask(&mut payload, key);
                }
                return Ok(RawFrame { fin: parsed.fin, rsv1: parsed.rsv1, opcode: parsed.opcode, payload: payload.freeze() });
            }
            self.fill().await?;
        }
    }

    /// Reads and fully reassembles the next deliverable unit. Interleaved
    /// control frames are returned immediately, ahead of whatever message
    /// fragmentation is in progress.
    pub(crate) async fn read_event(&mut self) -> Result<ReadEvent, Error> {
        let mut in_progress = InProgress::None;
        loop {
            let frame = self.read_raw().await?;

            if frame.opcode.is_control() {
                if frame.rsv1 {
                    return Err(Error::protocol("control frames must not set RSV1"));
                }
                return match frame.opcode {
                    Opcode::Close => {
                        let (code, reason) = frame::decode_close_payload(&frame.payload)?;
                        Ok(ReadEvent::Close { code, reason })
                    }
                    Opcode::Ping => Ok(ReadEvent::Ping(frame.payload)),
                    Opcode::Pong => Ok(ReadEvent::Pong(frame.payload)),
                    _ => unreachable!("is_control() only matches Close/Ping/Pong"),
                };
            }

            match (&mut in_progress, frame.opcode) {
                (InProgress::None, Opcode::Text) => {
                    if frame.fin {
                        return self.finish(Opcode::Text, frame.rsv1, vec![frame.payload]);
                    }
                    in_progress = InProgress::Text { rsv1: frame.rsv1, parts: vec![frame.payload] };
                }
                (InProgress::None, Opcode::Binary) => {
                    if frame.fin {
                        return self.finish(Opcode::Binary, frame.rsv1, vec![frame.payload]);
                    }
                    in_progress = InProgress::Binary { rsv1: frame.rsv1, parts: vec![frame.payload] };
                }
                (InProgress::None, Opcode::Continuation) => {
                    return Err(Error::protocol("continuation frame without a preceding message frame"));
                }
                (InProgress::Text { parts, .. }, Opcode::Continuation) => {
                    parts.push(frame.payload);
                    if frame.fin {
                        if let InProgress::Text { rsv1, parts } = std::mem::replace(&mut in_progress, InProgress::None) {
                            return self.finish(Opcode::Text, rsv1, parts);
                        }
                    }
                }
                (InProgress::Binary { parts, .. }, Opcode::Continuation) => {
                    parts.push(frame.payload);
                    if frame.fin {
                        if let InProgress::Binary { rsv1, parts } = std::mem::replace(&mut in_progress, InProgress::None) {
                            return self.finish(Opcode::Binary, rsv1, parts);
                        }
                    }
                }
                (InProgress::Text { .. } | InProgress::Binary { .. }, _) => {
                    return Err(Error::protocol("non-continuation frame received mid-message"));
                }
                _ => unreachable!("control opcodes handled above"),
            }
        }
    }

    fn finish(&mut self, opcode: Opcode, rsv1: bool, parts: Vec<Bytes>) -> Result<ReadEvent, Error> {
        let mut assembled = BytesMut::new();
        for part in parts {
            assembled.extend_from_slice(&part);
        }
        let assembled = assembled.freeze();

        let payload = if rsv1 {
            let inflater = self
                .inflater
                .as_mut()
                .ok_or_else(|| Error::protocol("RSV1 set without permessage-deflate negotiated"))?;
            inflater.inflate(&assembled)?
        } else {
            assembled
        };

        match opcode {
            Opcode::Text => {
                let text = String::from_utf8(payload.to_vec()).map_err(Error::invalid_utf8)?;
                Ok(ReadEvent::Text(text))
            }
            Opcode::Binary => Ok(ReadEvent::Binary(payload)),
            _ => unreachable!("finish only called for Text/Binary"),
        }
    }
}
