//! Queued writer (§4.5 writer policy): control frames jump the queue ahead
//! of whatever message is being sent, outbound client frames are masked
//! with a fresh key per frame, and large messages are coalesced into
//! frames no bigger than the configured maximum.

use bytes::Bytes;
use tokio::{
    io::AsyncWriteExt,
    sync::mpsc,
};

use crate::ws::{
    deflate::Deflater,
    frame::{Opcode, RawFrame},
    Role,
};

pub(crate) enum OutboundMessage {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Bytes),
}

impl OutboundMessage {
    fn is_control(&self) -> bool {
        matches!(self, OutboundMessage::Ping(_) | OutboundMessage::Pong(_) | OutboundMessage::Close(_))
    }
}

/// Two lanes feeding the same writer task: control frames sent on `control`
/// are always drained before the next queued item on `data`.
pub(crate) struct WriterHandle {
    data_tx: mpsc::UnboundedSender<OutboundMessage>,
    control_tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl WriterHandle {
    pub(crate) fn send(&self, message: OutboundMessage) -> Result<(), ()> {
        let tx = if message.is_control() { &self.control_tx } else { &self.data_tx };
        tx.send(message).map_err(|_| ())
    }
}

pub(crate) fn spawn<W>(io: W, role: Role, max_frame_payload: usize, deflater: Option<Deflater>) -> WriterHandle
where
    W: AsyncWriteExt + Unpin + Send + 'static,
{
    let (data_tx, data_rx) = mpsc::unbounded_channel();
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    tokio::spawn(writer_task(io, role, max_frame_payload, deflater, data_rx, control_rx));
    WriterHandle { data_tx, control_tx }
}

async fn writer_task<W: AsyncWriteExt + Unpin>(
    mut io: W,
    role: Role,
    max_frame_payload: usize,
    mut deflater: Option<Deflater>,
    mut data_rx: mpsc::UnboundedReceiver<OutboundMessage>,
    mut control_rx: mpsc::UnboundedReceiver<OutboundMessage>,
) {
    loop {
        let message = tokio::select! {
            biased;
            Some(m) = control_rx.recv() => m,
            Some(m) = data_rx.recv() => m,
            else => return,
        };

        if write_message(&mut io, role, max_frame_payload, &mut deflater, message).await.is_err() {
            return;
        }
    }
}

async fn write_message<W: AsyncWriteExt + Unpin>(
    io: &mut W,
    role: Role,
    max_frame_payload: usize,
    deflater: &mut Option<Deflater>,
    message: OutboundMessage,
) -> Result<(), ()> {
    let (opcode, payload, compressible) = match message {
        OutboundMessage::Text(s) => (Opcode::Text, Bytes::from(s.into_bytes()), true),
        OutboundMessage::Binary(b) => (Opcode::Binary, b, true),
        OutboundMessage::Ping(b) => (Opcode::Ping, b, false),
        OutboundMessage::Pong(b) => (Opcode::Pong, b, false),
        OutboundMessage::Close(b) => (Opcode::Close, b, false),
    };

    let (payload, rsv1) = if compressible {
        match deflater.as_mut() {
            Some(d) => (d.deflate(&payload).map_err(|_| ())?, true),
            None => (payload, false),
        }
    } else {
        (payload, false)
    };

    if opcode.is_control() {
        write_frame(io, role, RawFrame { fin: true, rsv1: false, opcode, payload }).await
    } else {
        write_fragmented(io, role, opcode, rsv1, payload, max_frame_payload).await
    }
}

async fn write_fragmented<W: AsyncWriteExt + Unpin>(
    io: &mut W,
    role: Role,
    opcode: Opcode,
    rsv1: bool,
    payload: Bytes,
    max_frame_payload: usize,
) -> Result<(), ()> {
    if payload.len() <= max_frame_payload {
        return write_frame(io, role, RawFrame { fin: true, rsv1, opcode, payload }).await;
    }

    let mut rest = payload;
    let mut first = true;
    while !rest.is_empty() {
        let take = rest.len().min(max_frame_payload);
        let chunk = rest.split_to(take);
        let fin = rest.is_empty();
        let frame_opcode = if first { opcode } else { Opcode::Continuation };
        let frame_rsv1 = first && rsv1;
        write_frame(io, role, RawFrame { fin, rsv1: frame_rsv1, opcode: frame_opcode, payload: chunk }).await?;
        first = false;
    }
    Ok(())
}

async fn write_frame<W: AsyncWriteExt + Unpin>(io: &mut W, role: Role, frame: RawFrame) -> Result<(), ()> {
    let mask_key = match role {
        Role::Client => Some(rand::random::<[u8; 4]>()),
        Role::Server => None,
    };
    let encoded = frame.encode(mask_key);
    io.write_all(&encoded).await.map_err(|_| ())?;
    io.flush().await.map_err(|_| ())
}
