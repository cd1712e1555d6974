//! WebSocket framing (§4.5): RFC 6455 frames over an established
//! connection, with RFC 7692 permessage-deflate and the close handshake.
//! Establishing the connection (the HTTP/1.1 Upgrade exchange) is the
//! caller's job; this module only owns the framing once a raw duplex
//! stream has been handed to it.

#[cfg(feature = "deflate-ws")]
pub(crate) mod deflate;
#[cfg(not(feature = "deflate-ws"))]
pub(crate) mod deflate {
    //! Stand-in when the `deflate-ws` feature is disabled. [`super::handshake`]
    //! never advertises the extension in that build, so these are never
    //! actually invoked.

    use bytes::Bytes;

    use crate::error::Error;

    pub(crate) struct Inflater(());
    pub(crate) struct Deflater(());

    impl Inflater {
        pub(crate) fn new(_no_context_takeover: bool) -> Self {
            Inflater(())
        }

        pub(crate) fn inflate(&mut self, _compressed: &Bytes) -> Result<Bytes, Error> {
            unreachable!("permessage-deflate negotiated without the deflate-ws feature")
        }
    }

    impl Deflater {
        pub(crate) fn new(_no_context_takeover: bool) -> Self {
            Deflater(())
        }

        pub(crate) fn deflate(&mut self, _payload: &Bytes) -> Result<Bytes, Error> {
            unreachable!("permessage-deflate negotiated without the deflate-ws feature")
        }
    }
}
pub(crate) mod frame;
mod handshake;
mod reader;
mod writer;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use bytes::Bytes;
use tokio::sync::{mpsc, Notify};

use crate::{
    config::WebSocketConfig,
    error::{Error, Kind},
    pool::BoxedIo,
    request::Request,
    trace::{debug, warn},
};

use self::{
    deflate::{Deflater, Inflater},
    frame::encode_close_payload,
    reader::{FrameReader, ReadEvent},
    writer::{OutboundMessage, WriterHandle},
};

/// Which side of the connection this endpoint plays, which decides mask
/// direction (§4.5: "client reads require MASK=0", "server reads require
/// MASK=1"). Server is exercised only by test loopback harnesses; engaging
/// in a full server implementation is out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Client,
    Server,
}

/// A decoded application-level message delivered to the caller.
#[derive(Debug, Clone)]
pub enum Message {
    Text(String),
    Binary(Bytes),
    /// The close handshake completed; `recv` yields this once, then `None`.
    Close { code: Option<u16>, reason: String },
}

struct Shared {
    closed_notify: Notify,
    sent_close: AtomicBool,
    last_pong_acked: Mutex<bool>,
    incoming_tx: mpsc::UnboundedSender<Result<Message, Error>>,
}

/// A live WebSocket connection (§4.5). Cloning is not supported; share via
/// `Arc<WebSocket>` the way callers already share other connection handles.
pub struct WebSocket {
    shared: Arc<Shared>,
    writer: WriterHandle,
    incoming_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<Message, Error>>>,
}

/// Performs the HTTP/1.1 Upgrade handshake over `io` and, on success,
/// starts the framing tasks. `io` must already be a fresh HTTP/1.1
/// connection for `request`'s host (typically one just taken out of the
/// pool's HTTP/1 slot, never to be returned there).
pub(crate) async fn connect(io: BoxedIo, request: &Request, config: WebSocketConfig) -> Result<Arc<WebSocket>, Error> {
    let upgraded = handshake::upgrade(io, request, &config).await?;
    let effective_config = WebSocketConfig { permessage_deflate: upgraded.permessage_deflate, ..config };
    Ok(WebSocket::start(upgraded.io, Role::Client, effective_config))
}

impl WebSocket {
    /// Takes ownership of an already-upgraded duplex stream and starts the
    /// reader, writer and ping tasks (§4.5, modeled on the HTTP/2 connection's
    /// reader/writer/ping task trio).
    pub(crate) fn start(io: BoxedIo, role: Role, config: WebSocketConfig) -> Arc<Self> {
        let (read_half, write_half) = tokio::io::split(io);

        let (deflater, inflater) = if config.permessage_deflate {
            (Some(Deflater::new(false)), Some(Inflater::new(false)))
        } else {
            (None, None)
        };

        let writer = writer::spawn(write_half, role, config.max_frame_payload, deflater);

        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            closed_notify: Notify::new(),
            sent_close: AtomicBool::new(false),
            last_pong_acked: Mutex::new(true),
            incoming_tx,
        });

        let ws = Arc::new(WebSocket { shared: shared.clone(), writer, incoming_rx: tokio::sync::Mutex::new(incoming_rx) });

        tokio::spawn(reader_task(read_half, role, inflater, shared.clone(), ws.clone()));
        tokio::spawn(ping_task(shared, ws.clone(), config.ping_interval));

        ws
    }

    /// Waits for the next decoded message, or `None` once the connection
    /// has finished its close handshake.
    pub async fn recv(&self) -> Option<Result<Message, Error>> {
        self.incoming_rx.lock().await.recv().await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), Error> {
        self.writer.send(OutboundMessage::Text(text.into())).map_err(|_| Error::connection_shutdown())
    }

    pub async fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), Error> {
        self.writer.send(OutboundMessage::Binary(data.into())).map_err(|_| Error::connection_shutdown())
    }

    /// Initiates the close handshake: sends CLOSE and stops sending further
    /// messages. Completion (the peer's answering CLOSE) is observed via
    /// `recv` returning `None`.
    pub async fn close(&self, code: u16, reason: &str) -> Result<(), Error> {
        if self.shared.sent_close.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.writer
            .send(OutboundMessage::Close(encode_close_payload(code, reason)))
            .map_err(|_| Error::connection_shutdown())
    }
}

fn close_code_for_error(error: &Error) -> Option<u16> {
    match error.kind() {
        Kind::InvalidUtf8 => Some(1007),
        Kind::Protocol => Some(1002),
        _ => None,
    }
}

async fn reader_task<R: tokio::io::AsyncReadExt + Unpin>(
    io: R,
    role: Role,
    inflater: Option<Inflater>,
    shared: Arc<Shared>,
    ws: Arc<WebSocket>,
) {
    let mut reader = FrameReader::new(io, role, inflater);
    loop {
        match reader.read_event().await {
            Ok(ReadEvent::Text(text)) => {
                if shared.incoming_tx.send(Ok(Message::Text(text))).is_err() {
                    break;
                }
            }
            Ok(ReadEvent::Binary(data)) => {
                if shared.incoming_tx.send(Ok(Message::Binary(data))).is_err() {
                    break;
                }
            }
            Ok(ReadEvent::Ping(payload)) => {
                let _ = ws.writer.send(OutboundMessage::Pong(payload));
            }
            Ok(ReadEvent::Pong(_)) => {
                *shared.last_pong_acked.lock().unwrap() = true;
            }
            Ok(ReadEvent::Close { code, reason }) => {
                debug!(?code, "received websocket close frame");
                if !shared.sent_close.swap(true, Ordering::SeqCst) {
                    let echo_code = code.unwrap_or(1000);
                    let _ = ws.writer.send(OutboundMessage::Close(encode_close_payload(echo_code, "")));
                }
                let _ = shared.incoming_tx.send(Ok(Message::Close { code, reason }));
                break;
            }
            Err(e) => {
                warn!(%e, "websocket protocol violation, closing connection");
                if let Some(code) = close_code_for_error(&e) {
                    if !shared.sent_close.swap(true, Ordering::SeqCst) {
                        let _ = ws.writer.send(OutboundMessage::Close(encode_close_payload(code, "")));
                    }
                }
                let _ = shared.incoming_tx.send(Err(e));
                break;
            }
        }
    }
    shared.closed_notify.notify_waiters();
}

/// Sends a ping at `interval` and requires the matching pong within the
/// next `interval`; otherwise the connection is abandoned as a timeout
/// (§4.5: "missing pong within interval -> WebsocketTimeout").
async fn ping_task(shared: Arc<Shared>, ws: Arc<WebSocket>, interval: std::time::Duration) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shared.closed_notify.notified() => return,
        }
        if shared.sent_close.load(Ordering::SeqCst) {
            return;
        }
        *shared.last_pong_acked.lock().unwrap() = false;
        if ws.writer.send(OutboundMessage::Ping(Bytes::new())).is_err() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shared.closed_notify.notified() => return,
        }
        if !*shared.last_pong_acked.lock().unwrap() {
            warn!("websocket ping unanswered, closing connection");
            let _ = shared.incoming_tx.send(Err(Error::websocket_timeout()));
            shared.closed_notify.notify_waiters();
            return;
        }
    }
}
