//! The framed HTTP/2 connection (§4.4): reader and writer tasks over one
//! socket, demultiplexing concurrent exchanges by stream id.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::{mpsc, Notify},
};

use crate::{
    config::Http2Config,
    error::Error,
    h2::{
        flow::{Window, DEFAULT_WINDOW},
        frame::{Frame, FrameHeader, FRAME_HEADER_LEN, PREFACE},
        hpack::HpackCodec,
        settings::{self, PeerSettings},
        stream::{OutboundFrame, Stream, StreamEvent},
    },
    pool::BoxedIo,
    trace::{debug, trace, warn},
};

/// A live HTTP/2 connection: owns the reader/writer tasks and the table of
/// open streams (§3 data model: "Connection" specialized to HTTP/2).
pub struct H2Connection {
    streams: Mutex<HashMap<u32, Arc<Stream>>>,
    next_stream_id: AtomicU32,
    peer_settings: Arc<PeerSettings>,
    conn_send_window: Arc<Window>,
    outbound_tx: mpsc::UnboundedSender<OutboundFrame>,
    no_new_streams: AtomicBool,
    last_activity: Mutex<Instant>,
    last_ping_acked: Mutex<bool>,
    closed_notify: Notify,
}

impl H2Connection {
    /// Writes the client preface and initial SETTINGS, then spawns the
    /// reader and writer tasks. Returns once the handshake bytes are
    /// flushed; SETTINGS acknowledgement happens asynchronously.
    pub(crate) async fn connect(io: BoxedIo, config: Http2Config) -> Result<Arc<Self>, Error> {
        let (mut read_half, mut write_half) = tokio::io::split(io);
        write_half.write_all(PREFACE).await.map_err(Error::io)?;
        let settings_frame = Frame::Settings { params: settings::our_settings(&config), ack: false }.encode(config.max_frame_size);
        write_half.write_all(&settings_frame).await.map_err(Error::io)?;
        write_half.flush().await.map_err(Error::io)?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let conn = Arc::new(H2Connection {
            streams: Mutex::new(HashMap::new()),
            next_stream_id: AtomicU32::new(1),
            peer_settings: Arc::new(PeerSettings::default()),
            conn_send_window: Arc::new(Window::new(DEFAULT_WINDOW)),
            outbound_tx,
            no_new_streams: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
            last_ping_acked: Mutex::new(true),
            closed_notify: Notify::new(),
        });

        tokio::spawn(writer_task(write_half, outbound_rx, config.max_frame_size));
        tokio::spawn(reader_task(conn.clone(), read_half, config.max_header_list_size as usize));
        conn.clone().spawn_ping_task(config.ping_interval);
        Ok(conn)
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.no_new_streams.load(Ordering::SeqCst)
    }

    pub(crate) fn live_streams(&self) -> usize {
        self.streams.lock().unwrap().values().filter(|s| !s.is_closed()).count()
    }

    pub(crate) fn shutdown(&self) {
        if !self.no_new_streams.swap(true, Ordering::SeqCst) {
            let _ = self.outbound_tx.send(OutboundFrame::GoAway { last_stream_id: 0, error_code: 0 });
        }
        self.closed_notify.notify_waiters();
    }

    /// Allocates a new client-initiated stream (odd ids, §5.1.1) and sends
    /// its HEADERS frame.
    pub(crate) fn open_stream(
        self: &Arc<Self>,
        headers: Vec<(String, String, bool)>,
        end_stream: bool,
    ) -> Result<Arc<Stream>, Error> {
        if self.no_new_streams.load(Ordering::SeqCst) {
            return Err(Error::connection_shutdown());
        }
        let id = self.next_stream_id.fetch_add(2, Ordering::SeqCst);
        let initial_window = self.peer_settings.initial_window_size.load(Ordering::SeqCst) as i64;
        let stream = Arc::new(Stream::new(id, initial_window, DEFAULT_WINDOW, self.outbound_tx.clone()));
        stream.mark_open();
        self.streams.lock().unwrap().insert(id, stream.clone());
        self.outbound_tx
            .send(OutboundFrame::Headers { stream_id: id, headers, end_stream })
            .map_err(|_| Error::connection_shutdown())?;
        if end_stream {
            stream.mark_end_stream(true);
        }
        Ok(stream)
    }

    fn stream(&self, id: u32) -> Option<Arc<Stream>> {
        self.streams.lock().unwrap().get(&id).cloned()
    }

    fn remove_stream(&self, id: u32) {
        self.streams.lock().unwrap().remove(&id);
    }

    fn spawn_ping_task(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = self.closed_notify.notified() => return,
                }
                if !self.is_open() {
                    return;
                }
                *self.last_ping_acked.lock().unwrap() = false;
                let opaque = rand::random::<[u8; 8]>();
                if self.outbound_tx.send(OutboundFrame::Ping { opaque, ack: false }).is_err() {
                    return;
                }
                tokio::time::sleep(interval).await;
                if !*self.last_ping_acked.lock().unwrap() {
                    warn!("http/2 ping unanswered, marking connection degraded");
                    self.shutdown();
                    return;
                }
            }
        });
    }
}

async fn writer_task(
    mut write_half: tokio::io::WriteHalf<BoxedIo>,
    mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
    max_frame_size: u32,
) {
    let mut hpack = HpackCodec::new(4096);
    while let Some(frame) = rx.recv().await {
        let encoded = match frame {
            OutboundFrame::Headers { stream_id, headers, end_stream } => {
                let block = hpack.encode(&headers);
                encode_headers_with_continuation(stream_id, block, end_stream, max_frame_size)
            }
            OutboundFrame::Data { stream_id, data, end_stream } => {
                chunk_data(stream_id, data, end_stream, max_frame_size)
            }
            OutboundFrame::WindowUpdate { stream_id, increment } => {
                vec![Frame::WindowUpdate { stream_id, increment }.encode(max_frame_size)]
            }
            OutboundFrame::RstStream { stream_id, error_code } => {
                vec![Frame::RstStream { stream_id, error_code }.encode(max_frame_size)]
            }
            OutboundFrame::Ping { opaque, ack } => vec![Frame::Ping { opaque, ack }.encode(max_frame_size)],
            OutboundFrame::Settings { params, ack } => vec![Frame::Settings { params, ack }.encode(max_frame_size)],
            OutboundFrame::GoAway { last_stream_id, error_code } => {
                vec![Frame::GoAway { last_stream_id, error_code, debug_data: Bytes::new() }.encode(max_frame_size)]
            }
        };
        for chunk in encoded {
            if write_half.write_all(&chunk).await.is_err() {
                return;
            }
        }
        if write_half.flush().await.is_err() {
            return;
        }
    }
}

fn encode_headers_with_continuation(stream_id: u32, block: Bytes, end_stream: bool, max_frame_size: u32) -> Vec<BytesMut> {
    let max = max_frame_size as usize;
    if block.len() <= max {
        return vec![Frame::Headers { stream_id, end_stream, end_headers: true, header_block: block }.encode(max_frame_size)];
    }
    let mut out = Vec::new();
    let mut rest = block;
    let first = rest.split_to(max);
    out.push(Frame::Headers { stream_id, end_stream, end_headers: false, header_block: first }.encode(max_frame_size));
    while !rest.is_empty() {
        let take = rest.len().min(max);
        let chunk = rest.split_to(take);
        let end_headers = rest.is_empty();
        out.push(Frame::Continuation { stream_id, end_headers, header_block: chunk }.encode(max_frame_size));
    }
    out
}

fn chunk_data(stream_id: u32, data: Bytes, end_stream: bool, max_frame_size: u32) -> Vec<BytesMut> {
    let max = max_frame_size as usize;
    if data.is_empty() {
        return vec![Frame::Data { stream_id, end_stream, data }.encode(max_frame_size)];
    }
    let mut out = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        let take = rest.len().min(max);
        let chunk = rest.split_to(take);
        let last = rest.is_empty();
        out.push(Frame::Data { stream_id, end_stream: last && end_stream, data: chunk }.encode(max_frame_size));
    }
    out
}

async fn reader_task(conn: Arc<H2Connection>, mut read_half: tokio::io::ReadHalf<BoxedIo>, max_header_list_size: usize) {
    let mut hpack = HpackCodec::new(4096);
    let mut pending_headers: HashMap<u32, (BytesMut, bool)> = HashMap::new();
    let mut header_buf = [0u8; FRAME_HEADER_LEN];

    loop {
        if read_half.read_exact(&mut header_buf).await.is_err() {
            break;
        }
        let header = FrameHeader::parse(&header_buf);
        if header.length as usize > 16 * 1024 * 1024 {
            warn!(length = header.length, "oversized http/2 frame, closing connection");
            break;
        }
        let mut payload = vec![0u8; header.length as usize];
        if read_half.read_exact(&mut payload).await.is_err() {
            break;
        }
        *conn.last_activity.lock().unwrap() = Instant::now();

        let frame = match Frame::decode(header, Bytes::from(payload)) {
            Ok(f) => f,
            Err(e) => {
                warn!(%e, "http/2 frame decode error, closing connection");
                break;
            }
        };

        match frame {
            Frame::Settings { params, ack } => {
                if ack {
                    trace!("settings ack received");
                } else {
                    for (id, value) in params {
                        conn.peer_settings.apply(id, value);
                    }
                    let _ = conn.outbound_tx.send(OutboundFrame::Settings { params: Vec::new(), ack: true });
                }
            }
            Frame::Ping { opaque, ack } => {
                if ack {
                    *conn.last_ping_acked.lock().unwrap() = true;
                } else {
                    let _ = conn.outbound_tx.send(OutboundFrame::Ping { opaque, ack: true });
                }
            }
            Frame::WindowUpdate { stream_id, increment } => {
                if stream_id == 0 {
                    conn.conn_send_window.increment(increment);
                } else if let Some(stream) = conn.stream(stream_id) {
                    stream.send_window.increment(increment);
                }
            }
            Frame::GoAway { last_stream_id, error_code, .. } => {
                debug!(last_stream_id, error_code, "received GOAWAY");
                conn.no_new_streams.store(true, Ordering::SeqCst);
                let streams: Vec<_> = conn.streams.lock().unwrap().values().cloned().collect();
                for stream in streams {
                    if stream.id > last_stream_id {
                        let _ = stream.deliver(StreamEvent::Reset { error_code });
                    }
                }
            }
            Frame::RstStream { stream_id, error_code } => {
                if let Some(stream) = conn.stream(stream_id) {
                    let _ = stream.deliver(StreamEvent::Reset { error_code });
                }
                conn.remove_stream(stream_id);
            }
            Frame::Headers { stream_id, end_stream, end_headers, header_block } => {
                let mut buf = BytesMut::new();
                buf.extend_from_slice(&header_block);
                if end_headers {
                    deliver_headers(&conn, &mut hpack, stream_id, buf, end_stream, max_header_list_size);
                } else {
                    pending_headers.insert(stream_id, (buf, end_stream));
                }
            }
            Frame::Continuation { stream_id, end_headers, header_block } => {
                if let Some((buf, end_stream)) = pending_headers.get_mut(&stream_id) {
                    buf.extend_from_slice(&header_block);
                    if end_headers {
                        let (buf, end_stream) = pending_headers.remove(&stream_id).unwrap();
                        deliver_headers(&conn, &mut hpack, stream_id, buf, end_stream, max_header_list_size);
                    }
                }
            }
            Frame::Data { stream_id, end_stream, data } => {
                let len = data.len() as u32;
                if let Some(stream) = conn.stream(stream_id) {
                    stream.recv_window.consume(len);
                    let _ = stream.deliver(StreamEvent::Data { data, end_stream });
                    if len > 0 {
                        let _ = conn.outbound_tx.send(OutboundFrame::WindowUpdate { stream_id, increment: len });
                    }
                }
                if len > 0 {
                    let _ = conn.outbound_tx.send(OutboundFrame::WindowUpdate { stream_id: 0, increment: len });
                }
            }
            Frame::Priority { .. } | Frame::Unknown => {}
        }
    }

    conn.no_new_streams.store(true, Ordering::SeqCst);
    let streams: Vec<_> = conn.streams.lock().unwrap().values().cloned().collect();
    for stream in streams {
        let _ = stream.deliver(StreamEvent::Reset { error_code: 0 });
    }
    conn.closed_notify.notify_waiters();
}

fn deliver_headers(
    conn: &Arc<H2Connection>,
    hpack: &mut HpackCodec,
    stream_id: u32,
    block: BytesMut,
    end_stream: bool,
    max_header_list_size: usize,
) {
    if block.len() > max_header_list_size {
        warn!(stream_id, "header block exceeds configured max, resetting stream");
        if let Some(stream) = conn.stream(stream_id) {
            let _ = stream.deliver(StreamEvent::Reset { error_code: 0xb });
        }
        return;
    }
    match hpack.decode(block.freeze()) {
        Ok(headers) => {
            if let Some(stream) = conn.stream(stream_id) {
                let _ = stream.deliver(StreamEvent::Headers { headers, end_stream });
            }
        }
        Err(e) => warn!(%e, "hpack decode error, closing connection"),
    }
}
