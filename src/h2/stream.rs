//! The per-stream state machine (RFC 7540 §5.1): idle, open,
//! half-closed (local/remote), closed.

use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{error::Error, h2::flow::Window};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamState {
    Idle,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    /// Applies the effect of sending (`local`) or receiving (`!local`) an
    /// end-stream flag, returning the new state. Sending/receiving a
    /// RST_STREAM always lands on `Closed` (handled by the caller).
    fn on_end_stream(self, local: bool) -> StreamState {
        match (self, local) {
            (StreamState::Idle, _) => StreamState::Open,
            (StreamState::Open, true) => StreamState::HalfClosedLocal,
            (StreamState::Open, false) => StreamState::HalfClosedRemote,
            (StreamState::HalfClosedLocal, false) => StreamState::Closed,
            (StreamState::HalfClosedRemote, true) => StreamState::Closed,
            (other, _) => other,
        }
    }
}

/// A message delivered from the connection's reader task to the stream's
/// consumer (the Network interceptor awaiting a response).
#[derive(Debug)]
pub(crate) enum StreamEvent {
    Headers { headers: Vec<(String, String)>, end_stream: bool },
    Data { data: Bytes, end_stream: bool },
    Reset { error_code: u32 },
}

/// One HTTP/2 stream: the state machine plus the channel a consumer reads
/// incoming headers/data from and a sender the connection's writer task
/// uses to push outbound frames (§3 data model: "Exchange").
pub(crate) struct Stream {
    pub(crate) id: u32,
    state: Mutex<StreamState>,
    pub(crate) send_window: Window,
    pub(crate) recv_window: Window,
    pub(crate) events_tx: mpsc::UnboundedSender<StreamEvent>,
    pub(crate) events_rx: Mutex<Option<mpsc::UnboundedReceiver<StreamEvent>>>,
    pub(crate) outbound: mpsc::UnboundedSender<OutboundFrame>,
}

/// A frame some part of the connection wants the writer task to send.
pub(crate) enum OutboundFrame {
    Headers { stream_id: u32, headers: Vec<(String, String, bool)>, end_stream: bool },
    Data { stream_id: u32, data: Bytes, end_stream: bool },
    WindowUpdate { stream_id: u32, increment: u32 },
    RstStream { stream_id: u32, error_code: u32 },
    Ping { opaque: [u8; 8], ack: bool },
    Settings { params: Vec<(u16, u32)>, ack: bool },
    GoAway { last_stream_id: u32, error_code: u32 },
}

impl Stream {
    pub(crate) fn new(id: u32, initial_send_window: i64, initial_recv_window: i64, outbound: mpsc::UnboundedSender<OutboundFrame>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Stream {
            id,
            state: Mutex::new(StreamState::Idle),
            send_window: Window::new(initial_send_window),
            recv_window: Window::new(initial_recv_window),
            events_tx: tx,
            events_rx: Mutex::new(Some(rx)),
            outbound,
        }
    }

    pub(crate) fn state(&self) -> StreamState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<StreamEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    pub(crate) fn mark_end_stream(&self, local: bool) {
        let mut state = self.state.lock().unwrap();
        *state = state.on_end_stream(local);
    }

    pub(crate) fn mark_open(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == StreamState::Idle {
            *state = StreamState::Open;
        }
    }

    pub(crate) fn mark_closed(&self) {
        *self.state.lock().unwrap() = StreamState::Closed;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state() == StreamState::Closed
    }

    pub(crate) fn deliver(&self, event: StreamEvent) -> Result<(), Error> {
        let is_end = matches!(&event, StreamEvent::Headers { end_stream: true, .. } | StreamEvent::Data { end_stream: true, .. });
        let is_reset = matches!(&event, StreamEvent::Reset { .. });
        self.events_tx.send(event).map_err(|_| Error::connection_shutdown())?;
        if is_reset {
            self.mark_closed();
        } else if is_end {
            self.mark_end_stream(false);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_close_both_sides_closes() {
        let mut s = StreamState::Idle;
        s = s.on_end_stream(true); // send HEADERS -> open (first transition always opens)
        assert_eq!(s, StreamState::Open);
        s = s.on_end_stream(true); // client sends end_stream
        assert_eq!(s, StreamState::HalfClosedLocal);
        s = s.on_end_stream(false); // server sends end_stream
        assert_eq!(s, StreamState::Closed);
    }

    #[test]
    fn server_ends_first_then_client() {
        let mut s = StreamState::Idle.on_end_stream(false);
        assert_eq!(s, StreamState::Open);
        s = s.on_end_stream(false);
        assert_eq!(s, StreamState::HalfClosedRemote);
        s = s.on_end_stream(true);
        assert_eq!(s, StreamState::Closed);
    }
}
