//! The framed HTTP/2 multiplexer (§4.4): frame codec, HPACK, flow control,
//! the stream state machine, and the connection's reader/writer tasks.

pub(crate) mod connection;
pub(crate) mod flow;
pub(crate) mod frame;
pub(crate) mod hpack;
pub(crate) mod settings;
pub(crate) mod stream;
