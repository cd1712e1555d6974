//! The HTTP/1.1 Upgrade exchange (RFC 6455 §4) that hands a raw connection
//! off to the frame reader/writer in [`super`]. Reuses the same connection
//! acquisition path ordinary calls take (§4.2) since an upgrade request is,
//! up to the 101 response, just another HTTP/1.1 exchange.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use base64::Engine;
use bytes::BytesMut;
use http::{HeaderName, HeaderValue, StatusCode};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::{config::WebSocketConfig, error::Error, pool::BoxedIo, request::Request};

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The negotiated outcome of an upgrade: the raw stream plus whether the
/// peer agreed to permessage-deflate.
pub(crate) struct Upgraded {
    pub(crate) io: BoxedIo,
    pub(crate) permessage_deflate: bool,
}

pub(crate) async fn upgrade(mut io: BoxedIo, request: &Request, config: &WebSocketConfig) -> Result<Upgraded, Error> {
    let want_deflate = config.permessage_deflate && cfg!(feature = "deflate-ws");
    let key = generate_key();
    let head = build_request(request, &key, want_deflate);
    io.write_all(head.as_bytes()).await.map_err(Error::io)?;
    io.flush().await.map_err(Error::io)?;

    let (head_bytes, leftover) = read_response_head(&mut io).await?;

    let mut parsed_headers = [httparse::EMPTY_HEADER; 32];
    let mut parsed = httparse::Response::new(&mut parsed_headers);
    match parsed.parse(&head_bytes).map_err(Error::protocol)? {
        httparse::Status::Complete(_) => {}
        httparse::Status::Partial => return Err(Error::protocol("truncated websocket upgrade response")),
    }
    let status = StatusCode::from_u16(parsed.code.unwrap_or(0)).map_err(Error::protocol)?;
    if status != StatusCode::SWITCHING_PROTOCOLS {
        return Err(Error::protocol(format!("websocket upgrade rejected with status {status}")));
    }

    let mut upgrade_ok = false;
    let mut connection_ok = false;
    let mut accept: Option<String> = None;
    let mut deflate_negotiated = false;
    for header in parsed.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(Error::protocol)?;
        let value = HeaderValue::from_bytes(header.value).map_err(Error::protocol)?;
        let value_str = value.to_str().unwrap_or_default();
        if name == http::header::UPGRADE {
            upgrade_ok = value_str.eq_ignore_ascii_case("websocket");
        } else if name == http::header::CONNECTION {
            connection_ok = value_str.to_ascii_lowercase().contains("upgrade");
        } else if name.as_str().eq_ignore_ascii_case("sec-websocket-accept") {
            accept = Some(value_str.to_string());
        } else if name.as_str().eq_ignore_ascii_case("sec-websocket-extensions") {
            deflate_negotiated = value_str.to_ascii_lowercase().contains("permessage-deflate");
        }
    }

    if !upgrade_ok || !connection_ok {
        return Err(Error::protocol("websocket upgrade response missing Upgrade/Connection headers"));
    }
    let expected = accept_key(&key);
    if accept.as_deref() != Some(expected.as_str()) {
        return Err(Error::protocol("websocket Sec-WebSocket-Accept did not match the request key"));
    }

    let io = PrefixedIo { prefix: leftover, inner: io };
    Ok(Upgraded { io: BoxedIo::new(io), permessage_deflate: deflate_negotiated && want_deflate })
}

fn generate_key() -> String {
    let bytes: [u8; 16] = rand::random();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

fn build_request(request: &Request, key: &str, want_deflate: bool) -> String {
    let mut path = request.url().path().to_string();
    if path.is_empty() {
        path.push('/');
    }
    if let Some(query) = request.url().query() {
        path.push('?');
        path.push_str(query);
    }
    let host = match request.url().port() {
        Some(port) => format!("{}:{port}", request.url().host_str().unwrap_or_default()),
        None => request.url().host_str().unwrap_or_default().to_string(),
    };

    let mut head = format!("GET {path} HTTP/1.1\r\n");
    head.push_str(&format!("Host: {host}\r\n"));
    head.push_str("Upgrade: websocket\r\n");
    head.push_str("Connection: Upgrade\r\n");
    head.push_str(&format!("Sec-WebSocket-Key: {key}\r\n"));
    head.push_str("Sec-WebSocket-Version: 13\r\n");
    if want_deflate {
        head.push_str("Sec-WebSocket-Extensions: permessage-deflate\r\n");
    }
    for (name, value) in request.headers() {
        if matches!(
            name.as_str(),
            "host" | "upgrade" | "connection" | "sec-websocket-key" | "sec-websocket-version" | "sec-websocket-extensions"
        ) {
            continue;
        }
        head.push_str(name.as_str());
        head.push_str(": ");
        head.push_str(value.to_str().unwrap_or_default());
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    head
}

async fn read_response_head(io: &mut BoxedIo) -> Result<(BytesMut, BytesMut), Error> {
    let mut buf = BytesMut::with_capacity(1024);
    let terminator = loop {
        let mut chunk = [0u8; 1024];
        let n = io.read(&mut chunk).await.map_err(Error::io)?;
        if n == 0 {
            return Err(Error::protocol("connection closed before websocket upgrade response completed"));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if buf.len() > 16 * 1024 {
            return Err(Error::protocol("websocket upgrade response headers exceeded 16KiB"));
        }
    };
    let head = buf.split_to(terminator + 4);
    Ok((head, buf))
}

/// Replays bytes already read past the upgrade response's header terminator
/// before falling through to the live connection (frames may arrive in the
/// same TCP segment as the 101 response).
struct PrefixedIo {
    prefix: BytesMut,
    inner: BoxedIo,
}

impl AsyncRead for PrefixedIo {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.prefix.is_empty() {
            let take = this.prefix.len().min(buf.remaining());
            let chunk = this.prefix.split_to(take);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for PrefixedIo {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc6455_worked_example() {
        // RFC 6455 §1.3's own worked example.
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }
}
