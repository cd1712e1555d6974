//! The Network interceptor (§4.1 point 5, final stage): performs the actual
//! wire exchange over whichever connection the Connect interceptor bound,
//! HTTP/1.1 framing or an HTTP/2 stream.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    time::timeout,
};

use crate::{
    body::ResponseBody,
    call::interceptor::{Chain, Interceptor},
    coordinator::BoundConnection,
    error::Error,
    h2::stream::{OutboundFrame, StreamEvent},
    pool::ConnectionKind,
    request::Request,
    response::{Protocol, Response},
};

pub(crate) struct NetworkInterceptor;

#[async_trait]
impl Interceptor for NetworkInterceptor {
    async fn intercept(&self, chain: Chain) -> Result<Response, Error> {
        let bound = chain
            .connection()
            .ok_or_else(|| Error::programming("network interceptor invoked without a bound connection"))?;
        let read_timeout = chain.timeouts().read;
        let write_timeout = chain.timeouts().write;
        let request = chain.request();
        let listener = chain.state().config.event_listener.clone();

        if let Some(len) = request.body().and_then(|b| b.content_length()) {
            listener.request_body(len);
        }

        match &bound.entry.kind {
            ConnectionKind::Http2(h2) => exchange_h2(h2.clone(), request, read_timeout).await,
            ConnectionKind::Http1(_) => exchange_h1(&bound, request, read_timeout, write_timeout).await,
        }
    }
}

async fn exchange_h2(
    h2: Arc<crate::h2::connection::H2Connection>,
    request: &Request,
    read_timeout: std::time::Duration,
) -> Result<Response, Error> {
    let headers = build_h2_headers(request);
    let body_bytes = match request.body() {
        Some(body) => Some(buffer_body(body).await?),
        None => None,
    };
    let end_stream = body_bytes.as_ref().map_or(true, |b| b.is_empty());
    let stream = h2.open_stream(headers, end_stream)?;

    if let Some(bytes) = body_bytes {
        if !bytes.is_empty() {
            stream
                .outbound
                .send(OutboundFrame::Data { stream_id: stream.id, data: bytes, end_stream: true })
                .map_err(|_| Error::connection_shutdown())?;
        }
    }

    let mut receiver = stream.take_receiver().ok_or_else(|| Error::programming("stream receiver already taken"))?;
    let (status, response_headers) = loop {
        match timeout(read_timeout, receiver.recv()).await.map_err(Error::timeout)? {
            Some(StreamEvent::Headers { headers, .. }) => break parse_h2_headers(headers)?,
            Some(StreamEvent::Reset { error_code }) => return Err(Error::http2_reset(error_code)),
            Some(StreamEvent::Data { .. }) => continue,
            None => return Err(Error::connection_shutdown()),
        }
    };

    let body = ResponseBody::new(Box::pin(futures_util::stream::unfold(
        (receiver, read_timeout),
        move |(mut rx, read_timeout)| async move {
            loop {
                match timeout(read_timeout, rx.recv()).await {
                    Ok(Some(StreamEvent::Data { data, end_stream })) => {
                        if end_stream && data.is_empty() {
                            return None;
                        }
                        return Some((Ok(data), (rx, read_timeout)));
                    }
                    Ok(Some(StreamEvent::Reset { error_code })) => {
                        return Some((Err(Box::new(Error::http2_reset(error_code)) as crate::error::BoxError), (rx, read_timeout)));
                    }
                    Ok(Some(StreamEvent::Headers { .. })) => continue,
                    Ok(None) => return None,
                    Err(elapsed) => return Some((Err(Box::new(Error::timeout(elapsed)) as crate::error::BoxError), (rx, read_timeout))),
                }
            }
        },
    )));

    Ok(Response::new(Arc::new(owned_copy(request)), status, Protocol::H2, response_headers, body))
}

fn build_h2_headers(request: &Request) -> Vec<(String, String, bool)> {
    let mut headers = Vec::with_capacity(request.headers().len() + 4);
    headers.push((":method".to_string(), request.method().to_string(), false));
    headers.push((":scheme".to_string(), request.url().scheme().to_string(), false));
    let authority = match request.url().port() {
        Some(port) => format!("{}:{port}", request.url().host_str().unwrap_or_default()),
        None => request.url().host_str().unwrap_or_default().to_string(),
    };
    headers.push((":authority".to_string(), authority, false));
    let mut path = request.url().path().to_string();
    if let Some(query) = request.url().query() {
        path.push('?');
        path.push_str(query);
    }
    headers.push((":path".to_string(), path, false));
    for (name, value) in request.headers() {
        if name == http::header::HOST {
            continue;
        }
        headers.push((name.as_str().to_ascii_lowercase(), value.to_str().unwrap_or_default().to_string(), false));
    }
    headers
}

fn parse_h2_headers(raw: Vec<(String, String)>) -> Result<(StatusCode, HeaderMap), Error> {
    let mut status = StatusCode::OK;
    let mut headers = HeaderMap::new();
    for (name, value) in raw {
        if name == ":status" {
            status = value.parse().map_err(Error::protocol)?;
            continue;
        }
        if name.starts_with(':') {
            continue;
        }
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(Error::protocol)?;
        let value = HeaderValue::from_str(&value).map_err(Error::protocol)?;
        headers.append(name, value);
    }
    Ok((status, headers))
}

async fn exchange_h1(
    bound: &Arc<BoundConnection>,
    request: &Request,
    read_timeout: std::time::Duration,
    write_timeout: std::time::Duration,
) -> Result<Response, Error> {
    let slot = match &bound.entry.kind {
        ConnectionKind::Http1(slot) => slot,
        ConnectionKind::Http2(_) => unreachable!("exchange_h1 only called for HTTP/1 connections"),
    };
    let mut io = slot
        .lock()
        .unwrap()
        .take()
        .ok_or_else(Error::connection_shutdown)?;

    match drive_h1(&mut io, request, read_timeout, write_timeout).await {
        Ok((response, keep_alive)) => {
            if keep_alive {
                *slot.lock().unwrap() = Some(io);
            } else {
                bound.entry.close();
            }
            Ok(response)
        }
        Err(e) => {
            bound.entry.close();
            Err(e)
        }
    }
}

async fn drive_h1(
    io: &mut crate::pool::BoxedIo,
    request: &Request,
    read_timeout: std::time::Duration,
    write_timeout: std::time::Duration,
) -> Result<(Response, bool), Error> {
    let head = build_h1_head(request);
    timeout(write_timeout, io.write_all(head.as_bytes())).await.map_err(Error::timeout)?.map_err(Error::io)?;

    let chunked_request = request
        .headers()
        .get(http::header::TRANSFER_ENCODING)
        .map(|v| v.as_bytes() == b"chunked")
        .unwrap_or(false);
    if let Some(body) = request.body() {
        let bytes = buffer_body(body).await?;
        if chunked_request {
            let mut chunk = BytesMut::new();
            chunk.extend_from_slice(format!("{:x}\r\n", bytes.len()).as_bytes());
            chunk.extend_from_slice(&bytes);
            chunk.extend_from_slice(b"\r\n0\r\n\r\n");
            timeout(write_timeout, io.write_all(&chunk)).await.map_err(Error::timeout)?.map_err(Error::io)?;
        } else if !bytes.is_empty() {
            timeout(write_timeout, io.write_all(&bytes)).await.map_err(Error::timeout)?.map_err(Error::io)?;
        }
    }
    timeout(write_timeout, io.flush()).await.map_err(Error::timeout)?.map_err(Error::io)?;

    let mut buf = BytesMut::with_capacity(4096);
    let header_end = loop {
        let mut chunk = [0u8; 1024];
        let n = timeout(read_timeout, io.read(&mut chunk)).await.map_err(Error::timeout)?.map_err(Error::io)?;
        if n == 0 {
            return Err(Error::protocol("connection closed before response headers completed"));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_terminator(&buf) {
            break pos;
        }
        if buf.len() > 64 * 1024 {
            return Err(Error::protocol("response headers exceeded 64KiB"));
        }
    };

    let head_bytes = buf.split_to(header_end + 4);
    let mut parsed_headers = [httparse::EMPTY_HEADER; 64];
    let mut parsed = httparse::Response::new(&mut parsed_headers);
    let status = match parsed.parse(&head_bytes).map_err(Error::protocol)? {
        httparse::Status::Complete(_) => parsed.code.ok_or_else(|| Error::protocol("missing status code"))?,
        httparse::Status::Partial => return Err(Error::protocol("truncated status line")),
    };
    let status = StatusCode::from_u16(status).map_err(Error::protocol)?;
    let version = parsed.version.unwrap_or(1);

    let mut headers = HeaderMap::new();
    for header in parsed.headers.iter() {
        if header.name.is_empty() {
            continue;
        }
        let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(Error::protocol)?;
        let value = HeaderValue::from_bytes(header.value).map_err(Error::protocol)?;
        headers.append(name, value);
    }

    let content_length = headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let chunked = headers
        .get(http::header::TRANSFER_ENCODING)
        .map(|v| v.as_bytes().eq_ignore_ascii_case(b"chunked"))
        .unwrap_or(false);
    let no_body = request.method() == Method::HEAD || matches!(status.as_u16(), 204 | 304);

    let body_bytes = if no_body {
        Bytes::new()
    } else if chunked {
        read_chunked_body(io, buf, read_timeout).await?
    } else if let Some(len) = content_length {
        read_fixed_body(io, buf, len, read_timeout).await?
    } else {
        read_to_close(io, buf, read_timeout).await?
    };

    let keep_alive = version == 1
        && !headers
            .get(http::header::CONNECTION)
            .map(|v| v.as_bytes().eq_ignore_ascii_case(b"close"))
            .unwrap_or(false)
        && (content_length.is_some() || chunked || no_body);

    let protocol = if version == 0 { Protocol::Http10 } else { Protocol::Http11 };
    let response = Response::new(Arc::new(owned_copy(request)), status, protocol, headers, ResponseBody::from_bytes(body_bytes));
    Ok((response, keep_alive))
}

fn find_header_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

async fn read_fixed_body(io: &mut crate::pool::BoxedIo, mut leftover: BytesMut, len: u64, read_timeout: std::time::Duration) -> Result<Bytes, Error> {
    while (leftover.len() as u64) < len {
        let mut chunk = [0u8; 8192];
        let n = timeout(read_timeout, io.read(&mut chunk)).await.map_err(Error::timeout)?.map_err(Error::io)?;
        if n == 0 {
            return Err(Error::protocol("connection closed before full body received"));
        }
        leftover.extend_from_slice(&chunk[..n]);
    }
    leftover.truncate(len as usize);
    Ok(leftover.freeze())
}

async fn read_to_close(io: &mut crate::pool::BoxedIo, mut leftover: BytesMut, read_timeout: std::time::Duration) -> Result<Bytes, Error> {
    loop {
        let mut chunk = [0u8; 8192];
        let n = match timeout(read_timeout, io.read(&mut chunk)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(Error::io(e)),
            Err(_) => break,
        };
        if n == 0 {
            break;
        }
        leftover.extend_from_slice(&chunk[..n]);
    }
    Ok(leftover.freeze())
}

async fn read_chunked_body(io: &mut crate::pool::BoxedIo, mut buf: BytesMut, read_timeout: std::time::Duration) -> Result<Bytes, Error> {
    let mut out = BytesMut::new();
    loop {
        let size_line_end = loop {
            if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
                break pos;
            }
            fill(io, &mut buf, read_timeout).await?;
        };
        let size_line = buf.split_to(size_line_end + 2);
        let size_str = std::str::from_utf8(&size_line[..size_line.len() - 2]).map_err(Error::protocol)?;
        let size_str = size_str.split(';').next().unwrap_or("0").trim();
        let size = usize::from_str_radix(size_str, 16).map_err(Error::protocol)?;
        if size == 0 {
            while !buf.ends_with(b"\r\n\r\n") && !buf.is_empty() {
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
                fill(io, &mut buf, read_timeout).await?;
            }
            break;
        }
        while buf.len() < size + 2 {
            fill(io, &mut buf, read_timeout).await?;
        }
        out.extend_from_slice(&buf[..size]);
        let _ = buf.split_to(size + 2);
    }
    Ok(out.freeze())
}

async fn fill(io: &mut crate::pool::BoxedIo, buf: &mut BytesMut, read_timeout: std::time::Duration) -> Result<(), Error> {
    let mut chunk = [0u8; 4096];
    let n = timeout(read_timeout, io.read(&mut chunk)).await.map_err(Error::timeout)?.map_err(Error::io)?;
    if n == 0 {
        return Err(Error::protocol("connection closed mid-chunked-body"));
    }
    buf.extend_from_slice(&chunk[..n]);
    Ok(())
}

fn build_h1_head(request: &Request) -> String {
    let mut path = request.url().path().to_string();
    if path.is_empty() {
        path.push('/');
    }
    if let Some(query) = request.url().query() {
        path.push('?');
        path.push_str(query);
    }
    let mut head = format!("{} {} HTTP/1.1\r\n", request.method(), path);
    for (name, value) in request.headers() {
        head.push_str(name.as_str());
        head.push_str(": ");
        head.push_str(value.to_str().unwrap_or_default());
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    head
}

/// Buffers a request body into memory before writing it. The network
/// interceptor only ever sees `&Request` (never owns it, since the retry
/// interceptor may need to reissue the same `Request` on a later attempt),
/// so a body that can't produce a cheap owned copy — i.e. a genuinely
/// single-pass streaming body — can't be drained from here; callers that
/// need true streaming uploads must supply a bytes-backed or otherwise
/// `try_clone`-able [`crate::body::Body`].
async fn buffer_body(body: &crate::body::Body) -> Result<Bytes, Error> {
    let clone = body
        .try_clone()
        .ok_or_else(|| Error::protocol("this connection requires a replayable (non single-pass-streaming) request body"))?;
    let mut stream = clone.into_stream();
    let mut out = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.map_err(Error::protocol)?);
    }
    Ok(out.freeze())
}

/// The outgoing `Request` is borrowed for the duration of the exchange, but
/// `Response` needs to own one (callers may outlive the call). `Request`
/// deliberately isn't `Clone` (its body may be a single-pass stream); the
/// response's copy never needs a body, so it is rebuilt without one.
fn owned_copy(request: &Request) -> Request {
    let mut builder = crate::request::RequestBuilder::new(request.method().clone(), request.url().as_str());
    for (name, value) in request.headers() {
        builder = builder.add_header(name.clone(), value.clone());
    }
    builder.build().unwrap_or_else(|_| {
        crate::request::RequestBuilder::new(Method::GET, "http://invalid.invalid/")
            .build()
            .expect("static fallback url always builds")
    })
}
