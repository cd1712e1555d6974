//! End-to-end coverage for `Engine::websocket()` (SPEC_FULL §4.5, §8): a
//! loopback listener stands in for a peer, speaks the HTTP/1.1 Upgrade
//! handshake by hand, then exchanges raw RFC 6455 frames.

use std::time::Duration;

use base64::Engine as _;
use sha1::{Digest, Sha1};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use corewire::{Engine, RequestBuilder};

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

async fn read_request_head(socket: &mut TcpStream) -> (String, Vec<u8>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "peer closed before sending a full request head");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8(buf[..pos + 4].to_vec()).unwrap();
            let leftover = buf[pos + 4..].to_vec();
            return (head, leftover);
        }
    }
}

fn extract_header<'a>(head: &'a str, name: &str) -> &'a str {
    head.lines()
        .find_map(|line| {
            let (k, v) = line.split_once(':')?;
            k.trim().eq_ignore_ascii_case(name).then(|| v.trim())
        })
        .unwrap_or_else(|| panic!("missing header {name} in:\n{head}"))
}

fn accept_value(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Unmasked server->client frame (FIN/opcode/payload only; server frames
/// never set MASK per RFC 6455 §5.1).
fn encode_frame(fin: bool, opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![(if fin { 0x80 } else { 0x00 }) | opcode];
    let len = payload.len();
    if len < 126 {
        out.push(len as u8);
    } else if len <= u16::MAX as usize {
        out.push(126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }
    out.extend_from_slice(payload);
    out
}

struct ReadFrame {
    fin: bool,
    opcode: u8,
    payload: Vec<u8>,
}

/// Reads one masked client->server frame (client frames always set MASK).
async fn read_masked_frame(socket: &mut TcpStream) -> ReadFrame {
    let mut head = [0u8; 2];
    socket.read_exact(&mut head).await.unwrap();
    let fin = head[0] & 0x80 != 0;
    let opcode = head[0] & 0x0f;
    assert!(head[1] & 0x80 != 0, "client frames must be masked");
    let mut len = (head[1] & 0x7f) as u64;
    if len == 126 {
        let mut ext = [0u8; 2];
        socket.read_exact(&mut ext).await.unwrap();
        len = u16::from_be_bytes(ext) as u64;
    } else if len == 127 {
        let mut ext = [0u8; 8];
        socket.read_exact(&mut ext).await.unwrap();
        len = u64::from_be_bytes(ext);
    }
    let mut mask = [0u8; 4];
    socket.read_exact(&mut mask).await.unwrap();
    let mut payload = vec![0u8; len as usize];
    socket.read_exact(&mut payload).await.unwrap();
    for (i, b) in payload.iter_mut().enumerate() {
        *b ^= mask[i % 4];
    }
    ReadFrame { fin, opcode, payload }
}

async fn serve_handshake(socket: &mut TcpStream) -> Vec<u8> {
    let (head, leftover) = read_request_head(socket).await;
    assert!(head.starts_with("GET "), "expected an upgrade GET request:\n{head}");
    assert_eq!(extract_header(&head, "upgrade").to_ascii_lowercase(), "websocket");
    let key = extract_header(&head, "sec-websocket-key");
    let accept = accept_value(key);

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    );
    socket.write_all(response.as_bytes()).await.unwrap();
    socket.flush().await.unwrap();
    leftover
}

#[tokio::test]
async fn websocket_upgrade_and_text_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let leftover = serve_handshake(&mut socket).await;
        assert!(leftover.is_empty());

        let first = read_masked_frame(&mut socket).await;
        assert!(first.fin);
        assert_eq!(first.opcode, 0x1);
        assert_eq!(first.payload, b"hello from the client");

        socket.write_all(&encode_frame(true, 0x1, b"hello from the server")).await.unwrap();
        socket.flush().await.unwrap();

        let close = read_masked_frame(&mut socket).await;
        assert_eq!(close.opcode, 0x8);
        socket.write_all(&encode_frame(true, 0x8, &close.payload)).await.unwrap();
        socket.flush().await.unwrap();
    });

    let engine = Engine::default();
    let request = RequestBuilder::new(http::Method::GET, &format!("ws://{addr}/chat")).build().unwrap();
    let ws = engine.websocket(request).await.expect("upgrade should succeed against a well-behaved peer");

    ws.send_text("hello from the client").await.unwrap();

    let message = tokio::time::timeout(Duration::from_secs(5), ws.recv())
        .await
        .expect("recv should not hang")
        .expect("server should have sent a message");
    match message.unwrap() {
        corewire::Message::Text(text) => assert_eq!(text, "hello from the server"),
        other => panic!("expected a text message, got {other:?}"),
    }

    ws.close(1000, "bye").await.unwrap();
    let closed = tokio::time::timeout(Duration::from_secs(5), ws.recv()).await.unwrap();
    match closed {
        Some(Ok(corewire::Message::Close { code, .. })) => assert_eq!(code, Some(1000)),
        other => panic!("expected an echoed close, got {other:?}"),
    }

    tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
}

#[tokio::test]
async fn fragmented_text_message_reassembles_into_one_130_octet_payload() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let payload: Vec<u8> = (0..130u16).map(|i| b'a' + (i % 26) as u8).collect();
    let payload_for_server = payload.clone();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        serve_handshake(&mut socket).await;

        let (first_half, second_half) = payload_for_server.split_at(65);
        socket.write_all(&encode_frame(false, 0x1, first_half)).await.unwrap();
        socket.write_all(&encode_frame(true, 0x0, second_half)).await.unwrap();
        socket.flush().await.unwrap();

        // keep the socket alive long enough for the client to observe the message
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let engine = Engine::default();
    let request = RequestBuilder::new(http::Method::GET, &format!("ws://{addr}/chat")).build().unwrap();
    let ws = engine.websocket(request).await.unwrap();

    let message = tokio::time::timeout(Duration::from_secs(5), ws.recv())
        .await
        .expect("recv should not hang")
        .expect("should receive the reassembled message");
    match message.unwrap() {
        corewire::Message::Text(text) => assert_eq!(text.as_bytes(), payload.as_slice()),
        other => panic!("expected a text message, got {other:?}"),
    }

    tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
}

#[tokio::test]
async fn upgrade_rejects_a_mismatched_accept_header() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let (head, _leftover) = read_request_head(&mut socket).await;
        assert!(head.starts_with("GET "));
        let response = "HTTP/1.1 101 Switching Protocols\r\n\
                         Upgrade: websocket\r\n\
                         Connection: Upgrade\r\n\
                         Sec-WebSocket-Accept: not-the-right-value\r\n\r\n";
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();
    });

    let engine = Engine::default();
    let request = RequestBuilder::new(http::Method::GET, &format!("ws://{addr}/chat")).build().unwrap();
    let err = engine.websocket(request).await.expect_err("a forged accept header must be rejected");
    assert!(err.is_protocol());

    tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
}
