//! End-to-end tests for the streaming transport against a local HTTP server.

use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use va_domain::config::{AuthConfig, LlmConfig};
use va_domain::error::Error;
use va_domain::stream::RawFrame;
use va_domain::tool::Message;
use va_providers::{ChatRequest, ChatTransport, OpenAiCompatTransport};

/// Read one HTTP request (headers plus `Content-Length` body) and return it.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.expect("read request");
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&raw).to_string();
        if let Some(head_end) = text.find("\r\n\r\n") {
            let content_length = text[..head_end]
                .lines()
                .find_map(|l| {
                    let lower = l.to_ascii_lowercase();
                    lower
                        .strip_prefix("content-length:")
                        .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                })
                .unwrap_or(0);
            if raw.len() >= head_end + 4 + content_length {
                return text;
            }
        }
    }
    String::from_utf8_lossy(&raw).to_string()
}

async fn serve_once(status_line: &'static str, body: String, hold_open: bool) -> (String, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let request = read_request(&mut socket).await;
        let head = format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n"
        );
        socket.write_all(head.as_bytes()).await.expect("write head");
        socket.write_all(body.as_bytes()).await.expect("write body");
        socket.flush().await.expect("flush");
        if hold_open {
            // Wait for the client to hang up.
            let mut sink = [0u8; 64];
            let _ = socket.read(&mut sink).await;
        }
        request
    });
    (format!("http://{addr}/v1"), handle)
}

/// Like [`serve_once`] but writes the body in separate pieces with a pause
/// between them, so each lands in its own network read.
async fn serve_pieces(pieces: Vec<Vec<u8>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        read_request(&mut socket).await;
        let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n";
        socket.write_all(head.as_bytes()).await.expect("write head");
        for piece in pieces {
            socket.write_all(&piece).await.expect("write piece");
            socket.flush().await.expect("flush");
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    });
    format!("http://{addr}/v1")
}

fn transport(base_url: String) -> OpenAiCompatTransport {
    let cfg = LlmConfig {
        base_url,
        model: "test-model".into(),
        auth: AuthConfig {
            env: None,
            key: Some("sk-test".into()),
        },
        ..LlmConfig::default()
    };
    OpenAiCompatTransport::from_config(&cfg).expect("transport")
}

fn request() -> ChatRequest {
    ChatRequest {
        messages: vec![Message::system("sys"), Message::user("hello")],
        ..ChatRequest::default()
    }
}

#[tokio::test]
async fn frames_are_forwarded_verbatim_until_sentinel() {
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: not json at all\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: [DONE]\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"after done\"}}]}\n\n",
    )
    .to_string();
    let (url, server) = serve_once("200 OK", body, false).await;

    let t = transport(url);
    let mut stream = t
        .stream_completion(&request(), CancellationToken::new())
        .await
        .expect("open stream");

    let mut frames = Vec::new();
    while let Some(item) = stream.next().await {
        frames.push(item.expect("frame"));
    }

    assert_eq!(
        frames,
        vec![
            RawFrame::new("{\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}"),
            RawFrame::new("not json at all"),
            RawFrame::new("{\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}"),
        ]
    );

    let raw_request = server.await.expect("server");
    assert!(raw_request.starts_with("POST /v1/chat/completions"));
    assert!(raw_request.to_ascii_lowercase().contains("authorization: bearer sk-test"));
    assert!(raw_request.contains("\"stream\":true"));
    assert!(raw_request.contains("\"model\":\"test-model\""));
}

#[tokio::test]
async fn non_success_status_reports_body() {
    let (url, _server) = serve_once(
        "401 Unauthorized",
        "{\"error\":{\"message\":\"invalid api key\"}}".into(),
        false,
    )
    .await;

    let t = transport(url);
    let err = match t.stream_completion(&request(), CancellationToken::new()).await {
        Ok(_) => panic!("expected failure"),
        Err(e) => e,
    };
    match err {
        Error::Provider { message, .. } => {
            assert!(message.contains("401"));
            assert!(message.contains("invalid api key"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn cancellation_closes_stream_with_cancelled_error() {
    let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n".to_string();
    let (url, server) = serve_once("200 OK", body, true).await;

    let t = transport(url);
    let cancel = CancellationToken::new();
    let mut stream = t
        .stream_completion(&request(), cancel.clone())
        .await
        .expect("open stream");

    let first = stream.next().await.expect("first item").expect("frame");
    assert!(first.as_str().contains("Hello"));

    cancel.cancel();
    match stream.next().await {
        Some(Err(Error::Cancelled)) => {}
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert!(stream.next().await.is_none());

    // The server only finishes once the client has closed the socket.
    tokio::time::timeout(std::time::Duration::from_secs(5), server)
        .await
        .expect("connection was closed")
        .expect("server task");
}

#[tokio::test]
async fn empty_conversation_is_rejected() {
    let t = transport("http://127.0.0.1:9/v1".into());
    let err = match t
        .stream_completion(&ChatRequest::default(), CancellationToken::new())
        .await
    {
        Ok(_) => panic!("expected failure"),
        Err(e) => e,
    };
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn character_split_across_reads_arrives_intact() {
    let event = "data: {\"choices\":[{\"delta\":{\"content\":\"你好\"}}]}\n\ndata: [DONE]\n\n";
    let bytes = event.as_bytes();
    // One byte into the three-byte encoding of the first character.
    let cut = bytes.iter().position(|&b| b >= 0x80).expect("non-ascii") + 1;
    let url = serve_pieces(vec![bytes[..cut].to_vec(), bytes[cut..].to_vec()]).await;

    let t = transport(url);
    let mut stream = t
        .stream_completion(&request(), CancellationToken::new())
        .await
        .expect("open stream");

    let mut frames = Vec::new();
    while let Some(item) = stream.next().await {
        frames.push(item.expect("frame"));
    }

    assert_eq!(
        frames,
        vec![RawFrame::new("{\"choices\":[{\"delta\":{\"content\":\"你好\"}}]}")]
    );
}
