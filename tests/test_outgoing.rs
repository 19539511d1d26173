//! Tests for outgoing fetches

use std::io::Cursor;
use std::time::Duration;

use docserve::http::connection::ConnectionIds;
use docserve::http::message::HttpMessage;
use docserve::http::outgoing::{FetchTimeouts, OutgoingConnection, ResponseHandler, build_get_request};
use docserve::transport::StdioTransport;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Debug, Default)]
struct Recorder {
    responses: Vec<HttpMessage>,
    errors: Vec<String>,
}

impl ResponseHandler for Recorder {
    fn on_response(&mut self, message: HttpMessage) {
        self.responses.push(message);
    }

    fn on_error(&mut self, description: String) {
        self.errors.push(description);
    }
}

/// Serves one canned reply and returns the request it saw.
async fn one_shot_server(reply: &'static [u8]) -> (u16, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let task = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.ends_with(b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        socket.write_all(reply).await.unwrap();
        socket.shutdown().await.unwrap();
        String::from_utf8(request).unwrap()
    });
    (port, task)
}

fn fetch_from(port: u16, path: &str) -> OutgoingConnection<Recorder> {
    OutgoingConnection::new(
        ConnectionIds::new(),
        "127.0.0.1",
        port,
        build_get_request("127.0.0.1", port, path),
        Recorder::default(),
        FetchTimeouts::default(),
    )
}

#[test]
fn test_build_get_request() {
    let request = String::from_utf8(build_get_request("docs.local", 80, "")).unwrap();
    assert_eq!(
        request,
        "GET / HTTP/1.0\r\nHost: docs.local\r\nAccept: */*\r\nConnection: close\r\n\r\n"
    );
}

#[tokio::test]
async fn test_fetch_with_content_length() {
    let (port, server) = one_shot_server(b"HTTP/1.0 200 OK\r\nContent-Length: 11\r\n\r\n<Document/>").await;

    let recorder = fetch_from(port, "/doc.xml?v=1").fetch().await;
    assert!(recorder.errors.is_empty(), "unexpected errors: {:?}", recorder.errors);
    assert_eq!(recorder.responses.len(), 1);
    assert_eq!(recorder.responses[0].status, Some(200));
    assert_eq!(recorder.responses[0].content_text(), "<Document/>");

    let request = server.await.unwrap();
    assert!(request.starts_with("GET /doc.xml?v=1 HTTP/1.0\r\n"));
    assert!(request.contains(&format!("Host: 127.0.0.1:{}\r\n", port)));
}

#[tokio::test]
async fn test_fetch_reads_to_end_of_stream() {
    let (port, _server) = one_shot_server(b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n\r\nno length here").await;

    let recorder = fetch_from(port, "/t.txt").fetch().await;
    assert_eq!(recorder.responses.len(), 1);
    assert_eq!(recorder.responses[0].content_text(), "no length here");
}

#[tokio::test]
async fn test_fetch_reports_non_200_as_a_response() {
    let (port, _server) = one_shot_server(b"HTTP/1.0 404 Not Found\r\nContent-Length: 0\r\n\r\n").await;

    let recorder = fetch_from(port, "/missing").fetch().await;
    assert_eq!(recorder.responses[0].status, Some(404));
    assert_eq!(recorder.responses[0].status_description, "Not Found");
}

#[tokio::test]
async fn test_fetch_reports_connection_refused() {
    // Grab a free port, then close it again.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let recorder = fetch_from(port, "/").fetch().await;
    assert!(recorder.responses.is_empty());
    assert_eq!(recorder.errors.len(), 1);
    assert!(recorder.errors[0].starts_with("Unable to connect to 127.0.0.1:"));
}

#[tokio::test]
async fn test_fetch_reports_early_close() {
    let (port, _server) = one_shot_server(b"HTTP/1.0 200 OK\r\nContent-Length: 50\r\n\r\nshort").await;

    let recorder = fetch_from(port, "/").fetch().await;
    assert!(recorder.responses.is_empty());
    assert_eq!(recorder.errors.len(), 1);
}

#[tokio::test]
async fn test_fetch_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    // Accepts, then never answers.
    let _silent = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(socket);
    });

    let timeouts = FetchTimeouts {
        connect: Duration::from_secs(1),
        request: Duration::from_millis(100),
    };
    let recorder = OutgoingConnection::new(
        ConnectionIds::new(),
        "127.0.0.1",
        port,
        build_get_request("127.0.0.1", port, "/"),
        Recorder::default(),
        timeouts,
    )
    .fetch()
    .await;
    assert_eq!(recorder.errors.len(), 1);
    assert!(recorder.errors[0].starts_with("Timed out waiting for a response"));
}

#[tokio::test]
async fn test_fetch_over_stdio_is_unsupported() {
    let transport = StdioTransport::new(Cursor::new(Vec::new()), Vec::new());
    let recorder = OutgoingConnection::with_transport(
        ConnectionIds::new(),
        transport,
        "127.0.0.1",
        80,
        build_get_request("127.0.0.1", 80, "/"),
        Recorder::default(),
        FetchTimeouts::default(),
    )
    .fetch()
    .await;
    assert!(recorder.responses.is_empty());
    assert!(recorder.errors[0].contains("connect is not supported by the stdio transport"));
}
