//! Tests for the socket and standard-stream transports

use std::io::Cursor;

use docserve::transport::{StdioTransport, TcpTransport, Transport, TransportError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[tokio::test]
async fn test_tcp_accept_and_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let client = tokio::spawn(async move {
        let mut client = TcpTransport::new();
        client.connect("127.0.0.1", port).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        let mut got = 0;
        while got < 4 {
            got += client.read_some(&mut buf[got..]).await.unwrap();
        }
        assert_eq!(&buf, b"pong");
        client.close();
        assert!(client.is_closed());
    });

    let mut server = TcpTransport::new();
    assert_eq!(server.endpoint_description(), "unconnected");
    server.accept(&listener).await.unwrap();
    assert_eq!(server.kind(), "tcp");
    assert_eq!(server.endpoint_description(), "127.0.0.1");

    let mut buf = [0u8; 4];
    let mut got = 0;
    while got < 4 {
        got += server.read_some(&mut buf[got..]).await.unwrap();
    }
    assert_eq!(&buf, b"ping");
    server.write_all(b"pong").await.unwrap();
    client.await.unwrap();

    // The peer closed: end of stream.
    assert_eq!(server.read_some(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn test_tcp_closed_and_unconnected() {
    let mut transport = TcpTransport::new();
    let mut buf = [0u8; 8];
    assert!(matches!(transport.read_some(&mut buf).await, Err(TransportError::NotConnected)));

    transport.close();
    assert!(matches!(transport.write_all(b"x").await, Err(TransportError::Closed)));
}

#[tokio::test]
async fn test_tcp_from_stream() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connect = tokio::spawn(async move {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"hi").await.unwrap();
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        rest
    });

    let (stream, _) = listener.accept().await.unwrap();
    let mut transport = TcpTransport::from_stream(stream);
    assert!(transport.peer_addr().is_some());
    let mut buf = [0u8; 2];
    let mut got = 0;
    while got < 2 {
        got += transport.read_some(&mut buf[got..]).await.unwrap();
    }
    transport.write_all(b"bye").await.unwrap();
    transport.close();
    assert_eq!(connect.await.unwrap(), b"bye".to_vec());
}

#[tokio::test]
async fn test_stdio_reads_and_writes() {
    let mut transport = StdioTransport::new(Cursor::new(b"request bytes".to_vec()), Vec::new());
    assert_eq!(transport.kind(), "stdio");
    assert_eq!(transport.endpoint_description(), "stdio");

    let mut buf = [0u8; 64];
    let n = transport.read_some(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"request bytes");
    assert_eq!(transport.read_some(&mut buf).await.unwrap(), 0);

    transport.write_all(b"HTTP/1.0 200 OK\r\n").await.unwrap();
    assert_eq!(transport.writer(), &b"HTTP/1.0 200 OK\r\n".to_vec());

    transport.close();
    assert!(transport.is_closed());
    assert!(matches!(transport.read_some(&mut buf).await, Err(TransportError::Closed)));
}

#[tokio::test]
async fn test_stdio_cannot_accept_or_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut transport = StdioTransport::new(Cursor::new(Vec::new()), Vec::new());

    let accept = transport.accept(&listener).await;
    assert!(matches!(
        accept,
        Err(TransportError::Unsupported {
            operation: "accept",
            transport: "stdio"
        })
    ));

    let connect = transport.connect("localhost", 80).await.unwrap_err();
    assert_eq!(connect.to_string(), "connect is not supported by the stdio transport");
}
