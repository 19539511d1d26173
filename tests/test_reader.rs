//! Tests for the incremental message reader

use docserve::http::message::Method;
use docserve::http::reader::{Direction, MessageReader, Progress, ReadError, ReaderState, UnknownHeaderPolicy};

fn started(direction: Direction, policy: UnknownHeaderPolicy) -> MessageReader {
    let mut reader = MessageReader::new(direction);
    reader.start(policy);
    reader
}

#[test]
fn test_content_length_completes_exactly() {
    let request = b"POST /ProcessRequest HTTP/1.0\r\nContent-Length: 10\r\n\r\n0123456789";
    let (head, body) = request.split_at(request.len() - 10);

    let mut reader = started(Direction::Incoming, UnknownHeaderPolicy::Reject);
    assert_eq!(reader.feed(head).unwrap(), Progress::NeedMore);
    assert_eq!(reader.state(), ReaderState::ReadingContent);

    // Nine bytes are not enough.
    assert_eq!(reader.feed(&body[..9]).unwrap(), Progress::NeedMore);
    let Progress::Complete(message) = reader.feed(&body[9..]).unwrap() else {
        panic!("message should be complete after the tenth byte");
    };
    assert_eq!(message.content, b"0123456789".to_vec());
    assert_eq!(message.content_length, Some(10));
    assert_eq!(reader.state(), ReaderState::Done);
}

#[test]
fn test_byte_by_byte_delivery() {
    let request = b"POST /ping HTTP/1.1\r\nContent-Type: text/plain\r\nContent-Length: 3\r\n\r\nabc";
    let mut reader = started(Direction::Incoming, UnknownHeaderPolicy::Reject);

    let mut completed = None;
    for (i, byte) in request.iter().enumerate() {
        match reader.feed(std::slice::from_ref(byte)).unwrap() {
            Progress::NeedMore => assert!(i + 1 < request.len(), "still waiting after the last byte"),
            Progress::Complete(message) => {
                assert_eq!(i + 1, request.len(), "completed before the last byte");
                completed = Some(message);
            }
            Progress::Ignored => panic!("reader stopped early"),
        }
    }
    let message = completed.unwrap();
    assert_eq!(message.method, Some(Method::POST));
    assert_eq!(message.content_type(), Some("text/plain"));
    assert_eq!(message.content_text(), "abc");
}

#[test]
fn test_extra_bytes_stay_buffered() {
    let mut reader = started(Direction::Incoming, UnknownHeaderPolicy::Reject);
    let progress = reader
        .feed(b"POST /ping HTTP/1.0\r\nContent-Length: 2\r\n\r\nhiGET /status HTTP/1.0\r\n\r\n")
        .unwrap();
    let Progress::Complete(first) = progress else {
        panic!("first message should be complete");
    };
    assert_eq!(first.content, b"hi".to_vec());
    assert!(reader.has_buffered());

    // The pipelined request survives a reset.
    reader.reset();
    reader.start(UnknownHeaderPolicy::Reject);
    let Progress::Complete(second) = reader.feed(&[]).unwrap() else {
        panic!("second message should come from the buffer");
    };
    assert_eq!(second.uri, "/status");
}

#[test]
fn test_incoming_without_content_length_has_no_content() {
    let mut reader = started(Direction::Incoming, UnknownHeaderPolicy::Reject);
    let Progress::Complete(message) = reader.feed(b"POST /ping HTTP/1.0\r\n\r\n").unwrap() else {
        panic!("expected completion at the blank line");
    };
    assert!(message.content.is_empty());
}

#[test]
fn test_unknown_header_policies() {
    let post = b"POST /ping HTTP/1.0\r\nX-Trace: 1\r\nContent-Length: 0\r\n\r\n";
    let get = b"GET /status HTTP/1.0\r\nX-Trace: 1\r\n\r\n";

    let mut reject = started(Direction::Incoming, UnknownHeaderPolicy::Reject);
    assert_eq!(reject.feed(get), Err(ReadError::UnknownHeader("X-Trace".to_string())));

    let mut ignore = started(Direction::Incoming, UnknownHeaderPolicy::Ignore);
    assert!(matches!(ignore.feed(post).unwrap(), Progress::Complete(_)));

    let mut for_get = started(Direction::Incoming, UnknownHeaderPolicy::IgnoreForGet);
    assert!(matches!(for_get.feed(get).unwrap(), Progress::Complete(_)));
    let mut for_get = started(Direction::Incoming, UnknownHeaderPolicy::IgnoreForGet);
    assert_eq!(for_get.feed(post), Err(ReadError::UnknownHeader("X-Trace".to_string())));
}

#[test]
fn test_malformed_lines() {
    let mut reader = started(Direction::Incoming, UnknownHeaderPolicy::Ignore);
    assert!(matches!(reader.feed(b"PUT / HTTP/1.0\r\n"), Err(ReadError::BadRequestLine(_))));

    let mut reader = started(Direction::Incoming, UnknownHeaderPolicy::Ignore);
    assert!(matches!(reader.feed(b"GET /\r\n"), Err(ReadError::BadRequestLine(_))));

    let mut reader = started(Direction::Incoming, UnknownHeaderPolicy::Ignore);
    assert!(matches!(
        reader.feed(b"GET / HTTP/1.0\r\nno colon here\r\n\r\n"),
        Err(ReadError::BadHeaderLine(_))
    ));

    let mut reader = started(Direction::Incoming, UnknownHeaderPolicy::Ignore);
    assert!(matches!(
        reader.feed(b"POST / HTTP/1.0\r\nContent-Length: -4\r\n\r\n"),
        Err(ReadError::BadContentLength(_))
    ));

    let mut reader = started(Direction::Incoming, UnknownHeaderPolicy::Ignore);
    assert!(matches!(reader.feed(b"GET /a%zz HTTP/1.0\r\n"), Err(ReadError::BadUriEscape(_))));
}

#[test]
fn test_leading_blank_lines_are_skipped() {
    let mut reader = started(Direction::Incoming, UnknownHeaderPolicy::Reject);
    let Progress::Complete(message) = reader.feed(b"\r\n\r\nGET /x%20y HTTP/1.0\r\n\r\n").unwrap() else {
        panic!("expected a message");
    };
    assert_eq!(message.uri, "/x y");
}

#[test]
fn test_eof_handling() {
    let mut idle = started(Direction::Incoming, UnknownHeaderPolicy::Reject);
    idle.feed(b"\r\n").unwrap();
    assert_eq!(idle.finish(), Ok(None));

    let mut partial = started(Direction::Incoming, UnknownHeaderPolicy::Reject);
    partial.feed(b"GET /sta").unwrap();
    assert_eq!(partial.finish(), Err(ReadError::UnexpectedEof));

    let mut short_body = started(Direction::Incoming, UnknownHeaderPolicy::Reject);
    short_body.feed(b"POST / HTTP/1.0\r\nContent-Length: 5\r\n\r\nab").unwrap();
    assert_eq!(short_body.finish(), Err(ReadError::UnexpectedEof));
}

#[test]
fn test_outgoing_status_line_and_read_to_eof() {
    let mut reader = started(Direction::Outgoing, UnknownHeaderPolicy::Ignore);
    assert_eq!(
        reader.feed(b"HTTP/1.0 200 OK\r\nServer: test\r\n\r\n<Document/>").unwrap(),
        Progress::NeedMore
    );
    reader.feed(b"\n").unwrap();

    let message = reader.finish().unwrap().unwrap();
    assert_eq!(message.status, Some(200));
    assert_eq!(message.status_description, "OK");
    assert_eq!(message.content_text(), "<Document/>\n");
}

#[test]
fn test_outgoing_bad_status_line() {
    let mut reader = started(Direction::Outgoing, UnknownHeaderPolicy::Ignore);
    assert!(matches!(reader.feed(b"HTTP/1.0 OK\r\n"), Err(ReadError::BadStatusLine(_))));
}

#[test]
fn test_raw_message_is_kept() {
    let request = b"POST /ping HTTP/1.0\r\nContent-Length: 1\r\n\r\nx";
    let mut reader = started(Direction::Incoming, UnknownHeaderPolicy::Reject);
    assert!(matches!(reader.feed(request).unwrap(), Progress::Complete(_)));
    assert_eq!(reader.raw_message(), &request[..]);
}
