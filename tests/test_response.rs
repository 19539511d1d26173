use docserve::http::pages::{RequestError, StatusView, admin_page, content_type_for, status_page};
use docserve::http::response::{Response, ResponseBuilder, StatusCode};
use docserve::http::writer::serialize_response;

#[test]
fn test_status_code_as_u16() {
    assert_eq!(StatusCode::Ok.as_u16(), 200);
    assert_eq!(StatusCode::BadRequest.as_u16(), 400);
    assert_eq!(StatusCode::Forbidden.as_u16(), 403);
    assert_eq!(StatusCode::NotFound.as_u16(), 404);
    assert_eq!(StatusCode::InternalServerError.as_u16(), 500);
}

#[test]
fn test_status_code_from_u16_falls_back_to_500() {
    assert_eq!(StatusCode::from_u16(400), StatusCode::BadRequest);
    assert_eq!(StatusCode::from_u16(404), StatusCode::NotFound);
    assert_eq!(StatusCode::from_u16(418), StatusCode::InternalServerError);
}

#[test]
fn test_response_builder_auto_content_length() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .body(b"This is the body".to_vec())
        .build();

    assert_eq!(response.header("content-length"), Some("16"));
    assert_eq!(response.reason, "OK");
}

#[test]
fn test_response_builder_custom_reason() {
    let response = ResponseBuilder::new(StatusCode::NotFound)
        .reason("NOT FOUND")
        .build();
    assert_eq!(response.reason, "NOT FOUND");
    assert_eq!(response.header("Content-Length"), Some("0"));
}

#[test]
fn test_serialize_is_http_1_0_with_sorted_headers() {
    let response = Response::ok("text/xml", "<a/>");
    let text = String::from_utf8(serialize_response(&response)).unwrap();
    assert_eq!(
        text,
        "HTTP/1.0 200 OK\r\nContent-Length: 4\r\nContent-Type: text/xml\r\n\r\n<a/>"
    );
}

#[test]
fn test_error_page_in_network_mode() {
    let err = RequestError::not_found("Unknown URI").with_extra("/x<y>");
    let response = err.to_response(false);
    let body = String::from_utf8(response.body.clone()).unwrap();

    assert_eq!(response.status, StatusCode::NotFound);
    assert_eq!(response.reason, "NOT FOUND");
    assert_eq!(response.header("Content-Type"), Some("text/html"));
    assert!(body.contains("<h1>docserve: 404 NOT FOUND</h1>"));
    assert!(body.contains("Unknown URI: &quot;/x&lt;y&gt;&quot;"));
}

#[test]
fn test_error_line_in_subprocess_mode() {
    let response = RequestError::bad_request("Expected content")
        .with_extra("/sgm2apf")
        .to_response(true);
    assert_eq!(response.header("Content-Type"), Some("text/plain"));
    assert_eq!(response.body, b"[BAD REQUEST] Expected content: \"/sgm2apf\"\r\n".to_vec());

    let plain = RequestError::internal("Task failed").to_response(true);
    assert_eq!(plain.body, b"[SERVER ERROR] Task failed\r\n".to_vec());
}

#[test]
fn test_status_page_lists_connections_and_counts() {
    let view = StatusView {
        queue_status: "Waiting for a task".to_string(),
        connections: vec![(3, "127.0.0.1: Processing request".to_string())],
        tasks_processed: 5,
        tasks_failed: 1,
        tasks_remaining: 2,
        throughput: Some(12.5),
    };
    let page = status_page(&view);
    assert!(page.contains("Current Status: Waiting for a task"));
    assert!(page.contains("<td>c3</td>"));
    assert!(page.contains("<td>5</td>"));
    assert!(page.contains("12.50 tasks/hr"));

    let idle = status_page(&StatusView::default());
    assert!(!idle.contains("Open Client Requests"));
    assert!(!idle.contains("tasks/hr"));
}

#[test]
fn test_admin_pages() {
    assert!(admin_page(true).contains("Restarting docserve"));
    assert!(admin_page(false).contains("Shutting down docserve"));
}

#[test]
fn test_content_type_for() {
    assert_eq!(content_type_for("style/site.CSS"), "text/css");
    assert_eq!(content_type_for("app.js"), "text/javascript");
    assert_eq!(content_type_for("index.html"), "text/html");
    assert_eq!(content_type_for("README"), "text/html");
}
