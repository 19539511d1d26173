/// Status codes the server sends. Anything an engine reports outside this
/// set is answered as a 500.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    BadRequest,
    /// Admin action without valid credentials
    Forbidden,
    /// Unknown URI, missing document root or failed remote fetch
    NotFound,
    InternalServerError,
}

/// (status, code, reason phrase, error label)
const STATUS_TABLE: &[(StatusCode, u16, &str, &str)] = &[
    (StatusCode::Ok, 200, "OK", "ERROR"),
    (StatusCode::BadRequest, 400, "Bad Request", "BAD REQUEST"),
    (StatusCode::Forbidden, 403, "Forbidden", "FORBIDDEN"),
    (StatusCode::NotFound, 404, "Not Found", "NOT FOUND"),
    (StatusCode::InternalServerError, 500, "Internal Server Error", "SERVER ERROR"),
];

impl StatusCode {
    fn row(&self) -> &'static (StatusCode, u16, &'static str, &'static str) {
        // Every variant has a row.
        let index = match self {
            StatusCode::Ok => 0,
            StatusCode::BadRequest => 1,
            StatusCode::Forbidden => 2,
            StatusCode::NotFound => 3,
            StatusCode::InternalServerError => 4,
        };
        &STATUS_TABLE[index]
    }

    /// ```
    /// # use docserve::http::response::StatusCode;
    /// assert_eq!(StatusCode::Forbidden.as_u16(), 403);
    /// ```
    pub fn as_u16(&self) -> u16 {
        self.row().1
    }

    pub fn from_u16(code: u16) -> Self {
        STATUS_TABLE
            .iter()
            .find(|row| row.1 == code)
            .map(|row| row.0)
            .unwrap_or(StatusCode::InternalServerError)
    }

    pub fn reason_phrase(&self) -> &'static str {
        self.row().2
    }

    /// Label used on the status line and title of error responses.
    ///
    /// ```
    /// # use docserve::http::response::StatusCode;
    /// assert_eq!(StatusCode::BadRequest.error_label(), "BAD REQUEST");
    /// assert_eq!(StatusCode::InternalServerError.error_label(), "SERVER ERROR");
    /// ```
    pub fn error_label(&self) -> &'static str {
        self.row().3
    }
}

/// A complete HTTP response ready to be written to a client. Headers keep
/// the order they were added in.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    /// Text after the code on the status line
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// ```
/// # use docserve::http::response::{ResponseBuilder, StatusCode};
/// let response = ResponseBuilder::new(StatusCode::Ok)
///     .header("Content-Type", "text/xml")
///     .body("<Response/>")
///     .build();
/// assert_eq!(response.header("Content-Length"), Some("11"));
/// ```
pub struct ResponseBuilder {
    response: Response,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            response: Response {
                status,
                reason: status.reason_phrase().to_string(),
                headers: Vec::new(),
                body: Vec::new(),
            },
        }
    }

    /// Replaces the standard reason phrase.
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.response.reason = reason.into();
        self
    }

    /// Adds a header, replacing any earlier one with the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.response.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.response.headers.push((name, value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.response.body = body.into();
        self
    }

    /// Finishes the response. `Content-Length` always leads the headers.
    pub fn build(self) -> Response {
        let mut response = self.response;
        if response.header("Content-Length").is_none() {
            response
                .headers
                .insert(0, ("Content-Length".to_string(), response.body.len().to_string()));
        }
        response
    }
}

impl Response {
    pub fn ok(content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        ResponseBuilder::new(StatusCode::Ok)
            .header("Content-Type", content_type)
            .body(body)
            .build()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
