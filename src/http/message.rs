/// HTTP request methods accepted by the server.
///
/// Anything other than GET and POST is rejected while reading the request
/// line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET - static files, status page, admin actions
    GET,
    /// POST - commands with a content body
    POST,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// Matching is case-sensitive, as on the wire.
    ///
    /// ```
    /// # use docserve::http::message::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// assert_eq!(Method::from_str("PUT"), None);
    /// ```
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
        }
    }
}

/// A parsed HTTP message.
///
/// Incoming connections produce requests (`method` and `uri` set), outgoing
/// connections produce responses (`status` and `status_description` set).
/// Only recognised headers are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpMessage {
    pub method: Option<Method>,
    /// Request URI, percent-decoded
    pub uri: String,
    /// Protocol version without the `HTTP/` prefix, e.g. `1.0`
    pub version: String,
    pub status: Option<u16>,
    pub status_description: String,
    /// Recognised headers in arrival order
    pub headers: Vec<(String, String)>,
    pub content_length: Option<usize>,
    pub content: Vec<u8>,
}

impl HttpMessage {
    /// Looks up a header by name, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.header("Content-Encoding")
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    pub fn authorization(&self) -> Option<&str> {
        self.header("Authorization")
    }

    pub fn is_get(&self) -> bool {
        self.method == Some(Method::GET)
    }

    /// Content as text, replacing invalid UTF-8.
    pub fn content_text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}
