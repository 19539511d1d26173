//! Canned responses: error pages, the status page, admin acknowledgements.

use crate::envelope::element::escape;
use crate::http::response::{Response, ResponseBuilder, StatusCode};

pub const SERVER_NAME: &str = "docserve";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A request that cannot be served, with what to tell the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestError {
    pub status: StatusCode,
    pub explanation: String,
    /// Offending value, quoted after the explanation
    pub extra: Option<String>,
}

impl RequestError {
    pub fn new(status: StatusCode, explanation: impl Into<String>) -> Self {
        Self {
            status,
            explanation: explanation.into(),
            extra: None,
        }
    }

    pub fn bad_request(explanation: impl Into<String>) -> Self {
        Self::new(StatusCode::BadRequest, explanation)
    }

    pub fn not_found(explanation: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, explanation)
    }

    pub fn internal(explanation: impl Into<String>) -> Self {
        Self::new(StatusCode::InternalServerError, explanation)
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }

    /// HTML page for browsers, or a single line for a parent process.
    pub fn to_response(&self, subprocess: bool) -> Response {
        let label = self.status.error_label();
        let body = if subprocess {
            let mut line = format!("[{}] {}", label, self.explanation);
            if let Some(extra) = &self.extra {
                line.push_str(&format!(": \"{}\"", extra));
            }
            line.push_str("\r\n");
            line
        } else {
            let mut detail = escape(&self.explanation);
            if let Some(extra) = &self.extra {
                detail.push_str(&format!(": &quot;{}&quot;", escape(extra)));
            }
            format!(
                "<html>\r\n<head><title>{name}: {label}</title></head>\r\n<body>\r\n<h1>{name}: {code} {label}</h1>\r\n<p>{detail}</p>\r\n</body>\r\n</html>\r\n",
                name = SERVER_NAME,
                label = label,
                code = self.status.as_u16(),
                detail = detail
            )
        };

        let content_type = if subprocess { "text/plain" } else { "text/html" };
        ResponseBuilder::new(self.status)
            .reason(label)
            .header("Content-Type", content_type)
            .body(body)
            .build()
    }
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.status.as_u16(), self.explanation)?;
        if let Some(extra) = &self.extra {
            write!(f, ": \"{}\"", extra)?;
        }
        Ok(())
    }
}

/// Snapshot of what the status page shows.
#[derive(Debug, Clone, Default)]
pub struct StatusView {
    pub queue_status: String,
    /// `(connection id, description)` of open client connections
    pub connections: Vec<(u64, String)>,
    pub tasks_processed: u64,
    pub tasks_failed: u64,
    pub tasks_remaining: usize,
    /// Tasks per hour, excluding load time
    pub throughput: Option<f64>,
}

pub fn status_section(view: &StatusView) -> String {
    let mut out = format!("<h2>Current Status: {}</h2>\r\n<table>\r\n", escape(&view.queue_status));
    if !view.connections.is_empty() {
        out.push_str("<tr><th colspan=\"3\">Open Client Requests</th></tr>\r\n");
        for (id, description) in &view.connections {
            out.push_str(&format!(
                "  <tr><td>c{}</td><td colspan=\"2\">{}</td></tr>\r\n",
                id,
                escape(description)
            ));
        }
    }
    out.push_str("<tr><th colspan=\"3\">Statistics</th></tr>\r\n");
    out.push_str(&format!(
        "<tr><td colspan=\"2\">Successfully completed tasks</td><td>{}</td></tr>\r\n",
        view.tasks_processed
    ));
    out.push_str(&format!(
        "<tr><td colspan=\"2\">Failed tasks</td><td>{}</td></tr>\r\n",
        view.tasks_failed
    ));
    out.push_str(&format!(
        "<tr><td colspan=\"2\">Tasks queued</td><td>{}</td></tr>\r\n",
        view.tasks_remaining
    ));
    if let Some(throughput) = view.throughput {
        out.push_str(&format!(
            "<tr><td colspan=\"2\">Average throughput</td><td>{:.2} tasks/hr</td></tr>\r\n",
            throughput
        ));
    }
    out.push_str("</table>\r\n");
    out
}

pub fn status_page(view: &StatusView) -> String {
    format!(
        "<html>\r\n<head>\r\n<title>{name} Status</title>\r\n</head>\r\n<body>\r\n<h1>{name} Status</h1>\r\n{section}<p><a href=\"/\">{name} Home</a></p>\r\n</body>\r\n</html>\r\n",
        name = SERVER_NAME,
        section = status_section(view)
    )
}

pub fn actions_section() -> String {
    let mut out = String::from("<h2>Server Control</h2>\r\n");
    for action in ["Shutdown", "ImmediateShutdown", "Restart", "ImmediateRestart"] {
        out.push_str(&format!(
            "<form action=\"{0}\" id=\"{0}Form\" method=\"post\" style=\"display: none;\"></form>\r\n",
            action
        ));
    }
    out.push_str("<ul>\r\n");
    for (verb, prefix) in [("Shut down", "Shutdown"), ("Restart", "Restart")] {
        out.push_str(&format!(
            "  <li>{verb} the server...\r\n    <ul>\r\n      <li><a href=\"javascript: document.getElementById('Immediate{prefix}Form').submit()\">Immediately</a></li>\r\n      <li><a href=\"javascript: document.getElementById('{prefix}Form').submit()\">After it finishes any pending requests</a></li>\r\n    </ul>\r\n  </li>\r\n",
            verb = verb,
            prefix = prefix
        ));
    }
    out.push_str("</ul>\r\n");
    out
}

/// Acknowledgement sent before a shutdown or restart takes effect.
pub fn admin_page(restart: bool) -> String {
    if restart {
        format!(
            "<html>\r\n<head>\r\n<title>{name}: Restart</title>\r\n<meta http-equiv=\"refresh\" content=\"5;url=/\"></head>\r\n<body>\r\n<h1>Restarting {name}...</h1>\r\n<p>Please wait while the server restarts.</p>\r\n</body></html>\r\n",
            name = SERVER_NAME
        )
    } else {
        format!(
            "<html>\r\n<head>\r\n<title>{name}: Shutdown</title>\r\n</head>\r\n<body>\r\nShutting down {name}...\r\n</body>\r\n</html>\r\n",
            name = SERVER_NAME
        )
    }
}

/// Content type for a static file, by extension.
pub fn content_type_for(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "css" => "text/css",
        Some(ext) if ext == "js" => "text/javascript",
        _ => "text/html",
    }
}
