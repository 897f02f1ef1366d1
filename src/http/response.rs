use async_trait::async_trait;

use crate::lifecycle::ProtocolUpgrade;

/// HTTP status codes supported by the server.
///
/// Common HTTP status codes used in responses:
/// - `SwitchingProtocols` (101): Protocol upgrade accepted
/// - `Ok` (200): Request successful
/// - `NoContent` (204): Successful request with no content
/// - `Forbidden` (403): Request refused
/// - `NotFound` (404): Resource not found
/// - `InternalServerError` (500): Server error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 101 Switching Protocols
    SwitchingProtocols,
    /// 200 OK
    Ok,
    /// 204 No Content
    NoContent,
    /// 403 Forbidden
    Forbidden,
    /// 404 Not Found
    NotFound,
    /// 500 Internal Server Error
    InternalServerError,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use miniwebd::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::NotFound.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::SwitchingProtocols => 101,
            StatusCode::Ok => 200,
            StatusCode::NoContent => 204,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::InternalServerError => 500,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::SwitchingProtocols => "Switching Protocols",
            StatusCode::Ok => "OK",
            StatusCode::NoContent => "No Content",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::InternalServerError => "Internal Server Error",
        }
    }

    /// False for statuses that must not carry a body or framing headers.
    pub fn allows_body(&self) -> bool {
        !matches!(self, StatusCode::SwitchingProtocols | StatusCode::NoContent)
    }
}

/// A response body producer.
///
/// The connection pulls the body through [`Response::read`] until it reports
/// the end. A response with an unknown [`Response::length`] is sent with
/// chunked transfer encoding.
#[async_trait]
pub trait Response: Send {
    fn status(&self) -> StatusCode {
        StatusCode::Ok
    }

    fn content_type(&self) -> &str {
        "text/plain"
    }

    fn charset(&self) -> Option<&str> {
        None
    }

    /// Body length in bytes, or `None` if unknown.
    fn length(&self) -> Option<u64>;

    /// Headers written after the standard ones. Headers that do not fit the
    /// header block are skipped.
    fn extra_headers(&self) -> &[(String, String)] {
        &[]
    }

    /// Fills `buf` with the next part of the body. Returns the number of
    /// bytes written and whether the body is complete. A read that produces
    /// no bytes also ends the body.
    async fn read(&mut self, buf: &mut [u8]) -> anyhow::Result<(usize, bool)>;

    /// Protocol switch to perform once the response head has been sent.
    fn upgrade(&mut self) -> Option<Box<dyn ProtocolUpgrade>> {
        None
    }
}

/// A response whose body is held in memory.
#[derive(Debug)]
pub struct BodyResponse {
    status: StatusCode,
    content_type: String,
    charset: Option<String>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    chunked: bool,
    pos: usize,
}

/// Builder for constructing [`BodyResponse`]s in a fluent style.
///
/// # Example
///
/// ```
/// # use miniwebd::http::response::{ResponseBuilder, StatusCode};
/// let response = ResponseBuilder::new(StatusCode::Ok)
///     .content_type("application/json")
///     .header("Cache-Control", "no-cache")
///     .body(b"{}".to_vec())
///     .build();
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    content_type: String,
    charset: Option<String>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    chunked: bool,
}

impl ResponseBuilder {
    /// Creates a new response builder with the specified status code.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            content_type: "text/plain".to_string(),
            charset: None,
            headers: Vec::new(),
            body: Vec::new(),
            chunked: false,
        }
    }

    /// Adds an extra header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    /// Sets the response body.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Sends the body with chunked transfer encoding instead of a
    /// `Content-Length`.
    pub fn chunked(mut self, chunked: bool) -> Self {
        self.chunked = chunked;
        self
    }

    pub fn build(self) -> BodyResponse {
        BodyResponse {
            status: self.status,
            content_type: self.content_type,
            charset: self.charset,
            headers: self.headers,
            body: self.body,
            chunked: self.chunked,
            pos: 0,
        }
    }
}

impl BodyResponse {
    /// Creates a simple 200 OK response with the given body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        ResponseBuilder::new(StatusCode::Ok).body(body).build()
    }

    pub fn html(body: impl Into<Vec<u8>>) -> Self {
        ResponseBuilder::new(StatusCode::Ok)
            .content_type("text/html")
            .charset("utf-8")
            .body(body)
            .build()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

#[async_trait]
impl Response for BodyResponse {
    fn status(&self) -> StatusCode {
        self.status
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    fn length(&self) -> Option<u64> {
        if self.chunked {
            None
        } else {
            Some(self.body.len() as u64)
        }
    }

    fn extra_headers(&self) -> &[(String, String)] {
        &self.headers
    }

    async fn read(&mut self, buf: &mut [u8]) -> anyhow::Result<(usize, bool)> {
        let rest = &self.body[self.pos..];
        let len = rest.len().min(buf.len());
        buf[..len].copy_from_slice(&rest[..len]);
        self.pos += len;
        Ok((len, self.pos == self.body.len()))
    }
}

/// Small HTML error page.
#[derive(Debug)]
pub struct ErrorResponse {
    inner: BodyResponse,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, resource: &str) -> Self {
        let detail = match status {
            StatusCode::Forbidden => format!("Access denied for resource: <b>{}</b>", escape_html(resource)),
            StatusCode::NotFound => format!(
                "The requested resource was not found: <b>{}</b>",
                escape_html(resource)
            ),
            _ => format!("Resource: <b>{}</b>", escape_html(resource)),
        };
        Self::page(status, &detail)
    }

    /// 500 page for a response source that failed.
    pub fn internal(resource: &str, error: &anyhow::Error) -> Self {
        let detail = format!(
            "Failed to create a response for <b>{}</b>: {}",
            escape_html(resource),
            escape_html(&error.to_string())
        );
        Self::page(StatusCode::InternalServerError, &detail)
    }

    fn page(status: StatusCode, detail: &str) -> Self {
        let title = format!("{} {}", status.as_u16(), status.reason_phrase());
        let body = format!(
            "<html><head><title>{title}</title></head>\n<body>\n<h1>{title}</h1>\n{detail}<br />\n</body></html>"
        );
        Self {
            inner: ResponseBuilder::new(status)
                .content_type("text/html")
                .charset("utf-8")
                .body(body)
                .build(),
        }
    }
}

#[async_trait]
impl Response for ErrorResponse {
    fn status(&self) -> StatusCode {
        self.inner.status()
    }

    fn content_type(&self) -> &str {
        self.inner.content_type()
    }

    fn charset(&self) -> Option<&str> {
        self.inner.charset()
    }

    fn length(&self) -> Option<u64> {
        self.inner.length()
    }

    async fn read(&mut self, buf: &mut [u8]) -> anyhow::Result<(usize, bool)> {
        self.inner.read(buf).await
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
