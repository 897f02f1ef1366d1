//! Incremental HTTP request parser.
//!
//! The parser works directly on the connection's [`ReadBuffer`] and never
//! performs I/O itself: [`RequestParser::advance`] consumes whatever is
//! available and reports [`Progress::NeedData`] when the driver has to read
//! more. Header lines are kept in the buffer's relevant region and recorded as
//! [`HeaderSpan`]s, so a request without a body is parsed without copying.
//!
//! ```text
//! RequestLine -> Headers -> (POST) Content -> Complete
//!                        -> (other)          -> Complete
//! ```

use percent_encoding::percent_decode;

use crate::buffer::ReadBuffer;
use crate::config::{ConnectionConfig, UploadConfig};
use crate::error::HttpError;
use crate::http::header::{ContentType, HeaderName, HeaderSpan, Headers};
use crate::http::query::{MultipartDecoder, QueryParams};
use crate::http::request::{Method, Request, Version};

/// Outcome of one [`RequestParser::advance`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The buffered bytes have been processed; read more and call again.
    NeedData,
    /// A full request is available through [`RequestParser::request`].
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    RequestLine,
    Headers,
    Content,
    Complete,
}

enum Body {
    /// Read into the buffer as a whole. Url-encoded bodies are decoded into
    /// the query parameters afterwards.
    Buffered { url_encoded: bool },
    Multipart(MultipartDecoder),
}

/// Parts of a request line, borrowed from the line.
#[derive(Debug, PartialEq, Eq)]
pub struct RequestLine<'a> {
    pub method: Method,
    pub resource: &'a [u8],
    pub query: Option<&'a [u8]>,
    pub version: Version,
}

impl<'a> RequestLine<'a> {
    /// Splits `METHOD /resource[?query] HTTP/x.y`.
    pub fn parse(line: &'a [u8]) -> Result<Self, HttpError> {
        let method_end = find(line, |b| b == b' ').ok_or(HttpError::MalformedRequestLine)?;
        let method = Method::from_bytes(&line[..method_end]);

        let rest = &line[method_end + 1..];
        let resource_end =
            find(rest, |b| b == b' ' || b == b'?').ok_or(HttpError::MalformedRequestLine)?;
        let resource = &rest[..resource_end];

        let (query, rest) = if rest[resource_end] == b'?' {
            let query_part = &rest[resource_end + 1..];
            let query_end = find(query_part, |b| b == b' ').ok_or(HttpError::MalformedRequestLine)?;
            (Some(&query_part[..query_end]), &query_part[query_end + 1..])
        } else {
            (None, &rest[resource_end + 1..])
        };

        let slash = find(rest, |b| b == b'/').ok_or(HttpError::MalformedRequestLine)?;
        let version = if rest[slash + 1..].starts_with(b"1.0") {
            Version::Http10
        } else {
            Version::Http11
        };

        Ok(Self {
            method,
            resource,
            query,
            version,
        })
    }
}

fn find(bytes: &[u8], pred: impl Fn(u8) -> bool) -> Option<usize> {
    bytes.iter().position(|&b| pred(b))
}

/// Strips the `\n` or `\r\n` line terminator.
fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

pub struct RequestParser {
    limits: ConnectionConfig,
    upload: UploadConfig,
    state: State,
    /// Bytes of the current line already searched for a terminator.
    scanned: usize,

    method: Method,
    version: Version,
    resource: String,
    query: QueryParams,
    spans: Vec<HeaderSpan>,
    /// Private copy of the header block of a POST request.
    header_copy: Vec<u8>,
    headers_copied: bool,
    content_length: u64,
    remaining: u64,
    body: Option<Body>,
}

impl RequestParser {
    pub fn new(limits: ConnectionConfig, upload: UploadConfig) -> Self {
        Self {
            limits,
            upload,
            state: State::RequestLine,
            scanned: 0,
            method: Method::GET,
            version: Version::Http11,
            resource: String::new(),
            query: QueryParams::new(),
            spans: Vec::with_capacity(16),
            header_copy: Vec::new(),
            headers_copied: false,
            content_length: 0,
            remaining: 0,
            body: None,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn is_complete(&self) -> bool {
        self.state == State::Complete
    }

    /// True between requests, before any byte of the next one arrived.
    pub fn is_idle<const N: usize>(&self, buf: &ReadBuffer<N>) -> bool {
        self.state == State::RequestLine && buf.available_len() == 0
    }

    /// Parses as far as the buffered data allows.
    pub async fn advance<const N: usize>(&mut self, buf: &mut ReadBuffer<N>) -> Result<Progress, HttpError> {
        loop {
            let progressed = match self.state {
                State::RequestLine => self.parse_request_line(buf)?,
                State::Headers => self.parse_header_line(buf)?,
                State::Content => self.read_content(buf).await?,
                State::Complete => return Ok(Progress::Complete),
            };
            if !progressed {
                return Ok(Progress::NeedData);
            }
        }
    }

    /// The parsed request. Only meaningful once `advance` returned
    /// [`Progress::Complete`].
    pub fn request<'a, const N: usize>(
        &'a self,
        buf: &'a ReadBuffer<N>,
        peer: Option<std::net::SocketAddr>,
        connection_id: u64,
    ) -> Request<'a> {
        let header_buf = if self.headers_copied {
            &self.header_copy[..]
        } else {
            buf.relevant_data()
        };
        let content = match self.body {
            Some(Body::Buffered { .. }) => Some(buf.relevant_data()),
            _ => None,
        };

        Request {
            method: self.method,
            version: self.version,
            resource: &self.resource,
            query: &self.query,
            headers: Headers::new(header_buf, &self.spans),
            content,
            content_length: self.content_length,
            peer,
            connection_id,
        }
    }

    /// Prepares for the next request on the connection. Uploaded files of
    /// the previous request are deleted; pipelined bytes stay in the buffer.
    pub fn reset<const N: usize>(&mut self, buf: &mut ReadBuffer<N>) {
        buf.reset_relevant();
        if buf.available_len() == 0 {
            buf.reset();
        }

        self.state = State::RequestLine;
        self.scanned = 0;
        self.method = Method::GET;
        self.version = Version::Http11;
        self.resource.clear();
        self.query.clear();
        self.spans.clear();
        self.header_copy.clear();
        self.headers_copied = false;
        self.content_length = 0;
        self.remaining = 0;
        self.body = None;
    }

    /// Length of the next complete line in the available data, terminator
    /// included.
    fn next_line<const N: usize>(&mut self, buf: &ReadBuffer<N>) -> Result<Option<usize>, HttpError> {
        let available = buf.available_data();
        match find(&available[self.scanned..], |b| b == b'\n') {
            Some(pos) => {
                let len = self.scanned + pos + 1;
                self.scanned = 0;
                if trim_line_end(&available[..len]).len() > self.limits.max_header_length {
                    return Err(HttpError::HeadersTooLarge);
                }
                Ok(Some(len))
            }
            None => {
                self.scanned = available.len();
                // One extra byte for a trailing '\r'.
                if available.len() > self.limits.max_header_length + 1 {
                    return Err(HttpError::HeadersTooLarge);
                }
                Ok(None)
            }
        }
    }

    fn parse_request_line<const N: usize>(&mut self, buf: &mut ReadBuffer<N>) -> Result<bool, HttpError> {
        let Some(len) = self.next_line(buf)? else {
            return Ok(false);
        };

        let line = trim_line_end(&buf.available_data()[..len]);
        if !line.is_empty() {
            let request_line = RequestLine::parse(line)?;
            self.method = request_line.method;
            self.version = request_line.version;

            let path = request_line
                .resource
                .strip_prefix(b"/")
                .unwrap_or(request_line.resource);
            self.resource.clear();
            self.resource.push_str(&percent_decode(path).decode_utf8_lossy());

            if let Some(query) = request_line.query {
                self.query.add_url_encoded(query);
            }
            self.state = State::Headers;
        }

        // Empty lines before a request line are skipped.
        buf.consume(len, false);
        Ok(true)
    }

    fn parse_header_line<const N: usize>(&mut self, buf: &mut ReadBuffer<N>) -> Result<bool, HttpError> {
        let Some(len) = self.next_line(buf)? else {
            return Ok(false);
        };

        let line_start = buf.relevant_len();
        buf.consume(len, true);
        let relevant = buf.relevant_data();
        let line = trim_line_end(&relevant[line_start..]);

        if line.is_empty() {
            self.on_headers_end(buf)?;
            return Ok(true);
        }
        if relevant.len() > self.limits.max_headers_length {
            return Err(HttpError::HeadersTooLarge);
        }

        self.spans.push(HeaderSpan::parse(line, line_start)?);
        Ok(true)
    }

    fn on_headers_end<const N: usize>(&mut self, buf: &mut ReadBuffer<N>) -> Result<(), HttpError> {
        if self.method != Method::POST {
            self.state = State::Complete;
            return Ok(());
        }

        // The body is read into the same buffer, so the headers move out.
        self.header_copy.clear();
        self.header_copy.extend_from_slice(buf.relevant_data());
        self.headers_copied = true;
        buf.reset_relevant();

        let headers = Headers::new(&self.header_copy, &self.spans);
        let length = headers
            .get(HeaderName::ContentLength)
            .ok_or(HttpError::MissingHeader("Content-Length"))?
            .as_u64()
            .ok_or(HttpError::MalformedHeader)?;
        if length > self.limits.max_post_body_length {
            return Err(HttpError::BodyTooLarge {
                length,
                limit: self.limits.max_post_body_length,
            });
        }

        let body = match headers.get(HeaderName::ContentType).map(|h| h.content_type()) {
            Some(ContentType::UrlEncoded) => Body::Buffered { url_encoded: true },
            Some(ContentType::Multipart { boundary: Some(boundary) }) => {
                Body::Multipart(MultipartDecoder::new(boundary, self.upload.clone()))
            }
            Some(ContentType::Multipart { boundary: None }) => {
                return Err(HttpError::UnsupportedContentType);
            }
            Some(ContentType::Other) | None => Body::Buffered { url_encoded: false },
        };

        self.body = Some(body);
        self.content_length = length;
        self.remaining = length;
        self.state = State::Content;
        Ok(())
    }

    async fn read_content<const N: usize>(&mut self, buf: &mut ReadBuffer<N>) -> Result<bool, HttpError> {
        match &mut self.body {
            Some(Body::Buffered { url_encoded }) => {
                let len = usize::try_from(self.remaining).map_err(|_| HttpError::BodyTooLarge {
                    length: self.remaining,
                    limit: self.limits.max_post_body_length,
                })?;
                if !buf.request_data(len) {
                    return Ok(false);
                }

                buf.consume(len, true);
                if *url_encoded {
                    self.query.add_url_encoded(buf.relevant_data());
                }
                self.remaining = 0;
                self.state = State::Complete;
                Ok(true)
            }
            Some(Body::Multipart(decoder)) => {
                if self.remaining > 0 {
                    let available = buf.available_len();
                    if available == 0 {
                        return Ok(false);
                    }

                    let len = usize::try_from(self.remaining).map_or(available, |rem| rem.min(available));
                    decoder.feed(&buf.available_data()[..len], &mut self.query).await?;
                    buf.consume(len, false);
                    self.remaining -= len as u64;
                }

                if self.remaining == 0 {
                    decoder.finish(&mut self.query).await?;
                    self.state = State::Complete;
                }
                Ok(true)
            }
            None => {
                self.state = State::Complete;
                Ok(true)
            }
        }
    }
}
