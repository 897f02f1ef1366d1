use std::fmt;
use std::net::SocketAddr;

use crate::http::header::{HeaderName, Headers};
use crate::http::query::QueryParams;

/// HTTP request methods.
///
/// Only the methods the server acts on are told apart; everything else is
/// `Unknown` and left to the response source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// POST - Submit data; the only method whose body is read
    POST,
    /// OPTIONS - Describe communication options
    OPTIONS,
    Unknown,
}

impl Method {
    /// Parses an HTTP method token (case-sensitive).
    ///
    /// # Example
    ///
    /// ```
    /// # use miniwebd::http::request::Method;
    /// assert_eq!(Method::from_bytes(b"GET"), Method::GET);
    /// assert_eq!(Method::from_bytes(b"get"), Method::Unknown);
    /// ```
    pub fn from_bytes(token: &[u8]) -> Self {
        match token {
            b"GET" => Method::GET,
            b"HEAD" => Method::HEAD,
            b"POST" => Method::POST,
            b"OPTIONS" => Method::OPTIONS,
            _ => Method::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::POST => "POST",
            Method::OPTIONS => "OPTIONS",
            Method::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

/// A parsed HTTP request.
///
/// Everything is borrowed from the connection's buffers and is only valid
/// until the response has been produced.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    pub method: Method,
    pub version: Version,
    /// Percent-decoded path without the leading `/` (e.g. `"index.html"`).
    pub resource: &'a str,
    /// Query string parameters, plus decoded form fields for POST requests.
    pub query: &'a QueryParams,
    pub headers: Headers<'a>,
    /// Raw body of a buffered POST request. Multipart bodies are decoded into
    /// `query` instead.
    pub content: Option<&'a [u8]>,
    /// Declared `Content-Length` of a POST request, 0 otherwise.
    pub content_length: u64,
    pub peer: Option<SocketAddr>,
    /// Id of the connection the request arrived on.
    pub connection_id: u64,
}

impl<'a> Request<'a> {
    /// Retrieves a header value by name, ignoring case.
    ///
    /// # Returns
    ///
    /// `Some(&str)` with the first matching value if present, `None` otherwise.
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers.get_by_name(name).map(|header| header.value)
    }

    /// Like [`Request::header`] for the known header names.
    pub fn known_header(&self, kind: HeaderName) -> Option<&'a str> {
        self.headers.get(kind).map(|header| header.value)
    }

    /// Determines whether the connection should remain open after the response.
    ///
    /// HTTP/1.0 connections are always closed; HTTP/1.1 connections stay open
    /// unless the client sent `Connection: close`.
    pub fn keep_alive(&self) -> bool {
        match self.version {
            Version::Http10 => false,
            Version::Http11 => !self
                .headers
                .get(HeaderName::Connection)
                .is_some_and(|header| header.is_connection_close()),
        }
    }
}
