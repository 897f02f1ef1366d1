//! Request headers.
//!
//! The parser does not copy header lines. It records a [`HeaderSpan`] per
//! line (byte ranges into the buffer that holds the header block) and hands
//! out borrowed [`Header`] views on demand.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::LazyLock;

use crate::error::HttpError;

/// Header names the server looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderName {
    Unknown,
    Host,
    Connection,
    ContentDisposition,
    ContentType,
    ContentLength,
    ContentEncoding,
    UserAgent,
    IfModifiedSince,
    Origin,
    Upgrade,
    SecWebSocketKey,
    SecWebSocketVersion,
    SecWebSocketProtocol,
    SecWebSocketAccept,
    LastModified,
    Location,
}

const KNOWN_NAMES: [HeaderName; 16] = [
    HeaderName::Host,
    HeaderName::Connection,
    HeaderName::ContentDisposition,
    HeaderName::ContentType,
    HeaderName::ContentLength,
    HeaderName::ContentEncoding,
    HeaderName::UserAgent,
    HeaderName::IfModifiedSince,
    HeaderName::Origin,
    HeaderName::Upgrade,
    HeaderName::SecWebSocketKey,
    HeaderName::SecWebSocketVersion,
    HeaderName::SecWebSocketProtocol,
    HeaderName::SecWebSocketAccept,
    HeaderName::LastModified,
    HeaderName::Location,
];

/// Longest known header name, in bytes.
const MAX_KNOWN_NAME_LEN: usize = 32;

static NAME_TABLE: LazyLock<HashMap<String, HeaderName>> = LazyLock::new(|| {
    KNOWN_NAMES
        .iter()
        .map(|&name| (name.as_str().to_ascii_lowercase(), name))
        .collect()
});

impl HeaderName {
    /// Canonical spelling, as written in responses.
    pub fn as_str(self) -> &'static str {
        match self {
            HeaderName::Unknown => "",
            HeaderName::Host => "Host",
            HeaderName::Connection => "Connection",
            HeaderName::ContentDisposition => "Content-Disposition",
            HeaderName::ContentType => "Content-Type",
            HeaderName::ContentLength => "Content-Length",
            HeaderName::ContentEncoding => "Content-Encoding",
            HeaderName::UserAgent => "User-Agent",
            HeaderName::IfModifiedSince => "If-Modified-Since",
            HeaderName::Origin => "Origin",
            HeaderName::Upgrade => "Upgrade",
            HeaderName::SecWebSocketKey => "Sec-WebSocket-Key",
            HeaderName::SecWebSocketVersion => "Sec-WebSocket-Version",
            HeaderName::SecWebSocketProtocol => "Sec-WebSocket-Protocol",
            HeaderName::SecWebSocketAccept => "Sec-WebSocket-Accept",
            HeaderName::LastModified => "Last-Modified",
            HeaderName::Location => "Location",
        }
    }

    /// Case-insensitive lookup; anything not in the table is `Unknown`.
    ///
    /// ```
    /// # use miniwebd::http::header::HeaderName;
    /// assert_eq!(HeaderName::parse("content-LENGTH"), HeaderName::ContentLength);
    /// assert_eq!(HeaderName::parse("X-Custom"), HeaderName::Unknown);
    /// ```
    pub fn parse(name: &str) -> Self {
        let len = name.len();
        if len > MAX_KNOWN_NAME_LEN {
            return HeaderName::Unknown;
        }

        let mut lower = [0u8; MAX_KNOWN_NAME_LEN];
        lower[..len].copy_from_slice(name.as_bytes());
        lower[..len].make_ascii_lowercase();

        std::str::from_utf8(&lower[..len])
            .ok()
            .and_then(|lower| NAME_TABLE.get(lower).copied())
            .unwrap_or(HeaderName::Unknown)
    }
}

/// Position of one header line inside the buffer holding the header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderSpan {
    pub kind: HeaderName,
    name: Range<usize>,
    value: Range<usize>,
}

impl HeaderSpan {
    /// Splits a `name: value` line (without line terminator) that starts at
    /// `offset` in the header buffer.
    ///
    /// The name must be UTF-8. The value is kept as raw bytes; a value that is
    /// not UTF-8 reads as empty through [`Header::value`].
    pub fn parse(line: &[u8], offset: usize) -> Result<Self, HttpError> {
        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or(HttpError::MalformedHeader)?;

        let raw_name = &line[..colon];
        let name = raw_name.trim_ascii();
        if name.is_empty() {
            return Err(HttpError::MalformedHeader);
        }
        let name = std::str::from_utf8(name).map_err(|_| HttpError::MalformedHeader)?;
        let name_start = offset + (raw_name.len() - raw_name.trim_ascii_start().len());

        let raw_value = &line[colon + 1..];
        let value = raw_value.trim_ascii();
        let value_start = if value.is_empty() {
            offset + line.len()
        } else {
            offset + colon + 1 + (raw_value.len() - raw_value.trim_ascii_start().len())
        };

        Ok(Self {
            kind: HeaderName::parse(name),
            name: name_start..name_start + name.len(),
            value: value_start..value_start + value.len(),
        })
    }

    /// Borrows the header out of `buf`, which must be the buffer the span was
    /// parsed from.
    pub fn view<'a>(&self, buf: &'a [u8]) -> Header<'a> {
        Header {
            kind: self.kind,
            name: str_at(buf, &self.name),
            value: str_at(buf, &self.value),
        }
    }
}

fn str_at<'a>(buf: &'a [u8], range: &Range<usize>) -> &'a str {
    buf.get(range.clone())
        .and_then(|bytes| std::str::from_utf8(bytes).ok())
        .unwrap_or("")
}

/// A borrowed request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header<'a> {
    pub kind: HeaderName,
    pub name: &'a str,
    pub value: &'a str,
}

/// Body encodings the request parser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType<'a> {
    UrlEncoded,
    Multipart { boundary: Option<&'a str> },
    Other,
}

impl<'a> Header<'a> {
    /// True if the comma-separated value list contains `token`, ignoring case.
    pub fn has_token(&self, token: &str) -> bool {
        self.value
            .split(',')
            .any(|item| item.trim().eq_ignore_ascii_case(token))
    }

    pub fn is_connection_close(&self) -> bool {
        self.has_token("close")
    }

    /// Parses the value as a decimal integer.
    pub fn as_u64(&self) -> Option<u64> {
        if self.value.is_empty() || !self.value.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        self.value.parse().ok()
    }

    pub fn content_type(&self) -> ContentType<'a> {
        let (media_type, params) = match self.value.split_once(';') {
            Some((media_type, params)) => (media_type.trim(), params),
            None => (self.value, ""),
        };

        if media_type.eq_ignore_ascii_case("application/x-www-form-urlencoded") {
            ContentType::UrlEncoded
        } else if media_type.eq_ignore_ascii_case("multipart/form-data") {
            let boundary = parameters(params)
                .find(|(key, _)| key.eq_ignore_ascii_case("boundary"))
                .map(|(_, value)| value)
                .filter(|value| !value.is_empty());
            ContentType::Multipart { boundary }
        } else {
            ContentType::Other
        }
    }

    /// `name` and `filename` parameters of a `Content-Disposition` value.
    pub fn content_disposition(&self) -> (Option<&'a str>, Option<&'a str>) {
        let mut name = None;
        let mut file_name = None;
        for (key, value) in parameters(self.value) {
            if key.eq_ignore_ascii_case("name") {
                name = Some(value);
            } else if key.eq_ignore_ascii_case("filename") {
                file_name = Some(value);
            }
        }
        (name, file_name)
    }
}

/// `key=value` pairs of a `;`-separated parameter list. Quoted values are
/// unquoted; escapes inside quotes are not supported.
pub fn parameters(list: &str) -> impl Iterator<Item = (&str, &str)> {
    list.split(';').filter_map(|item| {
        let (key, value) = item.split_once('=')?;
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .map(|quoted| quoted.strip_suffix('"').unwrap_or(quoted))
            .unwrap_or(value);
        Some((key.trim(), value))
    })
}

/// The header list of one request.
#[derive(Debug, Clone, Copy)]
pub struct Headers<'a> {
    buf: &'a [u8],
    spans: &'a [HeaderSpan],
}

impl<'a> Headers<'a> {
    pub fn new(buf: &'a [u8], spans: &'a [HeaderSpan]) -> Self {
        Self { buf, spans }
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Header<'a>> + use<'a> {
        let (buf, spans) = (self.buf, self.spans);
        spans.iter().map(move |span| span.view(buf))
    }

    /// First header of the given kind.
    pub fn get(&self, kind: HeaderName) -> Option<Header<'a>> {
        self.spans
            .iter()
            .find(|span| span.kind == kind)
            .map(|span| span.view(self.buf))
    }

    /// First header with the given name, ignoring case.
    pub fn get_by_name(&self, name: &str) -> Option<Header<'a>> {
        self.iter().find(|header| header.name.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_trims_name_and_value() {
        let line = b"Host:   example.com  ";
        let span = HeaderSpan::parse(line, 0).unwrap();
        let header = span.view(line);
        assert_eq!(header.kind, HeaderName::Host);
        assert_eq!(header.name, "Host");
        assert_eq!(header.value, "example.com");
    }

    #[test]
    fn span_is_relative_to_offset() {
        let buf = b"xxxxAccept: */*";
        let span = HeaderSpan::parse(&buf[4..], 4).unwrap();
        assert_eq!(span.view(buf).value, "*/*");
    }

    #[test]
    fn empty_value_is_allowed() {
        let line = b"X-Empty:";
        let header = HeaderSpan::parse(line, 0).unwrap().view(line);
        assert_eq!(header.name, "X-Empty");
        assert_eq!(header.value, "");
    }

    #[test]
    fn non_utf8_value_is_accepted() {
        let line = b"X-Legacy: caf\xE9";
        let span = HeaderSpan::parse(line, 0).unwrap();
        let header = span.view(line);
        assert_eq!(header.kind, HeaderName::Unknown);
        assert_eq!(header.name, "X-Legacy");
        assert_eq!(header.value, "");
    }

    #[test]
    fn non_utf8_name_is_rejected() {
        assert!(matches!(
            HeaderSpan::parse(b"X-\xFF: 1", 0),
            Err(HttpError::MalformedHeader)
        ));
    }

    #[test]
    fn line_without_colon_is_rejected() {
        assert!(matches!(
            HeaderSpan::parse(b"NoColonHere", 0),
            Err(HttpError::MalformedHeader)
        ));
    }

    #[test]
    fn multipart_boundary_is_extracted() {
        let header = Header {
            kind: HeaderName::ContentType,
            name: "Content-Type",
            value: "multipart/form-data; boundary=\"----abc\"",
        };
        assert_eq!(
            header.content_type(),
            ContentType::Multipart { boundary: Some("----abc") }
        );
    }

    #[test]
    fn content_disposition_parameters() {
        let header = Header {
            kind: HeaderName::ContentDisposition,
            name: "Content-Disposition",
            value: "form-data; name=\"upload\"; filename=\"a b.txt\"",
        };
        assert_eq!(header.content_disposition(), (Some("upload"), Some("a b.txt")));
    }

    #[test]
    fn connection_close_ignores_case() {
        let header = Header {
            kind: HeaderName::Connection,
            name: "Connection",
            value: "Keep-Alive, CLOSE",
        };
        assert!(header.is_connection_close());
    }
}
