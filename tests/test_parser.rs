use miniwebd::buffer::ReadBuffer;
use miniwebd::config::{ConnectionConfig, UploadConfig};
use miniwebd::error::HttpError;
use miniwebd::http::parser::{Progress, RequestParser};
use miniwebd::http::request::{Method, Version};

type Buffer = ReadBuffer<128>;

fn parser() -> RequestParser {
    RequestParser::new(ConnectionConfig::default(), UploadConfig::default())
}

/// Feeds `raw` in pieces of `step` bytes until the request is complete.
async fn parse_in_steps(raw: &[u8], step: usize) -> Result<(RequestParser, Buffer), HttpError> {
    let mut parser = parser();
    let mut buf = Buffer::new();
    for piece in raw.chunks(step) {
        buf.extend_from_slice(piece);
        if parser.advance(&mut buf).await? == Progress::Complete {
            return Ok((parser, buf));
        }
    }
    panic!("request incomplete after {} bytes", raw.len());
}

async fn parse(raw: &[u8]) -> Result<(RequestParser, Buffer), HttpError> {
    parse_in_steps(raw, raw.len()).await
}

#[tokio::test]
async fn test_parse_simple_get_request() {
    let (parser, buf) = parse(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n").await.unwrap();
    let request = parser.request(&buf, None, 1);

    assert_eq!(request.method, Method::GET);
    assert_eq!(request.resource, "");
    assert_eq!(request.version, Version::Http11);
    assert_eq!(request.header("Host"), Some("example.com"));
    assert_eq!(request.content_length, 0);
}

#[tokio::test]
async fn test_parse_byte_by_byte() {
    let raw = b"GET /search?q=rust&lang=en HTTP/1.1\r\nHost: example.com\r\nUser-Agent: test-client\r\n\r\n";
    for step in [1, 2, 7] {
        let (parser, buf) = parse_in_steps(raw, step).await.unwrap();
        let request = parser.request(&buf, None, 1);

        assert_eq!(request.resource, "search");
        assert_eq!(request.query.get("q"), Some("rust"));
        assert_eq!(request.query.get("lang"), Some("en"));
        assert_eq!(request.header("user-agent"), Some("test-client"));
    }
}

#[tokio::test]
async fn test_parse_post_request_with_body() {
    let raw = b"POST /api HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello";
    for step in [1, 3, raw.len()] {
        let (parser, buf) = parse_in_steps(raw, step).await.unwrap();
        let request = parser.request(&buf, None, 1);

        assert_eq!(request.method, Method::POST);
        assert_eq!(request.resource, "api");
        assert_eq!(request.content, Some(&b"hello"[..]));
        assert_eq!(request.content_length, 5);
        assert_eq!(request.header("Host"), Some("localhost"));
    }
}

#[tokio::test]
async fn test_parse_post_larger_than_buffer() {
    let body = "x".repeat(1000);
    let raw = format!("POST /big HTTP/1.1\r\nContent-Length: {}\r\n\r\n{body}", body.len());
    let (parser, buf) = parse_in_steps(raw.as_bytes(), 100).await.unwrap();
    let request = parser.request(&buf, None, 1);

    assert_eq!(request.content.map(<[u8]>::len), Some(1000));
    assert_eq!(request.header("Content-Length"), Some("1000"));
}

#[tokio::test]
async fn test_parse_url_encoded_form() {
    let raw = b"POST /form?a=1 HTTP/1.1\r\n\
        Content-Type: application/x-www-form-urlencoded\r\n\
        Content-Length: 20\r\n\r\n\
        name=J%C3%B6rg&b=2+3";
    let (parser, buf) = parse_in_steps(raw, 4).await.unwrap();
    let request = parser.request(&buf, None, 1);

    assert_eq!(request.query.get("a"), Some("1"));
    assert_eq!(request.query.get("name"), Some("Jörg"));
    assert_eq!(request.query.get("b"), Some("2 3"));
}

#[tokio::test]
async fn test_parse_multipart_form() {
    let body = "--XyZ\r\n\
        Content-Disposition: form-data; name=\"title\"\r\n\r\n\
        hello\r\n\
        --XyZ\r\n\
        Content-Disposition: form-data; name=\"doc\"; filename=\"a.txt\"\r\n\
        Content-Type: text/plain\r\n\r\n\
        file body\r\n\
        --XyZ--\r\n";
    let raw = format!(
        "POST /upload HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=XyZ\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );

    let (mut parser, mut buf) = parse_in_steps(raw.as_bytes(), 9).await.unwrap();
    let path = {
        let request = parser.request(&buf, None, 1);
        assert_eq!(request.query.get("title"), Some("hello"));
        assert!(request.content.is_none());

        let file = request.query.file("doc").expect("file part");
        assert_eq!(file.file_name, "a.txt");
        assert_eq!(file.size, 9);
        assert_eq!(std::fs::read(&file.path).unwrap(), b"file body");
        file.path.clone()
    };

    parser.reset(&mut buf);
    assert!(!path.exists());
}

#[tokio::test]
async fn test_parse_post_without_content_length() {
    let result = parse(b"POST /api HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert!(matches!(result, Err(HttpError::MissingHeader("Content-Length"))));
}

#[tokio::test]
async fn test_parse_post_body_too_large() {
    let limits = ConnectionConfig {
        max_post_body_length: 10,
        ..ConnectionConfig::default()
    };
    let mut parser = RequestParser::new(limits, UploadConfig::default());
    let mut buf = Buffer::new();
    buf.extend_from_slice(b"POST / HTTP/1.1\r\nContent-Length: 11\r\n\r\n");

    assert!(matches!(
        parser.advance(&mut buf).await,
        Err(HttpError::BodyTooLarge { length: 11, limit: 10 })
    ));
}

#[tokio::test]
async fn test_parse_multipart_without_boundary() {
    let result = parse(b"POST / HTTP/1.1\r\nContent-Type: multipart/form-data\r\nContent-Length: 0\r\n\r\n").await;
    assert!(matches!(result, Err(HttpError::UnsupportedContentType)));
}

#[tokio::test]
async fn test_parse_malformed_header() {
    let result = parse(b"GET / HTTP/1.1\r\nBrokenHeader\r\n\r\n").await;
    assert!(matches!(result, Err(HttpError::MalformedHeader)));
}

#[tokio::test]
async fn test_parse_malformed_request_line() {
    let result = parse(b"GET /\r\n\r\n").await;
    assert!(matches!(result, Err(HttpError::MalformedRequestLine)));
}

#[tokio::test]
async fn test_parse_headers_block_too_large() {
    let limits = ConnectionConfig {
        max_headers_length: 64,
        ..ConnectionConfig::default()
    };
    let mut parser = RequestParser::new(limits, UploadConfig::default());
    let mut buf = Buffer::new();
    buf.extend_from_slice(b"GET / HTTP/1.1\r\n");
    for i in 0..10 {
        buf.extend_from_slice(format!("X-Header-{i}: value\r\n").as_bytes());
    }

    assert!(matches!(
        parser.advance(&mut buf).await,
        Err(HttpError::HeadersTooLarge)
    ));
}

#[tokio::test]
async fn test_parse_skips_leading_empty_lines() {
    let (parser, _buf) = parse(b"\r\n\r\nGET /x HTTP/1.0\r\n\r\n").await.unwrap();
    assert_eq!(parser.resource(), "x");
}

#[tokio::test]
async fn test_parse_various_http_methods() {
    let methods = [
        ("GET", Method::GET),
        ("HEAD", Method::HEAD),
        ("OPTIONS", Method::OPTIONS),
        ("BREW", Method::Unknown),
    ];

    for (name, expected) in methods {
        let raw = format!("{name} / HTTP/1.1\r\n\r\n");
        let (parser, _buf) = parse(raw.as_bytes()).await.unwrap();
        assert_eq!(parser.method(), expected);
    }
}
