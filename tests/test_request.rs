use miniwebd::buffer::ReadBuffer;
use miniwebd::config::{ConnectionConfig, UploadConfig};
use miniwebd::http::header::{ContentType, HeaderName};
use miniwebd::http::parser::{Progress, RequestParser};
use miniwebd::http::request::{Method, Request};

/// Parses `raw` and runs `check` on the resulting request.
async fn with_request(raw: &str, check: impl FnOnce(&Request<'_>)) {
    let mut parser = RequestParser::new(ConnectionConfig::default(), UploadConfig::default());
    let mut buf = ReadBuffer::<512>::new();
    buf.extend_from_slice(raw.as_bytes());
    assert_eq!(parser.advance(&mut buf).await.unwrap(), Progress::Complete);

    let peer = "127.0.0.1:4000".parse().ok();
    check(&parser.request(&buf, peer, 9));
}

#[tokio::test]
async fn test_request_header_retrieval() {
    with_request(
        "GET / HTTP/1.1\r\nHost: example.com\r\nContent-Type: application/json\r\n\r\n",
        |req| {
            assert_eq!(req.header("Host"), Some("example.com"));
            assert_eq!(req.header("content-type"), Some("application/json"));
            assert_eq!(req.known_header(HeaderName::ContentType), Some("application/json"));
            assert_eq!(req.header("Missing"), None);
        },
    )
    .await;
}

#[tokio::test]
async fn test_request_header_iteration_keeps_order() {
    with_request("GET / HTTP/1.1\r\nB: 2\r\nA: 1\r\nX-Custom:   spaced  \r\n\r\n", |req| {
        let headers: Vec<_> = req.headers.iter().map(|h| (h.name, h.value)).collect();
        assert_eq!(headers, vec![("B", "2"), ("A", "1"), ("X-Custom", "spaced")]);
        assert!(req.headers.iter().all(|h| h.kind == HeaderName::Unknown));
    })
    .await;
}

#[tokio::test]
async fn test_request_peer_and_connection_id() {
    with_request("GET / HTTP/1.1\r\n\r\n", |req| {
        assert_eq!(req.peer.map(|p| p.port()), Some(4000));
        assert_eq!(req.connection_id, 9);
    })
    .await;
}

#[tokio::test]
async fn test_request_keep_alive_http11_default() {
    with_request("GET / HTTP/1.1\r\nHost: x\r\n\r\n", |req| assert!(req.keep_alive())).await;
}

#[tokio::test]
async fn test_request_connection_close() {
    with_request("GET / HTTP/1.1\r\nConnection: Close\r\n\r\n", |req| {
        assert!(!req.keep_alive())
    })
    .await;
}

#[tokio::test]
async fn test_request_http10_never_keeps_alive() {
    with_request("GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n", |req| {
        assert!(!req.keep_alive())
    })
    .await;
}

#[tokio::test]
async fn test_request_percent_decoded_resource() {
    with_request("GET /files/my%20doc.txt?x=%2F HTTP/1.1\r\n\r\n", |req| {
        assert_eq!(req.resource, "files/my doc.txt");
        assert_eq!(req.query.get("x"), Some("/"));
    })
    .await;
}

#[tokio::test]
async fn test_request_content_type_parsing() {
    with_request(
        "GET / HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=\"abc\"\r\n\r\n",
        |req| {
            let header = req.headers.get(HeaderName::ContentType).unwrap();
            assert_eq!(header.content_type(), ContentType::Multipart { boundary: Some("abc") });
        },
    )
    .await;
}

#[test]
fn test_method_display() {
    assert_eq!(Method::GET.to_string(), "GET");
    assert_eq!(Method::POST.as_str(), "POST");
    assert_eq!(Method::from_bytes(b"OPTIONS"), Method::OPTIONS);
    assert_eq!(Method::from_bytes(b"get"), Method::Unknown);
}
