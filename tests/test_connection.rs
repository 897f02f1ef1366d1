use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use miniwebd::config::Config;
use miniwebd::http::connection::Connection;
use miniwebd::http::request::{Method, Request};
use miniwebd::http::response::{BodyResponse, Response, ResponseBuilder, StatusCode};
use miniwebd::http::source::{ResponseSource, TracingServerLog};
use miniwebd::lifecycle::{ConnectionBase, ConnectionControl};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Body that claims more bytes than it produces.
struct ShortBody;

#[async_trait]
impl Response for ShortBody {
    fn length(&self) -> Option<u64> {
        Some(10)
    }

    async fn read(&mut self, buf: &mut [u8]) -> anyhow::Result<(usize, bool)> {
        buf[..3].copy_from_slice(b"abc");
        Ok((3, true))
    }
}

fn route(request: &Request<'_>) -> anyhow::Result<Box<dyn Response>> {
    match (request.method, request.resource) {
        (Method::POST, "submit") => Ok(Box::new(BodyResponse::ok(format!(
            "post {} {}",
            request.content_length,
            request.query.get_or("name", "-")
        )))),
        (_, "chunked") => Ok(Box::new(
            ResponseBuilder::new(StatusCode::Ok).body("hello world").chunked(true).build(),
        )),
        (_, "empty") => Ok(Box::new(ResponseBuilder::new(StatusCode::NoContent).build())),
        (_, "short") => Ok(Box::new(ShortBody)),
        (_, "fail") => anyhow::bail!("source failure"),
        (_, resource) => Ok(Box::new(BodyResponse::ok(format!(
            "{resource} x={}",
            request.query.get_or("x", "-")
        )))),
    }
}

fn start() -> (DuplexStream, Arc<ConnectionControl>, tokio::task::JoinHandle<()>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let source: Arc<dyn ResponseSource> = Arc::new(route);
    let conn = Connection::new(
        server,
        None,
        Arc::new(Config::default()),
        source,
        Arc::new(TracingServerLog),
    );
    let control = conn.control();
    let task = tokio::spawn(conn.run());
    (client, control, task)
}

async fn read_head(client: &mut DuplexStream) -> String {
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        head.push(client.read_u8().await.unwrap());
    }
    String::from_utf8(head).unwrap()
}

fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines()
        .filter_map(|line| line.split_once(": "))
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value)
}

async fn read_line(client: &mut DuplexStream) -> String {
    let mut line = Vec::new();
    while !line.ends_with(b"\r\n") {
        line.push(client.read_u8().await.unwrap());
    }
    line.truncate(line.len() - 2);
    String::from_utf8(line).unwrap()
}

/// Reads one response; returns its head and decoded body.
async fn read_response(client: &mut DuplexStream) -> (String, Vec<u8>) {
    let head = read_head(client).await;
    let mut body = Vec::new();

    if let Some(length) = header(&head, "Content-Length") {
        body.resize(length.parse().unwrap(), 0);
        client.read_exact(&mut body).await.unwrap();
    } else if header(&head, "Transfer-Encoding") == Some("chunked") {
        loop {
            let len = usize::from_str_radix(&read_line(client).await, 16).unwrap();
            let mut chunk = vec![0u8; len + 2];
            client.read_exact(&mut chunk).await.unwrap();
            if len == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..len]);
        }
    }
    (head, body)
}

async fn expect_closed(client: &mut DuplexStream) {
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty(), "unexpected bytes: {:?}", String::from_utf8_lossy(&rest));
}

#[tokio::test]
async fn test_keep_alive_serves_several_requests() {
    let (mut client, control, _task) = start();

    client.write_all(b"GET /foo?x=1 HTTP/1.1\r\nHost: test\r\n\r\n").await.unwrap();
    let (head, body) = read_response(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(header(&head, "Content-Length"), Some("7"));
    assert_eq!(header(&head, "Connection"), None);
    assert_eq!(body, b"foo x=1");

    client.write_all(b"GET /bar HTTP/1.1\r\n\r\n").await.unwrap();
    let (_, body) = read_response(&mut client).await;
    assert_eq!(body, b"bar x=-");
    assert_eq!(control.response_count(), 2);
}

#[tokio::test]
async fn test_pipelined_requests() {
    let (mut client, _control, _task) = start();
    client
        .write_all(b"GET /one HTTP/1.1\r\n\r\nGET /two HTTP/1.1\r\n\r\n")
        .await
        .unwrap();

    assert_eq!(read_response(&mut client).await.1, b"one x=-");
    assert_eq!(read_response(&mut client).await.1, b"two x=-");
}

#[tokio::test]
async fn test_post_with_empty_body() {
    let (mut client, _control, _task) = start();
    client
        .write_all(b"POST /submit HTTP/1.1\r\nContent-Length: 0\r\n\r\n")
        .await
        .unwrap();
    assert_eq!(read_response(&mut client).await.1, b"post 0 -");
}

#[tokio::test]
async fn test_post_form_body() {
    let (mut client, _control, _task) = start();
    client
        .write_all(
            b"POST /submit HTTP/1.1\r\n\
              Content-Type: application/x-www-form-urlencoded\r\n\
              Content-Length: 8\r\n\r\nname=bob",
        )
        .await
        .unwrap();
    assert_eq!(read_response(&mut client).await.1, b"post 8 bob");
}

#[tokio::test]
async fn test_chunked_response() {
    let (mut client, _control, _task) = start();
    client.write_all(b"GET /chunked HTTP/1.1\r\n\r\n").await.unwrap();

    let (head, body) = read_response(&mut client).await;
    assert_eq!(header(&head, "Transfer-Encoding"), Some("chunked"));
    assert_eq!(header(&head, "Content-Length"), None);
    assert_eq!(body, b"hello world");
}

#[tokio::test]
async fn test_head_request_has_no_body() {
    let (mut client, _control, _task) = start();
    client.write_all(b"HEAD /foo HTTP/1.1\r\n\r\n").await.unwrap();
    let head = read_head(&mut client).await;
    assert_eq!(header(&head, "Content-Length"), Some("7"));

    // The next response follows the head directly.
    client.write_all(b"GET /next HTTP/1.1\r\n\r\n").await.unwrap();
    assert_eq!(read_response(&mut client).await.1, b"next x=-");
}

#[tokio::test]
async fn test_no_content_response() {
    let (mut client, _control, _task) = start();
    client.write_all(b"GET /empty HTTP/1.1\r\n\r\n").await.unwrap();
    let head = read_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 204 No Content\r\n"));
    assert_eq!(header(&head, "Content-Length"), None);
}

#[tokio::test]
async fn test_http10_closes_after_response() {
    let (mut client, _control, task) = start();
    client.write_all(b"GET /old HTTP/1.0\r\n\r\n").await.unwrap();

    let (head, body) = read_response(&mut client).await;
    assert_eq!(header(&head, "Connection"), Some("close"));
    assert_eq!(body, b"old x=-");
    expect_closed(&mut client).await;
    task.await.unwrap();
}

#[tokio::test]
async fn test_connection_close_header() {
    let (mut client, _control, _task) = start();
    client
        .write_all(b"GET /bye HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let (head, _) = read_response(&mut client).await;
    assert_eq!(header(&head, "Connection"), Some("close"));
    expect_closed(&mut client).await;
}

#[tokio::test]
async fn test_source_error_becomes_500() {
    let (mut client, _control, _task) = start();
    client.write_all(b"GET /fail HTTP/1.1\r\n\r\n").await.unwrap();
    let (head, body) = read_response(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    assert!(String::from_utf8_lossy(&body).contains("source failure"));

    // The connection survives.
    client.write_all(b"GET /after HTTP/1.1\r\n\r\n").await.unwrap();
    assert_eq!(read_response(&mut client).await.1, b"after x=-");
}

#[tokio::test]
async fn test_short_body_closes_connection() {
    let (mut client, _control, _task) = start();
    client.write_all(b"GET /short HTTP/1.1\r\n\r\n").await.unwrap();
    let head = read_head(&mut client).await;
    assert_eq!(header(&head, "Content-Length"), Some("10"));

    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    assert_eq!(rest, b"abc");
}

#[tokio::test]
async fn test_malformed_request_closes_without_response() {
    let (mut client, control, task) = start();
    client.write_all(b"GET / HTTP/1.1\r\nNoColon\r\n\r\n").await.unwrap();
    expect_closed(&mut client).await;
    task.await.unwrap();
    assert!(!control.on_step(Duration::ZERO).retain);
}

#[tokio::test]
async fn test_non_utf8_header_value_is_served() {
    let (mut client, _control, _task) = start();
    client
        .write_all(b"GET /latin?x=1 HTTP/1.1\r\nUser-Agent: caf\xE9\r\n\r\n")
        .await
        .unwrap();
    let (head, body) = read_response(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body, b"latin x=1");
}

#[tokio::test]
async fn test_client_close_finishes_connection() {
    let (client, control, task) = start();
    drop(client);
    task.await.unwrap();
    assert!(control.is_finished());
    assert_eq!(control.response_count(), 0);
}

#[tokio::test]
async fn test_stop_interrupts_idle_connection() {
    let (_client, control, task) = start();
    control.stop();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("connection did not stop")
        .unwrap();
    assert!(control.is_finished());
}
