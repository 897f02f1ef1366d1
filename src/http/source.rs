//! Extension points of the HTTP server: response sources and the server log.

use std::net::SocketAddr;
use std::time::Duration;

use tracing::{debug, info};

use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};

/// Creates the response for a parsed request.
///
/// An error is answered with a 500 page; the connection stays usable.
pub trait ResponseSource: Send + Sync {
    fn create(&self, request: &Request<'_>) -> anyhow::Result<Box<dyn Response>>;
}

impl<F> ResponseSource for F
where
    F: Fn(&Request<'_>) -> anyhow::Result<Box<dyn Response>> + Send + Sync,
{
    fn create(&self, request: &Request<'_>) -> anyhow::Result<Box<dyn Response>> {
        self(request)
    }
}

/// Summary of one served request.
#[derive(Debug, Clone)]
pub struct RequestRecord<'a> {
    pub connection_id: u64,
    pub peer: Option<SocketAddr>,
    pub method: Method,
    pub resource: &'a str,
    pub content_length: u64,
    pub status: StatusCode,
    /// Bytes written to the socket for the response, head included.
    pub response_bytes: u64,
    /// Time from the first byte of the request to the parsed request.
    pub parse_time: Duration,
    pub response_time: Duration,
    pub upgraded: bool,
}

/// Observer for server activity. Every callback is fire-and-forget.
pub trait ServerLog: Send + Sync {
    fn on_connection(&self, _connection_id: u64, _peer: Option<SocketAddr>) {}

    fn on_connection_finished(&self, _connection_id: u64) {}

    fn on_request(&self, record: &RequestRecord<'_>);

    fn on_websocket(
        &self,
        _connection_id: u64,
        _resource: &str,
        _success: bool,
        _origin: Option<&str>,
        _protocol: Option<&str>,
    ) {
    }
}

/// Emits server-log callbacks as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingServerLog;

impl ServerLog for TracingServerLog {
    fn on_connection(&self, connection_id: u64, peer: Option<SocketAddr>) {
        debug!(connection = connection_id, peer = ?peer, "Connection accepted");
    }

    fn on_connection_finished(&self, connection_id: u64) {
        debug!(connection = connection_id, "Connection finished");
    }

    fn on_request(&self, record: &RequestRecord<'_>) {
        info!(
            connection = record.connection_id,
            peer = ?record.peer,
            method = %record.method,
            resource = record.resource,
            content_length = record.content_length,
            status = record.status.as_u16(),
            response_bytes = record.response_bytes,
            parse_us = record.parse_time.as_micros() as u64,
            response_us = record.response_time.as_micros() as u64,
            upgraded = record.upgraded,
            "Request served"
        );
    }

    fn on_websocket(
        &self,
        connection_id: u64,
        resource: &str,
        success: bool,
        origin: Option<&str>,
        protocol: Option<&str>,
    ) {
        info!(
            connection = connection_id,
            resource,
            success,
            origin = origin.unwrap_or("-"),
            protocol = protocol.unwrap_or("-"),
            "WebSocket handshake"
        );
    }
}
