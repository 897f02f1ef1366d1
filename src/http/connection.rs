//! HTTP connection driver.
//!
//! One driver runs per accepted socket. It alternates between reading and
//! parsing a request and writing the response, keeps the connection alive
//! when both sides allow it, and hands the socket over to another protocol
//! when a response asks for an upgrade.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::buffer::{ReadBuffer, WriteQueue};
use crate::config::Config;
use crate::error::HttpError;
use crate::http::parser::{Progress, RequestParser};
use crate::http::request::Method;
use crate::http::response::{ErrorResponse, Response};
use crate::http::source::{RequestRecord, ResponseSource, ServerLog};
use crate::http::writer::{ResponseHead, ResponseWriter};
use crate::lifecycle::{ConnectionControl, ProtocolUpgrade, UpgradeContext};

pub const READ_BUFFER_SIZE: usize = 16 * 1024;
pub const WRITE_QUEUE_SIZE: usize = 24 * 1024;

/// How a connection's request loop ended.
enum Served {
    Closed,
    Upgrade(Box<dyn ProtocolUpgrade>),
}

pub struct Connection<S> {
    stream: S,
    peer: Option<SocketAddr>,
    read_buf: ReadBuffer<READ_BUFFER_SIZE>,
    queue: WriteQueue<WRITE_QUEUE_SIZE>,
    parser: RequestParser,
    config: Arc<Config>,
    source: Arc<dyn ResponseSource>,
    log: Arc<dyn ServerLog>,
    control: Arc<ConnectionControl>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        stream: S,
        peer: Option<SocketAddr>,
        config: Arc<Config>,
        source: Arc<dyn ResponseSource>,
        log: Arc<dyn ServerLog>,
    ) -> Self {
        let control = ConnectionControl::new(config.connection.silent_limit());
        let parser = RequestParser::new(config.connection.clone(), config.upload.clone());
        Self {
            stream,
            peer,
            read_buf: ReadBuffer::new(),
            queue: WriteQueue::new(),
            parser,
            config,
            source,
            log,
            control,
        }
    }

    /// Lifecycle handle for the server registry.
    pub fn control(&self) -> Arc<ConnectionControl> {
        self.control.clone()
    }

    /// Serves requests until the connection closes or is upgraded.
    pub async fn run(mut self) {
        let id = self.control.id();
        self.log.on_connection(id, self.peer);

        match self.serve().await {
            Ok(Served::Closed) => {
                let _ = self.stream.shutdown().await;
            }
            Ok(Served::Upgrade(upgrade)) => {
                let leftover = self.read_buf.available_data().to_vec();
                let ctx = UpgradeContext {
                    connection_id: id,
                    peer: self.peer,
                    log: self.log.clone(),
                };
                let successor = upgrade.upgrade(Box::new(self.stream), leftover, ctx);
                self.control.set_successor(successor);
            }
            Err(e) => {
                debug!(peer = ?self.peer, error = %e, "Connection failed");
            }
        }

        self.control.mark_finished();
        self.log.on_connection_finished(id);
    }

    async fn serve(&mut self) -> Result<Served, HttpError> {
        loop {
            let mut started = None;
            loop {
                if started.is_none() && !self.parser.is_idle(&self.read_buf) {
                    started = Some(Instant::now());
                }
                match self.parser.advance(&mut self.read_buf).await? {
                    Progress::Complete => break,
                    Progress::NeedData => match self.fill().await {
                        Err(HttpError::ConnectionClosed) if self.parser.is_idle(&self.read_buf) => {
                            return Ok(Served::Closed);
                        }
                        other => other?,
                    },
                }
            }
            let parsed_at = Instant::now();
            let parse_time = parsed_at.duration_since(started.unwrap_or(parsed_at));

            let request = self.parser.request(&self.read_buf, self.peer, self.control.id());
            let method = request.method;
            let mut keep_alive = request.keep_alive();
            let mut response: Box<dyn Response> = match self.source.create(&request) {
                Ok(response) => response,
                Err(e) => {
                    warn!(resource = request.resource, error = %e, "Response source failed");
                    Box::new(ErrorResponse::internal(request.resource, &e))
                }
            };

            let upgrade = response.upgrade();
            let status = response.status();
            let head = ResponseHead {
                status,
                content_type: response.content_type(),
                charset: response.charset(),
                length: response.length(),
                extra_headers: response.extra_headers(),
                keep_alive: keep_alive || upgrade.is_some(),
                server_name: &self.config.server.server_name,
            };

            let mut writer = ResponseWriter::new(&mut self.stream, &mut self.queue, &self.control);
            writer.write_head(&head, self.config.connection.max_headers_length)?;
            if method == Method::HEAD || upgrade.is_some() || !status.allows_body() {
                writer.flush().await?;
            } else if !writer.send_body(response.as_mut()).await? {
                keep_alive = false;
            }
            let response_bytes = writer.bytes_sent();
            self.control.add_response();

            self.log.on_request(&RequestRecord {
                connection_id: self.control.id(),
                peer: self.peer,
                method,
                resource: self.parser.resource(),
                content_length: self.parser.content_length(),
                status,
                response_bytes,
                parse_time,
                response_time: parsed_at.elapsed(),
                upgraded: upgrade.is_some(),
            });

            if let Some(upgrade) = upgrade {
                return Ok(Served::Upgrade(upgrade));
            }
            if !keep_alive {
                return Ok(Served::Closed);
            }
            self.parser.reset(&mut self.read_buf);
        }
    }

    /// Reads more bytes into the buffer.
    async fn fill(&mut self) -> Result<(), HttpError> {
        if self.read_buf.free_len() == 0 {
            self.read_buf.request_data(self.read_buf.available_len() + 1);
        }

        let space = self.read_buf.read_space();
        let len = tokio::select! {
            res = self.stream.read(space) => res?,
            _ = self.control.stopped() => return Err(HttpError::Stopped),
        };
        if len == 0 {
            return Err(HttpError::ConnectionClosed);
        }

        self.read_buf.on_new_data(len);
        self.control.touch();
        Ok(())
    }
}
