//! WebSocket opening handshake.
//!
//! [`WebSocketSource`] is a [`ResponseSource`] that accepts version 13
//! upgrade requests. An accepted request is answered with
//! `101 Switching Protocols` and the socket is handed to the WebSocket driver
//! once the response head is out.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};

use crate::config::WebSocketConfig;
use crate::http::header::HeaderName;
use crate::http::request::{Method, Request};
use crate::http::response::{ErrorResponse, Response, StatusCode};
use crate::http::source::{ResponseSource, ServerLog};
use crate::lifecycle::{BoxedStream, ConnectionBase, ProtocolUpgrade, UpgradeContext};
use crate::ws::connection::{self, EchoHandler, MessageHandler};

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const SUPPORTED_VERSION: &str = "13";

/// Computes the `Sec-WebSocket-Accept` value for a client key.
///
/// ```
/// # use miniwebd::ws::handshake::accept_key;
/// assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Creates the message handler for an accepted upgrade request.
///
/// `protocol` is the negotiated sub-protocol, if any. Returning `None` refuses
/// the connection with `403 Forbidden`.
pub trait HandlerFactory: Send + Sync {
    fn create(&self, request: &Request<'_>, protocol: Option<&str>) -> Option<Box<dyn MessageHandler>>;
}

impl<F> HandlerFactory for F
where
    F: Fn(&Request<'_>, Option<&str>) -> Option<Box<dyn MessageHandler>> + Send + Sync,
{
    fn create(&self, request: &Request<'_>, protocol: Option<&str>) -> Option<Box<dyn MessageHandler>> {
        self(request, protocol)
    }
}

pub struct WebSocketSource {
    factory: Box<dyn HandlerFactory>,
    /// Sub-protocols the server speaks, in order of preference.
    protocols: Vec<String>,
    config: WebSocketConfig,
    log: Arc<dyn ServerLog>,
}

impl WebSocketSource {
    pub fn new(factory: impl HandlerFactory + 'static, config: WebSocketConfig, log: Arc<dyn ServerLog>) -> Self {
        Self {
            factory: Box::new(factory),
            protocols: Vec::new(),
            config,
            log,
        }
    }

    /// Source that echoes every message and speaks the `echo` sub-protocol.
    pub fn echo(config: WebSocketConfig, log: Arc<dyn ServerLog>) -> Self {
        let factory = |_: &Request<'_>, _: Option<&str>| -> Option<Box<dyn MessageHandler>> {
            Some(Box::new(EchoHandler::default()))
        };
        Self::new(factory, config, log).with_protocols(["echo"])
    }

    pub fn with_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// First supported sub-protocol the client offered.
    fn negotiate<'r>(&self, offered: Option<&'r str>) -> Option<&'r str> {
        let offered = offered?;
        self.protocols.iter().find_map(|supported| {
            offered
                .split(',')
                .map(str::trim)
                .find(|candidate| *candidate == supported.as_str())
        })
    }

    fn refuse(&self, request: &Request<'_>, origin: Option<&str>) -> Box<dyn Response> {
        self.log
            .on_websocket(request.connection_id, request.resource, false, origin, None);
        Box::new(ErrorResponse::new(StatusCode::Forbidden, request.resource))
    }
}

/// True for a well-formed version 13 upgrade request.
pub fn is_upgrade_request(request: &Request<'_>) -> bool {
    let has = |kind: HeaderName, token: &str| {
        request
            .headers
            .get(kind)
            .is_some_and(|header| header.has_token(token))
    };

    request.method == Method::GET
        && has(HeaderName::Upgrade, "websocket")
        && has(HeaderName::Connection, "upgrade")
        && request.known_header(HeaderName::SecWebSocketVersion) == Some(SUPPORTED_VERSION)
        && request
            .known_header(HeaderName::SecWebSocketKey)
            .is_some_and(|key| !key.is_empty())
}

impl ResponseSource for WebSocketSource {
    fn create(&self, request: &Request<'_>) -> anyhow::Result<Box<dyn Response>> {
        let origin = request.known_header(HeaderName::Origin);
        if !is_upgrade_request(request) {
            return Ok(self.refuse(request, origin));
        }

        let protocol = self.negotiate(request.known_header(HeaderName::SecWebSocketProtocol));
        let Some(handler) = self.factory.create(request, protocol) else {
            return Ok(self.refuse(request, origin));
        };
        let Some(key) = request.known_header(HeaderName::SecWebSocketKey) else {
            return Ok(self.refuse(request, origin));
        };

        self.log
            .on_websocket(request.connection_id, request.resource, true, origin, protocol);
        Ok(Box::new(UpgradeResponse::new(
            key,
            protocol,
            handler,
            self.config.clone(),
        )))
    }
}

/// `101 Switching Protocols` answer to an accepted handshake.
pub struct UpgradeResponse {
    headers: Vec<(String, String)>,
    upgrade: Option<WebSocketUpgrade>,
}

impl UpgradeResponse {
    pub fn new(
        key: &str,
        protocol: Option<&str>,
        handler: Box<dyn MessageHandler>,
        config: WebSocketConfig,
    ) -> Self {
        let mut headers = vec![
            (HeaderName::Upgrade.as_str().to_string(), "websocket".to_string()),
            (HeaderName::Connection.as_str().to_string(), "Upgrade".to_string()),
            (HeaderName::SecWebSocketAccept.as_str().to_string(), accept_key(key)),
        ];
        if let Some(protocol) = protocol {
            headers.push((
                HeaderName::SecWebSocketProtocol.as_str().to_string(),
                protocol.to_string(),
            ));
        }

        Self {
            headers,
            upgrade: Some(WebSocketUpgrade { handler, config }),
        }
    }
}

#[async_trait]
impl Response for UpgradeResponse {
    fn status(&self) -> StatusCode {
        StatusCode::SwitchingProtocols
    }

    fn length(&self) -> Option<u64> {
        Some(0)
    }

    fn extra_headers(&self) -> &[(String, String)] {
        &self.headers
    }

    async fn read(&mut self, _buf: &mut [u8]) -> anyhow::Result<(usize, bool)> {
        Ok((0, true))
    }

    fn upgrade(&mut self) -> Option<Box<dyn ProtocolUpgrade>> {
        self.upgrade
            .take()
            .map(|upgrade| Box::new(upgrade) as Box<dyn ProtocolUpgrade>)
    }
}

struct WebSocketUpgrade {
    handler: Box<dyn MessageHandler>,
    config: WebSocketConfig,
}

impl ProtocolUpgrade for WebSocketUpgrade {
    fn upgrade(
        self: Box<Self>,
        stream: BoxedStream,
        leftover: Vec<u8>,
        ctx: UpgradeContext,
    ) -> Arc<dyn ConnectionBase> {
        let WebSocketUpgrade { handler, config } = *self;
        connection::spawn(stream, leftover, handler, config, ctx)
    }
}
