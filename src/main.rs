use std::sync::Arc;

use miniwebd::config::Config;
use miniwebd::http::request::{Method, Request};
use miniwebd::http::response::{BodyResponse, ErrorResponse, Response, StatusCode};
use miniwebd::http::source::{ResponseSource, ServerLog, TracingServerLog};
use miniwebd::server::Server;
use miniwebd::ws::WebSocketSource;

/// Hello page on `/`, form echo on `/form` and a WebSocket echo on `/echo`.
struct DemoSource {
    echo: WebSocketSource,
}

impl ResponseSource for DemoSource {
    fn create(&self, request: &Request<'_>) -> anyhow::Result<Box<dyn Response>> {
        match (request.method, request.resource) {
            (Method::GET | Method::HEAD, "") => Ok(Box::new(BodyResponse::html(
                "<html><body><h1>miniwebd</h1></body></html>",
            ))),
            (_, "echo") => self.echo.create(request),
            (Method::GET | Method::POST, "form") => {
                let mut body = String::new();
                for (name, value) in request.query.params() {
                    body.push_str(&format!("{name}={value}\n"));
                }
                for (name, file) in request.query.files() {
                    body.push_str(&format!("{name}: {} ({} bytes)\n", file.file_name, file.size));
                }
                Ok(Box::new(BodyResponse::ok(body)))
            }
            _ => Ok(Box::new(ErrorResponse::new(StatusCode::NotFound, request.resource))),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = match std::env::var("MINIWEBD_CONFIG") {
        Ok(path) => Config::from_file(path)?,
        Err(_) => Config::load(),
    };

    let log: Arc<dyn ServerLog> = Arc::new(TracingServerLog);
    let source = DemoSource {
        echo: WebSocketSource::echo(cfg.websocket.clone(), log.clone()),
    };
    let server = Server::new(cfg, Arc::new(source)).with_log(log);

    server
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
