use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::http::connection::Connection;
use crate::http::source::{ResponseSource, ServerLog};
use crate::server::Registry;

/// Accepts connections forever, one task per connection.
pub async fn accept_loop(
    listener: TcpListener,
    config: Arc<Config>,
    source: Arc<dyn ResponseSource>,
    log: Arc<dyn ServerLog>,
    registry: Arc<Registry>,
) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "Accept failed");
                continue;
            }
        };
        info!("Accepted connection from {}", peer);
        if let Err(e) = socket.set_nodelay(true) {
            warn!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let conn = Connection::new(socket, Some(peer), config.clone(), source.clone(), log.clone());
        registry.add(conn.control());
        tokio::spawn(conn.run());
    }
}
