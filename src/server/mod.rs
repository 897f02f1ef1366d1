//! Server: accepts connections, spawns their drivers, and runs the idle
//! sweep.

pub mod listener;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::config::Config;
use crate::http::source::{ResponseSource, ServerLog, TracingServerLog};
use crate::lifecycle::ConnectionBase;

/// Live connections, as seen by the sweep.
#[derive(Default)]
pub struct Registry {
    connections: Mutex<Vec<Arc<dyn ConnectionBase>>>,
    accepted: AtomicU64,
    /// Responses served by connections that have been dropped.
    responses: AtomicU64,
}

/// Snapshot of the registry counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub active: usize,
    pub accepted: u64,
    pub responses: u64,
}

impl Registry {
    pub fn add(&self, connection: Arc<dyn ConnectionBase>) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.lock().push(connection);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Advances every connection's idle clock, drops finished connections
    /// and adopts upgrade successors. Returns the number of live connections.
    pub fn sweep_once(&self, elapsed: Duration) -> usize {
        let mut connections = self.lock();
        let mut successors = Vec::new();

        connections.retain(|connection| {
            let outcome = connection.on_step(elapsed);
            successors.extend(outcome.successor);
            if !outcome.retain {
                self.responses
                    .fetch_add(connection.response_count(), Ordering::Relaxed);
            }
            outcome.retain
        });
        connections.extend(successors);
        connections.len()
    }

    /// Asks every connection to close.
    pub fn stop_all(&self) {
        for connection in self.lock().iter() {
            connection.stop();
        }
    }

    pub fn stats(&self) -> RegistryStats {
        let connections = self.lock();
        let live_responses: u64 = connections.iter().map(|c| c.response_count()).sum();
        RegistryStats {
            active: connections.len(),
            accepted: self.accepted.load(Ordering::Relaxed),
            responses: self.responses.load(Ordering::Relaxed) + live_responses,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn ConnectionBase>>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Server {
    config: Arc<Config>,
    source: Arc<dyn ResponseSource>,
    log: Arc<dyn ServerLog>,
    registry: Arc<Registry>,
}

impl Server {
    pub fn new(config: Config, source: Arc<dyn ResponseSource>) -> Self {
        Self {
            config: Arc::new(config),
            source,
            log: Arc::new(TracingServerLog),
            registry: Arc::new(Registry::default()),
        }
    }

    /// Replaces the default `tracing` server log.
    pub fn with_log(mut self, log: Arc<dyn ServerLog>) -> Self {
        self.log = log;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Binds the configured address and serves until `shutdown` resolves.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.config.server.listen_addr).await?;
        info!("Listening on {}", self.config.server.listen_addr);
        self.serve(listener, shutdown).await
    }

    /// Serves connections from `listener` until `shutdown` resolves, then
    /// stops every live connection.
    pub async fn serve(&self, listener: TcpListener, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let sweeper = tokio::spawn(sweep(self.registry.clone(), self.config.server.sweep_interval()));

        let result = tokio::select! {
            res = listener::accept_loop(
                listener,
                self.config.clone(),
                self.source.clone(),
                self.log.clone(),
                self.registry.clone(),
            ) => res,
            _ = shutdown => {
                info!("Shutdown signal received");
                Ok(())
            }
        };

        sweeper.abort();
        self.registry.stop_all();
        result
    }
}

async fn sweep(registry: Arc<Registry>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    let mut last = Instant::now();

    loop {
        ticker.tick().await;
        let now = Instant::now();
        let live = registry.sweep_once(now - last);
        last = now;
        debug!(live, "Idle sweep");
    }
}
