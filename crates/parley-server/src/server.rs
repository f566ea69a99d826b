use std::{
    io::{self, Write},
    net::{Shutdown, SocketAddr, TcpListener},
    sync::Arc,
    thread,
};

use parley_sync::ReentrantRwLock;
use parley_utils::{Args, ArgsError};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    fanout::SendPool,
    roster::Roster,
    session::{ServerState, Session},
};

/// Literal rejection bytes written (unframed) to a connection over the cap.
pub const SERVER_FULL: &[u8] = b"SERVER_FULL";

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("couldn't bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error("accept loop failed: {0}")]
    Accept(#[from] io::Error),
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Published users allowed before new connections are turned away.
    pub max_users: usize,
    /// Fanout pool size.
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 50600, max_users: 30, workers: 200 }
    }
}

impl ServerConfig {
    pub fn from_args(args: &Args) -> Result<Self, ArgsError> {
        let defaults = Self::default();
        Ok(Self {
            host: args.string_or("host", &defaults.host),
            port: args.parse_or("port", defaults.port)?,
            max_users: defaults.max_users,
            workers: args.parse_or("workers", defaults.workers)?,
        })
    }
}

/// Owns the listening socket and the shared state; accepts forever.
pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
    max_users: usize,
}

impl Server {
    /// Binds the listener and brings up the fanout pool.
    pub fn bind(cfg: &ServerConfig) -> Result<Self, ServerError> {
        let pool = SendPool::new(cfg.workers);
        let state = Arc::new(ServerState {
            roster: ReentrantRwLock::new(Roster::new(pool.clone())),
            pool,
        });
        let addr = format!("{}:{}", cfg.host, cfg.port);
        let listener =
            TcpListener::bind(&addr).map_err(|source| ServerError::Bind { addr, source })?;
        Ok(Self { listener, state, max_users: cfg.max_users })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop: enforce the user cap, spawn one session thread per
    /// connection. Session threads are never joined; they die with the
    /// process.
    pub fn serve(self) -> Result<(), ServerError> {
        info!(
            addr = %self.listener.local_addr().map_err(ServerError::Accept)?,
            "chat server listening, press Ctrl+C to stop"
        );
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(%err, "accept failed");
                    continue;
                }
            };

            // Cap check and rejection both happen under the write hold, so
            // the count can't move between the check and the verdict.
            let rejected = {
                let roster = self.state.roster.write();
                if roster.connected_users() >= self.max_users {
                    warn!(%peer, "server full, turning connection away");
                    let _ = (&stream).write_all(SERVER_FULL);
                    let _ = stream.shutdown(Shutdown::Both);
                    true
                } else {
                    false
                }
            };
            if rejected {
                continue;
            }

            info!(%peer, "accepted");
            match Session::new(Arc::clone(&self.state), stream) {
                Ok(session) => {
                    let spawned = thread::Builder::new()
                        .name(format!("session-{peer}"))
                        .spawn(move || session.run());
                    if let Err(err) = spawned {
                        warn!(%peer, %err, "couldn't spawn session thread");
                    }
                }
                Err(err) => warn!(%peer, %err, "couldn't set up session"),
            }
        }
    }
}
