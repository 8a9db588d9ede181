use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::config;
use crate::journal::Journal;
use crate::logging::Logger;
use crate::session::run_session;
use crate::shutdown::ShutdownFlag;
use crate::workers::{CompletionToken, WorkerRecord, WorkerRegistry};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9000;
pub const DEFAULT_BACKLOG: u32 = 10;

/// Idle wait between accept polls; bounds how long shutdown can go
/// unnoticed by the accept loop.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub backlog: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
        }
    }
}

impl From<config::ServerConfig> for ServerConfig {
    fn from(value: config::ServerConfig) -> Self {
        Self {
            host: value.host,
            port: value.port,
            backlog: value.backlog,
        }
    }
}

#[derive(Debug)]
pub enum ServerError {
    Resolve {
        address: String,
        source: Option<io::Error>,
    },
    CreateSocket {
        source: io::Error,
    },
    ReuseAddress {
        source: io::Error,
    },
    Bind {
        address: String,
        source: io::Error,
    },
    Listen {
        source: io::Error,
    },
    SetNonBlocking {
        source: io::Error,
    },
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolve { address, source } => match source {
                Some(source) => {
                    write!(f, "failed to resolve listen address '{address}': {source}")
                }
                None => write!(f, "listen address '{address}' resolved to nothing"),
            },
            Self::CreateSocket { source } => {
                write!(f, "failed to create listening socket: {source}")
            }
            Self::ReuseAddress { source } => {
                write!(f, "failed to set SO_REUSEADDR on listening socket: {source}")
            }
            Self::Bind { address, source } => {
                write!(f, "failed to bind TCP server on {address}: {source}")
            }
            Self::Listen { source } => {
                write!(f, "failed to listen on bound socket: {source}")
            }
            Self::SetNonBlocking { source } => {
                write!(f, "failed to set listening socket to non-blocking mode: {source}")
            }
        }
    }
}

impl std::error::Error for ServerError {}

/// Owns the listening socket and the accept loop. Accepted connections are
/// handed to dedicated session threads; the acceptor itself never inspects
/// packet contents.
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    pub fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let address = format!("{}:{}", config.host, config.port);
        let resolved = address
            .to_socket_addrs()
            .map_err(|source| ServerError::Resolve {
                address: address.clone(),
                source: Some(source),
            })?
            .next()
            .ok_or_else(|| ServerError::Resolve {
                address: address.clone(),
                source: None,
            })?;

        let domain = if resolved.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|source| ServerError::CreateSocket { source })?;
        socket
            .set_reuse_address(true)
            .map_err(|source| ServerError::ReuseAddress { source })?;
        socket
            .bind(&resolved.into())
            .map_err(|source| ServerError::Bind { address, source })?;
        socket
            .listen(config.backlog as i32)
            .map_err(|source| ServerError::Listen { source })?;

        let listener: TcpListener = socket.into();
        listener
            .set_nonblocking(true)
            .map_err(|source| ServerError::SetNonBlocking { source })?;

        Ok(Self { listener })
    }

    pub fn from_app_config(app_config: &config::AppConfig) -> Result<Self, ServerError> {
        let cfg = ServerConfig::from(app_config.server.clone());
        Self::bind(&cfg)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Non-blocking accept; `WouldBlock` becomes `None`.
    pub fn try_accept(&self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        match self.listener.accept() {
            Ok(accepted) => Ok(Some(accepted)),
            Err(source) if source.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(source) => Err(source),
        }
    }

    /// The accept loop: poll for connections until the shutdown flag is set,
    /// spawning and registering a session worker per accepted connection and
    /// reaping finished ones after each registration. Accept failures are
    /// logged and retried unless shutdown is in progress.
    pub fn run(
        &self,
        journal: &Arc<Journal>,
        registry: &WorkerRegistry,
        shutdown: &ShutdownFlag,
        logger: &Arc<Logger>,
    ) {
        while !shutdown.is_set() {
            match self.try_accept() {
                Ok(Some((stream, peer))) => {
                    logger.info(
                        Some("server"),
                        &format!("Accepted connection from {peer}"),
                    );
                    if let Err(error) =
                        spawn_session_worker(stream, peer, journal, registry, shutdown, logger)
                    {
                        logger.error(
                            Some("server"),
                            &format!("failed to start session for {peer}: {error}"),
                        );
                    }
                    registry.reap_completed();
                }
                Ok(None) => thread::sleep(ACCEPT_POLL_INTERVAL),
                Err(error) => {
                    if shutdown.is_set() {
                        break;
                    }
                    logger.error(Some("server"), &format!("accept failed: {error}"));
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }
    }
}

fn spawn_session_worker(
    stream: TcpStream,
    peer: SocketAddr,
    journal: &Arc<Journal>,
    registry: &WorkerRegistry,
    shutdown: &ShutdownFlag,
    logger: &Arc<Logger>,
) -> io::Result<()> {
    // The session thread wants plain blocking reads even though the
    // listener itself is non-blocking.
    stream.set_nonblocking(false)?;
    let registry_stream = stream.try_clone()?;

    let completion = CompletionToken::new();
    let worker_completion = completion.clone();
    let worker_journal = Arc::clone(journal);
    let worker_shutdown = shutdown.clone();
    let worker_logger = Arc::clone(logger);

    let handle = thread::Builder::new()
        .name(format!("session-{peer}"))
        .spawn(move || {
            let end = run_session(
                stream,
                peer,
                &worker_journal,
                &worker_shutdown,
                &worker_logger,
            );
            worker_logger.info(
                Some("session"),
                &format!("Closed connection from {peer} ({end:?})"),
            );
            worker_completion.mark_complete();
        })?;

    registry.register(WorkerRecord::new(
        Some(peer),
        Some(registry_stream),
        completion,
        handle,
    ));
    Ok(())
}
