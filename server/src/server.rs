use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use privd_core::Broker;
use privd_protocol::BrokerError;
use privd_protocol::Response;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

struct RegisteredConnection {
    peer: SocketAddr,
    cancel: CancellationToken,
}

/// Registry of live connections, shared between the accept loop and the
/// workers. The size check and the insertion happen under one lock so the
/// maximum-connections admission decision is race-free.
#[derive(Default)]
pub struct ConnectionRegistry {
    live: Mutex<HashMap<u64, RegisteredConnection>>,
}

impl ConnectionRegistry {
    /// Registers a connection unless the registry is already at capacity.
    fn try_register(
        &self,
        id: u64,
        peer: SocketAddr,
        cancel: CancellationToken,
        max: usize,
    ) -> bool {
        let mut live = self.lock();
        if live.len() >= max {
            return false;
        }
        live.insert(id, RegisteredConnection { peer, cancel });
        true
    }

    fn deregister(&self, id: u64) {
        self.lock().remove(&id);
    }

    fn cancel_all(&self) {
        for connection in self.lock().values() {
            connection.cancel.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Peer addresses of every live connection, for status display.
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.lock().values().map(|c| c.peer).collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, RegisteredConnection>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the listening socket and the per-connection worker lifecycle.
///
/// Per listening socket the lifecycle is `bind` → `run` → stopped; each
/// accepted connection moves through handshake → serving → closed inside its
/// own worker task. A worker always deregisters its connection on the way
/// out, however the loop ended.
pub struct ConnectionServer {
    broker: Arc<Broker>,
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
    next_id: u64,
}

impl ConnectionServer {
    /// Binds the loopback listener on the configured port (port 0 picks an
    /// ephemeral port, used by tests).
    pub async fn bind(broker: Arc<Broker>) -> io::Result<Self> {
        let addr = SocketAddr::from(([127, 0, 0, 1], broker.config().listen_port));
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            broker,
            listener,
            registry: Arc::new(ConnectionRegistry::default()),
            shutdown: CancellationToken::new(),
            next_id: 0,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Token that stops the server. Cancelling it is the only path that ends
    /// the accept loop; nothing a client sends can.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Serves until the shutdown token fires, then closes every registered
    /// connection and waits for workers, bounded by the configured grace
    /// period. Workers that do not finish in time are abandoned.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let idle = self.broker.config().idle_timeout();
        let grace = self.broker.config().shutdown_grace();
        let max_connections = self.broker.config().max_connections;
        let mut workers = JoinSet::new();

        info!("listening on {}", self.listener.local_addr()?);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                // Reap finished workers so the set does not grow unboundedly.
                Some(_) = workers.join_next(), if !workers.is_empty() => {}
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            warn!("accept failed: {err}");
                            continue;
                        }
                    };
                    self.next_id += 1;
                    let id = self.next_id;
                    let cancel = self.shutdown.child_token();
                    if !self
                        .registry
                        .try_register(id, peer, cancel.clone(), max_connections)
                    {
                        warn!("connection limit reached; rejecting {peer}");
                        // Dropping the stream closes it unauthenticated.
                        continue;
                    }
                    debug!("accepted {peer} as connection {id}");
                    let broker = Arc::clone(&self.broker);
                    let registry = Arc::clone(&self.registry);
                    workers.spawn(async move {
                        let result = serve_connection(&broker, stream, peer, cancel, idle).await;
                        registry.deregister(id);
                        match result {
                            Ok(()) => debug!("connection {id} closed"),
                            Err(err) => debug!("connection {id} closed on error: {err}"),
                        }
                    });
                }
            }
        }

        drop(self.listener);
        self.registry.cancel_all();
        let drain = async {
            while workers.join_next().await.is_some() {}
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("abandoning {} workers after grace period", workers.len());
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        }
        info!("server stopped");
        Ok(())
    }
}

/// One accepted connection, owned exclusively by its worker: the stream
/// halves, the identity once the handshake completes, and the idle bound
/// applied to every read.
struct ClientSession {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
    identity: Option<String>,
    idle: Duration,
}

impl ClientSession {
    fn new(stream: TcpStream, peer: SocketAddr, idle: Duration) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            peer,
            identity: None,
            idle,
        }
    }

    /// Runs the handshake, bounded by the idle timeout. On success the
    /// session carries the verified identity.
    async fn authenticate(&mut self, broker: &Broker) -> Result<bool, BrokerError> {
        let handshake = tokio::time::timeout(
            self.idle,
            crate::auth::authenticate_client(&mut self.reader, &mut self.writer, broker),
        )
        .await;
        match handshake {
            Ok(identity) => {
                self.identity = identity?;
                Ok(self.identity.is_some())
            }
            Err(_) => {
                debug!("handshake timed out for {}", self.peer);
                Ok(false)
            }
        }
    }

    async fn send(&mut self, response: &Response) -> Result<(), BrokerError> {
        self.writer.write_all(response.to_line().as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        Ok(())
    }

    /// Next command line, without its newline. `None` on EOF or once the
    /// idle deadline passes.
    async fn next_line(&mut self) -> Result<Option<String>, BrokerError> {
        let mut line = String::new();
        match tokio::time::timeout(self.idle, self.reader.read_line(&mut line)).await {
            Ok(Ok(0)) => Ok(None),
            Ok(Ok(_)) => Ok(Some(line.trim_end_matches(['\r', '\n']).to_string())),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => {
                debug!("idle timeout for {:?} at {}", self.identity, self.peer);
                Ok(None)
            }
        }
    }
}

/// One connection's whole life: handshake, then one command per line until
/// EOF, cancellation, or the idle timeout.
async fn serve_connection(
    broker: &Broker,
    stream: TcpStream,
    peer: SocketAddr,
    cancel: CancellationToken,
    idle: Duration,
) -> Result<(), BrokerError> {
    let mut session = ClientSession::new(stream, peer, idle);

    let authenticated = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        result = session.authenticate(broker) => result?,
    };
    if !authenticated {
        session
            .send(&Response::from_error(&BrokerError::AuthenticationFailed))
            .await?;
        return Ok(());
    }
    let identity = session.identity.clone().unwrap_or_default();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            result = session.next_line() => result?,
        };
        let Some(request) = line else { break };
        let response = crate::dispatcher::dispatch(broker, &identity, &request).await;
        session.send(&response).await?;
    }
    Ok(())
}
