use std::io;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use privd_core::Broker;
use privd_protocol::ELEVATE_PERMISSION;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixListener;
use tokio::net::UnixStream;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::parcel::Parcel;
use crate::transactions::COMPAT_API_VERSION;
use crate::transactions::COMPAT_PATCH_VERSION;
use crate::transactions::PERMISSION_DENIED;
use crate::transactions::PERMISSION_GRANTED;
use crate::transactions::Transaction;

/// Cap on one transaction frame; the protocol carries no payload that comes
/// close to this.
const MAX_FRAME_LEN: u32 = 128 * 1024;

/// Who answers transactions. Selected once at startup by probing for an
/// already-running external broker: when one answers, frames are relayed to
/// it verbatim; otherwise the daemon's own state serves.
pub enum CompatBackend {
    External { socket: PathBuf },
    Hosted { broker: Arc<Broker> },
}

impl CompatBackend {
    /// Probes the configured external broker socket. One variant comes back
    /// and stays for the daemon's lifetime.
    pub async fn probe(broker: Arc<Broker>) -> CompatBackend {
        if let Some(socket) = broker.config().external_broker_socket.clone() {
            if UnixStream::connect(&socket).await.is_ok() {
                info!("external broker answering at {}; relaying", socket.display());
                return CompatBackend::External { socket };
            }
            debug!("external broker at {} not answering", socket.display());
        }
        debug!("no external broker; serving transactions locally");
        CompatBackend::Hosted { broker }
    }

    async fn answer(&self, peer_uid: Option<u32>, code: u32, payload: Vec<u8>) -> Vec<u8> {
        match self {
            CompatBackend::Hosted { broker } => {
                handle_transaction(broker, peer_uid, code, payload)
            }
            CompatBackend::External { socket } => {
                match forward(socket, code, &payload).await {
                    Ok(reply) => reply,
                    Err(err) => {
                        warn!("relay to external broker failed: {err}");
                        let mut reply = Parcel::new();
                        reply.write_exception(-1, &err.to_string());
                        reply.into_bytes()
                    }
                }
            }
        }
    }
}

/// Serves the transactional interface on a Unix socket. A connection may
/// carry any number of transactions, answered strictly in order.
pub struct CompatService {
    listener: UnixListener,
    backend: Arc<CompatBackend>,
    shutdown: CancellationToken,
}

impl CompatService {
    /// Binds the socket, replacing a stale file from a previous run.
    pub fn bind(
        backend: CompatBackend,
        path: &Path,
        shutdown: CancellationToken,
    ) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::remove_file(path) {
            Ok(()) => debug!("removed stale socket {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        let listener = UnixListener::bind(path)?;
        Ok(Self {
            listener,
            backend: Arc::new(backend),
            shutdown,
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let mut handlers = JoinSet::new();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
                accepted = self.listener.accept() => {
                    let (stream, _) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            warn!("transactional accept failed: {err}");
                            continue;
                        }
                    };
                    let backend = Arc::clone(&self.backend);
                    handlers.spawn(async move {
                        if let Err(err) = serve_stream(&backend, stream).await {
                            debug!("transactional connection closed on error: {err}");
                        }
                    });
                }
            }
        }
        handlers.abort_all();
        while handlers.join_next().await.is_some() {}
        info!("transactional interface stopped");
        Ok(())
    }
}

async fn serve_stream(backend: &CompatBackend, mut stream: UnixStream) -> io::Result<()> {
    // The socket transport verifies the peer for us; the caller's word is
    // never consulted here, unlike the text handshake.
    let peer_uid = stream.peer_cred().ok().map(|cred| cred.uid());
    while let Some((code, payload)) = read_frame(&mut stream).await? {
        let reply = backend.answer(peer_uid, code, payload).await;
        write_frame(&mut stream, &reply).await?;
    }
    Ok(())
}

/// One request frame: `[len: u32][code: u32][payload]`, `len` covering the
/// code and payload. `None` on a clean EOF between frames.
async fn read_frame(stream: &mut UnixStream) -> io::Result<Option<(u32, Vec<u8>)>> {
    let mut word = [0u8; 4];
    match stream.read_exact(&mut word).await {
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let len = u32::from_le_bytes(word);
    if !(4..=MAX_FRAME_LEN).contains(&len) {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            format!("invalid frame length {len}"),
        ));
    }
    stream.read_exact(&mut word).await?;
    let code = u32::from_le_bytes(word);
    let mut payload = vec![0u8; len as usize - 4];
    stream.read_exact(&mut payload).await?;
    Ok(Some((code, payload)))
}

/// One reply frame: `[len: u32][payload]`.
async fn write_frame(stream: &mut UnixStream, payload: &[u8]) -> io::Result<()> {
    stream.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await
}

/// Encodes and sends one request frame; used by the relay and by clients.
pub async fn send_request(
    stream: &mut UnixStream,
    code: u32,
    payload: &[u8],
) -> io::Result<()> {
    let len = payload.len() as u32 + 4;
    stream.write_all(&len.to_le_bytes()).await?;
    stream.write_all(&code.to_le_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await
}

/// Reads one reply frame; used by the relay and by clients.
pub async fn read_reply(stream: &mut UnixStream) -> io::Result<Vec<u8>> {
    let mut word = [0u8; 4];
    stream.read_exact(&mut word).await?;
    let len = u32::from_le_bytes(word);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            format!("invalid reply length {len}"),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}

async fn forward(socket: &Path, code: u32, payload: &[u8]) -> io::Result<Vec<u8>> {
    let mut upstream = UnixStream::connect(socket).await?;
    send_request(&mut upstream, code, payload).await?;
    read_reply(&mut upstream).await
}

/// Answers one decoded transaction from the daemon's own state. Decode
/// failures propagate to the caller as a transport-level exception.
fn handle_transaction(
    broker: &Broker,
    peer_uid: Option<u32>,
    code: u32,
    payload: Vec<u8>,
) -> Vec<u8> {
    let mut request = Parcel::from_bytes(payload);
    let mut reply = Parcel::new();
    match Transaction::decode(code, &mut request) {
        Ok(Transaction::GetUid) => {
            reply.write_no_exception();
            reply.write_i32(broker.uid() as i32);
        }
        Ok(Transaction::CheckPermission { permission }) => {
            reply.write_no_exception();
            reply.write_i32(check_permission(broker, peer_uid, &permission));
        }
        Ok(Transaction::GetVersion) => {
            reply.write_no_exception();
            reply.write_i32(COMPAT_API_VERSION);
        }
        Ok(Transaction::GetServerPatchVersion) => {
            reply.write_no_exception();
            reply.write_i32(COMPAT_PATCH_VERSION);
        }
        Ok(Transaction::Exit) => {
            // A hosted instance cannot terminate itself; its lifecycle is
            // owned by the host.
            info!("exit transaction ignored");
            reply.write_no_exception();
        }
        Ok(Transaction::UpdateFlagsForUid { uid, mask, value }) => {
            match broker.store().update_flags_for_uid(uid, mask, value) {
                Ok(()) => reply.write_no_exception(),
                Err(err) => {
                    warn!("flag update for uid {uid} failed: {err}");
                    reply.write_exception(-1, &err.to_string());
                }
            }
        }
        Ok(Transaction::GetFlagsForUid { uid, mask }) => {
            reply.write_no_exception();
            reply.write_i32(broker.store().flags_for_uid(uid, mask) as i32);
        }
        Err(err) => {
            warn!("undecodable transaction {code}: {err}");
            reply.write_exception(-1, &err.to_string());
        }
    }
    reply.into_bytes()
}

/// Same store, same answer as the text protocol's `CHECK_AUTH`, keyed by the
/// transport-verified uid instead of a caller-supplied name.
fn check_permission(broker: &Broker, peer_uid: Option<u32>, permission: &str) -> i32 {
    match peer_uid {
        Some(uid) if permission == ELEVATE_PERMISSION && broker.store().is_uid_granted(uid) => {
            PERMISSION_GRANTED
        }
        _ => PERMISSION_DENIED,
    }
}
