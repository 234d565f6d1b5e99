use std::io;

use privd_core::Broker;
use privd_protocol::ELEVATE_PERMISSION;
use privd_protocol::auth_required_line;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Runs the authentication handshake on a fresh connection: prompt, read the
/// claimed package identity, resolve it against the package index, require
/// the broker permission declaration, require a live grant.
///
/// Returns the verified identity, or `None` on any failure; the caller
/// reports a single structured failure and closes. IO errors propagate.
///
/// The identity is caller-supplied text: TCP gives the daemon no way to read
/// the peer's real uid, so this handshake trusts the claim only as far as the
/// package index and grant store corroborate it. Transports with verified
/// peer credentials (the binary interface's Unix socket) do not use it.
pub async fn authenticate_client<R, W>(
    reader: &mut R,
    writer: &mut W,
    broker: &Broker,
) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer.write_all(auth_required_line().as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        debug!("connection closed before identifying");
        return Ok(None);
    }
    let identity = line.trim();
    if identity.is_empty() {
        warn!("empty identity line");
        return Ok(None);
    }

    let Some(record) = broker.packages().resolve(identity) else {
        warn!("unknown package {identity:?}");
        return Ok(None);
    };
    if !record.declares(ELEVATE_PERMISSION) {
        warn!("package {identity:?} does not declare {ELEVATE_PERMISSION}");
        return Ok(None);
    }
    if !broker.store().is_granted(identity, record.uid) {
        warn!("package {identity:?} (uid {}) is not granted", record.uid);
        return Ok(None);
    }

    info!("authenticated {identity:?} (uid {})", record.uid);
    Ok(Some(identity.to_string()))
}
