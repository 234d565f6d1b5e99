use thiserror::Error;

/// Failures that cross a component boundary inside the broker.
///
/// Each variant's `Display` text is what an unprivileged client may see, so
/// the messages stay short and carry no internal detail beyond the offending
/// package name.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The handshake did not produce a verified identity. The connection is
    /// told once and then closed.
    #[error("Authentication required")]
    AuthenticationFailed,

    /// The claimed identity does not resolve to an installed package. The
    /// connection stays open.
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    /// The command text failed validation and was never handed to the
    /// elevation helper.
    #[error("Invalid command")]
    InvalidCommand,

    /// Socket or stream failure on one connection; never propagated to other
    /// connections.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Unexpected failure inside command processing, caught at the dispatch
    /// boundary.
    #[error("Internal error: {0}")]
    Internal(String),
}
