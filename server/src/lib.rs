//! The text-protocol half of the privd daemon: the line-based authentication
//! handshake, per-command dispatch, and the connection server that owns the
//! listening socket and worker lifecycle.

mod auth;
mod dispatcher;
mod server;

pub use auth::authenticate_client;
pub use dispatcher::SERVER_VERSION;
pub use dispatcher::dispatch;
pub use server::ConnectionRegistry;
pub use server::ConnectionServer;
