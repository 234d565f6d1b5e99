//! Shared protocol surface for the privd broker: the text-protocol wire
//! types, the persisted grant flag word, and the error taxonomy every
//! component reports through.

mod error;
mod grants;
mod wire;

pub use error::BrokerError;
pub use grants::GrantFlags;
pub use grants::InvalidStoreKey;
pub use grants::StoreKey;
pub use wire::AUTH_REQUIRED_TYPE;
pub use wire::Request;
pub use wire::Response;
pub use wire::auth_required_line;

/// Permission string a package must declare before the broker will consider
/// granting it elevated execution.
pub const ELEVATE_PERMISSION: &str = "org.privd.permission.ELEVATE";
