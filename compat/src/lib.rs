//! The binary transactional front door: a second presentation of the
//! broker's identity and permission facts in the legacy wire format, served
//! over the host's local IPC socket instead of the text protocol.

mod parcel;
mod service;
mod transactions;

pub use parcel::Parcel;
pub use parcel::ParcelError;
pub use service::CompatBackend;
pub use service::CompatService;
pub use service::read_reply;
pub use service::send_request;
pub use transactions::COMPAT_API_VERSION;
pub use transactions::COMPAT_PATCH_VERSION;
pub use transactions::PERMISSION_DENIED;
pub use transactions::PERMISSION_GRANTED;
pub use transactions::SERVICE_DESCRIPTOR;
pub use transactions::Transaction;
pub use transactions::TransactionCode;
pub use transactions::TransactionError;
