use thiserror::Error;

use crate::parcel::Parcel;
use crate::parcel::ParcelError;

/// Interface id every request must carry; requests naming another service
/// are rejected before argument decoding.
pub const SERVICE_DESCRIPTOR: &str = "org.privd.IPrivilegedService";

/// Protocol version reported to legacy clients.
pub const COMPAT_API_VERSION: i32 = 11;
pub const COMPAT_PATCH_VERSION: i32 = 0;

/// Return values of the permission check, matching the legacy convention.
pub const PERMISSION_GRANTED: i32 = 0;
pub const PERMISSION_DENIED: i32 = -1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("unknown transaction code {0}")]
    UnknownCode(u32),
    #[error(transparent)]
    Parcel(#[from] ParcelError),
}

/// The fixed enumeration of operation codes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TransactionCode {
    GetUid = 1,
    CheckPermission = 2,
    GetVersion = 3,
    GetServerPatchVersion = 4,
    Exit = 5,
    UpdateFlagsForUid = 6,
    GetFlagsForUid = 7,
}

impl TryFrom<u32> for TransactionCode {
    type Error = TransactionError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => TransactionCode::GetUid,
            2 => TransactionCode::CheckPermission,
            3 => TransactionCode::GetVersion,
            4 => TransactionCode::GetServerPatchVersion,
            5 => TransactionCode::Exit,
            6 => TransactionCode::UpdateFlagsForUid,
            7 => TransactionCode::GetFlagsForUid,
            other => return Err(TransactionError::UnknownCode(other)),
        })
    }
}

/// A decoded transaction with typed arguments: one variant per operation
/// code, so dispatch is a single exhaustive match instead of an open-ended
/// numeric switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    GetUid,
    CheckPermission { permission: String },
    GetVersion,
    GetServerPatchVersion,
    Exit,
    UpdateFlagsForUid { uid: u32, mask: u32, value: u32 },
    GetFlagsForUid { uid: u32, mask: u32 },
}

impl Transaction {
    /// Decodes the declared argument types for the code from a request
    /// parcel, after checking the interface token.
    pub fn decode(code: u32, parcel: &mut Parcel) -> Result<Self, TransactionError> {
        let code = TransactionCode::try_from(code)?;
        parcel.enforce_interface(SERVICE_DESCRIPTOR)?;
        Ok(match code {
            TransactionCode::GetUid => Transaction::GetUid,
            TransactionCode::CheckPermission => Transaction::CheckPermission {
                permission: parcel.read_string()?,
            },
            TransactionCode::GetVersion => Transaction::GetVersion,
            TransactionCode::GetServerPatchVersion => Transaction::GetServerPatchVersion,
            TransactionCode::Exit => Transaction::Exit,
            TransactionCode::UpdateFlagsForUid => Transaction::UpdateFlagsForUid {
                uid: parcel.read_u32()?,
                mask: parcel.read_u32()?,
                value: parcel.read_u32()?,
            },
            TransactionCode::GetFlagsForUid => Transaction::GetFlagsForUid {
                uid: parcel.read_u32()?,
                mask: parcel.read_u32()?,
            },
        })
    }

    /// Encodes a request parcel for this transaction: the interface token
    /// followed by the declared argument types.
    pub fn encode(&self) -> (u32, Parcel) {
        let mut parcel = Parcel::new();
        parcel.write_interface_token(SERVICE_DESCRIPTOR);
        let code = match self {
            Transaction::GetUid => TransactionCode::GetUid,
            Transaction::CheckPermission { permission } => {
                parcel.write_string(permission);
                TransactionCode::CheckPermission
            }
            Transaction::GetVersion => TransactionCode::GetVersion,
            Transaction::GetServerPatchVersion => TransactionCode::GetServerPatchVersion,
            Transaction::Exit => TransactionCode::Exit,
            Transaction::UpdateFlagsForUid { uid, mask, value } => {
                parcel.write_u32(*uid);
                parcel.write_u32(*mask);
                parcel.write_u32(*value);
                TransactionCode::UpdateFlagsForUid
            }
            Transaction::GetFlagsForUid { uid, mask } => {
                parcel.write_u32(*uid);
                parcel.write_u32(*mask);
                TransactionCode::GetFlagsForUid
            }
        };
        (code as u32, parcel)
    }
}
