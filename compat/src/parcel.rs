use thiserror::Error;

/// Cap on any single length-prefixed field, so a hostile client cannot make
/// the daemon allocate arbitrarily.
const MAX_FIELD_LEN: u32 = 64 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParcelError {
    #[error("parcel truncated: wanted {wanted} bytes, {remaining} remain")]
    Truncated { wanted: usize, remaining: usize },
    #[error("field length {0} exceeds the parcel limit")]
    Oversized(u32),
    #[error("invalid utf-8 in parcel string")]
    InvalidString,
    #[error("unexpected interface descriptor {found:?}")]
    BadDescriptor { found: String },
}

/// Flat little-endian read/write buffer for one transaction payload.
///
/// Requests carry the interface descriptor first, then the declared argument
/// types in order. Replies carry the no-exception marker (i32 0) or an
/// exception code and message, then the declared return type.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Parcel {
    buf: Vec<u8>,
    pos: usize,
}

impl Parcel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(buf: Vec<u8>) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.buf.extend_from_slice(value.as_bytes());
    }

    pub fn read_i32(&mut self) -> Result<i32, ParcelError> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, ParcelError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_string(&mut self) -> Result<String, ParcelError> {
        let len = self.read_u32()?;
        if len > MAX_FIELD_LEN {
            return Err(ParcelError::Oversized(len));
        }
        let bytes = self.take(len as usize)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ParcelError::InvalidString)
    }

    /// Writes the interface token at the head of a request.
    pub fn write_interface_token(&mut self, descriptor: &str) {
        self.write_string(descriptor);
    }

    /// Reads and checks the interface token; requests for other services are
    /// rejected before any argument is decoded.
    pub fn enforce_interface(&mut self, descriptor: &str) -> Result<(), ParcelError> {
        let found = self.read_string()?;
        if found == descriptor {
            Ok(())
        } else {
            Err(ParcelError::BadDescriptor { found })
        }
    }

    /// Standard reply header for a successful transaction.
    pub fn write_no_exception(&mut self) {
        self.write_i32(0);
    }

    pub fn write_exception(&mut self, code: i32, message: &str) {
        self.write_i32(code);
        self.write_string(message);
    }

    /// Reads the reply header: `Ok` on the no-exception marker, otherwise the
    /// propagated exception code and message.
    pub fn read_exception(&mut self) -> Result<Result<(), (i32, String)>, ParcelError> {
        let code = self.read_i32()?;
        if code == 0 {
            Ok(Ok(()))
        } else {
            let message = self.read_string()?;
            Ok(Err((code, message)))
        }
    }

    fn take(&mut self, wanted: usize) -> Result<&[u8], ParcelError> {
        let remaining = self.remaining();
        if wanted > remaining {
            return Err(ParcelError::Truncated { wanted, remaining });
        }
        let start = self.pos;
        self.pos += wanted;
        Ok(&self.buf[start..self.pos])
    }
}
