use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// Persisted grant state for one (package, uid) key.
    ///
    /// The bit values are part of the on-disk format and must not change.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GrantFlags: u32 {
        const ALLOWED = 1 << 1;
        const DENIED = 1 << 2;
        const TEMPORARY = 1 << 3;
    }
}

impl GrantFlags {
    /// Whether this flag word counts as a live grant. A record with neither
    /// `ALLOWED` nor `DENIED` set reads as not-granted.
    pub fn is_granted(self) -> bool {
        self.contains(GrantFlags::ALLOWED)
    }

    /// Whether the grant is flagged for bulk downgrade at the next
    /// maintenance pass.
    pub fn is_temporary(self) -> bool {
        self.contains(GrantFlags::TEMPORARY)
    }

    /// Restores the stored-value invariants: `ALLOWED` and `DENIED` never
    /// coexist (`DENIED` wins when both are present), and `TEMPORARY` only
    /// ever accompanies `ALLOWED`.
    pub fn normalized(self) -> GrantFlags {
        let mut flags = self;
        if flags.contains(GrantFlags::DENIED) {
            flags.remove(GrantFlags::ALLOWED);
        }
        if !flags.contains(GrantFlags::ALLOWED) {
            flags.remove(GrantFlags::TEMPORARY);
        }
        flags
    }
}

/// Key of one grant record: the package identity paired with its numeric uid.
///
/// The text form is `<package>_<uid>`. Package names may themselves contain
/// underscores, so parsing splits on the last one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreKey {
    pub package: String,
    pub uid: u32,
}

impl StoreKey {
    pub fn new(package: impl Into<String>, uid: u32) -> Self {
        Self {
            package: package.into(),
            uid,
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.package, self.uid)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid store key: {0:?}")]
pub struct InvalidStoreKey(pub String);

impl FromStr for StoreKey {
    type Err = InvalidStoreKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((package, uid)) = s.rsplit_once('_') else {
            return Err(InvalidStoreKey(s.to_string()));
        };
        if package.is_empty() {
            return Err(InvalidStoreKey(s.to_string()));
        }
        let uid = uid.parse().map_err(|_| InvalidStoreKey(s.to_string()))?;
        Ok(StoreKey::new(package, uid))
    }
}
