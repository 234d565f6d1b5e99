use std::collections::BTreeMap;
use std::collections::HashMap;
use std::io;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use privd_protocol::GrantFlags;
use privd_protocol::StoreKey;
use tempfile::NamedTempFile;

/// Durable mapping from (package, uid) to a grant flag word.
///
/// All operations are total: an unknown key behaves as not-granted, never as
/// an error. Every read-modify-write runs under one mutex spanning both the
/// in-memory update and the file write, so concurrent callers observe each
/// single-key mutation atomically; concurrent writes to the same key resolve
/// last-write-wins.
#[derive(Debug)]
pub struct PermissionStore {
    path: PathBuf,
    entries: Mutex<HashMap<StoreKey, GrantFlags>>,
}

impl PermissionStore {
    /// Opens the store file, creating an empty store when the file does not
    /// exist yet. Corrupt contents are an error rather than silent data loss.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => parse_store(&raw)?,
            Err(err) if err.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn is_granted(&self, package: &str, uid: u32) -> bool {
        let key = StoreKey::new(package, uid);
        self.lock().get(&key).is_some_and(|flags| flags.is_granted())
    }

    pub fn is_temporary_granted(&self, package: &str, uid: u32) -> bool {
        let key = StoreKey::new(package, uid);
        self.lock()
            .get(&key)
            .is_some_and(|flags| flags.is_temporary())
    }

    /// True when any package under this uid holds a live grant. The binary
    /// compat interface identifies callers by uid alone, so this must agree
    /// with [`PermissionStore::is_granted`] for every key under the uid.
    pub fn is_uid_granted(&self, uid: u32) -> bool {
        self.lock()
            .iter()
            .any(|(key, flags)| key.uid == uid && flags.is_granted())
    }

    /// Records a grant. Idempotent: repeating the call with the same
    /// arguments leaves the stored state unchanged.
    pub fn grant(&self, package: &str, uid: u32, temporary: bool) -> io::Result<()> {
        let flags = if temporary {
            GrantFlags::ALLOWED | GrantFlags::TEMPORARY
        } else {
            GrantFlags::ALLOWED
        };
        let mut entries = self.lock();
        entries.insert(StoreKey::new(package, uid), flags);
        self.persist(&entries)
    }

    /// Overwrites the record with a bare `DENIED`, discarding any prior
    /// `TEMPORARY` flag.
    pub fn revoke(&self, package: &str, uid: u32) -> io::Result<()> {
        let mut entries = self.lock();
        entries.insert(StoreKey::new(package, uid), GrantFlags::DENIED);
        self.persist(&entries)
    }

    /// Downgrades every temporary grant to a bare `ALLOWED` entry without
    /// revoking it. Run at daemon restart.
    pub fn clear_temporary_grants(&self) -> io::Result<()> {
        let mut entries = self.lock();
        let mut changed = false;
        for flags in entries.values_mut() {
            if flags.is_temporary() {
                flags.remove(GrantFlags::TEMPORARY);
                changed = true;
            }
        }
        if changed { self.persist(&entries) } else { Ok(()) }
    }

    /// Erases the whole store. The only operation that physically deletes
    /// records.
    pub fn clear(&self) -> io::Result<()> {
        let mut entries = self.lock();
        entries.clear();
        self.persist(&entries)
    }

    /// Keys whose records match the predicate, in unspecified order.
    pub fn list_granted<F>(&self, predicate: F) -> Vec<StoreKey>
    where
        F: Fn(&StoreKey, GrantFlags) -> bool,
    {
        self.lock()
            .iter()
            .filter(|(key, flags)| predicate(key, **flags))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// OR of the flag words across every record under the uid, masked.
    /// Unknown uids read as 0.
    pub fn flags_for_uid(&self, uid: u32, mask: u32) -> u32 {
        self.lock()
            .iter()
            .filter(|(key, _)| key.uid == uid)
            .fold(0, |acc, (_, flags)| acc | flags.bits())
            & mask
    }

    /// Applies `new = (old & !mask) | (value & mask)` to every record under
    /// the uid, then normalizes so `ALLOWED` and `DENIED` never coexist in a
    /// persisted value. A uid with no records is a no-op: the store cannot
    /// invent a package name for the key.
    pub fn update_flags_for_uid(&self, uid: u32, mask: u32, value: u32) -> io::Result<()> {
        let mut entries = self.lock();
        let mut changed = false;
        for (key, flags) in entries.iter_mut() {
            if key.uid != uid {
                continue;
            }
            let bits = (flags.bits() & !mask) | (value & mask);
            let updated = GrantFlags::from_bits_truncate(bits).normalized();
            if updated != *flags {
                *flags = updated;
                changed = true;
            }
        }
        if changed { self.persist(&entries) } else { Ok(()) }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<StoreKey, GrantFlags>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, entries: &HashMap<StoreKey, GrantFlags>) -> io::Result<()> {
        let map: BTreeMap<String, u32> = entries
            .iter()
            .map(|(key, flags)| (key.to_string(), flags.bits()))
            .collect();
        let serialized = serde_json::to_string_pretty(&map)
            .map_err(|err| io::Error::new(ErrorKind::InvalidData, err))?;
        write_atomically(&self.path, &serialized)
    }
}

fn parse_store(raw: &str) -> io::Result<HashMap<StoreKey, GrantFlags>> {
    let map: BTreeMap<String, u32> =
        serde_json::from_str(raw).map_err(|err| io::Error::new(ErrorKind::InvalidData, err))?;
    let mut entries = HashMap::with_capacity(map.len());
    for (raw_key, bits) in map {
        let key: StoreKey = raw_key
            .parse()
            .map_err(|err| io::Error::new(ErrorKind::InvalidData, err))?;
        entries.insert(key, GrantFlags::from_bits_truncate(bits).normalized());
    }
    Ok(entries)
}

/// Replace-via-rename so a crash mid-write never leaves a truncated store.
fn write_atomically(path: &Path, contents: &str) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(
            ErrorKind::InvalidInput,
            format!("store path {} has no parent directory", path.display()),
        )
    })?;
    std::fs::create_dir_all(parent)?;
    let tmp = NamedTempFile::new_in(parent)?;
    std::fs::write(tmp.path(), contents)?;
    tmp.persist(path)?;
    Ok(())
}
