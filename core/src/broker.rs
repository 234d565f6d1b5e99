use std::sync::Arc;

use crate::config::BrokerConfig;
use crate::executor::CommandExecutor;
use crate::package_index::PackageIndex;
use crate::permission_store::PermissionStore;

/// Shared handle to the daemon's long-lived state: the grant store, the
/// package index, the executor, and the daemon's own uid.
///
/// Constructed exactly once in the binary and passed explicitly to every
/// component that needs it; there is deliberately no globally reachable
/// instance.
#[derive(Debug)]
pub struct Broker {
    config: BrokerConfig,
    store: PermissionStore,
    packages: PackageIndex,
    executor: CommandExecutor,
    uid: u32,
}

impl Broker {
    /// Loads the store and package index named by the config.
    pub fn new(config: BrokerConfig) -> anyhow::Result<Arc<Self>> {
        let store = PermissionStore::open(&config.store_path)?;
        let packages = PackageIndex::load(&config.package_index_path)?;
        Ok(Self::with_parts(config, store, packages))
    }

    /// Assembles a broker from already-built parts; used by the loader above
    /// and by tests that stage their own store and index.
    pub fn with_parts(
        config: BrokerConfig,
        store: PermissionStore,
        packages: PackageIndex,
    ) -> Arc<Self> {
        let executor = CommandExecutor::new(config.elevation_helper.clone());
        let uid = own_uid();
        Arc::new(Self {
            config,
            store,
            packages,
            executor,
            uid,
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn store(&self) -> &PermissionStore {
        &self.store
    }

    pub fn packages(&self) -> &PackageIndex {
        &self.packages
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    /// The uid the daemon itself runs as, reported over the binary interface.
    pub fn uid(&self) -> u32 {
        self.uid
    }
}

fn own_uid() -> u32 {
    // SAFETY: getuid has no failure modes and touches no memory.
    unsafe { libc::getuid() }
}
