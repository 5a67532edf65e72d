//! Per-resource serialization
//!
//! Convergence reads live state and then writes it back, so two passes for
//! the same Memcached must never interleave. [`ResourceLocks`] hands out one
//! async mutex per resource identity.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use kube::ResourceExt;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::crd::Memcached;
use crate::error::{Error, Result};

/// Identity of a Memcached resource
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of(memcached: &Memcached) -> Result<Self> {
        let name = memcached.name_any();
        let namespace = memcached
            .namespace()
            .ok_or_else(|| Error::missing_metadata(format!("Memcached {} without a namespace", name)))?;
        Ok(Self::new(namespace, name))
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Held while a resource is being converged
pub type ResourceGuard = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct ResourceLocks {
    locks: Mutex<HashMap<ResourceKey, Arc<AsyncMutex<()>>>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other task holds `key`, then hold it until the guard drops
    pub async fn lock(&self, key: ResourceKey) -> ResourceGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // Entries only referenced by the map are idle
            locks.retain(|k, lock| *k == key || Arc::strong_count(lock) > 1);
            locks.entry(key).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of identities currently tracked
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
