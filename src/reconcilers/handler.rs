//! Change notification dispatch

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use super::converge::converge;
use super::locks::{ResourceKey, ResourceLocks};
use super::owner_chain::resolve_governing_resource;
use crate::adapters::{ActionExecutor, ObjectStore};
use crate::crd::Memcached;
use crate::error::Result;
use crate::metrics;

/// The closed set of object kinds delivered to the reconciler
#[derive(Clone, Debug)]
pub enum WatchedObject {
    Memcached(Memcached),
    Pod(Pod),
    /// Any other watched kind; ignored
    Other { kind: String },
}

impl WatchedObject {
    pub fn kind(&self) -> &str {
        match self {
            WatchedObject::Memcached(_) => "Memcached",
            WatchedObject::Pod(_) => "Pod",
            WatchedObject::Other { kind } => kind,
        }
    }
}

/// A change to a watched object as delivered by the watch subsystem
#[derive(Clone, Debug)]
pub struct Notification {
    pub object: WatchedObject,
    pub deleted: bool,
}

impl Notification {
    pub fn applied(object: WatchedObject) -> Self {
        Self {
            object,
            deleted: false,
        }
    }

    pub fn deleted(object: WatchedObject) -> Self {
        Self {
            object,
            deleted: true,
        }
    }
}

/// Entry point for change notifications.
///
/// Holds no state besides the per-resource locks, so notifications may be
/// handled concurrently from any number of tasks.
pub struct Reconciler<C> {
    cluster: Arc<C>,
    locks: ResourceLocks,
}

impl<C> Reconciler<C>
where
    C: ObjectStore + ActionExecutor,
{
    pub fn new(cluster: Arc<C>) -> Self {
        Self {
            cluster,
            locks: ResourceLocks::new(),
        }
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    /// Handle one notification; errors are returned so the caller can redeliver
    #[instrument(skip_all, fields(kind = notification.object.kind(), deleted = notification.deleted))]
    pub async fn handle(&self, notification: &Notification) -> Result<()> {
        let trigger = notification.object.kind();
        metrics::RECONCILIATIONS.with_label_values(&[trigger]).inc();
        let _timer = metrics::RECONCILE_DURATION
            .with_label_values(&[trigger])
            .start_timer();

        let result = self.dispatch(notification).await;
        if result.is_err() {
            metrics::RECONCILIATION_ERRORS.with_label_values(&[trigger]).inc();
        }
        result
    }

    async fn dispatch(&self, notification: &Notification) -> Result<()> {
        match &notification.object {
            WatchedObject::Memcached(memcached) => {
                // Dependents carry owner references and are removed by the
                // cluster garbage collector.
                if notification.deleted {
                    info!(name = %memcached.name_any(), "Memcached deleted, nothing to do");
                    return Ok(());
                }
                self.converge_serialized(memcached).await
            }
            WatchedObject::Pod(pod) => {
                debug!(pod = %pod.name_any(), "Got a change notification for Pod");
                match resolve_governing_resource(self.cluster.as_ref(), pod).await? {
                    Some(memcached) => {
                        metrics::OWNER_RESOLUTIONS.with_label_values(&["governed"]).inc();
                        self.converge_serialized(&memcached).await
                    }
                    None => {
                        metrics::OWNER_RESOLUTIONS
                            .with_label_values(&["not_governed"])
                            .inc();
                        debug!(pod = %pod.name_any(), "Pod does not belong to a Memcached");
                        Ok(())
                    }
                }
            }
            WatchedObject::Other { kind } => {
                debug!(kind = %kind, "Ignoring notification for unhandled kind");
                Ok(())
            }
        }
    }

    /// Converge the current state of `memcached` while holding its lock.
    ///
    /// The copy handed in may predate writes made by an earlier holder of the
    /// lock, so the resource is read again once the guard is held.
    async fn converge_serialized(&self, memcached: &Memcached) -> Result<()> {
        let key = ResourceKey::of(memcached)?;
        let _guard = self.locks.lock(key.clone()).await;

        let current = match self.cluster.get_memcached(&key.namespace, &key.name).await {
            Ok(current) => current,
            Err(e) if e.is_not_found() => {
                debug!(resource = %key, "Memcached gone before convergence");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        converge(self.cluster.as_ref(), self.cluster.as_ref(), &current).await
    }
}
