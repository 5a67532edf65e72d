//! Convergence of a single Memcached resource
//!
//! Each step is idempotent: creating an existing Deployment succeeds, and the
//! replica count and status are only written when they differ from the
//! desired values.

use kube::ResourceExt;
use tracing::{debug, info, instrument};

use super::deployment::{deployment_for, labels_for};
use crate::adapters::{ActionExecutor, ObjectStore};
use crate::crd::{Memcached, MemcachedStatus};
use crate::error::{Error, Result};
use crate::metrics;

/// Replica count the API server assumes when `spec.replicas` is unset
const DEFAULT_REPLICAS: i32 = 1;

/// Drive the Deployment and status of `memcached` toward its spec
#[instrument(skip_all, fields(name = %memcached.name_any(), namespace = memcached.namespace()))]
pub async fn converge<S, A>(store: &S, executor: &A, memcached: &Memcached) -> Result<()>
where
    S: ObjectStore + ?Sized,
    A: ActionExecutor + ?Sized,
{
    let name = memcached.name_any();
    let namespace = memcached
        .namespace()
        .ok_or_else(|| Error::missing_metadata(format!("Memcached {} without a namespace", name)))?;
    let size = memcached.spec.size;

    let desired = deployment_for(memcached);
    match executor.create_deployment(&desired).await {
        Ok(()) => info!(name = %name, size = size, "Created Deployment"),
        Err(e) if e.is_already_exists() => debug!(name = %name, "Deployment already exists"),
        Err(e) => return Err(e),
    }

    let mut live = store.get_deployment(&namespace, &name).await?;
    let spec = live.spec.get_or_insert_with(Default::default);
    let replicas = spec.replicas.unwrap_or(DEFAULT_REPLICAS);
    if replicas != size {
        info!(name = %name, from = replicas, to = size, "Scaling Deployment");
        spec.replicas = Some(size);
        executor.update_deployment(&live).await?;
        metrics::DEPLOYMENT_SCALES
            .with_label_values(&[namespace.as_str(), name.as_str()])
            .inc();
    }

    let pods = store.list_pods(&namespace, &labels_for(&name)).await?;
    let nodes: Vec<String> = pods.iter().map(|pod| pod.name_any()).collect();

    if nodes.as_slice() != memcached.observed_nodes() {
        info!(name = %name, nodes = ?nodes, "Updating Memcached status");
        let mut updated = memcached.clone();
        updated.status = Some(MemcachedStatus { nodes });
        executor.update_memcached_status(&updated).await?;
        metrics::STATUS_UPDATES
            .with_label_values(&[namespace.as_str(), name.as_str()])
            .inc();
    }

    Ok(())
}
