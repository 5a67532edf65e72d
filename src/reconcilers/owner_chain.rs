//! Owner chain resolution
//!
//! Maps a pod back to the Memcached that governs it by following controller
//! owner references upward: Pod -> ReplicaSet -> Deployment -> Memcached.
//! Each hop re-fetches the referenced object, owner references are never
//! treated as live pointers.

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use crate::adapters::{split_api_version, ObjectRef, ObjectStore};
use crate::crd::Memcached;
use crate::error::{Error, Result};

/// Upper bound on owner references followed before giving up
pub const MAX_OWNER_HOPS: usize = 8;

/// Kinds allowed between a pod and its Memcached, as (group, kind)
const INTERMEDIATE_KINDS: [(&str, &str); 2] = [("apps", "ReplicaSet"), ("apps", "Deployment")];

/// The controlling owner reference of an object, if any
pub fn controller_of(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|owner| owner.controller == Some(true))
}

fn is_memcached(owner: &OwnerReference) -> bool {
    let (group, _) = split_api_version(&owner.api_version);
    owner.kind == Memcached::kind(&()) && group == Memcached::group(&())
}

fn is_intermediate(owner: &OwnerReference) -> bool {
    let (group, _) = split_api_version(&owner.api_version);
    INTERMEDIATE_KINDS
        .iter()
        .any(|(g, k)| *g == group && *k == owner.kind)
}

/// Treat a missing object as "not governed"; keep every other failure
fn absent_if_not_found<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Find the Memcached that ultimately controls `pod`.
///
/// Returns `Ok(None)` when some hop has no controller owner reference or when
/// an object along the chain no longer exists. An owner of a kind outside the
/// known topology is an error, as is a chain longer than [`MAX_OWNER_HOPS`].
pub async fn resolve_governing_resource<S>(store: &S, pod: &Pod) -> Result<Option<Memcached>>
where
    S: ObjectStore + ?Sized,
{
    let pod_name = pod.name_any();
    let namespace = pod.namespace().unwrap_or_else(|| "default".to_string());

    let mut owner = match controller_of(&pod.metadata) {
        Some(owner) => owner.clone(),
        None => {
            debug!(pod = %pod_name, "Pod has no controller owner, skipping");
            return Ok(None);
        }
    };

    for _ in 0..MAX_OWNER_HOPS {
        if is_memcached(&owner) {
            let found = absent_if_not_found(store.get_memcached(&namespace, &owner.name).await)?;
            if found.is_none() {
                info!(pod = %pod_name, memcached = %owner.name, "Owning Memcached is gone");
            }
            return Ok(found);
        }

        if !is_intermediate(&owner) {
            return Err(Error::UnexpectedOwner {
                kind: owner.kind,
                api_version: owner.api_version,
                name: owner.name,
            });
        }

        let reference = ObjectRef::from_owner(&owner, &namespace);
        let Some(meta) = absent_if_not_found(store.get_metadata(&reference).await)? else {
            info!(pod = %pod_name, object = %reference, "Owner chain broken, skipping");
            return Ok(None);
        };

        owner = match controller_of(&meta) {
            Some(next) => next.clone(),
            None => {
                debug!(pod = %pod_name, object = %reference, "Owner has no controller, skipping");
                return Ok(None);
            }
        };
    }

    Err(Error::OwnerChainTooDeep {
        hops: MAX_OWNER_HOPS,
    })
}
