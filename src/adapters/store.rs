//! Object store and action executor seams
//!
//! The reconciler only talks to the cluster through these two traits. The
//! production implementation lives in [`super::KubeClient`]; tests provide an
//! in-memory cluster.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use crate::crd::Memcached;
use crate::error::Result;

/// Typed identity of an object: kind, API version, namespace and name
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub kind: String,
    pub api_version: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    /// Reference the owner named by `owner`, scoped to the child's namespace
    pub fn from_owner(owner: &OwnerReference, namespace: &str) -> Self {
        Self {
            kind: owner.kind.clone(),
            api_version: owner.api_version.clone(),
            namespace: namespace.to_string(),
            name: owner.name.clone(),
        }
    }

    /// API group of the reference; empty for the core group
    pub fn group(&self) -> &str {
        split_api_version(&self.api_version).0
    }

    pub fn version(&self) -> &str {
        split_api_version(&self.api_version).1
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{} ({})",
            self.kind, self.namespace, self.name, self.api_version
        )
    }
}

/// Split `group/version` into its parts; `v1` belongs to the core group
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

/// Read side of the cluster
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the metadata of an arbitrary object by typed identity
    async fn get_metadata(&self, object: &ObjectRef) -> Result<ObjectMeta>;

    async fn get_memcached(&self, namespace: &str, name: &str) -> Result<Memcached>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment>;

    /// List pods in `namespace` carrying every label in `labels`
    async fn list_pods(&self, namespace: &str, labels: &BTreeMap<String, String>)
        -> Result<Vec<Pod>>;

    async fn list_memcacheds(&self, namespace: &str) -> Result<Vec<Memcached>>;
}

/// Write side of the cluster
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Create a deployment; reports `Error::AlreadyExists` when it is present
    async fn create_deployment(&self, deployment: &Deployment) -> Result<()>;

    /// Replace a deployment with the given object
    async fn update_deployment(&self, deployment: &Deployment) -> Result<()>;

    /// Write the status sub-resource of a Memcached
    async fn update_memcached_status(&self, memcached: &Memcached) -> Result<()>;
}
