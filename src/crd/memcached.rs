//! Memcached Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Memcached resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "memcached.example.com",
    version = "v1alpha1",
    kind = "Memcached",
    plural = "memcacheds",
    singular = "memcached",
    shortname = "mc",
    namespaced,
    status = "MemcachedStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name": "Size", "type": "integer", "jsonPath": ".spec.size"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MemcachedSpec {
    /// Desired number of memcached instances
    pub size: i32,
}

/// Memcached status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemcachedStatus {
    /// Names of the pods currently backing the cluster, in listing order
    #[serde(default)]
    pub nodes: Vec<String>,
}

impl Memcached {
    /// Node names recorded in status; empty when status was never written
    pub fn observed_nodes(&self) -> &[String] {
        self.status
            .as_ref()
            .map(|s| s.nodes.as_slice())
            .unwrap_or_default()
    }
}
