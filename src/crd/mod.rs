//! Custom Resource Definitions for the Memcached Operator

mod memcached;

pub use memcached::*;

use kube::CustomResourceExt;

/// Generate all CRD YAML manifests
pub fn generate_crds() -> Result<Vec<String>, serde_yaml::Error> {
    Ok(vec![serde_yaml::to_string(&Memcached::crd())?])
}
