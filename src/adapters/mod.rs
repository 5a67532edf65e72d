//! Adapters between the reconciler and the Kubernetes API
//!
//! The reconciler depends on the [`ObjectStore`] and [`ActionExecutor`]
//! traits; [`KubeClient`] implements both on top of a kube client.

mod kube_client;
mod store;

pub use kube_client::*;
pub use store::*;
