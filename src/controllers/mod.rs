//! Watch-driven delivery of change notifications
//!
//! This module contains the watchers that turn Memcached and Pod events into
//! [`Notification`](crate::reconcilers::Notification)s and hand them to the
//! reconciler, one task per notification.

mod delivery;
mod memcached_controller;

pub use delivery::{deliver, redelivery_delay, RedeliveryPolicy};
pub use memcached_controller::run as run_memcached_controller;

use std::sync::Arc;

use kube::Client;

use crate::adapters::KubeClient;
use crate::config::OperatorConfig;
use crate::reconcilers::Reconciler;

/// Shared context for the controller
pub struct Context {
    /// Kubernetes client
    pub client: Client,

    pub reconciler: Arc<Reconciler<KubeClient>>,

    pub config: OperatorConfig,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client, config: OperatorConfig) -> Self {
        let cluster = Arc::new(KubeClient::new(client.clone()));
        Self {
            client,
            reconciler: Arc::new(Reconciler::new(cluster)),
            config,
        }
    }
}
