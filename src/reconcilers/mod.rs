//! Reconciliation core for Memcached resources
//!
//! This module contains the business logic of the operator:
//! - Dispatching change notifications ([`Reconciler`])
//! - Resolving a pod to the Memcached that owns it
//! - Synthesizing the desired Deployment
//! - Converging live state toward the desired state

mod converge;
mod deployment;
mod handler;
mod locks;
mod owner_chain;

pub use converge::converge;
pub use deployment::*;
pub use handler::*;
pub use locks::*;
pub use owner_chain::*;
