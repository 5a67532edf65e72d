//! Memcached Kubernetes Operator
//!
//! This operator keeps a memcached Deployment in line with each `Memcached`
//! custom resource and records the pods backing it in the resource status.

pub mod adapters;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod reconcilers;

pub use error::{Error, Result};
