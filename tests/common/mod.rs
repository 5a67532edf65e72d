//! In-memory cluster used by the integration tests
//!
//! Implements the object store and action executor over plain maps, records
//! every write, and models the two cluster behaviours the reconciler relies
//! on: 404/409 reporting and owner-reference garbage collection.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::error::ErrorResponse;
use memcached_operator::adapters::{ActionExecutor, ObjectRef, ObjectStore};
use memcached_operator::crd::{Memcached, MemcachedSpec, MemcachedStatus};
use memcached_operator::reconcilers::{deployment_for, labels_for};
use memcached_operator::{Error, Result};

pub const NAMESPACE: &str = "default";

/// A write issued by the reconciler
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    CreateDeployment { name: String },
    UpdateDeployment { name: String, replicas: Option<i32> },
    UpdateStatus { name: String, nodes: Vec<String> },
}

/// A cluster operation that can be made to fail
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    CreateDeployment,
    GetDeployment,
    UpdateDeployment,
    UpdateStatus,
}

type Key = (String, String, String);

fn key(kind: &str, namespace: &str, name: &str) -> Key {
    (kind.to_string(), namespace.to_string(), name.to_string())
}

#[derive(Default)]
struct State {
    memcacheds: BTreeMap<Key, Memcached>,
    deployments: BTreeMap<Key, Deployment>,
    /// Objects only reachable through `get_metadata` (replica sets and the like)
    others: BTreeMap<Key, ObjectMeta>,
    pods: Vec<Pod>,
    calls: Vec<Call>,
    lookups: Vec<ObjectRef>,
    /// Names whose lookups fail with a server error
    broken: HashSet<String>,
    /// Operations that fail with a server error
    failing: HashSet<Op>,
    in_flight: BTreeMap<String, usize>,
    max_in_flight: usize,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
    /// Artificial latency on deployment reads
    read_delay: Option<Duration>,
}

pub fn server_error() -> Error {
    Error::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: "etcdserver: request timed out".to_string(),
        reason: "InternalError".to_string(),
        code: 500,
    }))
}

pub fn owner_ref(kind: &str, api_version: &str, name: &str, uid: &str) -> OwnerReference {
    OwnerReference {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: uid.to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

pub fn new_memcached(name: &str, size: i32) -> Memcached {
    let mut memcached = Memcached::new(name, MemcachedSpec { size });
    memcached.metadata.namespace = Some(NAMESPACE.to_string());
    memcached.metadata.uid = Some(format!("uid-{}", name));
    memcached
}

pub fn new_pod(name: &str, labels: BTreeMap<String, String>, owner: Option<OwnerReference>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(labels),
            owner_references: owner.map(|o| vec![o]),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn replica_set_name(memcached: &str) -> String {
    format!("{}-5d8f7c", memcached)
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_read_delay(delay: Duration) -> Self {
        Self {
            read_delay: Some(delay),
            ..Default::default()
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_memcached(&self, memcached: Memcached) {
        let name = memcached.metadata.name.clone().unwrap();
        self.state()
            .memcacheds
            .insert(key("Memcached", NAMESPACE, &name), memcached);
    }

    pub fn add_deployment(&self, deployment: Deployment) {
        let name = deployment.metadata.name.clone().unwrap();
        self.state()
            .deployments
            .insert(key("Deployment", NAMESPACE, &name), deployment);
    }

    pub fn add_object(&self, kind: &str, name: &str, owner: Option<OwnerReference>) {
        let meta = ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            uid: Some(format!("uid-{}", name)),
            owner_references: owner.map(|o| vec![o]),
            ..Default::default()
        };
        self.state().others.insert(key(kind, NAMESPACE, name), meta);
    }

    pub fn add_pod(&self, pod: Pod) {
        self.state().pods.push(pod);
    }

    pub fn remove(&self, kind: &str, name: &str) {
        let k = key(kind, NAMESPACE, name);
        let mut state = self.state();
        state.memcacheds.remove(&k);
        state.deployments.remove(&k);
        state.others.remove(&k);
    }

    pub fn break_lookups(&self, name: &str) {
        self.state().broken.insert(name.to_string());
    }

    pub fn fail(&self, op: Op) {
        self.state().failing.insert(op);
    }

    /// Install a Memcached with its Deployment, ReplicaSet and pods, wired
    /// together through controller owner references. Returns the pods.
    pub fn add_topology(&self, name: &str, size: i32, replicas: i32, pods: &[&str]) -> Vec<Pod> {
        let memcached = new_memcached(name, size);
        let mut deployment = deployment_for(&memcached);
        deployment.metadata.uid = Some(format!("uid-deploy-{}", name));
        if let Some(spec) = deployment.spec.as_mut() {
            spec.replicas = Some(replicas);
        }

        let rs_name = replica_set_name(name);
        self.add_memcached(memcached);
        self.add_deployment(deployment);
        self.add_object(
            "ReplicaSet",
            &rs_name,
            Some(owner_ref("Deployment", "apps/v1", name, &format!("uid-deploy-{}", name))),
        );

        let rs_owner = owner_ref("ReplicaSet", "apps/v1", &rs_name, &format!("uid-{}", rs_name));
        pods.iter()
            .map(|pod_name| {
                let pod = new_pod(pod_name, labels_for(name), Some(rs_owner.clone()));
                self.add_pod(pod.clone());
                pod
            })
            .collect()
    }

    pub fn set_status(&self, name: &str, nodes: &[&str]) {
        let mut state = self.state();
        let memcached = state
            .memcacheds
            .get_mut(&key("Memcached", NAMESPACE, name))
            .unwrap();
        memcached.status = Some(MemcachedStatus {
            nodes: nodes.iter().map(|n| n.to_string()).collect(),
        });
    }

    /// Delete a Memcached and everything it transitively controls, the way
    /// the cluster garbage collector does for owner references.
    pub fn delete_memcached(&self, name: &str) {
        let mut state = self.state();
        let Some(memcached) = state.memcacheds.remove(&key("Memcached", NAMESPACE, name)) else {
            return;
        };

        let mut doomed: HashSet<String> = memcached.metadata.uid.into_iter().collect();
        loop {
            let before = doomed.len();
            let owned_by_doomed = |meta: &ObjectMeta| {
                meta.owner_references
                    .iter()
                    .flatten()
                    .any(|o| doomed.contains(&o.uid))
            };
            let mut found: Vec<String> = Vec::new();
            for dep in state.deployments.values() {
                if owned_by_doomed(&dep.metadata) {
                    found.extend(dep.metadata.uid.clone());
                }
            }
            for meta in state.others.values() {
                if owned_by_doomed(meta) {
                    found.extend(meta.uid.clone());
                }
            }
            doomed.extend(found);
            if doomed.len() == before {
                break;
            }
        }

        let owned_by = |meta: &ObjectMeta| {
            meta.owner_references
                .iter()
                .flatten()
                .any(|o| doomed.contains(&o.uid))
        };
        state.deployments.retain(|_, d| !owned_by(&d.metadata));
        state.others.retain(|_, m| !owned_by(m));
        state.pods.retain(|p| !owned_by(&p.metadata));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn lookups(&self) -> Vec<ObjectRef> {
        self.state().lookups.clone()
    }

    pub fn memcached(&self, name: &str) -> Option<Memcached> {
        self.state()
            .memcacheds
            .get(&key("Memcached", NAMESPACE, name))
            .cloned()
    }

    pub fn deployment(&self, name: &str) -> Option<Deployment> {
        self.state()
            .deployments
            .get(&key("Deployment", NAMESPACE, name))
            .cloned()
    }

    pub fn replicas(&self, name: &str) -> Option<i32> {
        self.deployment(name)?.spec?.replicas
    }

    pub fn pod_count(&self) -> usize {
        self.state().pods.len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.state().max_in_flight
    }

    fn check_broken(&self, name: &str) -> Result<()> {
        if self.state().broken.contains(name) {
            return Err(server_error());
        }
        Ok(())
    }

    fn check_failing(&self, op: Op) -> Result<()> {
        if self.state().failing.contains(&op) {
            return Err(server_error());
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FakeCluster {
    async fn get_metadata(&self, object: &ObjectRef) -> Result<ObjectMeta> {
        self.state().lookups.push(object.clone());
        self.check_broken(&object.name)?;
        let state = self.state();

        let k = key(&object.kind, &object.namespace, &object.name);
        let meta = match object.kind.as_str() {
            "Deployment" => state.deployments.get(&k).map(|d| d.metadata.clone()),
            "Memcached" => state.memcacheds.get(&k).map(|m| m.metadata.clone()),
            _ => state.others.get(&k).cloned(),
        };
        meta.ok_or_else(|| Error::not_found(&object.kind, &object.namespace, &object.name))
    }

    async fn get_memcached(&self, namespace: &str, name: &str) -> Result<Memcached> {
        self.check_broken(name)?;
        self.state()
            .memcacheds
            .get(&key("Memcached", namespace, name))
            .cloned()
            .ok_or_else(|| Error::not_found("Memcached", namespace, name))
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        self.check_failing(Op::GetDeployment)?;
        self.state()
            .deployments
            .get(&key("Deployment", namespace, name))
            .cloned()
            .ok_or_else(|| Error::not_found("Deployment", namespace, name))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>> {
        let mut state = self.state();
        if let Some(name) = labels.get("memcached_cr") {
            if let Some(count) = state.in_flight.get_mut(name) {
                *count -= 1;
            }
        }

        Ok(state
            .pods
            .iter()
            .filter(|pod| pod.metadata.namespace.as_deref() == Some(namespace))
            .filter(|pod| {
                let pod_labels = pod.metadata.labels.clone().unwrap_or_default();
                labels.iter().all(|(k, v)| pod_labels.get(k) == Some(v))
            })
            .cloned()
            .collect())
    }

    async fn list_memcacheds(&self, namespace: &str) -> Result<Vec<Memcached>> {
        Ok(self
            .state()
            .memcacheds
            .iter()
            .filter(|((_, ns, _), _)| ns == namespace)
            .map(|(_, m)| m.clone())
            .collect())
    }
}

#[async_trait]
impl ActionExecutor for FakeCluster {
    async fn create_deployment(&self, deployment: &Deployment) -> Result<()> {
        let name = deployment.metadata.name.clone().unwrap();
        let namespace = deployment.metadata.namespace.clone().unwrap();
        let mut state = self.state();

        state.calls.push(Call::CreateDeployment { name: name.clone() });
        if state.failing.contains(&Op::CreateDeployment) {
            return Err(server_error());
        }

        let count = state.in_flight.entry(name.clone()).or_default();
        *count += 1;
        let current = *count;
        state.max_in_flight = state.max_in_flight.max(current);

        let k = key("Deployment", &namespace, &name);
        if state.deployments.contains_key(&k) {
            return Err(Error::already_exists("Deployment", namespace, name));
        }
        let mut created = deployment.clone();
        created.metadata.uid = Some(format!("uid-deploy-{}", name));
        state.deployments.insert(k, created);
        Ok(())
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<()> {
        let name = deployment.metadata.name.clone().unwrap();
        let namespace = deployment.metadata.namespace.clone().unwrap();
        let mut state = self.state();

        state.calls.push(Call::UpdateDeployment {
            name: name.clone(),
            replicas: deployment.spec.as_ref().and_then(|s| s.replicas),
        });
        if state.failing.contains(&Op::UpdateDeployment) {
            return Err(server_error());
        }
        let k = key("Deployment", &namespace, &name);
        if !state.deployments.contains_key(&k) {
            return Err(Error::not_found("Deployment", namespace, name));
        }
        state.deployments.insert(k, deployment.clone());
        Ok(())
    }

    async fn update_memcached_status(&self, memcached: &Memcached) -> Result<()> {
        let name = memcached.metadata.name.clone().unwrap();
        let namespace = memcached.metadata.namespace.clone().unwrap();
        let mut state = self.state();

        state.calls.push(Call::UpdateStatus {
            name: name.clone(),
            nodes: memcached.observed_nodes().to_vec(),
        });
        if state.failing.contains(&Op::UpdateStatus) {
            return Err(server_error());
        }
        match state.memcacheds.get_mut(&key("Memcached", &namespace, &name)) {
            Some(stored) => {
                stored.status = memcached.status.clone();
                Ok(())
            }
            None => Err(Error::not_found("Memcached", namespace, name)),
        }
    }
}
