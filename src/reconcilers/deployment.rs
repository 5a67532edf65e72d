//! Desired Deployment for a Memcached resource

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use crate::crd::Memcached;

/// Memcached server image
pub const MEMCACHED_IMAGE: &str = "memcached:1.4.36-alpine";

/// Memcached client port
pub const MEMCACHED_PORT: i32 = 11211;

const CONTAINER_NAME: &str = "memcached";

const MEMCACHED_COMMAND: [&str; 5] = ["memcached", "-m=64", "-o", "modern", "-v"];

/// Labels selecting the pods that belong to the Memcached named `name`
pub fn labels_for(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "memcached".to_string()),
        ("memcached_cr".to_string(), name.to_string()),
    ])
}

/// Render labels as an equality-based selector string (`k1=v1,k2=v2`)
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Controller owner reference pointing at `memcached`
pub fn owner_reference(memcached: &Memcached) -> OwnerReference {
    OwnerReference {
        api_version: Memcached::api_version(&()).to_string(),
        kind: Memcached::kind(&()).to_string(),
        name: memcached.name_any(),
        uid: memcached.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Build the Deployment that runs `memcached.spec.size` memcached servers.
///
/// The result depends only on the resource's name, namespace, uid and size,
/// so it can be compared against live state on every pass.
pub fn deployment_for(memcached: &Memcached) -> Deployment {
    let name = memcached.name_any();
    let labels = labels_for(&name);

    Deployment {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: memcached.namespace(),
            owner_references: Some(vec![owner_reference(memcached)]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(memcached.spec.size),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: CONTAINER_NAME.to_string(),
                        image: Some(MEMCACHED_IMAGE.to_string()),
                        command: Some(MEMCACHED_COMMAND.iter().map(|s| s.to_string()).collect()),
                        ports: Some(vec![ContainerPort {
                            container_port: MEMCACHED_PORT,
                            name: Some(CONTAINER_NAME.to_string()),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}
