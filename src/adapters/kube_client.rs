//! kube-rs backed implementation of the object store and action executor

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    api::{ApiResource, DynamicObject, ListParams, PostParams},
    core::GroupVersionKind,
    Api, Client, ResourceExt,
};
use tracing::debug;

use super::store::{ActionExecutor, ObjectRef, ObjectStore};
use crate::crd::Memcached;
use crate::error::{Error, Result};
use crate::reconcilers::label_selector;

/// Field manager recorded on writes
const FIELD_MANAGER: &str = "memcached-operator";

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

/// Cluster access through a kube [`Client`]
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Map a 404 to [`Error::NotFound`], keep everything else as a Kubernetes error
fn lookup_error(err: kube::Error, kind: &str, namespace: &str, name: &str) -> Error {
    match err {
        kube::Error::Api(api_err) if api_err.code == 404 => Error::not_found(kind, namespace, name),
        other => Error::Kube(other),
    }
}

fn object_name(meta: &ObjectMeta, kind: &str) -> Result<(String, String)> {
    let name = meta
        .name
        .clone()
        .ok_or_else(|| Error::missing_metadata(format!("{} without a name", kind)))?;
    let namespace = meta
        .namespace
        .clone()
        .ok_or_else(|| Error::missing_metadata(format!("{} {} without a namespace", kind, name)))?;
    Ok((namespace, name))
}

#[async_trait]
impl ObjectStore for KubeClient {
    async fn get_metadata(&self, object: &ObjectRef) -> Result<ObjectMeta> {
        let gvk = GroupVersionKind::gvk(object.group(), object.version(), &object.kind);
        let resource = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &object.namespace, &resource);

        debug!(object = %object, "Fetching object metadata");
        api.get_metadata(&object.name)
            .await
            .map(|partial| partial.metadata)
            .map_err(|e| lookup_error(e, &object.kind, &object.namespace, &object.name))
    }

    async fn get_memcached(&self, namespace: &str, name: &str) -> Result<Memcached> {
        let api: Api<Memcached> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| lookup_error(e, "Memcached", namespace, name))
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| lookup_error(e, "Deployment", namespace, name))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&label_selector(labels));
        Ok(api.list(&params).await?.items)
    }

    async fn list_memcacheds(&self, namespace: &str) -> Result<Vec<Memcached>> {
        let api: Api<Memcached> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }
}

#[async_trait]
impl ActionExecutor for KubeClient {
    async fn create_deployment(&self, deployment: &Deployment) -> Result<()> {
        let (namespace, name) = object_name(&deployment.metadata, "Deployment")?;
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);

        match api.create(&post_params(), deployment).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(api_err))
                if api_err.code == 409 && api_err.reason == "AlreadyExists" =>
            {
                Err(Error::already_exists("Deployment", namespace, name))
            }
            Err(e) => Err(Error::Kube(e)),
        }
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<()> {
        let (namespace, name) = object_name(&deployment.metadata, "Deployment")?;
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);

        api.replace(&name, &post_params(), deployment)
            .await
            .map_err(|e| lookup_error(e, "Deployment", &namespace, &name))?;
        Ok(())
    }

    /// Replace the status sub-resource. The body keeps the `resourceVersion`
    /// of the object it was built from, so a concurrent write surfaces as a
    /// 409 conflict instead of being overwritten.
    async fn update_memcached_status(&self, memcached: &Memcached) -> Result<()> {
        let name = memcached.name_any();
        let namespace = memcached
            .namespace()
            .ok_or_else(|| Error::missing_metadata(format!("Memcached {} without a namespace", name)))?;
        let api: Api<Memcached> = Api::namespaced(self.client.clone(), &namespace);

        let body = serde_json::to_vec(memcached)?;
        api.replace_status(&name, &post_params(), body)
            .await
            .map_err(|e| lookup_error(e, "Memcached", &namespace, &name))?;
        Ok(())
    }
}
