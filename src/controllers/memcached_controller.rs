//! Memcached controller
//!
//! Watches Memcached resources and the pods they own, and delivers every
//! change to the reconciler on its own task.

use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::ListParams,
    runtime::{
        watcher::{self, Config as WatcherConfig, Event},
        WatchStreamExt,
    },
    Api,
};
use tracing::{debug, error, info, warn};

use super::delivery::{deliver, RedeliveryPolicy};
use crate::adapters::ObjectStore;
use crate::controllers::Context;
use crate::crd::Memcached;
use crate::metrics;
use crate::reconcilers::{Notification, WatchedObject};

/// Pods created from our Deployments carry this label
const POD_SELECTOR: &str = "app=memcached";

/// Number of watch streams that must finish their initial listing
const WATCHED_KINDS: usize = 2;

/// A watcher event reduced to what the controller acts on
#[derive(Debug)]
enum WatchEvent {
    Notify(Notification),
    Synced,
    Skip,
}

fn watch_event<K>(event: Event<K>, wrap: fn(K) -> WatchedObject) -> WatchEvent {
    match event {
        Event::Apply(obj) | Event::InitApply(obj) => {
            WatchEvent::Notify(Notification::applied(wrap(obj)))
        }
        Event::Delete(obj) => WatchEvent::Notify(Notification::deleted(wrap(obj))),
        Event::Init => WatchEvent::Skip,
        Event::InitDone => WatchEvent::Synced,
    }
}

/// Run the Memcached controller until the watch streams end
pub async fn run(context: Arc<Context>) {
    let namespace = context.config.watch_namespace.clone();
    let memcacheds: Api<Memcached> = Api::namespaced(context.client.clone(), &namespace);

    // Verify CRD is installed
    if let Err(e) = memcacheds.list(&ListParams::default().limit(1)).await {
        error!("Memcached CRD not installed: {}", e);
        return;
    }

    let pods: Api<Pod> = Api::namespaced(context.client.clone(), &namespace);
    let policy = RedeliveryPolicy::from_config(&context.config);

    info!(namespace = %namespace, "Starting Memcached controller");

    if let Some(period) = context.config.resync_interval() {
        tokio::spawn(resync(context.clone(), period, policy));
    }

    let memcached_events = watcher::watcher(memcacheds, WatcherConfig::default())
        .default_backoff()
        .map(|event| event.map(|e| watch_event(e, WatchedObject::Memcached)));
    let pod_events = watcher::watcher(pods, WatcherConfig::default().labels(POD_SELECTOR))
        .default_backoff()
        .map(|event| event.map(|e| watch_event(e, WatchedObject::Pod)));
    let mut events = pin!(stream::select(memcached_events, pod_events));

    let mut synced = 0;
    while let Some(event) = events.next().await {
        match event {
            Ok(WatchEvent::Notify(notification)) => {
                spawn_delivery(context.clone(), notification, policy);
            }
            Ok(WatchEvent::Synced) => {
                synced += 1;
                if synced >= WATCHED_KINDS {
                    metrics::set_ready(true);
                    info!(namespace = %namespace, "Initial watch sync complete");
                }
            }
            Ok(WatchEvent::Skip) => {}
            Err(e) => warn!(error = %e, "Watch stream error"),
        }
    }

    metrics::set_ready(false);
    info!("Memcached controller watch streams ended");
}

fn spawn_delivery(context: Arc<Context>, notification: Notification, policy: RedeliveryPolicy) {
    tokio::spawn(async move {
        if let Err(e) = deliver(context.reconciler.as_ref(), notification, policy).await {
            debug!(error = %e, "Notification dropped");
        }
    });
}

/// Periodically redeliver every Memcached in the watched namespace
async fn resync(context: Arc<Context>, period: Duration, policy: RedeliveryPolicy) {
    let namespace = context.config.watch_namespace.clone();
    let mut ticker = tokio::time::interval(period);
    // The watcher's initial listing covers the first tick
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match context.reconciler.cluster().list_memcacheds(&namespace).await {
            Ok(items) => {
                debug!(namespace = %namespace, count = items.len(), "Resyncing Memcached resources");
                for memcached in items {
                    let notification = Notification::applied(WatchedObject::Memcached(memcached));
                    spawn_delivery(context.clone(), notification, policy);
                }
            }
            Err(e) => warn!(namespace = %namespace, error = %e, "Resync listing failed"),
        }
    }
}
