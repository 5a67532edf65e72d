//! Notification delivery with redelivery on failure
//!
//! The reconciler never retries; a failed notification is handed back to it
//! after a delay, a bounded number of times. The reconciler re-reads the
//! Memcached a notification names, so a redelivered copy never rolls back
//! newer state.

use std::time::Duration;

use tracing::{error, warn};

use crate::adapters::{ActionExecutor, ObjectStore};
use crate::config::OperatorConfig;
use crate::error::{Error, Result};
use crate::metrics;
use crate::reconcilers::{Notification, Reconciler};

#[derive(Clone, Copy, Debug)]
pub struct RedeliveryPolicy {
    pub delay: Duration,
    pub max_redeliveries: u32,
}

impl RedeliveryPolicy {
    pub fn from_config(config: &OperatorConfig) -> Self {
        Self {
            delay: config.retry_delay(),
            max_redeliveries: config.max_redeliveries,
        }
    }
}

/// Delay before redelivering after `error`, or `None` when redelivery cannot help
pub fn redelivery_delay(error: &Error, policy: &RedeliveryPolicy) -> Option<Duration> {
    match error {
        Error::UnexpectedOwner { .. }
        | Error::OwnerChainTooDeep { .. }
        | Error::MissingMetadata(_)
        | Error::Serialization(_) => None,
        Error::Kube(_) | Error::NotFound { .. } | Error::AlreadyExists { .. } => Some(policy.delay),
    }
}

/// Hand `notification` to `reconciler`, redelivering it while the error is transient
pub async fn deliver<C>(
    reconciler: &Reconciler<C>,
    notification: Notification,
    policy: RedeliveryPolicy,
) -> Result<()>
where
    C: ObjectStore + ActionExecutor,
{
    let kind = notification.object.kind().to_string();
    let mut redeliveries = 0;

    loop {
        let error = match reconciler.handle(&notification).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        let delay = match redelivery_delay(&error, &policy) {
            Some(delay) if redeliveries < policy.max_redeliveries => delay,
            _ => {
                error!(
                    kind = %kind,
                    error = %error,
                    redeliveries = redeliveries,
                    "Dropping notification after reconciliation failure"
                );
                return Err(error);
            }
        };

        redeliveries += 1;
        warn!(
            kind = %kind,
            error = %error,
            attempt = redeliveries,
            delay = ?delay,
            "Reconciliation failed, scheduling redelivery"
        );
        metrics::REDELIVERIES.with_label_values(&[kind.as_str()]).inc();
        tokio::time::sleep(delay).await;
    }
}
