//! # Watcher module
//!
//! This module implements the producer side of SPEC_FULL.md §4.2: one task
//! per kind, streaming a chunked kubernetes watch and republishing every
//! decoded event onto a bounded [`crate::svc::bus`] channel, with
//! `resourceVersion` tracking and the `Expired`/transport-error reconnect
//! policy.

use std::time::Duration;

use futures::TryStreamExt;
use kube::{
    api::{ListParams, WatchEvent},
    core::DynamicObject,
    Api, ResourceExt,
};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::svc::{
    bus::Sender,
    k8s::event::{Event, EventType},
};

// -----------------------------------------------------------------------------
// Constants

/// Well-known controller lease objects churned by other cluster components;
/// dropped at debug level so they never trigger a render cycle.
const DENYLIST: &[&str] = &[
    "cert-manager-controller",
    "cert-manager-cainjector-leader-election-core",
    "cert-manager-cainjector-leader-election",
];

const MIN_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to establish watch stream for kind '{0}', {1}")]
    Watch(String, kube::Error),
    #[error("failed to publish event on the event bus, receiver was dropped")]
    Publish,
}

// -----------------------------------------------------------------------------
// Watcher

/// Runs forever (until `token` is cancelled), re-establishing the watch
/// stream on every disconnect and tracking `resourceVersion` across
/// reconnects.
#[tracing::instrument(skip(api, sink, token), fields(kind = kind))]
pub async fn run(kind: &str, api: Api<DynamicObject>, sink: Sender, token: CancellationToken) {
    let mut resource_version = String::from("0");
    let mut backoff = MIN_BACKOFF;

    loop {
        if token.is_cancelled() {
            debug!(kind = kind, "Watcher cancelled, stopping");
            return;
        }

        let params = ListParams::default();

        let stream = match api.watch(&params, &resource_version).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(kind = kind, error = err.to_string(), "Failed to start watch, retrying");
                backoff = reconnect(token.clone(), backoff).await;
                continue;
            }
        };

        tokio::pin!(stream);
        backoff = MIN_BACKOFF;

        loop {
            let next = tokio::select! {
                _ = token.cancelled() => {
                    debug!(kind = kind, "Watcher cancelled mid-stream, stopping");
                    return;
                }
                next = stream.try_next() => next,
            };

            match next {
                Ok(Some(event)) => match handle(kind, event, &sink, &mut resource_version).await {
                    Ok(()) => {}
                    Err(Restart::Expired) => {
                        resource_version = "0".to_string();
                        break;
                    }
                    Err(Restart::Closed) => {
                        debug!(kind = kind, "Event bus receiver dropped, stopping watcher");
                        return;
                    }
                },
                Ok(None) => {
                    trace!(kind = kind, "Watch stream reached eof, reconnecting");
                    break;
                }
                Err(err) => {
                    warn!(
                        kind = kind,
                        error = err.to_string(),
                        "Watch stream transport error, reconnecting at last known resourceVersion"
                    );
                    break;
                }
            }
        }

        backoff = reconnect(token.clone(), backoff).await;
    }
}

enum Restart {
    Expired,
    Closed,
}

async fn handle(
    kind: &str,
    event: WatchEvent<DynamicObject>,
    sink: &Sender,
    resource_version: &mut String,
) -> Result<(), Restart> {
    match event {
        WatchEvent::Added(obj) => publish(kind, Event::added, obj, sink, resource_version).await,
        WatchEvent::Modified(obj) => {
            publish(kind, Event::modified, obj, sink, resource_version).await
        }
        WatchEvent::Deleted(obj) => {
            publish(kind, Event::deleted, obj, sink, resource_version).await
        }
        WatchEvent::Bookmark(bookmark) => {
            advance(resource_version, &bookmark.metadata.resource_version);
            Ok(())
        }
        WatchEvent::Error(err) => {
            if err.reason == "Expired" {
                debug!(kind = kind, "Watch resourceVersion expired, resuming from 0");
                return Err(Restart::Expired);
            }

            warn!(kind = kind, error = err.message, reason = err.reason, "Watch stream error event");
            Ok(())
        }
    }
}

async fn publish(
    kind: &str,
    build: fn(serde_json::Value) -> Event,
    obj: DynamicObject,
    sink: &Sender,
    resource_version: &mut String,
) -> Result<(), Restart> {
    if obj.meta().name.as_deref().unwrap_or_default().is_empty() {
        trace!(kind = kind, "Dropping event with no metadata.name");
        return Ok(());
    }

    let name = obj.name_any();
    if DENYLIST.contains(&name.as_str()) {
        debug!(kind = kind, name = name, "Dropping denylisted object");
        return Ok(());
    }

    if let Some(rv) = obj.resource_version() {
        advance(resource_version, &rv);
    }

    let value = serde_json::to_value(&obj).unwrap_or(serde_json::Value::Null);

    sink.send(build(value)).await.map_err(|_| Restart::Closed)
}

/// Advances `current` to `candidate` when `candidate` is numerically
/// greater, per SPEC_FULL.md §4.2.
fn advance(current: &mut String, candidate: &str) {
    let cur: u64 = current.parse().unwrap_or(0);
    let next: u64 = candidate.parse().unwrap_or(0);

    if next > cur {
        *current = candidate.to_string();
    }
}

/// Sleeps for a small, capped exponential backoff before the next reconnect
/// attempt, unless the token is cancelled first; returns the next backoff to
/// use.
async fn reconnect(token: CancellationToken, backoff: Duration) -> Duration {
    tokio::select! {
        _ = token.cancelled() => {}
        _ = sleep(backoff) => {}
    }

    (backoff * 2).min(MAX_BACKOFF)
}
