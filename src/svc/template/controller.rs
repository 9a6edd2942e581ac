//! # Template controller module
//!
//! Per `AlfaTemplate`: owns one template consumer plus one watcher per kind
//! in `{parent.kind} ∪ monitored[].kind`, all sharing one event channel
//! (SPEC_FULL.md §4.4).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::svc::{bus, cfg::Configuration, crd::TemplateSpec, k8s::registry::Registry, template::consumer};

pub struct Controller {
    config: Arc<Configuration>,
    registry: Arc<Registry>,
    spec: TemplateSpec,
}

impl Controller {
    pub fn new(config: Arc<Configuration>, registry: Arc<Registry>, spec: TemplateSpec) -> Self {
        Self {
            config,
            registry,
            spec,
        }
    }

    /// Runs until `token` is cancelled: spawns one watcher per watched kind,
    /// then runs the cooldown-gated consumer until cancellation, then stops
    /// every child watcher.
    #[tracing::instrument(skip_all, fields(template = self.spec.name.as_str()))]
    pub async fn run(self, token: CancellationToken) {
        let (tx, rx) = bus::channel();
        let mut watchers = Vec::new();

        for kind in self.spec.watched_kinds() {
            match self.registry.api(&kind, None) {
                Ok(api) => {
                    let watcher_token = token.child_token();
                    let sink = tx.clone();
                    watchers.push((
                        watcher_token.clone(),
                        tokio::spawn(async move {
                            crate::svc::k8s::watcher::run(&kind, api, sink, watcher_token).await
                        }),
                    ));
                }
                Err(err) => {
                    warn!(template = self.spec.name, kind = kind, error = %err, "Unknown kind referenced by template, skipping watcher");
                }
            }
        }

        drop(tx);

        consumer::run(self.config, self.registry, self.spec, rx, token).await;

        for (watcher_token, handle) in watchers {
            watcher_token.cancel();
            let _ = handle.await;
        }
    }
}
