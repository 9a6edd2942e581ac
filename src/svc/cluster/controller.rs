//! # Cluster controller module
//!
//! Owns one watcher for the `AlfaTemplate` kind and the cluster consumer,
//! sharing one bounded event channel (SPEC_FULL.md §4.3).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::svc::{
    bus,
    cfg::Configuration,
    cluster::consumer,
    k8s::registry::Registry,
};

pub const TEMPLATE_KIND: &str = "AlfaTemplate";

pub struct Controller {
    config: Arc<Configuration>,
    registry: Arc<Registry>,
}

impl Controller {
    pub fn new(config: Arc<Configuration>, registry: Arc<Registry>) -> Self {
        Self { config, registry }
    }

    /// Runs forever until `token` is cancelled.
    #[tracing::instrument(skip_all)]
    pub async fn run(self, token: CancellationToken) {
        let (tx, rx) = bus::channel();

        let api = match self.registry.api(TEMPLATE_KIND, None) {
            Ok(api) => api,
            Err(err) => {
                warn!(error = %err, "Failed to build api handle for AlfaTemplate, cluster controller cannot start");
                return;
            }
        };

        let watcher_token = token.child_token();
        let watcher = tokio::spawn(crate::svc::k8s::watcher::run(
            TEMPLATE_KIND,
            api,
            tx,
            watcher_token.clone(),
        ));

        consumer::run(self.config, self.registry, rx, token.clone()).await;

        watcher_token.cancel();
        let _ = watcher.await;
    }
}
