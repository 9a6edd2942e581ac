//! # Cluster consumer module
//!
//! Demultiplexes `AlfaTemplate` lifecycle events into per-template
//! sub-controllers, keeping the `ControllerTable` invariant: at most one live
//! controller per template name, replaced atomically on every event
//! (SPEC_FULL.md §4.3).

use std::{collections::HashMap, sync::Arc};

use regex::Regex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::svc::{
    bus,
    cfg::Configuration,
    crd::TemplateSpec,
    k8s::{event::EventType, registry::Registry},
    template,
};

struct Entry {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

fn app_name_label(object: &serde_json::Value) -> &str {
    object
        .pointer("/metadata/labels")
        .and_then(|labels| labels.get("app.kubernetes.io/name"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or("")
}

/// Runs the cluster consumer loop until `token` is cancelled or the channel
/// closes, then cancels every still-running template controller.
#[tracing::instrument(skip_all)]
pub async fn run(
    config: Arc<Configuration>,
    registry: Arc<Registry>,
    mut rx: bus::Receiver,
    token: CancellationToken,
) {
    let template_name_regex = Regex::new(&config.template_name_regex)
        .expect("Configuration::validate to have rejected an invalid templateNameRegex");
    let app_name_regex = Regex::new(&config.app_name_regex)
        .expect("Configuration::validate to have rejected an invalid appNameRegex");

    let mut controllers: HashMap<String, Entry> = HashMap::new();

    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let Some(name) = event.name().map(str::to_string) else {
            continue;
        };

        if event.ty == EventType::Error {
            continue;
        }

        let spec = match TemplateSpec::from_value(&event.object) {
            Ok(spec) => spec,
            Err(err) => {
                warn!(template = name, error = %err, "Failed to parse AlfaTemplate spec, ignoring event");
                continue;
            }
        };

        if spec.spec.kinds.parent.kind != config.parent {
            debug!(template = name, parent = spec.spec.kinds.parent.kind, "Template does not match configured parent, ignoring");
            continue;
        }

        if !template_name_regex.is_match(&name) {
            debug!(template = name, "Template name does not match templateNameRegex, ignoring");
            continue;
        }

        if !app_name_regex.is_match(app_name_label(&event.object)) {
            debug!(template = name, "Template app name label does not match appNameRegex, ignoring");
            continue;
        }

        if let Some(entry) = controllers.remove(&name) {
            debug!(template = name, "Cancelling previous template controller");
            entry.cancel.cancel();
        }

        if matches!(event.ty, EventType::Added | EventType::Modified) {
            let child_token = token.child_token();
            let controller = template::controller::Controller::new(config.clone(), registry.clone(), spec);

            info!(template = name, "Starting template controller");
            let handle = tokio::spawn(controller.run(child_token.clone()));

            controllers.insert(
                name,
                Entry {
                    cancel: child_token,
                    handle,
                },
            );
        }
    }

    for (_, entry) in controllers {
        entry.cancel.cancel();
    }
}
