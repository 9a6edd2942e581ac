//! # Template consumer module
//!
//! Implements the cooldown-debounce gate of SPEC_FULL.md §4.5 and drives the
//! fetch → aggregate → render → reconcile cycle (§4.6-§4.8) once per burst.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::svc::{
    aggregator::{self, RenderCycle},
    bus,
    cfg::Configuration,
    crd::TemplateSpec,
    dump,
    k8s::registry::Registry,
    reconciler,
    renderer::{self, Engine, Renderer},
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to fetch items, {0}")]
    Fetch(aggregator::Error),
    #[error("failed to render template, {0}")]
    Render(renderer::Error),
    #[error("failed to reconcile rendered documents, {0}")]
    Reconcile(reconciler::Error),
    #[error("failed to write dump artifact, {0}")]
    Dump(dump::Error),
}

/// Runs the cooldown gate forever: wait for one event, sleep `cooldown`
/// seconds, drain the rest non-blockingly, run one reconcile cycle, repeat.
#[tracing::instrument(skip_all, fields(template = spec.name.as_str()))]
pub async fn run(
    config: Arc<Configuration>,
    registry: Arc<Registry>,
    spec: TemplateSpec,
    mut rx: bus::Receiver,
    token: CancellationToken,
) {
    let engine = Engine::new();

    loop {
        let first = tokio::select! {
            _ = token.cancelled() => return,
            event = rx.recv() => event,
        };

        if first.is_none() {
            return;
        }

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs(config.cooldown)) => {}
        }

        while rx.try_recv().is_ok() {}

        if let Err(err) = reconcile(&config, &registry, &spec, &engine).await {
            warn!(template = spec.name, error = %err, "Render cycle failed, waiting for next event");
        }
    }
}

async fn reconcile(
    config: &Arc<Configuration>,
    registry: &Registry,
    spec: &TemplateSpec,
    engine: &Engine,
) -> Result<(), Error> {
    let kinds = spec.watched_kinds();
    let items = aggregator::fetch(registry, &kinds, None)
        .await
        .map_err(Error::Fetch)?;

    if let Some(dir) = &config.dump {
        dump::write_stage(dir, &spec.name, "kinds", &serde_json::json!(kinds)).map_err(Error::Dump)?;
    }

    let cycle = RenderCycle::new(spec, &items);

    if let Some(dir) = &config.dump {
        dump::write_stage(dir, &spec.name, "objects", &serde_json::json!(cycle.objects())).map_err(Error::Dump)?;
        dump::write_stage(dir, &spec.name, "domains", &serde_json::json!(cycle.domains())).map_err(Error::Dump)?;
        dump::write_stage(dir, &spec.name, "namespaces", &serde_json::json!(cycle.namespaces())).map_err(Error::Dump)?;
        dump::write_stage(dir, &spec.name, "clusters", &serde_json::json!(cycle.clusters())).map_err(Error::Dump)?;
        dump::write_stage(dir, &spec.name, "template", &serde_json::json!(spec.spec.template)).map_err(Error::Dump)?;
    }

    let mut renders = Vec::new();

    for x in cycle.renders_input() {
        let context = renderer::context(&spec.spec, x, &items);
        let documents = engine
            .render(&spec.spec.template, &context)
            .map_err(Error::Render)?;

        for document in documents {
            renders.push(finalize_render(x, document, spec));
        }
    }

    if let Some(dir) = &config.dump {
        dump::write_stage(dir, &spec.name, "renders", &serde_json::json!(renders)).map_err(Error::Dump)?;
    }

    reconciler::converge(registry, config, &spec.name, spec.spec.update, &renders)
        .await
        .map_err(Error::Reconcile)
}

/// Merges the scope item's `{apiVersion, kind, metadata}` under the rendered
/// document, then defaults `metadata.name` when absent (SPEC_FULL.md §4.7).
fn finalize_render(x: &serde_json::Value, rendered: serde_json::Value, spec: &TemplateSpec) -> serde_json::Value {
    let base = serde_json::json!({
        "apiVersion": x.get("apiVersion"),
        "kind": x.get("kind"),
        "metadata": x.get("metadata"),
    });

    let mut merged = crate::svc::value::merge(&base, &rendered);

    if merged.pointer("/metadata/name").and_then(serde_json::Value::as_str).is_none() {
        let labels = &spec.spec.labels;
        let name = x
            .pointer(&format!("/metadata/labels/{}", labels.name.replace('~', "~0").replace('/', "~1")))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("");
        let instance = x
            .pointer(&format!("/metadata/labels/{}", labels.instance.replace('~', "~0").replace('/', "~1")))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("");
        let domain_name = x
            .pointer(&format!("/metadata/labels/{}", labels.domain_name.replace('~', "~0").replace('/', "~1")))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("");

        let default_name = crate::svc::value::dash_join([
            Some(name),
            Some(instance),
            crate::svc::value::cheap_hash(domain_name, 6).as_deref(),
            spec.spec.component.as_deref(),
        ]);

        merged["metadata"]["name"] = serde_json::Value::String(default_name);
    }

    merged
}
