//! # Reconciler module
//!
//! This module implements SPEC_FULL.md §4.8: GET/POST/PUT convergence for a
//! list of rendered documents, including the preservation carve-outs and the
//! dump/dry-run hooks.

use std::sync::Arc;

use kube::core::DynamicObject;
use serde_json::Value;

use crate::svc::{cfg::Configuration, dump, k8s::registry::Registry};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("rendered document for template '{0}' is missing 'kind'")]
    MissingKind(String),
    #[error("failed to look up kind '{0}', {1}")]
    UnknownKind(String, crate::svc::k8s::registry::Error),
    #[error("failed to get existing object '{0}', {1}")]
    Get(String, kube::Error),
    #[error("failed to create object '{0}', {1}")]
    Create(String, kube::Error),
    #[error("failed to replace object '{0}', {1}")]
    Replace(String, kube::Error),
    #[error("failed to dump reconciliation artifact, {0}")]
    Dump(dump::Error),
}

/// Outcome of reconciling one document, surfaced for logging only.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Unchanged,
    Skipped(&'static str),
}

// -----------------------------------------------------------------------------
// converge

/// Reconciles every rendered document, logging and skipping per-document
/// failures rather than aborting the batch (SPEC_FULL.md §7).
#[tracing::instrument(skip_all, fields(template = template_name))]
pub async fn converge(
    registry: &Registry,
    config: &Arc<Configuration>,
    template_name: &str,
    update: bool,
    renders: &[Value],
) -> Result<(), Error> {
    for render in renders {
        if render.is_null() {
            continue;
        }

        match converge_one(registry, config, template_name, update, render).await {
            Ok(outcome) => {
                tracing::info!(
                    kind = render.get("kind").and_then(Value::as_str).unwrap_or("?"),
                    name = render
                        .pointer("/metadata/name")
                        .and_then(Value::as_str)
                        .unwrap_or("?"),
                    outcome = ?outcome,
                    "Reconciled document"
                );
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to reconcile document, skipping");
            }
        }
    }

    Ok(())
}

async fn converge_one(
    registry: &Registry,
    config: &Arc<Configuration>,
    template_name: &str,
    update: bool,
    render: &Value,
) -> Result<Outcome, Error> {
    let kind = render
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::MissingKind(template_name.to_string()))?
        .to_string();

    let name = render
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::MissingKind(template_name.to_string()))?
        .to_string();

    let namespace = render
        .pointer("/metadata/namespace")
        .and_then(Value::as_str)
        .map(str::to_string);

    let api = registry
        .api(&kind, namespace.as_deref())
        .map_err(|err| Error::UnknownKind(kind.clone(), err))?;

    let existing = match api.get_opt(&name).await.map_err(|err| Error::Get(name.clone(), err))? {
        Some(existing) => existing,
        None => {
            if let Some(dir) = &config.dump {
                dump::write_object(dir, template_name, namespace.as_deref(), &name, &kind, "post", render)
                    .map_err(Error::Dump)?;
            }

            if config.dry_run {
                return Ok(Outcome::Skipped("dry-run"));
            }

            let object: DynamicObject = serde_json::from_value(render.clone())
                .map_err(|err| Error::Create(name.clone(), kube::Error::SerdeError(err)))?;

            api.create(&Default::default(), &object)
                .await
                .map_err(|err| Error::Create(name.clone(), err))?;

            return Ok(Outcome::Created);
        }
    };

    if !update {
        return Ok(Outcome::Skipped("update=false"));
    }

    let existing_value = serde_json::to_value(&existing).unwrap_or(Value::Null);

    if existing_value
        .get("kind")
        .and_then(Value::as_str)
        == Some("PersistentVolumeClaim")
    {
        return Ok(Outcome::Skipped("PersistentVolumeClaim is immutable"));
    }

    let mut desired = render.clone();
    apply_carve_outs(&mut desired, &existing_value);

    if let Some(dir) = &config.dump {
        dump::write_reconciliation(dir, template_name, namespace.as_deref(), &name, &kind, &existing_value, &desired)
            .map_err(Error::Dump)?;
    }

    if config.dry_run {
        return Ok(Outcome::Skipped("dry-run"));
    }

    let object: DynamicObject = serde_json::from_value(desired)
        .map_err(|err| Error::Replace(name.clone(), kube::Error::SerdeError(err)))?;

    let replaced = api
        .replace(&name, &Default::default(), &object)
        .await
        .map_err(|err| Error::Replace(name.clone(), err))?;

    let before = existing_value
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
        .map(str::to_string);
    let after = serde_json::to_value(&replaced)
        .ok()
        .and_then(|v| v.pointer("/metadata/resourceVersion").and_then(Value::as_str).map(str::to_string));

    if before == after {
        Ok(Outcome::Unchanged)
    } else {
        Ok(Outcome::Updated)
    }
}

/// Copies the three server-assigned fields the renderer never emits back
/// into `desired`, when present on `existing` (SPEC_FULL.md §4.8d).
fn apply_carve_outs(desired: &mut Value, existing: &Value) {
    desired["metadata"]["resourceVersion"] = existing
        .pointer("/metadata/resourceVersion")
        .cloned()
        .unwrap_or(Value::Null);

    if let Some(revision) = existing.pointer("/metadata/annotations/deployment.kubernetes.io~1revision") {
        desired["metadata"]["annotations"]["deployment.kubernetes.io/revision"] = revision.clone();
    }

    if let Some(cluster_ip) = existing.pointer("/spec/clusterIP") {
        desired["spec"]["clusterIP"] = cluster_ip.clone();
    }

    let is_local_service = existing.get("kind").and_then(Value::as_str) == Some("Service")
        && existing.pointer("/spec/externalTrafficPolicy").and_then(Value::as_str) == Some("Local");

    if is_local_service {
        if let Some(port) = existing.pointer("/spec/healthCheckNodePort") {
            desired["spec"]["healthCheckNodePort"] = port.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn preserves_cluster_ip() {
        let existing = json!({"kind": "Service", "spec": {"clusterIP": "10.0.0.5"}});
        let mut desired = json!({"kind": "Service", "metadata": {}, "spec": {}});

        apply_carve_outs(&mut desired, &existing);
        assert_eq!(desired["spec"]["clusterIP"], "10.0.0.5");
    }

    #[test]
    fn preserves_health_check_node_port_for_local_services() {
        let existing = json!({
            "kind": "Service",
            "spec": {"externalTrafficPolicy": "Local", "healthCheckNodePort": 32000},
        });
        let mut desired = json!({"kind": "Service", "metadata": {}, "spec": {}});

        apply_carve_outs(&mut desired, &existing);
        assert_eq!(desired["spec"]["healthCheckNodePort"], 32000);
    }

    #[test]
    fn does_not_preserve_health_check_node_port_without_local_policy() {
        let existing = json!({"kind": "Service", "spec": {"healthCheckNodePort": 32000}});
        let mut desired = json!({"kind": "Service", "metadata": {}, "spec": {}});

        apply_carve_outs(&mut desired, &existing);
        assert!(desired["spec"].get("healthCheckNodePort").is_none());
    }

    #[test]
    fn preserves_deployment_revision_annotation() {
        let existing = json!({
            "kind": "Deployment",
            "metadata": {"annotations": {"deployment.kubernetes.io/revision": "3"}},
        });
        let mut desired = json!({"kind": "Deployment", "metadata": {}, "spec": {}});

        apply_carve_outs(&mut desired, &existing);
        assert_eq!(
            desired["metadata"]["annotations"]["deployment.kubernetes.io/revision"],
            "3"
        );
    }
}
