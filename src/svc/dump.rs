//! # Dump module
//!
//! This module implements the on-disk dump facility described by
//! SPEC_FULL.md §6/§10.9: one YAML file per aggregation stage, one YAML file
//! per reconciled object body, and a unified diff for updates. Active only
//! when `Configuration::dump` is set.

use std::{fs, path::Path};

use serde_json::Value;
use similar::TextDiff;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to create dump directory '{0}', {1}")]
    CreateDir(String, std::io::Error),
    #[error("failed to write dump file '{0}', {1}")]
    Write(String, std::io::Error),
    #[error("failed to serialize dump artifact, {0}")]
    Serialize(serde_yaml::Error),
}

// -----------------------------------------------------------------------------
// aggregation stage dumps

/// Writes one `alfatemplate-<template>-<stage>.yaml` file, where `stage` is
/// one of `kinds|objects|domains|namespaces|clusters|renders|template`.
pub fn write_stage(dir: &Path, template: &str, stage: &str, value: &Value) -> Result<(), Error> {
    let path = dir.join(format!("alfatemplate-{template}-{stage}.yaml"));
    write_yaml(&path, value)
}

// -----------------------------------------------------------------------------
// per-object dumps

fn object_path(
    dir: &Path,
    namespace: Option<&str>,
    name: &str,
    kind: &str,
    resource_version: &str,
    suffix: &str,
    extension: &str,
) -> std::path::PathBuf {
    let scope = namespace.unwrap_or("cluster");
    dir.join(format!("{scope}-{name}-{kind}-{resource_version}{suffix}.{extension}"))
}

fn resource_version_of(value: &Value) -> String {
    value
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
        .unwrap_or("new")
        .to_string()
}

/// Writes a single GET/POST/PUT body dump. `verb` (`get`, `post`, `put`)
/// disambiguates the filename when a GET and a PUT are dumped for the same
/// object in the same reconciliation.
pub fn write_object(
    dir: &Path,
    _template: &str,
    namespace: Option<&str>,
    name: &str,
    kind: &str,
    verb: &str,
    body: &Value,
) -> Result<(), Error> {
    let rv = resource_version_of(body);
    let path = object_path(dir, namespace, name, kind, &rv, &format!("-{verb}"), "yaml");
    write_yaml(&path, body)
}

/// Writes the existing (GET) and desired (PUT) bodies plus a unified diff
/// between them, before the PUT is issued (SPEC_FULL.md §4.8).
pub fn write_reconciliation(
    dir: &Path,
    template: &str,
    namespace: Option<&str>,
    name: &str,
    kind: &str,
    existing: &Value,
    desired: &Value,
) -> Result<(), Error> {
    write_object(dir, template, namespace, name, kind, "get", existing)?;
    write_object(dir, template, namespace, name, kind, "put", desired)?;

    let before = serde_yaml::to_string(existing).map_err(Error::Serialize)?;
    let after = serde_yaml::to_string(desired).map_err(Error::Serialize)?;

    let diff = TextDiff::from_lines(&before, &after)
        .unified_diff()
        .header("existing", "desired")
        .to_string();

    let rv = resource_version_of(desired);
    let path = object_path(dir, namespace, name, kind, &rv, "", "diff");
    write_string(&path, &diff)
}

// -----------------------------------------------------------------------------
// helpers

fn write_yaml(path: &Path, value: &Value) -> Result<(), Error> {
    let yaml = serde_yaml::to_string(value).map_err(Error::Serialize)?;
    write_string(path, &yaml)
}

fn write_string(path: &Path, content: &str) -> Result<(), Error> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|err| Error::CreateDir(dir.display().to_string(), err))?;
    }

    fs::write(path, content).map_err(|err| Error::Write(path.display().to_string(), err))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn writes_a_stage_dump_with_the_expected_name() {
        let dir = tempfile::tempdir().unwrap();
        write_stage(dir.path(), "t1", "objects", &json!([{"a": 1}])).unwrap();

        assert!(dir.path().join("alfatemplate-t1-objects.yaml").exists());
    }

    #[test]
    fn writes_a_reconciliation_dump_with_diff() {
        let dir = tempfile::tempdir().unwrap();
        let existing = json!({"metadata": {"resourceVersion": "7"}, "spec": {"replicas": 1}});
        let desired = json!({"metadata": {"resourceVersion": "7"}, "spec": {"replicas": 2}});

        write_reconciliation(dir.path(), "t1", Some("ns1"), "a", "Deployment", &existing, &desired).unwrap();

        assert!(dir.path().join("ns1-a-Deployment-7-get.yaml").exists());
        assert!(dir.path().join("ns1-a-Deployment-7-put.yaml").exists());
        assert!(dir.path().join("ns1-a-Deployment-7.diff").exists());
    }
}
