//! # Custom resource definition module
//!
//! This module provides the `AlfaTemplate` custom resource: its structure,
//! the [`TemplateSpec`] contract described by SPEC_FULL.md §3, and the
//! helpers used to turn a raw [`serde_json::Value`] watched off the wire into
//! a typed spec.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::svc::value::recursive_get_str;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("object has no 'metadata.name'")]
    MissingName,
    #[error("template '{0}' is missing required field '{1}'")]
    MissingField(String, &'static str),
    #[error("template '{0}' has an invalid value '{1}' for field '{2}'")]
    InvalidValue(String, String, &'static str),
    #[error("failed to deserialize template '{0}' spec, {1}")]
    Deserialize(String, serde_json::Error),
}

// -----------------------------------------------------------------------------
// Scope enum

#[derive(Serialize, Deserialize, JsonSchema, PartialEq, Eq, Clone, Copy, Debug)]
#[serde(rename_all = "PascalCase")]
pub enum Scope {
    Object,
    Domain,
    Namespace,
    Cluster,
}

// -----------------------------------------------------------------------------
// Kind descriptors

#[derive(Serialize, Deserialize, JsonSchema, PartialEq, Eq, Clone, Debug)]
pub struct ParentKind {
    pub kind: String,
}

#[derive(Serialize, Deserialize, JsonSchema, PartialEq, Eq, Clone, Debug)]
pub struct MonitoredKind {
    pub kind: String,
}

#[derive(Serialize, Deserialize, JsonSchema, PartialEq, Eq, Clone, Debug, Default)]
pub struct ChildKind {
    pub kind: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Serialize, Deserialize, JsonSchema, PartialEq, Eq, Clone, Debug, Default)]
pub struct Kinds {
    pub parent: ParentKind,
    #[serde(default)]
    pub monitored: Vec<MonitoredKind>,
    pub child: ChildKind,
}

// -----------------------------------------------------------------------------
// Labels structure

/// The five label *keys* the aggregator reads from parent objects and writes
/// onto rendered children, not the label values themselves.
#[derive(Serialize, Deserialize, JsonSchema, PartialEq, Eq, Clone, Debug)]
pub struct Labels {
    #[serde(default = "Labels::default_name")]
    pub name: String,
    #[serde(default = "Labels::default_instance")]
    pub instance: String,
    #[serde(default = "Labels::default_domain_name")]
    pub domain_name: String,
    #[serde(default = "Labels::default_component")]
    pub component: String,
    #[serde(default = "Labels::default_managed_by")]
    pub managed_by: String,
}

impl Labels {
    fn default_name() -> String {
        "app.kubernetes.io/name".into()
    }

    fn default_instance() -> String {
        "app.kubernetes.io/instance".into()
    }

    fn default_domain_name() -> String {
        "app.kubernetes.io/domain-name".into()
    }

    fn default_component() -> String {
        "app.kubernetes.io/component".into()
    }

    fn default_managed_by() -> String {
        "app.kubernetes.io/managed-by".into()
    }
}

impl Default for Labels {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            instance: Self::default_instance(),
            domain_name: Self::default_domain_name(),
            component: Self::default_component(),
            managed_by: Self::default_managed_by(),
        }
    }
}

// -----------------------------------------------------------------------------
// Spec structure

#[derive(
    kube::CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug,
)]
#[kube(group = "alfa.io")]
#[kube(version = "v1")]
#[kube(kind = "AlfaTemplate")]
#[kube(singular = "alfatemplate")]
#[kube(plural = "alfatemplates")]
#[kube(shortname = "at")]
#[kube(namespaced)]
#[kube(apiextensions = "v1")]
#[kube(derive = "PartialEq")]
pub struct Spec {
    pub kinds: Kinds,
    pub scope: Scope,
    pub template: String,
    #[serde(default = "Spec::default_update")]
    pub update: bool,
    #[serde(default, rename = "ownerReferences")]
    pub owner_references: bool,
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default)]
    pub labels: Labels,
}

impl Spec {
    fn default_update() -> bool {
        true
    }
}

// -----------------------------------------------------------------------------
// TemplateSpec: typed view reconstructed from a watched Value

/// The same contract as [`Spec`], reconstructed from a `serde_json::Value`
/// obtained off a watch/list call against the dynamic `AlfaTemplate` kind,
/// along with the object's own name (the template name used to key the
/// cluster consumer's controller table).
#[derive(Clone, Debug)]
pub struct TemplateSpec {
    pub name: String,
    pub spec: Spec,
}

impl TemplateSpec {
    pub fn from_value(object: &Value) -> Result<Self, Error> {
        let name = recursive_get_str(object, "metadata.name")
            .ok_or(Error::MissingName)?
            .to_string();

        let spec = object
            .get("spec")
            .cloned()
            .ok_or_else(|| Error::MissingField(name.clone(), "spec"))?;

        let spec: Spec = serde_json::from_value(spec)
            .map_err(|err| Error::Deserialize(name.clone(), err))?;

        Ok(Self { name, spec })
    }

    /// Every kind this template needs a watcher for: the parent plus every
    /// monitored kind.
    pub fn watched_kinds(&self) -> Vec<String> {
        let mut kinds = vec![self.spec.kinds.parent.kind.clone()];
        kinds.extend(self.spec.kinds.monitored.iter().map(|m| m.kind.clone()));
        kinds
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_a_minimal_template() {
        let object = json!({
            "metadata": {"name": "t1"},
            "spec": {
                "kinds": {"parent": {"kind": "Foo"}, "child": {"kind": "ConfigMap"}},
                "scope": "Object",
                "template": "kind: ConfigMap",
            },
        });

        let parsed = TemplateSpec::from_value(&object).unwrap();
        assert_eq!(parsed.name, "t1");
        assert_eq!(parsed.spec.kinds.parent.kind, "Foo");
        assert!(parsed.spec.update);
        assert_eq!(parsed.watched_kinds(), vec!["Foo".to_string()]);
    }

    #[test]
    fn rejects_missing_name() {
        let object = json!({"spec": {}});
        assert!(matches!(
            TemplateSpec::from_value(&object),
            Err(Error::MissingName)
        ));
    }
}
