//! # Aggregator module
//!
//! This module implements SPEC_FULL.md §4.6: it turns the flat
//! `kind -> [object]` map fetched for one template into the four scope
//! projections (`objects`, `domains`, `namespaces`, `clusters`), of which the
//! renderer consumes exactly one, selected by `spec.scope`.
//!
//! Per SPEC_FULL.md §9's "per-cycle memoization" design note, a
//! [`RenderCycle`] is built fresh for every render cycle and its projections
//! are computed at most once, memoized with [`once_cell::unsync::OnceCell`]
//! for the cycle's lifetime only.

use std::collections::HashMap;

use once_cell::unsync::OnceCell;
use serde_json::{Map, Value};

use crate::svc::{
    crd::{Scope, TemplateSpec},
    value::{cheap_hash, common_all, dash_join, merge},
};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to fetch items for kind '{0}', {1}")]
    Fetch(String, crate::svc::k8s::registry::Error),
    #[error("failed to fetch items for kind '{0}', {1}")]
    Kube(String, kube::Error),
}

// -----------------------------------------------------------------------------
// fetch

/// Fetches the current state of every watched kind: a list call followed by
/// a per-item get call, since list responses elide some fields the renderer
/// needs (SPEC_FULL.md §4.6).
#[tracing::instrument(skip(registry))]
pub async fn fetch(
    registry: &crate::svc::k8s::registry::Registry,
    kinds: &[String],
    namespace: Option<&str>,
) -> Result<HashMap<String, Vec<Value>>, Error> {
    let mut items = HashMap::with_capacity(kinds.len());

    for kind in kinds {
        let api = registry
            .api(kind, namespace)
            .map_err(|err| Error::Fetch(kind.clone(), err))?;

        let list = api
            .list(&kube::api::ListParams::default())
            .await
            .map_err(|err| Error::Kube(kind.clone(), err))?;

        let mut objects = Vec::with_capacity(list.items.len());

        for summary in list.items {
            let Some(name) = summary.metadata.name.clone() else {
                continue;
            };

            let full = api
                .get(&name)
                .await
                .map_err(|err| Error::Kube(kind.clone(), err))?;

            objects.push(serde_json::to_value(full).unwrap_or(Value::Null));
        }

        items.insert(kind.clone(), objects);
    }

    Ok(items)
}

// -----------------------------------------------------------------------------
// RenderCycle

pub struct RenderCycle<'a> {
    spec: &'a TemplateSpec,
    items: &'a HashMap<String, Vec<Value>>,
    objects: OnceCell<Vec<Value>>,
    domains: OnceCell<Vec<Value>>,
    namespaces: OnceCell<Vec<Value>>,
    clusters: OnceCell<Vec<Value>>,
}

impl<'a> RenderCycle<'a> {
    pub fn new(spec: &'a TemplateSpec, items: &'a HashMap<String, Vec<Value>>) -> Self {
        Self {
            spec,
            items,
            objects: OnceCell::new(),
            domains: OnceCell::new(),
            namespaces: OnceCell::new(),
            clusters: OnceCell::new(),
        }
    }

    fn parent_items(&self) -> &[Value] {
        self.items
            .get(&self.spec.spec.kinds.parent.kind)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns the scope-selected projection, per `spec.scope`.
    pub fn renders_input(&self) -> &[Value] {
        match self.spec.spec.scope {
            Scope::Object => self.objects(),
            Scope::Domain => self.domains(),
            Scope::Namespace => self.namespaces(),
            Scope::Cluster => self.clusters(),
        }
    }

    // -------------------------------------------------------------------
    // 4.6.1 Objects projection

    pub fn objects(&self) -> &Vec<Value> {
        self.objects.get_or_init(|| {
            self.parent_items()
                .iter()
                .map(|p| self.object_of(p))
                .collect()
        })
    }

    fn object_of(&self, p: &Value) -> Value {
        let spec = &self.spec.spec;
        let labels = &spec.labels;
        let parent_kind = spec.kinds.parent.kind.to_lowercase();

        let name = p
            .pointer(&format!("/metadata/labels/{}", escape(&labels.name)))
            .and_then(Value::as_str)
            .unwrap_or(&parent_kind)
            .to_string();

        let instance = p
            .pointer(&format!("/metadata/labels/{}", escape(&labels.instance)))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                p.pointer("/metadata/name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_default();

        let domain_name = p
            .pointer(&format!(
                "/metadata/labels/{}",
                escape(&labels.domain_name)
            ))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                p.pointer("/spec/domainName")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_default();

        let component = p
            .pointer(&format!("/metadata/labels/{}", escape(&labels.component)))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| spec.component.clone())
            .unwrap_or_default();

        let namespace = p.pointer("/metadata/namespace").cloned();

        let mut label_map = Map::new();
        label_map.insert(labels.name.clone(), Value::String(name.clone()));
        label_map.insert(labels.instance.clone(), Value::String(instance.clone()));
        label_map.insert(
            labels.domain_name.clone(),
            Value::String(domain_name.clone()),
        );
        label_map.insert(
            labels.component.clone(),
            Value::String(component.clone()),
        );
        label_map.insert(
            labels.managed_by.clone(),
            Value::String(self.spec.name.clone()),
        );

        let mut selector = Map::new();
        selector.insert(labels.name.clone(), Value::String(name));
        selector.insert(labels.instance.clone(), Value::String(instance));
        selector.insert(labels.domain_name.clone(), Value::String(domain_name.clone()));
        selector.insert(labels.component.clone(), Value::String(component.clone()));

        let owner_references = if spec.owner_references {
            Value::Array(vec![owner_reference(p)])
        } else {
            Value::Array(vec![])
        };

        let child_name = p.pointer("/metadata/name").and_then(Value::as_str);
        let name_segment = dash_join([
            Some(parent_kind.as_str()),
            child_name,
            cheap_hash(&domain_name, 6).as_deref(),
            spec.component.as_deref(),
        ]);

        serde_json::json!({
            "kind": spec.kinds.child.kind,
            "apiVersion": child_api_version(&spec.kinds.child),
            "metadata": {
                "namespace": namespace,
                "labels": label_map,
                "ownerReferences": owner_references,
            },
            "selector": selector,
            "_name": name_segment,
            "spec": p.get("spec").cloned().unwrap_or(Value::Null),
            "subsets": p.get("subsets").cloned().unwrap_or(Value::Null),
        })
    }

    // -------------------------------------------------------------------
    // 4.6.2 Domain projection

    pub fn domains(&self) -> &Vec<Value> {
        self.domains.get_or_init(|| {
            let spec = &self.spec.spec;
            let objects = self.objects();
            let parent_kind = spec.kinds.parent.kind.to_lowercase();

            group_by(objects, &spec.labels.domain_name)
                .into_iter()
                .map(|(domain, group)| {
                    let base = common_all(&group);

                    let owner_refs: Vec<Value> = if spec.owner_references {
                        self.parent_items()
                            .iter()
                            .filter(|p| domain_of(p, spec) == domain)
                            .map(owner_reference)
                            .collect()
                    } else {
                        vec![]
                    };

                    let name_segment = dash_join([
                        Some(parent_kind.as_str()),
                        cheap_hash(&domain, 6).as_deref(),
                        spec.component.as_deref(),
                    ]);

                    let overlay = serde_json::json!({
                        "metadata": {
                            "labels": single_label(&spec.labels.instance, ""),
                            "ownerReferences": owner_refs,
                        },
                        "_name": name_segment,
                        "objects": group,
                    });

                    merge(&base, &overlay)
                })
                .collect()
        })
    }

    // -------------------------------------------------------------------
    // 4.6.3 Namespace projection

    pub fn namespaces(&self) -> &Vec<Value> {
        self.namespaces.get_or_init(|| {
            let spec = &self.spec.spec;
            let objects = self.objects();
            let domains = self.domains();

            group_by_opt(objects, |o| {
                o.pointer("/metadata/namespace")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .into_iter()
            .map(|(namespace, group)| {
                let mut base = common_all(&group);

                set(&mut base, &["metadata", "labels", &spec.labels.domain_name], Value::String(String::new()));

                let owner_refs = if spec.owner_references {
                    Value::Array(
                        self.parent_items()
                            .iter()
                            .filter(|p| {
                                p.pointer("/metadata/namespace").and_then(Value::as_str)
                                    == Some(namespace.as_str())
                            })
                            .map(owner_reference)
                            .collect(),
                    )
                } else {
                    Value::Array(vec![])
                };
                set(&mut base, &["metadata", "ownerReferences"], owner_refs);

                let name_segment = dash_join([
                    Some(spec.kinds.parent.kind.to_lowercase().as_str()),
                    spec.component.as_deref(),
                ]);
                set(&mut base, &["_name"], Value::String(name_segment));

                let domains_in_ns: Vec<Value> = domains
                    .iter()
                    .filter(|d| {
                        d.get("objects")
                            .and_then(Value::as_array)
                            .map(|objs| {
                                objs.iter().any(|o| {
                                    o.pointer("/metadata/namespace").and_then(Value::as_str)
                                        == Some(namespace.as_str())
                                })
                            })
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect();

                set(&mut base, &["domains"], Value::Array(domains_in_ns));
                set(&mut base, &["objects"], Value::Array(group));

                base
            })
            .collect()
        })
    }

    // -------------------------------------------------------------------
    // 4.6.4 Cluster projection

    pub fn clusters(&self) -> &Vec<Value> {
        self.clusters.get_or_init(|| {
            let objects = self.objects();

            if objects.is_empty() {
                return vec![];
            }

            let mut base = common_all(objects);
            set(&mut base, &["metadata", "namespace"], Value::Null);
            set(&mut base, &["namespaces"], Value::Array(self.namespaces().clone()));
            set(&mut base, &["domains"], Value::Array(self.domains().clone()));
            set(&mut base, &["objects"], Value::Array(objects.clone()));

            vec![base]
        })
    }
}

// -----------------------------------------------------------------------------
// helpers

fn child_api_version(child: &crate::svc::crd::ChildKind) -> String {
    if child.group.is_empty() {
        child.version.clone()
    } else {
        format!("{}/{}", child.group, child.version)
    }
}

fn owner_reference(p: &Value) -> Value {
    serde_json::json!({
        "apiVersion": p.get("apiVersion").cloned().unwrap_or(Value::Null),
        "kind": p.get("kind").cloned().unwrap_or(Value::Null),
        "name": p.pointer("/metadata/name").cloned().unwrap_or(Value::Null),
        "uid": p.pointer("/metadata/uid").cloned().unwrap_or(Value::Null),
        "blockOwnerDeletion": true,
        "controller": false,
    })
}

fn domain_of(p: &Value, spec: &crate::svc::crd::Spec) -> String {
    p.pointer(&format!(
        "/metadata/labels/{}",
        escape(&spec.labels.domain_name)
    ))
    .and_then(Value::as_str)
    .map(str::to_string)
    .or_else(|| {
        p.pointer("/spec/domainName")
            .and_then(Value::as_str)
            .map(str::to_string)
    })
    .unwrap_or_default()
}

/// JSON pointer escaping of `/` and `~` in a label key, since kubernetes
/// label keys routinely contain `/` (e.g. `app.kubernetes.io/name`).
fn escape(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

fn set(value: &mut Value, path: &[&str], new: Value) {
    let mut cur = value;

    for (idx, segment) in path.iter().enumerate() {
        if !cur.is_object() {
            *cur = Value::Object(Map::new());
        }

        let map = cur.as_object_mut().expect("just coerced to an object");

        if idx == path.len() - 1 {
            map.insert(segment.to_string(), new);
            return;
        }

        cur = map.entry(segment.to_string()).or_insert_with(|| Value::Object(Map::new()));
    }
}

fn group_by(objects: &[Value], label_key: &str) -> Vec<(String, Vec<Value>)> {
    group_by_opt(objects, |o| {
        o.pointer(&format!("/metadata/labels/{}", escape(label_key)))
            .and_then(Value::as_str)
            .map(str::to_string)
    })
}

fn group_by_opt<F>(objects: &[Value], key_of: F) -> Vec<(String, Vec<Value>)>
where
    F: Fn(&Value) -> Option<String>,
{
    let mut order = Vec::new();
    let mut groups: HashMap<String, Vec<Value>> = HashMap::new();

    for object in objects {
        let Some(key) = key_of(object) else { continue };

        if !groups.contains_key(&key) {
            order.push(key.clone());
        }

        groups.entry(key).or_default().push(object.clone());
    }

    order
        .into_iter()
        .map(|key| {
            let group = groups.remove(&key).unwrap_or_default();
            (key, group)
        })
        .collect()
}

fn single_label(key: &str, value: &str) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), Value::String(value.to_string()));
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::svc::crd::{ChildKind, Kinds, Labels, MonitoredKind, ParentKind, Scope, Spec, TemplateSpec};

    use super::*;

    fn spec(scope: Scope) -> TemplateSpec {
        TemplateSpec {
            name: "t1".into(),
            spec: Spec {
                kinds: Kinds {
                    parent: ParentKind { kind: "Foo".into() },
                    monitored: vec![MonitoredKind { kind: "Bar".into() }],
                    child: ChildKind {
                        kind: "ConfigMap".into(),
                        group: "".into(),
                        version: "v1".into(),
                    },
                },
                scope,
                template: "kind: ConfigMap".into(),
                update: true,
                owner_references: false,
                component: None,
                labels: Labels::default(),
            },
        }
    }

    #[test]
    fn objects_carry_the_five_configured_label_keys() {
        let spec = spec(Scope::Object);
        let mut items = HashMap::new();
        items.insert(
            "Foo".to_string(),
            vec![json!({
                "apiVersion": "v1", "kind": "Foo",
                "metadata": {"name": "a", "namespace": "ns1", "uid": "u1"},
                "spec": {},
            })],
        );

        let cycle = RenderCycle::new(&spec, &items);
        let objects = cycle.objects();
        assert_eq!(objects.len(), 1);

        let labels = &objects[0]["metadata"]["labels"];
        for key in [
            &spec.spec.labels.name,
            &spec.spec.labels.instance,
            &spec.spec.labels.domain_name,
            &spec.spec.labels.component,
            &spec.spec.labels.managed_by,
        ] {
            assert!(labels.get(key).is_some(), "missing label {key}");
        }

        assert_eq!(labels[&spec.spec.labels.managed_by], "t1");
    }

    #[test]
    fn cluster_projection_clears_namespace() {
        let spec = spec(Scope::Cluster);
        let mut items = HashMap::new();
        items.insert(
            "Foo".to_string(),
            vec![
                json!({"apiVersion": "v1", "kind": "Foo", "metadata": {"name": "a", "namespace": "ns1"}, "spec": {}}),
                json!({"apiVersion": "v1", "kind": "Foo", "metadata": {"name": "b", "namespace": "ns2"}, "spec": {}}),
            ],
        );

        let cycle = RenderCycle::new(&spec, &items);
        let clusters = cycle.clusters();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0]["metadata"]["namespace"], Value::Null);
    }

    #[test]
    fn domain_projection_clears_instance_label() {
        let spec = spec(Scope::Domain);
        let mut items = HashMap::new();
        items.insert(
            "Foo".to_string(),
            vec![json!({
                "apiVersion": "v1", "kind": "Foo",
                "metadata": {"name": "a", "namespace": "ns1", "labels": {"app.kubernetes.io/domain-name": "example.com"}},
                "spec": {},
            })],
        );

        let cycle = RenderCycle::new(&spec, &items);
        let domains = cycle.domains();
        assert_eq!(domains.len(), 1);
        assert_eq!(
            domains[0]["metadata"]["labels"][&spec.spec.labels.instance],
            ""
        );
    }
}
