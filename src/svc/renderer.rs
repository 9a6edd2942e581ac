//! # Renderer module
//!
//! This module implements SPEC_FULL.md §4.7: a narrow [`Renderer`] trait
//! (per §9's "template engine abstraction" design note) plus a
//! [`minijinja`]-backed implementation exposing the filter/test contract the
//! pipeline depends on, so the rest of the codebase never touches the
//! template engine's own API.

use std::collections::HashMap;

use minijinja::value::Value as JinjaValue;
use minijinja::{Environment, Error as JinjaError, ErrorKind};
use serde_json::{Map, Value};

use crate::svc::{
    crd::Spec,
    value::{cheap_hash, is_subset, is_superset, merge, path_join, unique_dict},
};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to compile template, {0}")]
    Compile(JinjaError),
    #[error("failed to render template, {0}")]
    Render(JinjaError),
    #[error("failed to parse rendered output as a yaml document stream, {0}")]
    Parse(serde_yaml::Error),
}

// -----------------------------------------------------------------------------
// Renderer trait

/// A pluggable template engine. The pipeline depends only on this contract,
/// never on the engine crate's own API (SPEC_FULL.md §9).
pub trait Renderer {
    /// Renders `text` against `context`, returning zero or more parsed YAML
    /// documents. A parse or evaluation failure aborts the whole call — no
    /// partial results (SPEC_FULL.md §4.7).
    fn render(&self, text: &str, context: &Value) -> Result<Vec<Value>, Error>;
}

/// Builds the per-call template context: `parent`/`child` kind descriptors,
/// the five label-key names, the scope item `x` spread, and every watched
/// kind's item list spread at the top level (SPEC_FULL.md §4.7).
pub fn context(spec: &Spec, x: &Value, items: &HashMap<String, Vec<Value>>) -> Value {
    let mut ctx = Map::new();

    ctx.insert(
        "parent".into(),
        serde_json::json!({"kind": spec.kinds.parent.kind}),
    );
    ctx.insert(
        "child".into(),
        serde_json::json!({
            "kind": spec.kinds.child.kind,
            "group": spec.kinds.child.group,
            "version": spec.kinds.child.version,
        }),
    );

    ctx.insert("labels_name".into(), Value::String(spec.labels.name.clone()));
    ctx.insert(
        "labels_instance".into(),
        Value::String(spec.labels.instance.clone()),
    );
    ctx.insert(
        "labels_domain_name".into(),
        Value::String(spec.labels.domain_name.clone()),
    );
    ctx.insert(
        "labels_component".into(),
        Value::String(spec.labels.component.clone()),
    );
    ctx.insert(
        "labels_managed_by".into(),
        Value::String(spec.labels.managed_by.clone()),
    );

    for (kind, objects) in items {
        ctx.insert(kind.clone(), Value::Array(objects.clone()));
    }

    if let Value::Object(fields) = x {
        for (k, v) in fields {
            ctx.insert(k.clone(), v.clone());
        }
    }

    Value::Object(ctx)
}

// -----------------------------------------------------------------------------
// Engine: minijinja-backed implementation

pub struct Engine {
    env: Environment<'static>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        let mut env = Environment::new();

        env.add_filter("b64decode", filter_b64decode);
        env.add_filter("ipaddr", filter_ipaddr);
        env.add_filter("json_query", filter_json_query);
        env.add_filter("json_query_one", filter_json_query_one);
        env.add_filter("json_query_unique", filter_json_query_unique);
        env.add_filter("unique_dict", filter_unique_dict);
        env.add_filter("cheap_hash", filter_cheap_hash);
        env.add_filter("path_join", filter_path_join);
        env.add_filter("merge", filter_merge);
        env.add_filter("alfa_query", filter_alfa_query);
        env.add_filter("one_by_labels", filter_one_by_labels);
        env.add_filter("many_by_labels", filter_many_by_labels);

        env.add_test("subset", test_is_subset);
        env.add_test("superset", test_is_superset);

        Self { env }
    }
}

impl Renderer for Engine {
    fn render(&self, text: &str, context: &Value) -> Result<Vec<Value>, Error> {
        let tmpl = self
            .env
            .template_from_str(text)
            .map_err(Error::Compile)?;

        let rendered = tmpl.render(context).map_err(Error::Render)?;

        parse_documents(&rendered)
    }
}

fn parse_documents(rendered: &str) -> Result<Vec<Value>, Error> {
    use serde::Deserialize;

    let mut docs = Vec::new();

    for doc in serde_yaml::Deserializer::from_str(rendered) {
        let value = serde_yaml::Value::deserialize(doc).map_err(Error::Parse)?;

        if value.is_null() {
            continue;
        }

        docs.push(serde_json::to_value(value).unwrap_or(Value::Null));
    }

    Ok(docs)
}

// -----------------------------------------------------------------------------
// filters

fn to_json(v: &JinjaValue) -> Value {
    serde_json::to_value(v).unwrap_or(Value::Null)
}

fn from_json(v: Value) -> JinjaValue {
    JinjaValue::from_serializable(&v)
}

fn filter_b64decode(s: String) -> Result<String, JinjaError> {
    use base64::Engine as _;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(s.as_bytes())
        .map_err(|err| JinjaError::new(ErrorKind::InvalidOperation, err.to_string()))?;

    String::from_utf8(bytes)
        .map_err(|err| JinjaError::new(ErrorKind::InvalidOperation, err.to_string()))
}

/// `ipaddr(value, 'revdns')`: computes the `in-addr.arpa`/`ip6.arpa` PTR name
/// for an IPv4/IPv6 address, trailing dot stripped (SPEC_FULL.md §4.7).
fn filter_ipaddr(value: String, mode: String) -> Result<String, JinjaError> {
    if mode != "revdns" {
        return Err(JinjaError::new(
            ErrorKind::InvalidOperation,
            format!("unsupported ipaddr mode '{mode}'"),
        ));
    }

    let addr: std::net::IpAddr = value
        .parse()
        .map_err(|err| JinjaError::new(ErrorKind::InvalidOperation, format!("{err}")))?;

    let arpa = match addr {
        std::net::IpAddr::V4(v4) => {
            let o = v4.octets();
            format!("{}.{}.{}.{}.in-addr.arpa", o[3], o[2], o[1], o[0])
        }
        std::net::IpAddr::V6(v6) => {
            let nibbles: Vec<String> = v6
                .octets()
                .iter()
                .rev()
                .flat_map(|b| vec![format!("{:x}", b & 0xf), format!("{:x}", b >> 4)])
                .collect();
            format!("{}.ip6.arpa", nibbles.join("."))
        }
    };

    Ok(arpa)
}

fn filter_json_query(input: JinjaValue, expr: String) -> Result<JinjaValue, JinjaError> {
    let results = json_query(&to_json(&input), &expr)
        .map_err(|err| JinjaError::new(ErrorKind::InvalidOperation, err.to_string()))?;

    Ok(from_json(results))
}

fn filter_json_query_one(input: JinjaValue, expr: String) -> Result<JinjaValue, JinjaError> {
    let results = json_query(&to_json(&input), &expr)
        .map_err(|err| JinjaError::new(ErrorKind::InvalidOperation, err.to_string()))?;

    match results.as_array() {
        Some(items) if items.len() == 1 => Ok(from_json(items[0].clone())),
        _ => Err(JinjaError::new(
            ErrorKind::InvalidOperation,
            format!("json_query_one('{expr}') did not return exactly one element"),
        )),
    }
}

fn filter_json_query_unique(input: JinjaValue, expr: String) -> Result<JinjaValue, JinjaError> {
    let results = json_query(&to_json(&input), &expr)
        .map_err(|err| JinjaError::new(ErrorKind::InvalidOperation, err.to_string()))?;

    let items = results.as_array().cloned().unwrap_or_default();
    Ok(from_json(Value::Array(unique_dict(items))))
}

fn filter_unique_dict(input: JinjaValue) -> JinjaValue {
    let items = to_json(&input).as_array().cloned().unwrap_or_default();
    from_json(Value::Array(unique_dict(items)))
}

fn filter_cheap_hash(s: String) -> JinjaValue {
    match cheap_hash(&s, 6) {
        Some(hash) => JinjaValue::from(hash),
        None => JinjaValue::from(()),
    }
}

fn filter_path_join(segments: Vec<String>) -> String {
    path_join(segments.iter().map(String::as_str))
}

fn filter_merge(a: JinjaValue, b: JinjaValue) -> JinjaValue {
    from_json(merge(&to_json(&a), &to_json(&b)))
}

/// Assembles owner-referenced child skeletons from `input` for the
/// `(parent_kind, child_kind, child_group, child_version)` tuple, optionally
/// narrowed by `spec_filter`, a JMESPath predicate evaluated against each
/// candidate's `spec` (SPEC_FULL.md §4.7).
fn filter_alfa_query(
    input: JinjaValue,
    parent_kind: String,
    child_kind: String,
    child_group: String,
    child_version: String,
    spec_filter: Option<String>,
) -> Result<JinjaValue, JinjaError> {
    let predicate = spec_filter
        .map(|f| format!(" && spec.{f}"))
        .unwrap_or_default();

    let expr = format!(
        "[?kind == `{child}` && contains(metadata.ownerReferences[].kind, `{parent}`){predicate}] \
         | [].{{kind: kind, apiVersion: apiVersion, metadata: {{name: metadata.name, namespace: metadata.namespace, ownerReferences: metadata.ownerReferences}}, spec: spec}}",
        child = serde_json::to_string(&child_kind).unwrap_or_default(),
        parent = serde_json::to_string(&parent_kind).unwrap_or_default(),
    );
    let _ = (&child_group, &child_version);

    let results = json_query(&to_json(&input), &expr)
        .map_err(|err| JinjaError::new(ErrorKind::InvalidOperation, err.to_string()))?;

    Ok(from_json(results))
}

fn filter_one_by_labels(
    input: JinjaValue,
    namespace: String,
    label_sets: Vec<JinjaValue>,
) -> Result<JinjaValue, JinjaError> {
    let matches = by_labels(&to_json(&input), &namespace, &label_sets);

    match matches.len() {
        1 => Ok(from_json(matches.into_iter().next().expect("checked len == 1"))),
        n => Err(JinjaError::new(
            ErrorKind::InvalidOperation,
            format!("one_by_labels: expected exactly one match in '{namespace}', found {n}"),
        )),
    }
}

fn filter_many_by_labels(
    input: JinjaValue,
    namespace: String,
    label_sets: Vec<JinjaValue>,
) -> JinjaValue {
    from_json(Value::Array(by_labels(&to_json(&input), &namespace, &label_sets)))
}

fn by_labels(input: &Value, namespace: &str, label_sets: &[JinjaValue]) -> Vec<Value> {
    let label_sets: Vec<Value> = label_sets.iter().map(to_json).collect();

    input
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter(|item| {
                    item.pointer("/metadata/namespace").and_then(Value::as_str) == Some(namespace)
                })
                .filter(|item| {
                    let labels = item
                        .pointer("/metadata/labels")
                        .cloned()
                        .unwrap_or(Value::Object(Map::new()));

                    label_sets.iter().any(|set| is_subset(set, &labels))
                })
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

fn test_is_subset(subset: JinjaValue, superset: JinjaValue) -> bool {
    is_subset(&to_json(&subset), &to_json(&superset))
}

fn test_is_superset(superset: JinjaValue, subset: JinjaValue) -> bool {
    is_superset(&to_json(&superset), &to_json(&subset))
}

// -----------------------------------------------------------------------------
// json_query, with the `loop(obj, count)` custom function

fn json_query(input: &Value, expr: &str) -> Result<Value, jmespath::JmespathError> {
    use jmespath::functions::{ArgumentType, CustomFunction, Signature};
    use jmespath::{Rcvar, Runtime, Variable};

    let mut runtime = Runtime::new();
    runtime.register_builtin_functions();

    runtime.register_function(
        "loop",
        Box::new(CustomFunction::new(
            Signature::new(vec![ArgumentType::Any, ArgumentType::Number], None),
            Box::new(loop_fn),
        )),
    );

    let compiled = runtime.compile(expr)?;

    let json = serde_json::to_string(input).unwrap_or_default();
    let data = Variable::from_json(&json)?;

    let result: Rcvar = compiled.search(data)?;

    let text = serde_json::to_string(&*result).unwrap_or_else(|_| "null".into());
    Ok(serde_json::from_str(&text).unwrap_or(Value::Null))
}

/// Expands one object into `count + 1` objects carrying `__number` (`None` or
/// `0..count-1`) and `__index` (`None` or a zero-padded `"00".."NN"`).
fn loop_fn(
    args: &[jmespath::Rcvar],
    _ctx: &mut jmespath::Context,
) -> Result<jmespath::Rcvar, jmespath::JmespathError> {
    use jmespath::Variable;
    use std::sync::Arc;

    let obj = &args[0];
    let count = args[1].as_number().unwrap_or(0.0) as i64;
    let width = count.to_string().len();

    let mut out = Vec::with_capacity((count + 1) as usize);
    out.push(with_fields(obj, Variable::Null, Variable::Null));

    for i in 0..count {
        out.push(with_fields(
            obj,
            Variable::Number(i as f64),
            Variable::String(format!("{i:0width$}")),
        ));
    }

    Ok(Arc::new(Variable::Array(out)))
}

fn with_fields(
    obj: &jmespath::Rcvar,
    number: jmespath::Variable,
    index: jmespath::Variable,
) -> jmespath::Variable {
    use jmespath::Variable;
    use std::collections::BTreeMap;

    let mut map: BTreeMap<String, jmespath::Rcvar> = match obj.as_object() {
        Some(existing) => existing.clone(),
        None => BTreeMap::new(),
    };

    map.insert("__number".into(), std::sync::Arc::new(number));
    map.insert("__index".into(), std::sync::Arc::new(index));

    Variable::Object(map)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn b64decode_roundtrips_utf8() {
        assert_eq!(filter_b64decode("aGVsbG8=".into()).unwrap(), "hello");
    }

    #[test]
    fn ipaddr_revdns_strips_trailing_dot() {
        let name = filter_ipaddr("192.0.2.1".into(), "revdns".into()).unwrap();
        assert_eq!(name, "1.2.0.192.in-addr.arpa");
    }

    #[test]
    fn one_by_labels_requires_exactly_one_match() {
        let items = json!([
            {"metadata": {"namespace": "ns1", "labels": {"app": "a"}}},
            {"metadata": {"namespace": "ns1", "labels": {"app": "b"}}},
        ]);

        let label_set = from_json(json!({"app": "a"}));
        let result = filter_one_by_labels(from_json(items.clone()), "ns1".into(), vec![label_set]);
        assert!(result.is_ok());

        let too_broad = from_json(json!({}));
        let result = filter_one_by_labels(from_json(items), "ns1".into(), vec![too_broad]);
        assert!(result.is_err());
    }

    #[test]
    fn renders_a_minimal_configmap_template() {
        let engine = Engine::new();
        let ctx = json!({"name": "foo"});
        let docs = engine
            .render("kind: ConfigMap\nmetadata:\n  name: {{ name }}\n", &ctx)
            .unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["metadata"]["name"], "foo");
    }
}
