//! # Registry module
//!
//! This module provides the API kind registry described by SPEC_FULL.md
//! §4.1/§10.6: it runs discovery once at startup and resolves a bare `kind`
//! name, as referenced by an `AlfaTemplate`, to the [`kube`] handles needed
//! to list/watch/get/create/replace objects of that kind.

use std::collections::HashMap;

use kube::{
    Api, Client,
    core::DynamicObject,
    discovery::{ApiCapabilities, ApiResource, Discovery, Scope},
};
use tracing::{debug, warn};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to run api discovery against the cluster, {0}")]
    Discovery(kube::Error),
    #[error("kind '{0}' was not found by api discovery")]
    UnknownKind(String),
}

// -----------------------------------------------------------------------------
// Registry structure

/// Immutable, post-discovery map of `kind -> (ApiResource, ApiCapabilities)`.
pub struct Registry {
    client: Client,
    kinds: HashMap<String, (ApiResource, ApiCapabilities)>,
}

impl Registry {
    /// Runs discovery against `api/v1` and every group under `apis/`,
    /// preferring each group's `preferredVersion` and additionally keeping
    /// every other group-version, skipping resources whose name is a
    /// subresource (contains a `/`).
    #[tracing::instrument(skip_all)]
    pub async fn discover(client: Client) -> Result<Self, Error> {
        let discovery = Discovery::new(client.clone())
            .run()
            .await
            .map_err(Error::Discovery)?;

        let mut kinds = HashMap::new();

        for group in discovery.groups() {
            for (resource, capabilities) in group.recommended_resources() {
                if resource.plural.contains('/') {
                    continue;
                }

                kinds
                    .entry(resource.kind.clone())
                    .or_insert((resource, capabilities));
            }

            for version in group.versions() {
                for (resource, capabilities) in group.versioned_resources(version) {
                    if resource.plural.contains('/') {
                        continue;
                    }

                    kinds
                        .entry(resource.kind.clone())
                        .or_insert((resource, capabilities));
                }
            }
        }

        debug!(kinds = kinds.len(), "Discovered api kinds from the cluster");

        Ok(Self { client, kinds })
    }

    /// Looks up a kind, logging a fuzzy-match hint and returning `None` when
    /// it was never surfaced by discovery (SPEC_FULL.md §7: "log error, skip
    /// that kind, continue").
    pub fn kind(&self, kind: &str) -> Option<&(ApiResource, ApiCapabilities)> {
        let found = self.kinds.get(kind);

        if found.is_none() {
            if let Some(hint) = self.fuzzy_match(kind) {
                warn!(
                    kind = kind,
                    hint = hint,
                    "Unknown kind referenced by template, did you mean this one?"
                );
            } else {
                warn!(kind = kind, "Unknown kind referenced by template");
            }
        }

        found
    }

    pub fn namespaced(&self, kind: &str) -> bool {
        self.kind(kind)
            .map(|(_, caps)| matches!(caps.scope, Scope::Namespaced))
            .unwrap_or(false)
    }

    /// Returns an [`Api<DynamicObject>`] for `kind`, scoped to `namespace`
    /// when the kind is namespaced and a namespace was given.
    pub fn api(&self, kind: &str, namespace: Option<&str>) -> Result<Api<DynamicObject>, Error> {
        let (resource, capabilities) = self
            .kind(kind)
            .ok_or_else(|| Error::UnknownKind(kind.to_string()))?;

        Ok(match (capabilities.scope.clone(), namespace) {
            (Scope::Namespaced, Some(ns)) => {
                Api::namespaced_with(self.client.clone(), ns, resource)
            }
            _ => Api::all_with(self.client.clone(), resource),
        })
    }

    fn fuzzy_match(&self, kind: &str) -> Option<&str> {
        let needle = kind.to_lowercase();

        self.kinds
            .keys()
            .map(String::as_str)
            .min_by_key(|candidate| levenshtein(&needle, &candidate.to_lowercase()))
    }
}

/// Small, dependency-free Levenshtein distance, used only to produce the
/// "did you mean" hint above.
fn levenshtein(a: &str, b: &str) -> usize {
    let (a, b): (Vec<char>, Vec<char>) = (a.chars().collect(), b.chars().collect());
    let mut row: Vec<usize> = (0..=b.len()).collect();

    for i in 1..=a.len() {
        let mut prev = row[0];
        row[0] = i;

        for j in 1..=b.len() {
            let tmp = row[j];
            row[j] = if a[i - 1] == b[j - 1] {
                prev
            } else {
                1 + prev.min(row[j]).min(row[j - 1])
            };
            prev = tmp;
        }
    }

    row[b.len()]
}
