//! # Event module
//!
//! This module provides the [`Event`] type published by a [`super::watcher`]
//! onto an [`crate::svc::bus`] channel and consumed by the cluster and
//! template consumers.

use serde_json::Value;

// -----------------------------------------------------------------------------
// EventType enum

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
    Error,
}

// -----------------------------------------------------------------------------
// Event structure

/// One decoded line of a kubernetes watch stream, or a synthetic `Error`
/// event raised when the stream itself breaks.
#[derive(Clone, Debug)]
pub struct Event {
    pub ty: EventType,
    pub object: Value,
}

impl Event {
    pub fn added(object: Value) -> Self {
        Self {
            ty: EventType::Added,
            object,
        }
    }

    pub fn modified(object: Value) -> Self {
        Self {
            ty: EventType::Modified,
            object,
        }
    }

    pub fn deleted(object: Value) -> Self {
        Self {
            ty: EventType::Deleted,
            object,
        }
    }

    /// Builds the synthetic `Error` event the watcher publishes internally
    /// to signal an `Expired` `resourceVersion`. Not forwarded downstream;
    /// kept as a type for symmetry with SPEC_FULL.md §3's `Event` definition.
    pub fn expired() -> Self {
        Self {
            ty: EventType::Error,
            object: serde_json::json!({"reason": "Expired"}),
        }
    }

    pub fn name(&self) -> Option<&str> {
        crate::svc::value::recursive_get_str(&self.object, "metadata.name")
    }

    pub fn resource_version(&self) -> Option<&str> {
        crate::svc::value::recursive_get_str(&self.object, "metadata.resourceVersion")
    }
}
