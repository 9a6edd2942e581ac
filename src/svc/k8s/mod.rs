//! # Kubernetes module
//!
//! This module provides the kubernetes collaboration layer: client
//! construction, the API kind registry (SPEC_FULL.md §4.1), the watch
//! producer (§4.2) and the event type flowing through the rest of the
//! pipeline.

pub mod client;
pub mod event;
pub mod registry;
pub mod watcher;
