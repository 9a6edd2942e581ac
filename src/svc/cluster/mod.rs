//! # Cluster module
//!
//! This module implements SPEC_FULL.md §4.3: the cluster-level controller
//! owning the `AlfaTemplate` watcher and the cluster consumer that
//! demultiplexes template lifecycle events into per-template sub-controllers.

pub mod consumer;
pub mod controller;
