//! # Services module
//!
//! This module provides every service the operator is built from: the
//! kubernetes collaboration layer, the reconciliation pipeline (cluster tier,
//! template tier, aggregator, renderer, reconciler), and the ambient stack
//! (configuration, dynamic value helpers, dump facility, telemetry HTTP
//! surface).

pub mod aggregator;
pub mod bus;
pub mod cfg;
pub mod cluster;
pub mod crd;
pub mod dump;
pub mod http;
pub mod k8s;
pub mod reconciler;
pub mod renderer;
pub mod template;
pub mod value;
