//! # Template module
//!
//! This module implements SPEC_FULL.md §4.4/§4.5: per-template controller
//! (one consumer + one watcher per referenced kind) and the cooldown-gated
//! consumer driving fetch → aggregate → render → reconcile cycles.

pub mod consumer;
pub mod controller;
