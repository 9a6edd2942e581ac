//! # Bus module
//!
//! This module provides the bounded event channel shared by every watcher
//! feeding into one consumer (SPEC_FULL.md §5: "All tasks in one template
//! controller share one bounded FIFO channel; the cluster controller has its
//! own channel").

use tokio::sync::mpsc;

use crate::svc::k8s::event::Event;

/// Channel capacity applies back-pressure to watchers on the producer side
/// so a slow consumer cannot cause unbounded memory growth.
pub const CAPACITY: usize = 256;

pub type Sender = mpsc::Sender<Event>;
pub type Receiver = mpsc::Receiver<Event>;

pub fn channel() -> (Sender, Receiver) {
    mpsc::channel(CAPACITY)
}
