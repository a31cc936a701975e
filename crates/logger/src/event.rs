//! Events delivered to the logger core
//!
//! The event loop turns hotplug notifications, transfer completions and
//! timer expiries into one [`Event`] stream. Events are handled one at a
//! time, run-to-completion, by [`crate::Context::dispatch`].

use crate::transport::Completion;
use protocol::TopologyPath;

/// Timers owned by the event loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    /// Transport timeout servicing, start retries and target checks
    Maintenance,
    /// End of an aggregation window
    Output,
    /// Fallback deadline while draining cancellations
    CancelDeadline,
}

/// One unit of work for the dispatch loop
#[derive(Debug)]
pub enum Event<D> {
    /// A matching device appeared at `path`
    HotplugArrived { path: TopologyPath, device: D },
    /// The device at `path` went away
    HotplugLeft { path: TopologyPath },
    /// A submitted transfer finished, in any state
    TransferCompleted(Completion),
    TimerFired(Timer),
}

impl<D> Event<D> {
    /// Topology path the event refers to, if any
    pub fn path(&self) -> Option<&TopologyPath> {
        match self {
            Event::HotplugArrived { path, .. } | Event::HotplugLeft { path } => Some(path),
            Event::TransferCompleted(completion) => Some(&completion.path),
            Event::TimerFired(_) => None,
        }
    }
}
