//! Shutdown sequencer
//!
//! Transfer cancellation is asynchronous: a cancelled transfer still
//! completes later, and until it does the transport owns its buffer. A stop
//! request therefore moves the run from `Running` to `Draining`, where it
//! waits for every requested cancellation to be observed, and only then to
//! `Stopped`. The event loop bounds the drain with a fallback deadline that
//! ends in [`Context::force_stop`].

use crate::context::Context;
use crate::transport::{Transport, TransportError};
use protocol::TopologyPath;
use tracing::{debug, info, warn};

/// Lifecycle of the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Running,
    /// Waiting for cancelled transfers to complete
    Draining,
    Stopped,
}

/// Why the run is stopping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Every device reached its packet target
    TargetReached,
    /// Stop requested from outside (signal)
    External,
}

/// Bookkeeping for the two-phase stop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownState {
    phase: Phase,
    reason: Option<ShutdownReason>,
    cancels_required: usize,
    cancels_observed: usize,
    forced: bool,
}

impl ShutdownState {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason
    }

    /// Devices that needed their cancellation observed
    pub fn cancels_required(&self) -> usize {
        self.cancels_required
    }

    pub fn cancels_observed(&self) -> usize {
        self.cancels_observed
    }

    /// Whether the fallback deadline ended the drain
    pub fn forced(&self) -> bool {
        self.forced
    }

    fn drained(&self) -> bool {
        self.cancels_observed >= self.cancels_required
    }
}

impl<H> Context<H> {
    /// Begin stopping the run
    ///
    /// Cancels every outstanding transfer. Devices with nothing in flight,
    /// or whose transfer already finished, are torn down immediately. Only
    /// the first call has any effect.
    pub fn request_shutdown<T>(&mut self, transport: &mut T, reason: ShutdownReason)
    where
        T: Transport<Handle = H>,
    {
        if self.shutdown.phase != Phase::Running {
            debug!("Shutdown already in progress ({:?})", self.shutdown.phase);
            return;
        }

        info!(
            "Stopping ({:?}), cancelling transfers on {} device(s)",
            reason,
            self.devices.len()
        );
        self.shutdown.phase = Phase::Draining;
        self.shutdown.reason = Some(reason);

        let paths: Vec<TopologyPath> = self.devices.keys().cloned().collect();
        for path in paths {
            let Some(device) = self.devices.get_mut(&path) else {
                continue;
            };

            let transfer = match device.transfer {
                Some(transfer) if device.is_running() => transfer,
                _ => {
                    self.teardown_device(transport, &path);
                    continue;
                }
            };

            match transport.cancel(transfer) {
                Ok(()) => {
                    debug!("Cancel requested for {}", device);
                    device.cancel_pending = true;
                    self.shutdown.cancels_required += 1;
                }
                Err(TransportError::NotFound) => {
                    debug!("Transfer on {} already finished", device);
                    self.teardown_device(transport, &path);
                }
                Err(e) => {
                    warn!("Failed to cancel transfer on {}: {}", device, e);
                    self.teardown_device(transport, &path);
                }
            }
        }

        if self.shutdown.drained() {
            self.finish(transport);
        } else {
            info!(
                "Waiting for {} cancellation(s)",
                self.shutdown.cancels_required
            );
        }
    }

    /// A cancel-pending device finished its transfer or went away
    pub(crate) fn on_transfer_cancelled<T>(&mut self, transport: &mut T, path: &TopologyPath)
    where
        T: Transport<Handle = H>,
    {
        let Some(device) = self.devices.get_mut(path) else {
            return;
        };
        if !device.cancel_pending {
            return;
        }
        device.cancel_pending = false;
        self.shutdown.cancels_observed += 1;
        debug!(
            "Cancellation observed for {} ({}/{})",
            device, self.shutdown.cancels_observed, self.shutdown.cancels_required
        );
        self.teardown_device(transport, path);

        if self.shutdown.phase == Phase::Draining && self.shutdown.drained() {
            self.finish(transport);
        }
    }

    /// Fallback deadline: stop without waiting for the remaining cancellations
    pub fn force_stop<T>(&mut self, transport: &mut T)
    where
        T: Transport<Handle = H>,
    {
        if self.shutdown.phase != Phase::Draining {
            return;
        }

        warn!(
            "Cancellation deadline passed with {} of {} outstanding, forcing stop",
            self.shutdown
                .cancels_required
                .saturating_sub(self.shutdown.cancels_observed),
            self.shutdown.cancels_required
        );
        self.shutdown.forced = true;
        self.finish(transport);
    }

    /// Release every remaining device and mark the run stopped
    fn finish<T>(&mut self, transport: &mut T)
    where
        T: Transport<Handle = H>,
    {
        let paths: Vec<TopologyPath> = self.devices.keys().cloned().collect();
        for path in paths {
            self.teardown_device(transport, &path);
        }
        self.shutdown.phase = Phase::Stopped;
        info!("All devices released");
    }
}
