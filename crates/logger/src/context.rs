//! Logger context
//!
//! The [`Context`] owns every [`Device`] and all process-wide logger state.
//! It is passed by reference into each handler; there is no global state.
//! Handlers live next to the component they implement:
//! - hotplug and teardown in [`crate::registry`]
//! - transfer submission and completion in [`crate::reader`]
//! - cancellation and drain in [`crate::shutdown`]

use crate::aggregator::AggregationMode;
use crate::device::{Device, ReadState};
use crate::event::{Event, Timer};
use crate::output::RecordSink;
use crate::shutdown::{Phase, ShutdownReason, ShutdownState};
use crate::transport::Transport;
use protocol::{TelemetryRecord, TopologyPath};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, info};

/// Default per-transfer timeout
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_millis(5000);

/// Run options fixed at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Only log the device with this serial number
    pub serial_filter: Option<String>,
    /// Stop each device after this many emitted records
    pub packet_target: Option<u32>,
    pub mode: AggregationMode,
    /// Log the raw bytes of every completed transfer
    pub verbose: bool,
    pub transfer_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            serial_filter: None,
            packet_target: None,
            mode: AggregationMode::Immediate,
            verbose: false,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
        }
    }
}

/// Reference-counted request for a maintenance tick on every loop iteration
///
/// Each device in `FailedStart` holds one reference.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FastTick {
    count: u32,
}

impl FastTick {
    pub fn acquire(&mut self) {
        self.count += 1;
    }

    pub fn release(&mut self) {
        self.count = self.count.saturating_sub(1);
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_active(&self) -> bool {
        self.count > 0
    }
}

/// Process-wide logger state
pub struct Context<H> {
    pub(crate) options: Options,
    pub(crate) devices: BTreeMap<TopologyPath, Device<H>>,
    pub(crate) sink: Box<dyn RecordSink>,
    pub(crate) fast_tick: FastTick,
    pub(crate) shutdown: ShutdownState,
}

impl<H> Context<H> {
    pub fn new(options: Options, sink: Box<dyn RecordSink>) -> Self {
        Self {
            options,
            devices: BTreeMap::new(),
            sink,
            fast_tick: FastTick::default(),
            shutdown: ShutdownState::default(),
        }
    }

    /// Handle one event to completion
    pub fn dispatch<T>(&mut self, transport: &mut T, event: Event<T::Device>)
    where
        T: Transport<Handle = H>,
    {
        match event {
            Event::HotplugArrived { path, device } => {
                self.on_hotplug_arrived(transport, path, &device)
            }
            Event::HotplugLeft { path } => self.on_hotplug_left(transport, &path),
            Event::TransferCompleted(completion) => {
                self.on_transfer_complete(transport, completion)
            }
            Event::TimerFired(Timer::Maintenance) => self.on_maintenance_tick(transport),
            Event::TimerFired(Timer::Output) => self.on_output_tick(transport),
            Event::TimerFired(Timer::CancelDeadline) => self.force_stop(transport),
        }
    }

    /// Periodic housekeeping
    ///
    /// Services transport timeouts, retries devices stuck in `FailedStart`
    /// and stops the run once every device has reached its target.
    pub fn on_maintenance_tick<T>(&mut self, transport: &mut T)
    where
        T: Transport<Handle = H>,
    {
        transport.handle_timeouts();

        if self.shutdown.phase() != Phase::Running {
            return;
        }

        let failed: Vec<TopologyPath> = self
            .devices
            .values()
            .filter(|d| d.read_state == ReadState::FailedStart)
            .map(|d| d.path.clone())
            .collect();

        for path in failed {
            debug!("Retrying start of {}", path);
            // start_reading logs its own failures
            let _ = self.start_reading(transport, &path);
        }

        self.check_all_targets(transport);
    }

    /// End of an aggregation window: emit one averaged record per device
    pub fn on_output_tick<T>(&mut self, transport: &mut T)
    where
        T: Transport<Handle = H>,
    {
        if self.shutdown.phase() != Phase::Running {
            return;
        }

        let target = self.options.packet_target;
        let mut records = Vec::new();

        for device in self.devices.values_mut() {
            if device.target_reached {
                continue;
            }
            let serial = device.serial_str().to_string();
            let Some(record) = device
                .accumulator
                .as_mut()
                .and_then(|acc| acc.take_average(&serial))
            else {
                continue;
            };

            device.packets += 1;
            if target.is_some_and(|t| device.packets >= t) {
                info!("{} reached {} records", device, device.packets);
                device.target_reached = true;
            }
            records.push(record);
        }

        for record in &records {
            self.emit(record);
        }

        self.check_all_targets(transport);
    }

    /// Stop the run if a target is configured and every device has met it
    pub(crate) fn check_all_targets<T>(&mut self, transport: &mut T)
    where
        T: Transport<Handle = H>,
    {
        if self.all_targets_reached() {
            info!("All devices reached their packet target");
            self.request_shutdown(transport, ShutdownReason::TargetReached);
        }
    }

    pub(crate) fn emit(&mut self, record: &TelemetryRecord) {
        if let Err(e) = self.sink.emit(record) {
            error!("Failed to write record for {}: {}", record.serial, e);
        }
    }

    /// Whether a target is set, at least one device exists, and all have met it
    pub fn all_targets_reached(&self) -> bool {
        self.options.packet_target.is_some()
            && !self.devices.is_empty()
            && self.devices.values().all(|d| d.target_reached)
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn phase(&self) -> Phase {
        self.shutdown.phase()
    }

    pub fn shutdown_state(&self) -> &ShutdownState {
        &self.shutdown
    }

    /// Number of devices currently holding a fast-tick request
    pub fn fast_tick(&self) -> u32 {
        self.fast_tick.count()
    }

    pub fn device(&self, path: &TopologyPath) -> Option<&Device<H>> {
        self.devices.get(path)
    }

    /// Registered devices in topology order
    pub fn devices(&self) -> impl Iterator<Item = &Device<H>> {
        self.devices.values()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_tick_counts_references() {
        let mut tick = FastTick::default();
        assert!(!tick.is_active());

        tick.acquire();
        tick.acquire();
        assert_eq!(tick.count(), 2);

        tick.release();
        assert!(tick.is_active());
        tick.release();
        assert!(!tick.is_active());

        tick.release();
        assert_eq!(tick.count(), 0);
    }

    #[test]
    fn test_default_options() {
        let options = Options::default();
        assert_eq!(options.mode, AggregationMode::Immediate);
        assert_eq!(options.packet_target, None);
        assert_eq!(options.transfer_timeout, DEFAULT_TRANSFER_TIMEOUT);
    }
}
