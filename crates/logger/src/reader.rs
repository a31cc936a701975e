//! Device read-state machine
//!
//! Keeps one interrupt transfer outstanding per device, decodes completed
//! reports and feeds them to the aggregator. Start failures park the device
//! in `FailedStart` and hold a fast-tick reference until a retry succeeds.

use crate::aggregator::{AggregationMode, Accumulator};
use crate::context::Context;
use crate::device::{Device, ReadState};
use crate::shutdown::Phase;
use crate::transport::{
    Completion, SubmitError, Submission, TransferStatus, Transport, TransportError,
};
use protocol::{TelemetryPacket, TopologyPath};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Why a device could not start reading
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    #[error("Could not allocate {size} byte read buffer")]
    BufferAlloc { size: usize },

    #[error("Could not allocate transfer: {0}")]
    TransferAlloc(TransportError),

    #[error("Could not submit transfer: {0}")]
    Submit(TransportError),
}

/// Allocate a zeroed receive buffer without aborting on allocation failure
fn allocate_buffer(size: usize) -> Result<Vec<u8>, StartError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(size)
        .map_err(|_| StartError::BufferAlloc { size })?;
    buffer.resize(size, 0);
    Ok(buffer)
}

/// Colon-separated hex dump of a transfer
fn hex_dump(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:x}:", b)).collect()
}

/// Lend the device's buffer to the transport with its transfer object
fn submit_transfer<T>(
    transport: &mut T,
    device: &mut Device<T::Handle>,
    timeout: Duration,
) -> Result<(), StartError>
where
    T: Transport,
{
    let transfer = match device.transfer {
        Some(transfer) => transfer,
        None => {
            let transfer = transport
                .alloc_transfer()
                .map_err(StartError::TransferAlloc)?;
            device.transfer = Some(transfer);
            transfer
        }
    };

    let buffer = match device.buffer.take() {
        Some(buffer) => buffer,
        None => allocate_buffer(usize::from(device.max_packet_size))?,
    };

    let submission = Submission {
        transfer,
        path: device.path.clone(),
        endpoint: device.endpoint,
        timeout,
        buffer,
    };

    match transport.submit(&device.handle, submission) {
        Ok(()) => Ok(()),
        Err(SubmitError {
            error: TransportError::Busy,
            buffer,
        }) => {
            // Already in flight; the outstanding transfer still counts
            device.buffer = Some(buffer);
            Ok(())
        }
        Err(SubmitError { error, buffer }) => {
            device.buffer = Some(buffer);
            Err(StartError::Submit(error))
        }
    }
}

impl<H> Context<H> {
    /// Make sure the device at `path` has a transfer outstanding
    ///
    /// Does nothing if the device is already running or the run is shutting down.
    pub fn start_reading<T>(&mut self, transport: &mut T, path: &TopologyPath) -> Result<(), StartError>
    where
        T: Transport<Handle = H>,
    {
        if self.shutdown.phase() != Phase::Running {
            return Ok(());
        }

        let timeout = self.options.transfer_timeout;
        let Some(device) = self.devices.get_mut(path) else {
            return Ok(());
        };
        if device.is_running() {
            return Ok(());
        }

        match submit_transfer(transport, device, timeout) {
            Ok(()) => {
                if device.read_state == ReadState::FailedStart {
                    info!("{} recovered, reading resumed", device);
                    self.fast_tick.release();
                }
                device.read_state = ReadState::Running;
                trace!("Transfer submitted for {}", device);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to start reading on {}: {}", device, e);
                if device.read_state != ReadState::FailedStart {
                    device.read_state = ReadState::FailedStart;
                    self.fast_tick.acquire();
                }
                Err(e)
            }
        }
    }

    /// Handle a finished transfer
    pub fn on_transfer_complete<T>(&mut self, transport: &mut T, completion: Completion)
    where
        T: Transport<Handle = H>,
    {
        let Completion {
            transfer,
            path,
            status,
            buffer,
            length,
        } = completion;

        let Some(device) = self.devices.get_mut(&path) else {
            debug!("Dropping completion for unregistered device at {}", path);
            return;
        };
        if device.transfer != Some(transfer) || !device.is_running() {
            debug!("Dropping stale completion for {}", device);
            return;
        }

        device.read_state = ReadState::Idle;
        device.buffer = Some(buffer);

        if device.cancel_pending {
            self.on_transfer_cancelled(transport, &path);
            return;
        }
        if device.target_reached {
            return;
        }

        match status {
            TransferStatus::Error | TransferStatus::TimedOut => {
                debug!(
                    "Previous transfer on {} failed ({:?}), resubmitting",
                    device, status
                );
                let _ = self.start_reading(transport, &path);
            }
            TransferStatus::Cancelled => {
                debug!("Transfer on {} was cancelled, not resubmitting", device);
            }
            TransferStatus::Stall | TransferStatus::NoDevice | TransferStatus::Overflow => {
                warn!("{} stopped working ({:?}), waiting for removal", device, status);
            }
            TransferStatus::Completed if length == 0 => {
                let _ = self.start_reading(transport, &path);
            }
            TransferStatus::Completed => {
                let data = device
                    .buffer
                    .as_deref()
                    .map(|b| &b[..length.min(b.len())])
                    .unwrap_or_default();

                if self.options.verbose {
                    info!("RAW {}: {}", device, hex_dump(data));
                }

                match TelemetryPacket::decode(data) {
                    Ok(packet) => {
                        if self.record_packet(&path, &packet) {
                            self.check_all_targets(transport);
                            return;
                        }
                    }
                    Err(e) => warn!("Dropping report from {}: {}", device, e),
                }

                let _ = self.start_reading(transport, &path);
            }
        }
    }

    /// Feed one report to the aggregator
    ///
    /// Returns true if the device just reached its packet target.
    fn record_packet(&mut self, path: &TopologyPath, packet: &TelemetryPacket) -> bool {
        let target = self.options.packet_target;
        let mode = self.options.mode;
        let Some(device) = self.devices.get_mut(path) else {
            return false;
        };

        match mode {
            AggregationMode::Windowed { .. } => {
                device
                    .accumulator
                    .get_or_insert_with(Accumulator::new)
                    .add(packet);
                false
            }
            AggregationMode::Immediate => {
                let mut one_shot = Accumulator::new();
                one_shot.add(packet);
                let Some(record) = one_shot.take_average(device.serial_str()) else {
                    return false;
                };

                device.packets += 1;
                let reached = target.is_some_and(|t| device.packets >= t);
                if reached {
                    info!("{} reached {} records", device, device.packets);
                    device.target_reached = true;
                }

                self.emit(&record);
                reached
            }
        }
    }
}
