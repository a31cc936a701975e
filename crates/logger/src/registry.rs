//! Device registry and hotplug handling
//!
//! Devices are keyed by topology path. An arrival runs the whole creation
//! sequence (serial filter, descriptor scan, open and claim) and registers
//! the device only if every step succeeds. A departure tears the device down.

use crate::context::Context;
use crate::device::{Device, ReadState};
use crate::shutdown::Phase;
use crate::transport::{
    CLASS_HID, ConfigDescriptor, EndpointDescriptor, EndpointType, InterfaceDescriptor, Transport,
};
use protocol::TopologyPath;
use tracing::{debug, info, warn};

/// First alternate setting with the HID interface class
pub fn find_hid_interface(config: &ConfigDescriptor) -> Option<&InterfaceDescriptor> {
    config
        .interfaces
        .iter()
        .flatten()
        .find(|alt| alt.class_code == CLASS_HID)
}

/// First interrupt IN endpoint of an interface
pub fn find_input_endpoint(interface: &InterfaceDescriptor) -> Option<&EndpointDescriptor> {
    interface
        .endpoints
        .iter()
        .find(|ep| ep.transfer_type == EndpointType::Interrupt && ep.is_input())
}

impl<H> Context<H> {
    /// Create and start a device for a hotplug arrival
    ///
    /// Any failure abandons the device; the run continues.
    pub fn on_hotplug_arrived<T>(&mut self, transport: &mut T, path: TopologyPath, device: &T::Device)
    where
        T: Transport<Handle = H>,
    {
        if self.shutdown.phase() != Phase::Running {
            info!("Ignoring device at {}: shutting down", path);
            return;
        }

        if self.devices.contains_key(&path) {
            warn!(
                "Inconsistent state: device at {} arrived but is already registered",
                path
            );
            return;
        }

        if let Some(wanted) = self.options.serial_filter.as_deref() {
            match transport.read_serial(device) {
                Ok(Some(serial)) if serial == wanted => {}
                Ok(Some(serial)) => {
                    debug!("Ignoring device {} at {}: serial filter", serial, path);
                    return;
                }
                Ok(None) => {
                    debug!("Ignoring device at {}: no serial number", path);
                    return;
                }
                Err(e) => {
                    warn!("Failed to read serial number of device at {}: {}", path, e);
                    return;
                }
            }
        }

        let config = match transport.active_config(device) {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to get config descriptor for {}: {}", path, e);
                return;
            }
        };

        let Some(interface) = find_hid_interface(&config) else {
            warn!("No HID interface on device at {}", path);
            return;
        };
        let Some(endpoint) = find_input_endpoint(interface) else {
            warn!("No interrupt IN endpoint on device at {}", path);
            return;
        };

        let interface_number = interface.number;
        let endpoint_address = endpoint.address;
        let max_packet_size = endpoint.max_packet_size;

        let handle = match transport.open(device, interface_number) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(
                    "Failed to open device at {} (interface {}): {}",
                    path, interface_number, e
                );
                return;
            }
        };

        let serial = transport.serial_number(device, &handle);
        if serial.is_none() {
            warn!("Failed to get serial number of device at {}", path);
        }

        let device = Device::new(
            path.clone(),
            handle,
            interface_number,
            endpoint_address,
            max_packet_size,
            serial,
        );
        info!(
            "Ready to start reading on device {} (interface {}, endpoint {:#04x}, {} byte packets)",
            device, interface_number, endpoint_address, max_packet_size
        );
        self.devices.insert(path.clone(), device);

        // start_reading logs and arms the retry on failure
        let _ = self.start_reading(transport, &path);
    }

    /// Tear down the device that left `path`
    pub fn on_hotplug_left<T>(&mut self, transport: &mut T, path: &TopologyPath)
    where
        T: Transport<Handle = H>,
    {
        let Some(device) = self.devices.get(path) else {
            warn!(
                "Inconsistent state: device at {} left but is not registered",
                path
            );
            return;
        };

        if device.cancel_pending {
            info!("{} removed while its transfer was being cancelled", device);
            self.on_transfer_cancelled(transport, path);
            return;
        }

        info!("Will remove device {}", device);
        self.teardown_device(transport, path);

        if self.shutdown.phase() == Phase::Running {
            self.check_all_targets(transport);
        }
    }

    /// Release everything a device holds and drop it from the registry
    pub(crate) fn teardown_device<T>(&mut self, transport: &mut T, path: &TopologyPath)
    where
        T: Transport<Handle = H>,
    {
        let Some(device) = self.devices.remove(path) else {
            return;
        };

        if device.read_state == ReadState::FailedStart {
            self.fast_tick.release();
        }
        if let Some(transfer) = device.transfer {
            transport.free_transfer(transfer);
        }
        debug!(
            "Released {} after {} records",
            device, device.packets
        );
        transport.close(device.handle, device.interface);
    }
}
