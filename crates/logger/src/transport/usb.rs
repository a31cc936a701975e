//! rusb-backed transport
//!
//! Hotplug notifications for PortPilot devices arrive through libusb's
//! hotplug callback, which only queues them on a notification channel; the
//! dispatch loop picks them up on the next [`Transport::poll`].
//!
//! Interrupt transfers are serviced by polling: every in-flight transfer is
//! read with a short timeout during `poll`, so a report is picked up within
//! one poll slice of arriving. Transfer timeouts and cancellations complete
//! through the same queue as data, never synchronously.

use super::{
    Completion, ConfigDescriptor, EndpointDescriptor, EndpointType, InterfaceDescriptor,
    SubmitError, Submission, TransferId, TransferStatus, Transport, TransportError,
};
use crate::event::Event;
use common::{NotificationReceiver, NotificationSender, notification_channel};
use protocol::{PORTPILOT_PRODUCT_ID, PORTPILOT_VENDOR_ID, TopologyPath};
use rusb::{Context, Device, DeviceHandle, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Shortest read attempt; libusb treats a zero timeout as "wait forever"
const MIN_READ_SLICE: Duration = Duration::from_millis(1);

impl From<rusb::Error> for TransportError {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::NotFound => TransportError::NotFound,
            rusb::Error::NoDevice => TransportError::NoDevice,
            rusb::Error::Access => TransportError::Access,
            rusb::Error::Busy => TransportError::Busy,
            rusb::Error::Timeout => TransportError::Timeout,
            rusb::Error::Interrupted => TransportError::Interrupted,
            rusb::Error::NotSupported => TransportError::NotSupported,
            rusb::Error::Io => TransportError::Io,
            _ => TransportError::Other(err.to_string()),
        }
    }
}

/// Topology path of a device: bus number plus port chain
pub fn topology_path<T: UsbContext>(device: &Device<T>) -> TopologyPath {
    let ports = device.port_numbers().unwrap_or_else(|e| {
        debug!(
            "Could not read port numbers for bus {} address {}: {}",
            device.bus_number(),
            device.address(),
            e
        );
        vec![device.address()]
    });
    TopologyPath::new(device.bus_number(), ports)
}

/// Hotplug notification queued by the libusb callback
#[derive(Debug)]
enum HotplugNotice {
    Arrived(Device<Context>),
    Left(Device<Context>),
}

/// Forwards hotplug callbacks onto the notification channel
struct HotplugForwarder {
    tx: NotificationSender<HotplugNotice>,
}

impl Hotplug<Context> for HotplugForwarder {
    fn device_arrived(&mut self, device: Device<Context>) {
        trace!(
            "Hot-plug callback: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        if let Err(e) = self.tx.notify(HotplugNotice::Arrived(device)) {
            warn!("Dropped hotplug arrival: {}", e);
        }
    }

    fn device_left(&mut self, device: Device<Context>) {
        trace!(
            "Hot-plug callback: device left (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        if let Err(e) = self.tx.notify(HotplugNotice::Left(device)) {
            warn!("Dropped hotplug removal: {}", e);
        }
    }
}

/// Open, claimed PortPilot
pub struct UsbHandle {
    handle: Rc<DeviceHandle<Context>>,
}

/// A transfer the transport currently owns
struct PendingTransfer {
    handle: Rc<DeviceHandle<Context>>,
    submission: Submission,
    deadline: Instant,
    cancelled: bool,
}

/// Attached PortPilot, as listed by `--list-devices`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedDevice {
    pub path: TopologyPath,
    pub serial: Option<String>,
}

/// Transport over libusb
pub struct UsbTransport {
    context: Context,
    _registration: Option<Registration<Context>>,
    hotplug: NotificationReceiver<HotplugNotice>,
    /// Allocated transfer objects; `Some` while submitted
    transfers: BTreeMap<TransferId, Option<PendingTransfer>>,
    completed: VecDeque<Completion>,
    next_transfer: u64,
}

impl UsbTransport {
    /// Initialize libusb and register for PortPilot hotplug events
    ///
    /// Devices already attached are reported as arrivals on the first poll.
    pub fn new() -> Result<Self, TransportError> {
        if !rusb::has_hotplug() {
            return Err(TransportError::NotSupported);
        }

        let context = Context::new()?;
        let (tx, rx) = notification_channel();

        let registration = HotplugBuilder::new()
            .vendor_id(PORTPILOT_VENDOR_ID)
            .product_id(PORTPILOT_PRODUCT_ID)
            .enumerate(true)
            .register(&context, Box::new(HotplugForwarder { tx }))?;
        debug!("Hot-plug callbacks registered");

        Ok(Self {
            context,
            _registration: Some(registration),
            hotplug: rx,
            transfers: BTreeMap::new(),
            completed: VecDeque::new(),
            next_transfer: 0,
        })
    }

    /// Enumerate attached PortPilots without registering any callbacks
    pub fn list_devices() -> Result<Vec<ListedDevice>, TransportError> {
        let context = Context::new()?;
        let mut listed = Vec::new();

        for device in context.devices()?.iter() {
            let Ok(desc) = device.device_descriptor() else {
                continue;
            };
            if desc.vendor_id() != PORTPILOT_VENDOR_ID || desc.product_id() != PORTPILOT_PRODUCT_ID
            {
                continue;
            }

            let serial = read_serial_number(&device).unwrap_or_else(|e| {
                debug!("Could not read serial number: {}", e);
                None
            });
            listed.push(ListedDevice {
                path: topology_path(&device),
                serial,
            });
        }

        listed.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(listed)
    }

    /// Move queued hotplug notices into `events`
    fn drain_hotplug(&self, events: &mut Vec<Event<Device<Context>>>) {
        for notice in self.hotplug.drain() {
            events.push(match notice {
                HotplugNotice::Arrived(device) => Event::HotplugArrived {
                    path: topology_path(&device),
                    device,
                },
                HotplugNotice::Left(device) => Event::HotplugLeft {
                    path: topology_path(&device),
                },
            });
        }
    }

    /// Try one short read on every in-flight transfer
    fn service_transfers(&mut self, budget: Duration) {
        let active = self
            .transfers
            .values()
            .filter(|slot| slot.is_some())
            .count()
            .max(1);
        let slice = (budget / active as u32).max(MIN_READ_SLICE);

        for slot in self.transfers.values_mut() {
            let Some(pending) = slot.as_mut() else {
                continue;
            };

            let status = if pending.cancelled {
                Some((TransferStatus::Cancelled, 0))
            } else {
                let endpoint = pending.submission.endpoint;
                match pending
                    .handle
                    .read_interrupt(endpoint, &mut pending.submission.buffer, slice)
                {
                    Ok(length) => Some((TransferStatus::Completed, length)),
                    Err(rusb::Error::Timeout) => None,
                    Err(rusb::Error::NoDevice) => Some((TransferStatus::NoDevice, 0)),
                    Err(rusb::Error::Pipe) => Some((TransferStatus::Stall, 0)),
                    Err(rusb::Error::Overflow) => Some((TransferStatus::Overflow, 0)),
                    Err(e) => {
                        debug!(
                            "Interrupt read on {} failed: {}",
                            pending.submission.path, e
                        );
                        Some((TransferStatus::Error, 0))
                    }
                }
            };

            if let Some((status, length)) = status {
                if let Some(pending) = slot.take() {
                    self.completed.push_back(complete(pending, status, length));
                }
            }
        }
    }
}

/// Turn a finished transfer into a completion, handing back its buffer
fn complete(pending: PendingTransfer, status: TransferStatus, length: usize) -> Completion {
    let Submission {
        transfer,
        path,
        buffer,
        ..
    } = pending.submission;

    Completion {
        transfer,
        path,
        status,
        buffer,
        length,
    }
}

/// Open a device just long enough to read its serial number
fn read_serial_number<T: UsbContext>(device: &Device<T>) -> Result<Option<String>, TransportError> {
    let desc = device.device_descriptor()?;
    if desc.serial_number_string_index().is_none() {
        return Ok(None);
    }
    let handle = device.open()?;
    Ok(Some(handle.read_serial_number_string_ascii(&desc)?))
}

fn endpoint_type(transfer_type: rusb::TransferType) -> EndpointType {
    match transfer_type {
        rusb::TransferType::Control => EndpointType::Control,
        rusb::TransferType::Isochronous => EndpointType::Isochronous,
        rusb::TransferType::Bulk => EndpointType::Bulk,
        rusb::TransferType::Interrupt => EndpointType::Interrupt,
    }
}

impl Transport for UsbTransport {
    type Device = Device<Context>;
    type Handle = UsbHandle;

    fn poll(&mut self, timeout: Duration) -> Result<Vec<Event<Self::Device>>, TransportError> {
        self.context.handle_events(Some(Duration::ZERO))?;

        let mut events = Vec::new();
        self.drain_hotplug(&mut events);

        if self.transfers.values().any(|slot| slot.is_some()) {
            self.service_transfers(timeout);
        } else if events.is_empty() {
            // Nothing to read; wait for hotplug activity instead
            self.context
                .handle_events(Some(timeout.max(MIN_READ_SLICE)))?;
            self.drain_hotplug(&mut events);
        }

        events.extend(self.completed.drain(..).map(Event::TransferCompleted));
        Ok(events)
    }

    fn handle_timeouts(&mut self) {
        let now = Instant::now();
        for slot in self.transfers.values_mut() {
            let expired = slot
                .as_ref()
                .is_some_and(|p| !p.cancelled && now >= p.deadline);
            if expired {
                if let Some(pending) = slot.take() {
                    trace!("Transfer on {} timed out", pending.submission.path);
                    self.completed
                        .push_back(complete(pending, TransferStatus::TimedOut, 0));
                }
            }
        }
    }

    fn active_config(&self, device: &Self::Device) -> Result<ConfigDescriptor, TransportError> {
        let config = device.active_config_descriptor()?;

        let interfaces = config
            .interfaces()
            .map(|interface| {
                interface
                    .descriptors()
                    .map(|alt| InterfaceDescriptor {
                        number: alt.interface_number(),
                        alt_setting: alt.setting_number(),
                        class_code: alt.class_code(),
                        endpoints: alt
                            .endpoint_descriptors()
                            .map(|ep| EndpointDescriptor {
                                address: ep.address(),
                                transfer_type: endpoint_type(ep.transfer_type()),
                                max_packet_size: ep.max_packet_size(),
                            })
                            .collect(),
                    })
                    .collect()
            })
            .collect();

        Ok(ConfigDescriptor { interfaces })
    }

    fn read_serial(&self, device: &Self::Device) -> Result<Option<String>, TransportError> {
        read_serial_number(device)
    }

    fn open(&mut self, device: &Self::Device, interface: u8) -> Result<UsbHandle, TransportError> {
        let handle = device.open()?;

        match handle.kernel_driver_active(interface) {
            Ok(true) => {
                debug!("Detaching kernel driver from interface {}", interface);
                handle.detach_kernel_driver(interface)?;
            }
            Ok(false) => {}
            Err(e) => debug!(
                "Could not check kernel driver status for interface {}: {}",
                interface, e
            ),
        }

        if let Err(e) = handle.claim_interface(interface) {
            if let Err(e) = handle.attach_kernel_driver(interface) {
                debug!("Could not reattach kernel driver to interface {}: {}", interface, e);
            }
            return Err(e.into());
        }

        Ok(UsbHandle {
            handle: Rc::new(handle),
        })
    }

    fn serial_number(&self, device: &Self::Device, handle: &UsbHandle) -> Option<String> {
        let desc = device.device_descriptor().ok()?;
        handle.handle.read_serial_number_string_ascii(&desc).ok()
    }

    fn alloc_transfer(&mut self) -> Result<TransferId, TransportError> {
        self.next_transfer += 1;
        let id = TransferId(self.next_transfer);
        self.transfers.insert(id, None);
        Ok(id)
    }

    fn submit(&mut self, handle: &UsbHandle, submission: Submission) -> Result<(), SubmitError> {
        let Some(slot) = self.transfers.get_mut(&submission.transfer) else {
            return Err(SubmitError {
                error: TransportError::NotFound,
                buffer: submission.buffer,
            });
        };
        if slot.is_some() {
            return Err(SubmitError {
                error: TransportError::Busy,
                buffer: submission.buffer,
            });
        }

        *slot = Some(PendingTransfer {
            handle: Rc::clone(&handle.handle),
            deadline: Instant::now() + submission.timeout,
            cancelled: false,
            submission,
        });
        Ok(())
    }

    fn cancel(&mut self, transfer: TransferId) -> Result<(), TransportError> {
        match self.transfers.get_mut(&transfer) {
            Some(Some(pending)) => {
                pending.cancelled = true;
                Ok(())
            }
            _ => Err(TransportError::NotFound),
        }
    }

    fn free_transfer(&mut self, transfer: TransferId) {
        self.transfers.remove(&transfer);
    }

    fn close(&mut self, handle: UsbHandle, interface: u8) {
        if let Err(e) = handle.handle.release_interface(interface) {
            debug!("Failed to release interface {}: {}", interface, e);
        }
        if let Err(e) = handle.handle.attach_kernel_driver(interface) {
            debug!(
                "Could not reattach kernel driver to interface {} (may not have been detached): {}",
                interface, e
            );
        }
    }
}
