//! USB transport seam
//!
//! The logger core never talks to libusb directly. Everything it needs from
//! the bus (descriptor scanning input, opening and claiming a device,
//! submitting and cancelling interrupt transfers, and the stream of hotplug
//! and completion events) goes through the [`Transport`] trait:
//! - [`usb::UsbTransport`] drives real hardware through rusb
//! - [`crate::test_utils::MockTransport`] scripts the same events in tests
//!
//! A submitted transfer owns its receive buffer until the transport hands it
//! back in a [`Completion`]. The core therefore cannot release a buffer the
//! transport may still write into.

pub mod usb;

use crate::event::Event;
use protocol::TopologyPath;
use std::time::Duration;
use thiserror::Error;

/// USB interface class code for HID
pub const CLASS_HID: u8 = 0x03;

/// Direction bit of an endpoint address (set = device to host)
pub const ENDPOINT_DIR_IN: u8 = 0x80;

/// Transport-neutral USB error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Entity not found")]
    NotFound,

    #[error("No such device (it may have been disconnected)")]
    NoDevice,

    #[error("Access denied (insufficient permissions)")]
    Access,

    #[error("Resource busy")]
    Busy,

    #[error("Operation timed out")]
    Timeout,

    #[error("System call interrupted")]
    Interrupted,

    #[error("Operation not supported on this platform")]
    NotSupported,

    #[error("Input/output error")]
    Io,

    #[error("{0}")]
    Other(String),
}

/// Endpoint transfer type, from bmAttributes bits 0..1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// Endpoint descriptor fields the logger cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub address: u8,
    pub transfer_type: EndpointType,
    pub max_packet_size: u16,
}

impl EndpointDescriptor {
    /// Check if this endpoint carries data from device to host
    pub fn is_input(&self) -> bool {
        self.address & ENDPOINT_DIR_IN != 0
    }
}

/// One alternate setting of an interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub alt_setting: u8,
    pub class_code: u8,
    pub endpoints: Vec<EndpointDescriptor>,
}

/// Active configuration: one entry per interface, each listing its alternate settings
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigDescriptor {
    pub interfaces: Vec<Vec<InterfaceDescriptor>>,
}

/// Identifier of a transfer object allocated by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub u64);

/// Completion status of an interrupt transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Data (possibly zero bytes) was received
    Completed,
    /// Transient transfer failure
    Error,
    /// No data within the transfer timeout
    TimedOut,
    /// Cancelled on request
    Cancelled,
    /// Endpoint halted
    Stall,
    /// Device went away while the transfer was in flight
    NoDevice,
    /// Device sent more data than requested
    Overflow,
}

/// A transfer handed to the transport
#[derive(Debug)]
pub struct Submission {
    pub transfer: TransferId,
    pub path: TopologyPath,
    pub endpoint: u8,
    pub timeout: Duration,
    pub buffer: Vec<u8>,
}

/// A finished transfer; gives the receive buffer back to its device
#[derive(Debug)]
pub struct Completion {
    pub transfer: TransferId,
    pub path: TopologyPath,
    pub status: TransferStatus,
    pub buffer: Vec<u8>,
    pub length: usize,
}

impl Completion {
    /// Bytes actually received
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.length.min(self.buffer.len())]
    }
}

/// Rejected submission; the buffer comes back with the error
#[derive(Debug, Error)]
#[error("{error}")]
pub struct SubmitError {
    pub error: TransportError,
    pub buffer: Vec<u8>,
}

/// Everything the logger core consumes from a USB stack
pub trait Transport {
    /// Device reference delivered with a hotplug arrival
    type Device;
    /// Open, claimed device handle
    type Handle;

    /// Wait up to `timeout` for hotplug notifications and transfer completions
    fn poll(&mut self, timeout: Duration) -> Result<Vec<Event<Self::Device>>, TransportError>;

    /// Expire transfers that have outstayed their timeout
    fn handle_timeouts(&mut self);

    /// Read the active configuration descriptor
    fn active_config(&self, device: &Self::Device) -> Result<ConfigDescriptor, TransportError>;

    /// Briefly open a device to read its serial number; `Ok(None)` if it has none
    fn read_serial(&self, device: &Self::Device) -> Result<Option<String>, TransportError>;

    /// Open the device, detach any kernel driver from `interface` and claim it
    ///
    /// On failure everything acquired so far has been released.
    fn open(&mut self, device: &Self::Device, interface: u8)
    -> Result<Self::Handle, TransportError>;

    /// Best-effort serial number read through an open handle
    fn serial_number(&self, device: &Self::Device, handle: &Self::Handle) -> Option<String>;

    /// Allocate a reusable transfer object
    fn alloc_transfer(&mut self) -> Result<TransferId, TransportError>;

    /// Submit an interrupt IN transfer
    ///
    /// [`TransportError::Busy`] means the transfer is already in flight.
    fn submit(&mut self, handle: &Self::Handle, submission: Submission)
    -> Result<(), SubmitError>;

    /// Request cancellation; the `Cancelled` completion arrives through [`Transport::poll`]
    ///
    /// [`TransportError::NotFound`] means the transfer already finished.
    fn cancel(&mut self, transfer: TransferId) -> Result<(), TransportError>;

    /// Release a transfer object
    fn free_transfer(&mut self, transfer: TransferId);

    /// Release `interface` and close the handle
    fn close(&mut self, handle: Self::Handle, interface: u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_direction() {
        let endpoint_in = EndpointDescriptor {
            address: 0x81,
            transfer_type: EndpointType::Interrupt,
            max_packet_size: 64,
        };
        assert!(endpoint_in.is_input());

        let endpoint_out = EndpointDescriptor {
            address: 0x01,
            ..endpoint_in
        };
        assert!(!endpoint_out.is_input());
    }

    #[test]
    fn test_completion_data_is_bounded() {
        let completion = Completion {
            transfer: TransferId(1),
            path: TopologyPath::new(1, vec![1]),
            status: TransferStatus::Completed,
            buffer: vec![1, 2, 3, 4],
            length: 2,
        };
        assert_eq!(completion.data(), &[1, 2]);

        let overlong = Completion {
            length: 10,
            ..completion
        };
        assert_eq!(overlong.data(), &[1, 2, 3, 4]);
    }
}
