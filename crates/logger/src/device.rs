//! Per-device state
//!
//! A [`Device`] exists for every attached, filter-matching PortPilot and is
//! owned by the registry in [`crate::Context`].

use crate::aggregator::Accumulator;
use crate::transport::TransferId;
use protocol::TopologyPath;
use std::fmt;

/// Read state of a device
///
/// `Running` holds exactly while one transfer is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadState {
    /// No transfer outstanding (before the first submit, or between completion and resubmit)
    #[default]
    Idle,
    /// One transfer is outstanding
    Running,
    /// Buffer or transfer allocation, or submission, failed; retried by the maintenance tick
    FailedStart,
}

/// An attached PortPilot with its interface claimed
#[derive(Debug)]
pub struct Device<H> {
    pub path: TopologyPath,
    pub handle: H,
    /// Claimed HID interface number
    pub interface: u8,
    /// Interrupt IN endpoint address
    pub endpoint: u8,
    pub max_packet_size: u16,
    /// Best-effort; `None` if the string descriptor could not be read
    pub serial: Option<String>,
    pub read_state: ReadState,
    /// Receive buffer, `None` while it is lent to the transport
    pub buffer: Option<Vec<u8>>,
    /// Transfer object, allocated once and reused
    pub transfer: Option<TransferId>,
    /// Present in windowed mode
    pub accumulator: Option<Accumulator>,
    /// Reports (immediate mode) or windows (windowed mode) emitted
    pub packets: u32,
    pub target_reached: bool,
    /// A cancel request is outstanding during shutdown
    pub cancel_pending: bool,
}

impl<H> Device<H> {
    pub fn new(
        path: TopologyPath,
        handle: H,
        interface: u8,
        endpoint: u8,
        max_packet_size: u16,
        serial: Option<String>,
    ) -> Self {
        Self {
            path,
            handle,
            interface,
            endpoint,
            max_packet_size,
            serial,
            read_state: ReadState::Idle,
            buffer: None,
            transfer: None,
            accumulator: None,
            packets: 0,
            target_reached: false,
            cancel_pending: false,
        }
    }

    /// Serial number for output rows, empty if unknown
    pub fn serial_str(&self) -> &str {
        self.serial.as_deref().unwrap_or("")
    }

    pub fn is_running(&self) -> bool {
        self.read_state == ReadState::Running
    }
}

impl<H> fmt::Display for Device<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.serial {
            Some(serial) => write!(f, "{} ({})", serial, self.path),
            None => write!(f, "<no serial> ({})", self.path),
        }
    }
}
