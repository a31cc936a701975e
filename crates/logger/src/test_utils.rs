//! Test utilities for the logger
//!
//! A scripted [`MockTransport`] that plays the part of the USB stack, and a
//! [`RecordingSink`] that keeps every emitted record.
//!
//! # Example
//!
//! ```
//! use logger::test_utils::{MockDevice, MockTransport, RecordingSink, path};
//! use logger::{Context, Options};
//!
//! let sink = RecordingSink::default();
//! let mut ctx = Context::new(Options::default(), Box::new(sink.clone()));
//! let mut usb = MockTransport::new();
//!
//! usb.arrive(path(1, &[2]), MockDevice::portpilot("ABC123"));
//! usb.pump(&mut ctx);
//!
//! assert_eq!(ctx.device_count(), 1);
//! assert!(usb.is_in_flight(&path(1, &[2])));
//! ```

use crate::context::Context;
use crate::event::Event;
use crate::output::RecordSink;
use crate::transport::{
    CLASS_HID, Completion, ConfigDescriptor, EndpointDescriptor, EndpointType,
    InterfaceDescriptor, SubmitError, Submission, TransferId, TransferStatus, Transport,
    TransportError,
};
use protocol::{TelemetryPacket, TelemetryRecord, TopologyPath};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io;
use std::rc::Rc;
use std::time::Duration;

/// Interrupt IN endpoint address of the mock PortPilot
pub const MOCK_ENDPOINT: u8 = 0x81;

/// Max packet size of the mock PortPilot endpoint
pub const MOCK_PACKET_SIZE: u16 = 64;

/// Shorthand for a topology path
pub fn path(bus: u8, ports: &[u8]) -> TopologyPath {
    TopologyPath::new(bus, ports.to_vec())
}

/// Active configuration of a PortPilot: one HID interface with one interrupt IN endpoint
pub fn portpilot_config() -> ConfigDescriptor {
    ConfigDescriptor {
        interfaces: vec![vec![InterfaceDescriptor {
            number: 0,
            alt_setting: 0,
            class_code: CLASS_HID,
            endpoints: vec![EndpointDescriptor {
                address: MOCK_ENDPOINT,
                transfer_type: EndpointType::Interrupt,
                max_packet_size: MOCK_PACKET_SIZE,
            }],
        }]],
    }
}

/// Report with the values used throughout the tests
///
/// Decodes to |v_in| 5000 mV, |v_out| 5000 mV, |current| 200 mA,
/// max current 300 mA, |power| 1000 mW and 2000 mWh.
pub fn scenario_packet(timestamp: u32) -> TelemetryPacket {
    TelemetryPacket {
        timestamp,
        v_in: -5000,
        v_out: 5000,
        current: -200,
        max_current: 300,
        total_energy: 7_200_000,
        status_flags: 0,
        power: -1000,
    }
}

/// Encoded report, as the device would deliver it
pub fn report_bytes(packet: &TelemetryPacket) -> Vec<u8> {
    packet.encode().to_vec()
}

/// A device as seen in a hotplug notification
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub serial: Option<String>,
    pub config: ConfigDescriptor,
    /// Reading the serial number for filtering fails
    pub serial_error: bool,
    /// Reading the active configuration fails
    pub config_error: bool,
    /// Opening or claiming fails with this error
    pub open_error: Option<TransportError>,
}

impl MockDevice {
    /// A well-formed PortPilot
    pub fn portpilot(serial: &str) -> Self {
        Self {
            serial: Some(serial.to_string()),
            config: portpilot_config(),
            serial_error: false,
            config_error: false,
            open_error: None,
        }
    }

    /// A device with the given configuration and no serial number
    pub fn with_config(config: ConfigDescriptor) -> Self {
        Self {
            serial: None,
            config,
            serial_error: false,
            config_error: false,
            open_error: None,
        }
    }
}

/// Open handle to a [`MockDevice`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockHandle {
    pub serial: Option<String>,
    pub interface: u8,
}

/// Scripted transport
///
/// Events pushed with [`MockTransport::push`] (or the `arrive`/`leave`
/// helpers) are returned by the next `poll`. Submitted transfers stay in
/// flight until the test completes them with [`MockTransport::complete`],
/// or until `auto_report` answers them on the next `poll`.
#[derive(Debug, Default)]
pub struct MockTransport {
    events: VecDeque<Event<MockDevice>>,
    in_flight: BTreeMap<TransferId, Submission>,
    allocated: BTreeSet<TransferId>,
    next_transfer: u64,

    /// Fail this many upcoming `alloc_transfer` calls
    pub alloc_failures: usize,
    /// Errors returned by upcoming `submit` calls, in order
    pub submit_failures: VecDeque<TransportError>,
    /// Error returned by every `cancel` call instead of cancelling
    pub cancel_error: Option<TransportError>,
    /// Queue a `Cancelled` completion as soon as a cancel is accepted
    pub complete_cancels: bool,
    /// Answer every in-flight transfer with these bytes on each `poll`
    pub auto_report: Option<Vec<u8>>,

    /// Number of accepted submissions
    pub submissions: usize,
    pub cancelled: Vec<TransferId>,
    pub freed: Vec<TransferId>,
    pub opened: Vec<u8>,
    pub closed: Vec<MockHandle>,
    pub timeout_checks: usize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            complete_cancels: true,
            ..Default::default()
        }
    }

    pub fn push(&mut self, event: Event<MockDevice>) {
        self.events.push_back(event);
    }

    pub fn arrive(&mut self, path: TopologyPath, device: MockDevice) {
        self.push(Event::HotplugArrived { path, device });
    }

    pub fn leave(&mut self, path: TopologyPath) {
        self.push(Event::HotplugLeft { path });
    }

    /// Dispatch queued events into `ctx` until none are left
    pub fn pump(&mut self, ctx: &mut Context<MockHandle>) {
        while let Some(event) = self.events.pop_front() {
            ctx.dispatch(self, event);
        }
    }

    /// Finish the in-flight transfer for `path`, copying `data` into its buffer
    pub fn complete(
        &mut self,
        path: &TopologyPath,
        status: TransferStatus,
        data: &[u8],
    ) -> Option<Completion> {
        let transfer = self.transfer_for(path)?;
        let submission = self.in_flight.remove(&transfer)?;
        Some(Self::finish(submission, status, data))
    }

    /// Complete the in-flight transfer for `path` and dispatch the completion
    pub fn deliver(
        &mut self,
        ctx: &mut Context<MockHandle>,
        path: &TopologyPath,
        status: TransferStatus,
        data: &[u8],
    ) -> bool {
        match self.complete(path, status, data) {
            Some(completion) => {
                ctx.dispatch(self, Event::TransferCompleted(completion));
                true
            }
            None => false,
        }
    }

    pub fn is_in_flight(&self, path: &TopologyPath) -> bool {
        self.transfer_for(path).is_some()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Transfer objects allocated and not yet freed
    pub fn allocated_count(&self) -> usize {
        self.allocated.len()
    }

    fn transfer_for(&self, path: &TopologyPath) -> Option<TransferId> {
        self.in_flight
            .iter()
            .find(|(_, s)| &s.path == path)
            .map(|(id, _)| *id)
    }

    fn finish(submission: Submission, status: TransferStatus, data: &[u8]) -> Completion {
        let Submission {
            transfer,
            path,
            mut buffer,
            ..
        } = submission;
        let length = data.len().min(buffer.len());
        buffer[..length].copy_from_slice(&data[..length]);

        Completion {
            transfer,
            path,
            status,
            buffer,
            length,
        }
    }
}

impl Transport for MockTransport {
    type Device = MockDevice;
    type Handle = MockHandle;

    fn poll(&mut self, timeout: Duration) -> Result<Vec<Event<MockDevice>>, TransportError> {
        if let Some(report) = self.auto_report.clone() {
            let submissions: Vec<Submission> =
                std::mem::take(&mut self.in_flight).into_values().collect();
            for submission in submissions {
                let completion = Self::finish(submission, TransferStatus::Completed, &report);
                self.events.push_back(Event::TransferCompleted(completion));
            }
        }

        if self.events.is_empty() {
            std::thread::sleep(timeout);
        }
        Ok(self.events.drain(..).collect())
    }

    fn handle_timeouts(&mut self) {
        self.timeout_checks += 1;
    }

    fn active_config(&self, device: &MockDevice) -> Result<ConfigDescriptor, TransportError> {
        if device.config_error {
            return Err(TransportError::Io);
        }
        Ok(device.config.clone())
    }

    fn read_serial(&self, device: &MockDevice) -> Result<Option<String>, TransportError> {
        if device.serial_error {
            return Err(TransportError::Access);
        }
        Ok(device.serial.clone())
    }

    fn open(&mut self, device: &MockDevice, interface: u8) -> Result<MockHandle, TransportError> {
        if let Some(e) = device.open_error.clone() {
            return Err(e);
        }
        self.opened.push(interface);
        Ok(MockHandle {
            serial: device.serial.clone(),
            interface,
        })
    }

    fn serial_number(&self, device: &MockDevice, _handle: &MockHandle) -> Option<String> {
        device.serial.clone()
    }

    fn alloc_transfer(&mut self) -> Result<TransferId, TransportError> {
        if self.alloc_failures > 0 {
            self.alloc_failures -= 1;
            return Err(TransportError::Other("out of transfers".to_string()));
        }
        self.next_transfer += 1;
        let id = TransferId(self.next_transfer);
        self.allocated.insert(id);
        Ok(id)
    }

    fn submit(&mut self, _handle: &MockHandle, submission: Submission) -> Result<(), SubmitError> {
        if let Some(error) = self.submit_failures.pop_front() {
            return Err(SubmitError {
                error,
                buffer: submission.buffer,
            });
        }
        if self.in_flight.contains_key(&submission.transfer) {
            return Err(SubmitError {
                error: TransportError::Busy,
                buffer: submission.buffer,
            });
        }
        self.submissions += 1;
        self.in_flight.insert(submission.transfer, submission);
        Ok(())
    }

    fn cancel(&mut self, transfer: TransferId) -> Result<(), TransportError> {
        if let Some(e) = self.cancel_error.clone() {
            return Err(e);
        }
        if !self.in_flight.contains_key(&transfer) {
            return Err(TransportError::NotFound);
        }
        self.cancelled.push(transfer);

        if self.complete_cancels {
            if let Some(submission) = self.in_flight.remove(&transfer) {
                let completion = Self::finish(submission, TransferStatus::Cancelled, &[]);
                self.events.push_back(Event::TransferCompleted(completion));
            }
        }
        Ok(())
    }

    fn free_transfer(&mut self, transfer: TransferId) {
        self.in_flight.remove(&transfer);
        self.allocated.remove(&transfer);
        self.freed.push(transfer);
    }

    fn close(&mut self, handle: MockHandle, _interface: u8) {
        self.closed.push(handle);
    }
}

/// Sink that keeps every record; clones share the same storage
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    records: Rc<RefCell<Vec<TelemetryRecord>>>,
}

impl RecordingSink {
    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.records.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }
}

impl RecordSink for RecordingSink {
    fn emit(&mut self, record: &TelemetryRecord) -> io::Result<()> {
        self.records.borrow_mut().push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_packet_roundtrips_through_bytes() {
        let bytes = report_bytes(&scenario_packet(9));
        assert_eq!(TelemetryPacket::decode(&bytes).unwrap(), scenario_packet(9));
    }

    #[test]
    fn test_complete_copies_data() {
        let mut usb = MockTransport::new();
        let handle = MockHandle {
            serial: None,
            interface: 0,
        };
        let transfer = usb.alloc_transfer().unwrap();
        usb.submit(
            &handle,
            Submission {
                transfer,
                path: path(1, &[1]),
                endpoint: MOCK_ENDPOINT,
                timeout: Duration::from_secs(1),
                buffer: vec![0; 4],
            },
        )
        .unwrap();

        let completion = usb
            .complete(&path(1, &[1]), TransferStatus::Completed, &[1, 2, 3, 4, 5])
            .unwrap();
        assert_eq!(completion.length, 4);
        assert_eq!(completion.data(), &[1, 2, 3, 4]);
        assert_eq!(usb.in_flight_count(), 0);
    }

    #[test]
    fn test_cancel_unknown_transfer_is_not_found() {
        let mut usb = MockTransport::new();
        assert_eq!(usb.cancel(TransferId(7)), Err(TransportError::NotFound));
    }

    #[test]
    fn test_recording_sink_clones_share_records() {
        let sink = RecordingSink::default();
        let mut writer = sink.clone();
        writer.emit(&TelemetryRecord::default()).unwrap();
        assert_eq!(sink.len(), 1);
        assert!(!sink.is_empty());
    }
}
