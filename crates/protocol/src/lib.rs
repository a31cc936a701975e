//! Wire format library for portpilot-logger
//!
//! This crate defines what a PortPilot USB power meter puts on the wire and
//! what the logger writes out: the fixed-layout HID telemetry report, the
//! USB identification constants, the topology path used to key attached
//! devices, and the CSV/human-readable output records.
//!
//! # Example
//!
//! ```
//! use protocol::{TelemetryPacket, TelemetryRecord, PACKET_SIZE};
//!
//! let packet = TelemetryPacket {
//!     timestamp: 42,
//!     v_in: -5000,
//!     v_out: 5000,
//!     current: -200,
//!     max_current: 300,
//!     total_energy: 7_200_000,
//!     status_flags: 0,
//!     power: -1000,
//! };
//!
//! let bytes = packet.encode();
//! assert_eq!(bytes.len(), PACKET_SIZE);
//!
//! let decoded = TelemetryPacket::decode(&bytes).unwrap();
//! let record = TelemetryRecord::from_packet("ABC123", &decoded);
//! assert_eq!(record.to_csv_row(), "ABC123,42,5000,5000,200,300,2000,1000");
//! ```

pub mod error;
pub mod packet;
pub mod record;
pub mod types;

pub use error::{ProtocolError, Result};
pub use packet::{PACKET_SIZE, TelemetryPacket};
pub use record::{CSV_HEADER, TelemetryRecord};
pub use types::{MAX_PORT_DEPTH, PORTPILOT_PRODUCT_ID, PORTPILOT_VENDOR_ID, TopologyPath};
