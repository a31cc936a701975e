//! PortPilot HID telemetry report
//!
//! The device streams one fixed-size, packed, little-endian report per
//! interrupt transfer:
//!
//! ```text
//! offset  size  field          unit
//!  0      1     (pad)
//!  1      4     timestamp      s since device boot (unsigned)
//!  5      2     v_in           mV (signed)
//!  7      2     v_out          mV (signed)
//!  9      2     current        mA (signed)
//! 11      2     max_current    mA (signed)
//! 13      4     total_energy   mWs (signed, cumulative)
//! 17      2     status_flags   reserved
//! 19      4     (pad)
//! 23      2     power          mW (signed)
//! ```
//!
//! Signs encode direction (into or out of the port); the output layer
//! reports magnitudes.

use crate::error::{ProtocolError, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Size of a telemetry report on the wire
pub const PACKET_SIZE: usize = 25;

const TIMESTAMP: usize = 1;
const V_IN: usize = 5;
const V_OUT: usize = 7;
const CURRENT: usize = 9;
const MAX_CURRENT: usize = 11;
const TOTAL_ENERGY: usize = 13;
const STATUS_FLAGS: usize = 17;
const POWER: usize = 23;

/// Milliwatt-seconds per milliwatt-hour
const MWS_PER_MWH: i32 = 3600;

/// One decoded telemetry report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TelemetryPacket {
    /// Seconds since device boot
    pub timestamp: u32,
    /// Input bus voltage in mV
    pub v_in: i16,
    /// Output bus voltage in mV
    pub v_out: i16,
    /// Current in mA
    pub current: i16,
    /// Maximum current seen by the device in mA
    pub max_current: i16,
    /// Cumulative energy counter in mWs
    pub total_energy: i32,
    /// Reserved status bits
    pub status_flags: u16,
    /// Instantaneous power in mW
    pub power: i16,
}

impl TelemetryPacket {
    /// Decode a report from a transfer buffer
    ///
    /// Bytes past [`PACKET_SIZE`] are ignored. A shorter buffer means the
    /// transport handed over a truncated transfer.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < PACKET_SIZE {
            return Err(ProtocolError::BufferTooSmall {
                needed: PACKET_SIZE,
                available: buf.len(),
            });
        }

        Ok(Self {
            timestamp: LittleEndian::read_u32(&buf[TIMESTAMP..]),
            v_in: LittleEndian::read_i16(&buf[V_IN..]),
            v_out: LittleEndian::read_i16(&buf[V_OUT..]),
            current: LittleEndian::read_i16(&buf[CURRENT..]),
            max_current: LittleEndian::read_i16(&buf[MAX_CURRENT..]),
            total_energy: LittleEndian::read_i32(&buf[TOTAL_ENERGY..]),
            status_flags: LittleEndian::read_u16(&buf[STATUS_FLAGS..]),
            power: LittleEndian::read_i16(&buf[POWER..]),
        })
    }

    /// Encode into the wire layout, zeroing the padding bytes
    pub fn encode(&self) -> [u8; PACKET_SIZE] {
        let mut buf = [0u8; PACKET_SIZE];
        LittleEndian::write_u32(&mut buf[TIMESTAMP..], self.timestamp);
        LittleEndian::write_i16(&mut buf[V_IN..], self.v_in);
        LittleEndian::write_i16(&mut buf[V_OUT..], self.v_out);
        LittleEndian::write_i16(&mut buf[CURRENT..], self.current);
        LittleEndian::write_i16(&mut buf[MAX_CURRENT..], self.max_current);
        LittleEndian::write_i32(&mut buf[TOTAL_ENERGY..], self.total_energy);
        LittleEndian::write_u16(&mut buf[STATUS_FLAGS..], self.status_flags);
        LittleEndian::write_i16(&mut buf[POWER..], self.power);
        buf
    }

    /// Cumulative energy converted to mWh (truncating, sign preserved)
    pub fn total_energy_mwh(&self) -> i32 {
        self.total_energy / MWS_PER_MWH
    }
}
