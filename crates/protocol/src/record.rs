//! Output records
//!
//! A record is what the logger emits for one device: either a single
//! report (immediate mode) or the average over an output window. All
//! quantities are magnitudes.

use crate::packet::TelemetryPacket;
use std::fmt;

/// Header row written once at the start of a CSV file
pub const CSV_HEADER: &str = "Dev. serial, VBus in (mV), VBus out (mV), Current (mA), \
                              Max current (mA), Energy (mW), Total energy (mWh)";

/// One emitted telemetry row
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TelemetryRecord {
    /// Device serial number (empty if it could not be read)
    pub serial: String,
    /// Device timestamp in seconds since boot
    pub timestamp: u32,
    /// |v_in| in mV
    pub v_in: u32,
    /// |v_out| in mV
    pub v_out: u32,
    /// |current| in mA
    pub current: u32,
    /// |max_current| in mA
    pub max_current: u32,
    /// |power| in mW
    pub power: u32,
    /// |total_energy| in mWh
    pub total_energy: u32,
}

impl TelemetryRecord {
    /// Build a record from a single report
    pub fn from_packet(serial: &str, packet: &TelemetryPacket) -> Self {
        Self {
            serial: serial.to_string(),
            timestamp: packet.timestamp,
            v_in: packet.v_in.unsigned_abs().into(),
            v_out: packet.v_out.unsigned_abs().into(),
            current: packet.current.unsigned_abs().into(),
            max_current: packet.max_current.unsigned_abs().into(),
            power: packet.power.unsigned_abs().into(),
            total_energy: packet.total_energy_mwh().unsigned_abs(),
        }
    }

    /// Format as `serial,tstamp,v_in,v_out,current,max_current,total_energy,power`
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{}",
            self.serial,
            self.timestamp,
            self.v_in,
            self.v_out,
            self.current,
            self.max_current,
            self.total_energy,
            self.power
        )
    }
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tstamp: {}s v_in: {}mV v_out: {}mV current: {}mA max. current: {}mA total energy: {}mWh power: {}mW",
            self.serial,
            self.timestamp,
            self.v_in,
            self.v_out,
            self.current,
            self.max_current,
            self.total_energy,
            self.power
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet() -> TelemetryPacket {
        TelemetryPacket {
            timestamp: 77,
            v_in: -5000,
            v_out: 5000,
            current: -200,
            max_current: 300,
            total_energy: 7_200_000,
            status_flags: 0,
            power: -1000,
        }
    }

    #[test]
    fn test_from_packet_reports_magnitudes() {
        let record = TelemetryRecord::from_packet("ABC123", &packet());
        assert_eq!(record.v_in, 5000);
        assert_eq!(record.v_out, 5000);
        assert_eq!(record.current, 200);
        assert_eq!(record.max_current, 300);
        assert_eq!(record.power, 1000);
        assert_eq!(record.total_energy, 2000);
    }

    #[test]
    fn test_csv_row() {
        let record = TelemetryRecord::from_packet("ABC123", &packet());
        assert_eq!(record.to_csv_row(), "ABC123,77,5000,5000,200,300,2000,1000");
    }

    #[test]
    fn test_csv_energy_precedes_power() {
        let record = TelemetryRecord {
            serial: "PP1".to_string(),
            timestamp: 1,
            power: 11,
            total_energy: 22,
            ..Default::default()
        };
        let row = record.to_csv_row();
        let columns: Vec<&str> = row.split(',').collect();
        assert_eq!(columns[6], "22");
        assert_eq!(columns[7], "11");
    }

    #[test]
    fn test_extreme_values_do_not_overflow() {
        let p = TelemetryPacket {
            v_in: i16::MIN,
            current: i16::MIN,
            total_energy: i32::MIN,
            ..Default::default()
        };
        let record = TelemetryRecord::from_packet("", &p);
        assert_eq!(record.v_in, 32768);
        assert_eq!(record.current, 32768);
        assert_eq!(record.total_energy, (i32::MIN / 3600).unsigned_abs());
    }

    #[test]
    fn test_csv_header_columns() {
        let columns: Vec<&str> = CSV_HEADER.split(", ").collect();
        assert_eq!(columns.len(), 7);
        assert_eq!(columns[0], "Dev. serial");
        assert_eq!(columns[6], "Total energy (mWh)");
    }

    #[test]
    fn test_display_is_human_readable() {
        let record = TelemetryRecord::from_packet("ABC123", &packet());
        let line = record.to_string();
        assert!(line.starts_with("ABC123 tstamp: 77s"));
        assert!(line.contains("max. current: 300mA"));
        assert!(line.ends_with("total energy: 2000mWh power: 1000mW"));
    }
}
