//! Telemetry aggregation
//!
//! In immediate mode every report becomes one record. In windowed mode each
//! device keeps an [`Accumulator`] that is averaged, emitted and reset when
//! the output timer fires.

use protocol::{TelemetryPacket, TelemetryRecord};
use std::time::Duration;

/// How decoded reports turn into output records, fixed at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregationMode {
    /// Emit one record per report
    #[default]
    Immediate,
    /// Average reports over a wall-clock window
    Windowed { interval: Duration },
}

impl AggregationMode {
    /// Windowed if an interval is given, immediate otherwise
    pub fn from_interval(interval: Option<Duration>) -> Self {
        match interval {
            Some(interval) => Self::Windowed { interval },
            None => Self::Immediate,
        }
    }

    /// Output window length, if windowed
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Self::Immediate => None,
            Self::Windowed { interval } => Some(*interval),
        }
    }

    pub fn is_windowed(&self) -> bool {
        matches!(self, Self::Windowed { .. })
    }
}

/// Running totals for one output window
///
/// Voltages, current and power are summed as magnitudes and averaged on
/// emission. `max_current` is the largest magnitude seen. Timestamp and
/// total energy are device counters, so the latest value wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Accumulator {
    timestamp: u32,
    v_in_sum: u64,
    v_out_sum: u64,
    current_sum: u64,
    power_sum: u64,
    max_current: u32,
    total_energy: u32,
    readings: u64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one report into the window
    pub fn add(&mut self, packet: &TelemetryPacket) {
        self.timestamp = packet.timestamp;
        self.v_in_sum += u64::from(packet.v_in.unsigned_abs());
        self.v_out_sum += u64::from(packet.v_out.unsigned_abs());
        self.current_sum += u64::from(packet.current.unsigned_abs());
        self.power_sum += u64::from(packet.power.unsigned_abs());
        self.max_current = self
            .max_current
            .max(u32::from(packet.max_current.unsigned_abs()));
        self.total_energy = packet.total_energy_mwh().unsigned_abs();
        self.readings += 1;
    }

    /// Number of reports in the current window
    pub fn readings(&self) -> u64 {
        self.readings
    }

    pub fn is_empty(&self) -> bool {
        self.readings == 0
    }

    /// Average of the window so far, or `None` if nothing was added
    pub fn average(&self, serial: &str) -> Option<TelemetryRecord> {
        if self.is_empty() {
            return None;
        }

        let n = self.readings;
        let mean = |sum: u64| u32::try_from(sum / n).unwrap_or(u32::MAX);

        Some(TelemetryRecord {
            serial: serial.to_string(),
            timestamp: self.timestamp,
            v_in: mean(self.v_in_sum),
            v_out: mean(self.v_out_sum),
            current: mean(self.current_sum),
            max_current: self.max_current,
            power: mean(self.power_sum),
            total_energy: self.total_energy,
        })
    }

    /// Average the window and start a new one
    pub fn take_average(&mut self, serial: &str) -> Option<TelemetryRecord> {
        let record = self.average(serial)?;
        self.reset();
        Some(record)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(v_in: i16, current: i16, max_current: i16, total_energy: i32) -> TelemetryPacket {
        TelemetryPacket {
            timestamp: 10,
            v_in,
            v_out: v_in.wrapping_neg(),
            current,
            max_current,
            total_energy,
            status_flags: 0,
            power: current,
        }
    }

    #[test]
    fn test_mode_from_interval() {
        assert_eq!(AggregationMode::from_interval(None), AggregationMode::Immediate);
        let mode = AggregationMode::from_interval(Some(Duration::from_millis(500)));
        assert!(mode.is_windowed());
        assert_eq!(mode.interval(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_empty_accumulator_has_no_average() {
        let mut acc = Accumulator::new();
        assert!(acc.is_empty());
        assert_eq!(acc.average("x"), None);
        assert_eq!(acc.take_average("x"), None);
    }

    #[test]
    fn test_average_of_magnitudes() {
        let mut acc = Accumulator::new();
        acc.add(&packet(-5000, -100, 150, 3600));
        acc.add(&packet(5100, 300, -400, 7200));
        acc.add(&packet(-4900, -200, 250, 10_800));

        let record = acc.average("PP1").unwrap();
        assert_eq!(record.serial, "PP1");
        assert_eq!(record.v_in, 5000);
        assert_eq!(record.v_out, 5000);
        assert_eq!(record.current, 200);
        assert_eq!(record.power, 200);
        assert_eq!(record.max_current, 400);
        // Latest cumulative counter, not a mean
        assert_eq!(record.total_energy, 3);
        assert_eq!(acc.readings(), 3);
    }

    #[test]
    fn test_average_truncates() {
        let mut acc = Accumulator::new();
        acc.add(&packet(1, 1, 0, 0));
        acc.add(&packet(2, 2, 0, 0));

        let record = acc.average("").unwrap();
        assert_eq!(record.v_in, 1);
        assert_eq!(record.current, 1);
    }

    #[test]
    fn test_take_average_resets_to_zero() {
        let mut acc = Accumulator::new();
        acc.add(&packet(5000, 100, 100, 0));

        assert!(acc.take_average("x").is_some());
        assert_eq!(acc, Accumulator::default());
    }

    #[test]
    fn test_single_reading_matches_record() {
        let p = packet(-5000, -200, 300, 7_200_000);
        let mut acc = Accumulator::new();
        acc.add(&p);

        assert_eq!(
            acc.take_average("ABC123").unwrap(),
            TelemetryRecord::from_packet("ABC123", &p)
        );
    }

    #[test]
    fn test_extreme_values_do_not_overflow() {
        let mut acc = Accumulator::new();
        for _ in 0..1000 {
            acc.add(&packet(i16::MIN, i16::MIN, i16::MIN, i32::MIN));
        }

        let record = acc.average("").unwrap();
        assert_eq!(record.v_in, 32768);
        assert_eq!(record.max_current, 32768);
    }

    #[test]
    fn test_count_past_u32_keeps_mean() {
        let mut acc = Accumulator::new();
        acc.add(&packet(5000, 200, 300, 0));

        // Window as if u32::MAX + 1 reports of 5000 mV / 200 mA were already folded in
        let prior = u64::from(u32::MAX) + 1;
        acc.readings += prior;
        acc.v_in_sum += prior * 5000;
        acc.current_sum += prior * 200;

        acc.add(&packet(5000, 200, 300, 0));

        assert_eq!(acc.readings(), prior + 2);
        let record = acc.average("").unwrap();
        assert_eq!(record.v_in, 5000);
        assert_eq!(record.current, 200);
    }
}
