//! USB identification types
//!
//! Constants that select PortPilot devices on the bus, and the topology path
//! that identifies where an attached device sits.

use std::fmt;

/// USB Vendor ID of the PortPilot power meter
pub const PORTPILOT_VENDOR_ID: u16 = 0x16d0;

/// USB Product ID of the PortPilot power meter
pub const PORTPILOT_PRODUCT_ID: u16 = 0x08ac;

/// Maximum number of hub ports between the root and a device (USB 3.x limit)
pub const MAX_PORT_DEPTH: usize = 7;

/// Physical location of a device: bus number plus the port chain from the root hub
///
/// Serial numbers can be transiently unreadable while a device enumerates,
/// so the registry keys devices by where they are plugged in instead. The
/// path is stable across replugs into the same port and unique among the
/// devices currently attached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopologyPath {
    bus: u8,
    ports: Vec<u8>,
}

impl TopologyPath {
    /// Create a path, keeping at most [`MAX_PORT_DEPTH`] port numbers
    ///
    /// A deeper chain cannot come from a conforming bus. It is cut down and
    /// logged, since two such devices may then share a path.
    pub fn new(bus: u8, ports: impl Into<Vec<u8>>) -> Self {
        let mut ports = ports.into();
        if ports.len() > MAX_PORT_DEPTH {
            tracing::warn!(
                "Port chain {:?} on bus {} is deeper than {} hubs, truncating",
                ports,
                bus,
                MAX_PORT_DEPTH
            );
            ports.truncate(MAX_PORT_DEPTH);
        }
        Self { bus, ports }
    }

    /// Get the bus number
    pub fn bus(&self) -> u8 {
        self.bus
    }

    /// Get the port chain from the root hub
    pub fn ports(&self) -> &[u8] {
        &self.ports
    }
}

impl fmt::Display for TopologyPath {
    /// Formats like sysfs device names: `1-2.4` is bus 1, port 2, then port 4
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bus)?;
        for (i, port) in self.ports.iter().enumerate() {
            let sep = if i == 0 { '-' } else { '.' };
            write!(f, "{}{}", sep, port)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_path_display() {
        assert_eq!(TopologyPath::new(1, vec![2, 4]).to_string(), "1-2.4");
        assert_eq!(TopologyPath::new(3, vec![1]).to_string(), "3-1");
        assert_eq!(TopologyPath::new(2, Vec::new()).to_string(), "2");
    }

    #[test]
    fn test_topology_path_truncates_depth() {
        let path = TopologyPath::new(1, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(path.ports().len(), MAX_PORT_DEPTH);
        assert_eq!(path.ports(), &[1, 2, 3, 4, 5, 6, 7]);
    }

    /// Collects formatted log output in memory
    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn with_captured_logs(f: impl FnOnce()) -> String {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        logs.text()
    }

    #[test]
    fn test_truncation_is_logged() {
        let logs = with_captured_logs(|| {
            let a = TopologyPath::new(1, vec![1, 2, 3, 4, 5, 6, 7, 8]);
            let b = TopologyPath::new(1, vec![1, 2, 3, 4, 5, 6, 7, 9]);
            assert_eq!(a, b);
        });

        assert_eq!(logs.matches("truncating").count(), 2);
        assert!(logs.contains("WARN"));
        assert!(logs.contains("[1, 2, 3, 4, 5, 6, 7, 9]"));
    }

    #[test]
    fn test_shallow_path_logs_nothing() {
        let logs = with_captured_logs(|| {
            let path = TopologyPath::new(1, vec![1, 2, 3, 4, 5, 6, 7]);
            assert_eq!(path.ports().len(), MAX_PORT_DEPTH);
        });

        assert!(logs.is_empty());
    }

    #[test]
    fn test_topology_path_identity() {
        let a = TopologyPath::new(1, vec![2, 3]);
        let b = TopologyPath::new(1, vec![2, 3]);
        let c = TopologyPath::new(1, vec![2, 4]);
        let d = TopologyPath::new(2, vec![2, 3]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert!(a < c);
    }
}
