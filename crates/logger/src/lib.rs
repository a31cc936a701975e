//! PortPilot telemetry logger
//!
//! Logs voltage, current, power and energy readings from any number of
//! PortPilot USB power meters, following hotplug events while running.
//!
//! The core is a single-threaded state machine. A [`Context`] owns the
//! device registry and reacts to one [`Event`] at a time:
//!
//! ```text
//! hotplug ──► registry ──► reader ──► transport ──► completion
//!                             ▲                         │
//!                             └── resubmit ◄── decode ◄─┘──► aggregator ──► sink
//! ```
//!
//! [`EventLoop`] drives a context from a [`Transport`]: the rusb backend in
//! [`transport::usb`], or [`test_utils::MockTransport`] in tests.

pub mod aggregator;
pub mod config;
pub mod context;
pub mod device;
pub mod event;
pub mod event_loop;
pub mod output;
pub mod reader;
pub mod registry;
pub mod shutdown;
pub mod test_utils;
pub mod transport;

pub use aggregator::{Accumulator, AggregationMode};
pub use config::LoggerConfig;
pub use context::{Context, FastTick, Options};
pub use device::{Device, ReadState};
pub use event::{Event, Timer};
pub use event_loop::{EventLoop, Schedule, ShutdownSummary, TimerSettings};
pub use output::{OutputWriter, RecordSink};
pub use reader::StartError;
pub use shutdown::{Phase, ShutdownReason, ShutdownState};
pub use transport::{Completion, TransferId, TransferStatus, Transport, TransportError};
