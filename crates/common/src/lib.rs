//! Common utilities for portpilot-logger
//!
//! This crate provides shared functionality for the logger crates:
//! error handling, logging setup, and the notification channel that moves
//! hotplug events out of USB transport callbacks and into the dispatch loop.

pub mod channel;
pub mod error;
pub mod logging;

pub use channel::{NotificationReceiver, NotificationSender, notification_channel};
pub use error::{Error, Result};
pub use logging::setup_logging;
