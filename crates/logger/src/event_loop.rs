//! Single-threaded dispatch loop
//!
//! Polls the transport for hotplug notifications and transfer completions,
//! fires the maintenance, output and cancellation-deadline timers, and
//! hands everything to [`Context::dispatch`] one event at a time.
//!
//! Timer cadence:
//! - maintenance every `maintenance` interval, and on every iteration while
//!   any device holds a fast-tick request
//! - output every `output` interval in windowed mode
//! - while draining, only the one-shot cancellation deadline

use crate::context::Context;
use crate::event::{Event, Timer};
use crate::shutdown::{Phase, ShutdownReason};
use crate::transport::Transport;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Timer periods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSettings {
    pub maintenance: Duration,
    /// Aggregation window, `None` in immediate mode
    pub output: Option<Duration>,
    /// How long to wait for cancellations before forcing the stop
    pub cancel_fallback: Duration,
    /// Upper bound on a single transport poll
    pub poll_slice: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            maintenance: Duration::from_millis(1000),
            output: None,
            cancel_fallback: Duration::from_millis(1000),
            poll_slice: Duration::from_millis(10),
        }
    }
}

/// Deterministic timer bookkeeping, driven by the caller's clock
#[derive(Debug, Clone)]
pub struct Schedule {
    settings: TimerSettings,
    next_maintenance: Instant,
    next_output: Option<Instant>,
    drain_deadline: Option<Instant>,
}

impl Schedule {
    pub fn new(settings: TimerSettings, now: Instant) -> Self {
        Self {
            settings,
            next_maintenance: now + settings.maintenance,
            next_output: settings.output.map(|interval| now + interval),
            drain_deadline: None,
        }
    }

    /// Arm the cancellation deadline the first time the run is seen draining
    pub fn note_phase(&mut self, phase: Phase, now: Instant) {
        if phase == Phase::Draining && self.drain_deadline.is_none() {
            debug!(
                "Cancellation deadline armed for {:?}",
                self.settings.cancel_fallback
            );
            self.drain_deadline = Some(now + self.settings.cancel_fallback);
        }
    }

    /// Timers that fire at `now`, in dispatch order
    pub fn due(&mut self, now: Instant, fast_tick: bool, phase: Phase) -> Vec<Timer> {
        self.note_phase(phase, now);

        match phase {
            Phase::Running => {
                let mut due = Vec::new();

                if now >= self.next_maintenance {
                    self.next_maintenance = now + self.settings.maintenance;
                    due.push(Timer::Maintenance);
                } else if fast_tick {
                    due.push(Timer::Maintenance);
                }

                if let (Some(next), Some(interval)) = (self.next_output, self.settings.output) {
                    if now >= next {
                        self.next_output = Some(now + interval);
                        due.push(Timer::Output);
                    }
                }

                due
            }
            Phase::Draining => match self.drain_deadline {
                Some(deadline) if now >= deadline => {
                    self.drain_deadline = Some(now + self.settings.cancel_fallback);
                    vec![Timer::CancelDeadline]
                }
                _ => Vec::new(),
            },
            Phase::Stopped => Vec::new(),
        }
    }

    /// Time until the next timer, bounded by the poll slice
    pub fn poll_timeout(&self, now: Instant, phase: Phase) -> Duration {
        let next = match phase {
            Phase::Running => match self.next_output {
                Some(output) => self.next_maintenance.min(output),
                None => self.next_maintenance,
            },
            Phase::Draining => match self.drain_deadline {
                Some(deadline) => deadline,
                None => now,
            },
            Phase::Stopped => now,
        };

        next.saturating_duration_since(now)
            .min(self.settings.poll_slice)
    }

    pub fn drain_deadline(&self) -> Option<Instant> {
        self.drain_deadline
    }
}

/// How the run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownSummary {
    pub reason: Option<ShutdownReason>,
    /// The cancellation deadline ended the drain
    pub forced: bool,
    pub cancels_required: usize,
    pub cancels_observed: usize,
}

/// Drives a [`Context`] with events from a [`Transport`]
pub struct EventLoop<T: Transport> {
    transport: T,
    ctx: Context<T::Handle>,
    schedule: Schedule,
    stop: Arc<AtomicBool>,
}

impl<T: Transport> EventLoop<T> {
    pub fn new(transport: T, ctx: Context<T::Handle>, settings: TimerSettings) -> Self {
        Self {
            transport,
            ctx,
            schedule: Schedule::new(settings, Instant::now()),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that requests an external stop when set
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn context(&self) -> &Context<T::Handle> {
        &self.ctx
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Run until the context reaches `Stopped`
    pub fn run(&mut self) -> ShutdownSummary {
        info!("Event loop started");
        let slice = self.schedule.settings.poll_slice;

        while self.ctx.phase() != Phase::Stopped {
            if self.stop.load(Ordering::SeqCst) && self.ctx.phase() == Phase::Running {
                info!("Stop requested");
                self.ctx
                    .request_shutdown(&mut self.transport, ShutdownReason::External);
                self.schedule.note_phase(self.ctx.phase(), Instant::now());
                continue;
            }

            let timeout = self.schedule.poll_timeout(Instant::now(), self.ctx.phase());
            match self.transport.poll(timeout) {
                Ok(events) => {
                    for event in events {
                        self.ctx.dispatch(&mut self.transport, event);
                    }
                }
                Err(e) => {
                    warn!("Transport poll failed: {}", e);
                    std::thread::sleep(slice);
                }
            }

            let fast_tick = self.ctx.fast_tick() > 0;
            let due = self
                .schedule
                .due(Instant::now(), fast_tick, self.ctx.phase());
            for timer in due {
                self.ctx
                    .dispatch(&mut self.transport, Event::TimerFired(timer));
            }
            self.schedule.note_phase(self.ctx.phase(), Instant::now());
        }

        let state = self.ctx.shutdown_state();
        let summary = ShutdownSummary {
            reason: state.reason(),
            forced: state.forced(),
            cancels_required: state.cancels_required(),
            cancels_observed: state.cancels_observed(),
        };
        info!("Event loop stopped: {:?}", summary);
        summary
    }
}
