//! Event loop tests against the mock transport
//!
//! These run the real loop with short timer periods.

use logger::test_utils::{
    MockDevice, MockTransport, RecordingSink, path, report_bytes, scenario_packet,
};
use logger::{
    AggregationMode, Context, EventLoop, Options, Phase, ShutdownReason, TimerSettings,
};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

fn fast_timers() -> TimerSettings {
    TimerSettings {
        maintenance: Duration::from_millis(1000),
        output: None,
        cancel_fallback: Duration::from_millis(100),
        poll_slice: Duration::from_millis(5),
    }
}

fn build(
    ports: &[u8],
    options: Options,
    settings: TimerSettings,
    configure: impl FnOnce(&mut MockTransport),
) -> (EventLoop<MockTransport>, RecordingSink) {
    let sink = RecordingSink::default();
    let ctx = Context::new(options, Box::new(sink.clone()));
    let mut usb = MockTransport::new();
    for port in ports {
        usb.arrive(path(1, &[*port]), MockDevice::portpilot(&format!("PP{port}")));
    }
    configure(&mut usb);
    (EventLoop::new(usb, ctx, settings), sink)
}

#[test]
fn test_runs_until_every_target_is_reached() {
    let options = Options {
        packet_target: Some(5),
        ..Default::default()
    };
    let (mut event_loop, sink) = build(&[1, 2], options, fast_timers(), |usb| {
        usb.auto_report = Some(report_bytes(&scenario_packet(1)));
    });

    let summary = event_loop.run();

    assert_eq!(summary.reason, Some(ShutdownReason::TargetReached));
    assert!(!summary.forced);
    assert_eq!(sink.len(), 10);
    for serial in ["PP1", "PP2"] {
        let count = sink.records().iter().filter(|r| r.serial == serial).count();
        assert_eq!(count, 5);
    }

    assert_eq!(event_loop.context().phase(), Phase::Stopped);
    assert_eq!(event_loop.context().device_count(), 0);
    assert_eq!(event_loop.transport().allocated_count(), 0);
    assert_eq!(event_loop.transport().closed.len(), 2);
}

#[test]
fn test_stop_flag_requests_external_stop() {
    let (mut event_loop, sink) = build(&[1], Options::default(), fast_timers(), |_| {});
    event_loop.stop_flag().store(true, Ordering::SeqCst);

    let summary = event_loop.run();

    assert_eq!(summary.reason, Some(ShutdownReason::External));
    assert!(!summary.forced);
    assert!(sink.is_empty());
}

#[test]
fn test_stop_flag_cancels_running_transfers() {
    let (mut event_loop, _sink) = build(&[1, 2], Options::default(), fast_timers(), |_| {});
    let stop = event_loop.stop_flag();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        stop.store(true, Ordering::SeqCst);
    });

    let summary = event_loop.run();
    stopper.join().unwrap();

    assert_eq!(summary.reason, Some(ShutdownReason::External));
    assert!(!summary.forced);
    assert_eq!(summary.cancels_required, 2);
    assert_eq!(summary.cancels_observed, 2);
}

#[test]
fn test_cancel_deadline_bounds_shutdown() {
    let (mut event_loop, _sink) = build(&[1], Options::default(), fast_timers(), |usb| {
        usb.complete_cancels = false;
    });
    let stop = event_loop.stop_flag();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        stop.store(true, Ordering::SeqCst);
    });

    let started = Instant::now();
    let summary = event_loop.run();
    stopper.join().unwrap();

    assert_eq!(summary.reason, Some(ShutdownReason::External));
    assert!(summary.forced);
    assert_eq!(summary.cancels_required, 1);
    assert_eq!(summary.cancels_observed, 0);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(event_loop.transport().closed.len(), 1);
}

#[test]
fn test_windowed_run_counts_windows() {
    let options = Options {
        packet_target: Some(2),
        mode: AggregationMode::Windowed {
            interval: Duration::from_millis(20),
        },
        ..Default::default()
    };
    let settings = TimerSettings {
        output: Some(Duration::from_millis(20)),
        ..fast_timers()
    };
    let (mut event_loop, sink) = build(&[1], options, settings, |usb| {
        usb.auto_report = Some(report_bytes(&scenario_packet(9)));
    });

    let summary = event_loop.run();

    assert_eq!(summary.reason, Some(ShutdownReason::TargetReached));
    assert_eq!(sink.len(), 2);
    for record in sink.records() {
        assert_eq!(record.to_csv_row(), "PP1,9,5000,5000,200,300,2000,1000");
    }
}

#[test]
fn test_fast_tick_retries_failed_start() {
    let options = Options {
        packet_target: Some(1),
        ..Default::default()
    };
    let settings = TimerSettings {
        maintenance: Duration::from_secs(60),
        ..fast_timers()
    };
    let (mut event_loop, sink) = build(&[1], options, settings, |usb| {
        usb.alloc_failures = 3;
        usb.auto_report = Some(report_bytes(&scenario_packet(1)));
    });

    let started = Instant::now();
    let summary = event_loop.run();

    // Recovery came from the fast tick, not the 60 s maintenance period
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(summary.reason, Some(ShutdownReason::TargetReached));
    assert_eq!(sink.len(), 1);
    assert!(event_loop.transport().timeout_checks >= 3);
    assert_eq!(event_loop.context().fast_tick(), 0);
}
