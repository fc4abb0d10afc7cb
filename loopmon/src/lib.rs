//! # loopmon
//!
//! A lightweight probe that measures how responsive a tokio event loop is.
//!
//! A monitor is installed into one event loop, where it repeatedly sleeps
//! for a fixed interval and measures how much later than requested it was
//! woken up. That delay, the *lag*, grows whenever the loop is busy running
//! other tasks or is blocked by synchronous code. Each sample, together with
//! the number of tasks alive on the loop, is handed to user callbacks.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use loopmon::{MonitorConfig, Sample};
//! use std::time::Duration;
//!
//! async fn print_sample(sample: Sample) {
//!     println!(
//!         "event loop lag: {:.3}, running tasks: {}, at {}",
//!         sample.lag_secs(),
//!         sample.tasks,
//!         sample.sampled_at
//!     );
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let config = MonitorConfig::builder()
//!         .interval(Duration::from_millis(500))
//!         .callback(print_sample)
//!         .build()
//!         .unwrap();
//!
//!     // Install into the current runtime and start sampling (non-blocking)
//!     let _monitor = loopmon::create(None, config).unwrap();
//!
//!     // ... your application runs ...
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//! }
//! ```
//!
//! ## Features
//!
//! - **Zero-cost callbacks**: callbacks are spawned, never awaited, so they
//!   cannot delay the next sample
//! - **Explicit lifecycle**: install, stop and reinstall with clear errors
//! - **Loop-local**: one monitor per loop; monitors on different threads are
//!   fully independent
//! - **Pluggable scheduler**: anything implementing [`Scheduler`] can be
//!   monitored

pub mod callback;
mod config;
mod error;
mod monitor;
mod sample;
mod scheduler;
mod sleep;

use std::sync::Arc;

pub use callback::Callback;
pub use config::{MonitorConfig, MonitorConfigBuilder, DEFAULT_INTERVAL};
pub use error::{Error, Result, StateViolation};
pub use monitor::{EventLoopMonitor, Lifecycle};
pub use sample::Sample;
pub use scheduler::{EventLoop, Scheduler, TokioScheduler};
pub use sleep::SleepMonitor;

/// Create a [`SleepMonitor`], install it into an event loop and start
/// monitoring.
///
/// This only commands the installation and returns immediately. When
/// `scheduler` is `None` the tokio runtime the caller is running in is used,
/// so this must be called from inside a runtime in that case.
pub fn create(
    scheduler: Option<Arc<dyn Scheduler>>,
    config: MonitorConfig,
) -> Result<SleepMonitor> {
    create_with(scheduler, SleepMonitor::new(config))
}

/// Install any [`EventLoopMonitor`] implementation and start monitoring.
///
/// Behaves like [`create`] for a monitor that was built by the caller.
pub fn create_with<M: EventLoopMonitor>(
    scheduler: Option<Arc<dyn Scheduler>>,
    monitor: M,
) -> Result<M> {
    let scheduler: Arc<dyn Scheduler> = match scheduler {
        Some(scheduler) => scheduler,
        None => Arc::new(TokioScheduler::current()?),
    };

    monitor.install(scheduler)?;
    Ok(monitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn create_installs_into_current_runtime() {
        let (cb, mut rx) = callback::channel(8);
        let config = MonitorConfig::builder()
            .interval(Duration::from_millis(100))
            .callback(cb)
            .build()
            .unwrap();

        let monitor = create(None, config).unwrap();
        assert!(monitor.installed());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(monitor.running());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn create_without_runtime_fails() {
        let err = create(None, MonitorConfig::default()).unwrap_err();
        assert_eq!(err.violation(), Some(StateViolation::NoRunningLoop));
    }

    #[test]
    fn create_with_installs_a_prebuilt_monitor() {
        let event_loop = EventLoop::new().unwrap();
        let monitor = SleepMonitor::new(MonitorConfig::default());
        let observer = monitor.clone();

        let monitor = create_with(Some(event_loop.scheduler()), monitor).unwrap();
        assert!(observer.installed());

        let err = create_with(Some(event_loop.scheduler()), observer).unwrap_err();
        assert_eq!(err.violation(), Some(StateViolation::AlreadyInstalled));

        monitor.stop();
        assert!(!monitor.installed());
    }

    #[test]
    fn create_into_event_loop() {
        let event_loop = EventLoop::new().unwrap();
        let monitor = create(Some(event_loop.scheduler()), MonitorConfig::default()).unwrap();
        assert!(monitor.installed());

        event_loop.run_for(Duration::from_millis(10)).unwrap();
        assert!(monitor.running());

        event_loop.close();
        assert!(!monitor.running());
        assert!(!monitor.installed());
    }
}
