//! Sleep-based lag measurement.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::BoxFuture;
use tracing::{debug, trace, warn};

use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::monitor::{EventLoopMonitor, Lifecycle};
use crate::sample::Sample;
use crate::scheduler::Scheduler;

/// Measures lag by sleeping for one interval and timing the wakeup.
///
/// Each iteration records the scheduler clock, sleeps for `interval`, and
/// reports how much later than requested the loop was resumed. Any time the
/// loop spent running other tasks, or blocked inside a synchronous call,
/// shows up as lag. After every sample each callback is spawned as its own
/// task and never awaited.
///
/// Clones share state: stopping one clone stops them all.
///
/// # Example
///
/// ```rust,no_run
/// use loopmon::{EventLoopMonitor, MonitorConfig, Sample, SleepMonitor};
/// use std::time::Duration;
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let monitor = SleepMonitor::new(
///         MonitorConfig::builder()
///             .interval(Duration::from_millis(500))
///             .callback(|s: Sample| async move {
///                 println!("event loop lag: {:.3}, running tasks: {}", s.lag_secs(), s.tasks);
///             })
///             .build()
///             .unwrap(),
///     );
///     monitor.install_current().unwrap();
///
///     tokio::time::sleep(Duration::from_secs(5)).await;
///     monitor.stop();
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct SleepMonitor {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    config: MonitorConfig,
    lifecycle: Lifecycle,
}

impl SleepMonitor {
    /// Create a monitor. It does nothing until installed.
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                lifecycle: Lifecycle::default(),
            }),
        }
    }
}

impl EventLoopMonitor for SleepMonitor {
    fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.inner.lifecycle
    }

    fn start(&self, scheduler: Arc<dyn Scheduler>) -> BoxFuture<'static, Result<()>> {
        let unpolled = UnpolledGuard {
            inner: self.inner.clone(),
            created: self.inner.lifecycle.generation(),
        };
        Box::pin(async move {
            let inner = &unpolled.inner;
            let Some(generation) = inner.lifecycle.begin(unpolled.created)? else {
                debug!(name = ?inner.config.name(), "monitor stopped before sampling began");
                return Ok(());
            };
            let _guard = StopGuard {
                lifecycle: &inner.lifecycle,
                generation,
            };

            debug!(name = ?inner.config.name(), generation, "sampling loop started");
            inner.run(scheduler.as_ref(), generation).await;
            debug!(name = ?inner.config.name(), generation, "sampling loop finished");
            Ok(())
        })
    }
}

impl Inner {
    async fn run(&self, scheduler: &dyn Scheduler, generation: u64) {
        let interval = self.config.interval();

        while self.lifecycle.is_current(generation) {
            let before = scheduler.now();
            scheduler.sleep(interval).await;
            let lag = scheduler
                .now()
                .saturating_duration_since(before)
                .saturating_sub(interval);

            // Stopped while asleep.
            if !self.lifecycle.is_current(generation) {
                break;
            }

            let sample = Sample {
                lag,
                tasks: scheduler.pending_tasks(),
                sampled_at: Utc::now(),
            };
            trace!(lag = ?sample.lag, tasks = sample.tasks, "collected sample");
            self.dispatch(scheduler, sample);
        }
    }

    /// Spawn every callback for `sample` without waiting for any of them.
    fn dispatch(&self, scheduler: &dyn Scheduler, sample: Sample) {
        for (index, callback) in self.config.callbacks().iter().enumerate() {
            let submitted = panic::catch_unwind(AssertUnwindSafe(|| callback.call(sample)))
                .map_err(|_| Error::CallbackSubmission("callback panicked".to_string()))
                .and_then(|task| scheduler.spawn(None, task));

            if let Err(err) = submitted {
                warn!(callback = index, error = %err, "skipped callback for this sample");
            }
        }
    }
}

/// Releases the install when the sampling loop is dropped before it began,
/// e.g. because its event loop was closed first. Inert once `begin` moved the
/// generation on.
struct UnpolledGuard {
    inner: Arc<Inner>,
    created: u64,
}

impl Drop for UnpolledGuard {
    fn drop(&mut self) {
        self.inner.lifecycle.abandon(self.created);
    }
}

/// Runs the stop cleanup when the sampling loop ends or is dropped.
struct StopGuard<'a> {
    lifecycle: &'a Lifecycle,
    generation: u64,
}

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        self.lifecycle.finish(self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback;
    use crate::error::StateViolation;
    use crate::scheduler::TokioScheduler;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn scheduler() -> Arc<dyn Scheduler> {
        Arc::new(TokioScheduler::current().unwrap())
    }

    fn monitor_with_channel(interval: Duration) -> (SleepMonitor, mpsc::Receiver<Sample>) {
        let (cb, rx) = callback::channel(64);
        let config = MonitorConfig::builder()
            .interval(interval)
            .callback(cb)
            .build()
            .unwrap();
        (SleepMonitor::new(config), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Sample>) -> Vec<Sample> {
        let mut samples = Vec::new();
        while let Ok(sample) = rx.try_recv() {
            samples.push(sample);
        }
        samples
    }

    #[tokio::test(start_paused = true)]
    async fn becomes_running_once_polled() {
        let monitor = SleepMonitor::default();
        monitor.install(scheduler()).unwrap();
        assert!(monitor.installed());
        assert!(!monitor.running());

        tokio::task::yield_now().await;
        assert!(monitor.running());
        assert!(monitor.installed());
    }

    #[tokio::test(start_paused = true)]
    async fn collects_one_sample_per_interval() {
        let (monitor, mut rx) = monitor_with_channel(Duration::from_millis(100));
        monitor.install(scheduler()).unwrap();

        tokio::time::sleep(Duration::from_millis(550)).await;
        let samples = drain(&mut rx);

        assert_eq!(samples.len(), 5);
        for sample in &samples {
            assert!(sample.lag < Duration::from_millis(10), "lag {:?}", sample.lag);
            assert_eq!(sample.tasks, 1);
        }
        assert!(samples.windows(2).all(|w| w[0].sampled_at <= w[1].sampled_at));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_ends_sampling() {
        let (monitor, mut rx) = monitor_with_channel(Duration::from_millis(100));
        monitor.install(scheduler()).unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        monitor.stop();
        monitor.stop();
        assert!(!monitor.running());
        assert!(!monitor.installed());

        drain(&mut rx);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(drain(&mut rx).is_empty());

        monitor.stop();
        assert!(!monitor.running());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_first_poll_cancels_sampling() {
        let (monitor, mut rx) = monitor_with_channel(Duration::from_millis(100));
        monitor.install(scheduler()).unwrap();
        monitor.stop();

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(!monitor.running());
        assert!(!monitor.installed());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reinstall_after_stop_runs_a_single_loop() {
        let (monitor, mut rx) = monitor_with_channel(Duration::from_millis(100));
        let scheduler = scheduler();
        monitor.install(scheduler.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        // The first loop is still asleep when the second one starts.
        monitor.stop();
        monitor.install(scheduler.clone()).unwrap();
        drain(&mut rx);

        tokio::time::sleep(Duration::from_millis(1020)).await;
        let samples = drain(&mut rx);
        assert_eq!(samples.len(), 10);
        assert!(monitor.running());
        assert!(monitor.installed());
    }

    #[tokio::test(start_paused = true)]
    async fn install_twice_keeps_first_installation() {
        let monitor = SleepMonitor::default();
        monitor.install(scheduler()).unwrap();
        tokio::task::yield_now().await;

        let err = monitor.install(scheduler()).unwrap_err();
        assert_eq!(err.violation(), Some(StateViolation::AlreadyInstalled));
        assert!(monitor.installed());
        assert!(monitor.running());
    }

    #[tokio::test(start_paused = true)]
    async fn start_while_running_fails() {
        let monitor = SleepMonitor::default();
        monitor.install(scheduler()).unwrap();
        tokio::task::yield_now().await;

        let err = monitor.start(scheduler()).await.unwrap_err();
        assert_eq!(err.violation(), Some(StateViolation::AlreadyRunning));
        assert!(monitor.running());
    }

    #[tokio::test(start_paused = true)]
    async fn aborting_manual_start_acts_as_stop() {
        let monitor = SleepMonitor::default();
        let task = tokio::spawn(monitor.start(scheduler()));
        tokio::task::yield_now().await;
        assert!(monitor.running());

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(!monitor.running());
        assert!(!monitor.installed());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_unpolled_sampling_loop_releases_install() {
        let monitor = SleepMonitor::default();
        monitor.lifecycle().claim_install().unwrap();

        drop(monitor.start(scheduler()));
        assert!(!monitor.installed());
        assert!(!monitor.running());
        monitor.install(scheduler()).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unpolled_loop_from_before_a_reinstall_is_inert() {
        let monitor = SleepMonitor::default();
        monitor.lifecycle().claim_install().unwrap();
        let stale = monitor.start(scheduler());

        monitor.stop();
        monitor.install(scheduler()).unwrap();
        drop(stale);
        assert!(monitor.installed());

        tokio::task::yield_now().await;
        assert!(monitor.running());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_callbacks_do_not_delay_sampling() {
        let (cb, mut rx) = callback::channel(64);
        let config = MonitorConfig::builder()
            .interval(Duration::from_millis(100))
            .callback(cb)
            .callback(|_: Sample| tokio::time::sleep(Duration::from_secs(10)))
            .build()
            .unwrap();
        let monitor = SleepMonitor::new(config);
        monitor.install(scheduler()).unwrap();

        tokio::time::sleep(Duration::from_millis(550)).await;
        let samples = drain(&mut rx);

        assert_eq!(samples.len(), 5);
        for sample in &samples {
            assert!(sample.lag < Duration::from_millis(10), "lag {:?}", sample.lag);
        }
        // Earlier slow callbacks are still in flight.
        let tasks: Vec<usize> = samples.iter().map(|s| s.tasks).collect();
        assert_eq!(tasks, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_callback_does_not_stop_others() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let config = MonitorConfig::builder()
            .interval(Duration::from_millis(100))
            .callback(|_: Sample| -> std::future::Ready<()> { panic!("broken callback") })
            .callback(move |_: Sample| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build()
            .unwrap();
        let monitor = SleepMonitor::new(config);
        monitor.install(scheduler()).unwrap();

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(monitor.running());
    }

    async fn failing(_: Sample) {
        panic!("callback failed while running");
    }

    #[tokio::test(start_paused = true)]
    async fn failing_callback_futures_are_not_observed() {
        let (cb, mut rx) = callback::channel(64);
        let config = MonitorConfig::builder()
            .interval(Duration::from_millis(100))
            .callback(failing)
            .callback(cb)
            .build()
            .unwrap();
        let monitor = SleepMonitor::new(config);
        monitor.install(scheduler()).unwrap();

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(drain(&mut rx).len(), 3);
        assert!(monitor.running());
    }

    #[tokio::test(start_paused = true)]
    async fn finished_task_leaves_the_count() {
        let (monitor, mut rx) = monitor_with_channel(Duration::from_millis(100));
        monitor.install(scheduler()).unwrap();
        tokio::spawn(tokio::time::sleep(Duration::from_millis(250)));

        tokio::time::sleep(Duration::from_millis(450)).await;
        let tasks: Vec<usize> = drain(&mut rx).iter().map(|s| s.tasks).collect();
        assert_eq!(tasks, vec![2, 2, 1, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_the_configured_name() {
        let monitor = SleepMonitor::new(
            MonitorConfig::builder().name("sampler").build().unwrap(),
        );
        assert_eq!(monitor.name(), Some("sampler"));
        assert_eq!(monitor.interval(), Duration::from_millis(100));
    }
}
