//! The host scheduler a monitor is installed into.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::time::Instant;
use tracing::Instrument;

use crate::error::{Error, Result, StateViolation};

/// The capabilities a monitor needs from the event loop it measures.
///
/// [`TokioScheduler`] implements this for a tokio runtime. Other
/// implementations are mostly useful for tests.
pub trait Scheduler: Send + Sync + 'static {
    /// Read the scheduler's monotonic clock.
    fn now(&self) -> Instant;

    /// Suspend the calling task for at least `duration`.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;

    /// Number of tasks currently alive on this scheduler, including the caller.
    fn pending_tasks(&self) -> usize;

    /// Spawn a detached task. The task is never joined.
    fn spawn(&self, name: Option<&str>, task: BoxFuture<'static, ()>) -> Result<()>;

    /// Whether the scheduler can no longer run tasks.
    fn is_closed(&self) -> bool;
}

/// [`Scheduler`] backed by a tokio runtime handle.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
    closed: Arc<AtomicBool>,
}

impl TokioScheduler {
    /// Wrap a runtime handle.
    ///
    /// The scheduler reports itself closed once the [`EventLoop`] it was
    /// handed out by is closed, or once a spawn shows that the runtime behind
    /// the handle has shut down.
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use the runtime the calling thread is currently inside of.
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| Error::InvalidState(StateViolation::NoRunningLoop))
    }

    /// The underlying runtime handle.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Scheduler for TokioScheduler {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }

    fn pending_tasks(&self) -> usize {
        self.handle.metrics().num_alive_tasks()
    }

    fn spawn(&self, name: Option<&str>, task: BoxFuture<'static, ()>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::CallbackSubmission(
                "event loop is closed".to_string(),
            ));
        }

        // Task names need tokio_unstable; a span carries the name instead.
        let task: BoxFuture<'static, ()> = match name {
            Some(name) => Box::pin(task.instrument(tracing::debug_span!("loopmon.task", name))),
            None => task,
        };

        // A shut down runtime cancels new tasks on the spot.
        let handle = self.handle.spawn(task);
        if handle.is_finished() {
            if let Some(Err(err)) = handle.now_or_never() {
                if err.is_cancelled() {
                    self.closed.store(true, Ordering::Release);
                    return Err(StateViolation::LoopClosed.into());
                }
            }
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// An owned, single-threaded event loop.
///
/// Wraps a current-thread tokio runtime so that a monitor can be installed
/// before the loop runs and observed after it has been closed. Dropping the
/// loop closes it.
///
/// # Example
///
/// ```rust
/// use loopmon::{callback, EventLoop, EventLoopMonitor, MonitorConfig, SleepMonitor};
/// use std::time::Duration;
///
/// let event_loop = EventLoop::new().unwrap();
/// let (cb, mut rx) = callback::channel(16);
/// let monitor = SleepMonitor::new(
///     MonitorConfig::builder()
///         .interval(Duration::from_millis(10))
///         .callback(cb)
///         .build()
///         .unwrap(),
/// );
///
/// monitor.install(event_loop.scheduler()).unwrap();
/// event_loop.run_for(Duration::from_millis(50)).unwrap();
/// assert!(rx.try_recv().is_ok());
///
/// event_loop.close();
/// assert!(!monitor.running());
/// ```
#[derive(Debug)]
pub struct EventLoop {
    runtime: Option<Runtime>,
    scheduler: Arc<TokioScheduler>,
}

impl EventLoop {
    /// Build a new current-thread event loop with timers and I/O enabled.
    pub fn new() -> std::io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let scheduler = Arc::new(TokioScheduler::new(runtime.handle().clone()));
        Ok(Self {
            runtime: Some(runtime),
            scheduler,
        })
    }

    /// The scheduler for installing monitors into this loop.
    pub fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.scheduler.clone()
    }

    /// Run the loop until `future` completes.
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        match &self.runtime {
            Some(runtime) if !self.is_closed() => Ok(runtime.block_on(future)),
            _ => Err(Error::InvalidState(StateViolation::LoopClosed)),
        }
    }

    /// Run the loop for `duration`, letting spawned tasks make progress.
    pub fn run_for(&self, duration: Duration) -> Result<()> {
        self.block_on(tokio::time::sleep(duration))
    }

    /// Whether the loop has been closed.
    pub fn is_closed(&self) -> bool {
        self.scheduler.is_closed()
    }

    /// Close the loop.
    ///
    /// Every scheduler handed out by [`EventLoop::scheduler`] reports itself
    /// closed afterwards, and all tasks still alive on the loop, including
    /// installed sampling loops, are dropped.
    ///
    /// # Panics
    ///
    /// Like dropping a tokio runtime, this panics when called from inside an
    /// asynchronous context.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.scheduler.closed.store(true, Ordering::Release);
        if let Some(runtime) = self.runtime.take() {
            drop(runtime);
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
