//! The monitor lifecycle: install, start and stop.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::MonitorConfig;
use crate::error::{Result, StateViolation};
use crate::scheduler::{Scheduler, TokioScheduler};

/// Lifecycle flags shared between a monitor and its sampling loop.
///
/// `installed` is set by a successful install and cleared by stop.
/// `running` is set when a sampling loop starts iterating and cleared when it
/// stops, finishes or is dropped. Every started loop claims a new generation;
/// a loop only keeps iterating, and only clears the flags on exit, while its
/// generation is the current one. A loop left sleeping across a
/// stop-then-reinstall therefore exits quietly instead of running alongside
/// its replacement.
#[derive(Debug, Default)]
pub struct Lifecycle {
    flags: Mutex<Flags>,
}

#[derive(Debug, Default)]
struct Flags {
    installed: bool,
    running: bool,
    generation: u64,
}

impl Lifecycle {
    /// Whether the monitor is installed into an event loop.
    pub fn installed(&self) -> bool {
        self.flags.lock().installed
    }

    /// Whether a sampling loop is currently iterating.
    pub fn running(&self) -> bool {
        self.flags.lock().running
    }

    /// Mark the monitor installed, failing if it already is.
    #[doc(hidden)]
    pub fn claim_install(&self) -> Result<()> {
        let mut flags = self.flags.lock();
        if flags.installed {
            return Err(StateViolation::AlreadyInstalled.into());
        }
        flags.installed = true;
        Ok(())
    }

    /// Undo [`Lifecycle::claim_install`] after the sampling task could not be spawned.
    #[doc(hidden)]
    pub fn release_install(&self) {
        self.flags.lock().installed = false;
    }

    /// The current generation. A sampling loop created now passes it to
    /// [`Lifecycle::begin`] once it is first polled.
    pub fn generation(&self) -> u64 {
        self.flags.lock().generation
    }

    /// Mark a sampling loop as running and return its new generation.
    ///
    /// `expected` is the generation observed when the loop was created.
    /// Returns `Ok(None)` when the monitor was stopped in the meantime, in
    /// which case the loop should exit without sampling.
    #[doc(hidden)]
    pub fn begin(&self, expected: u64) -> Result<Option<u64>> {
        let mut flags = self.flags.lock();
        if flags.running {
            return Err(StateViolation::AlreadyRunning.into());
        }
        if flags.generation != expected {
            return Ok(None);
        }
        flags.running = true;
        flags.generation += 1;
        Ok(Some(flags.generation))
    }

    /// Whether the loop that claimed `generation` should keep iterating.
    pub fn is_current(&self, generation: u64) -> bool {
        let flags = self.flags.lock();
        flags.running && flags.generation == generation
    }

    /// Release the install when a sampling loop created at generation
    /// `created` is dropped without ever having begun.
    #[doc(hidden)]
    pub fn abandon(&self, created: u64) {
        let mut flags = self.flags.lock();
        if flags.generation == created && !flags.running {
            flags.installed = false;
        }
    }

    /// Clean up after the loop that claimed `generation` exits.
    #[doc(hidden)]
    pub fn finish(&self, generation: u64) {
        let mut flags = self.flags.lock();
        if flags.generation == generation {
            flags.running = false;
            flags.installed = false;
        }
    }

    /// Stop whichever loop is current and free the monitor for reinstallation.
    pub fn stop(&self) {
        let mut flags = self.flags.lock();
        flags.running = false;
        flags.installed = false;
        flags.generation += 1;
    }
}

/// A monitor that can be installed into one event loop to sample its lag.
///
/// It is pointless to install several monitors into one loop, and one
/// monitor cannot be installed into several loops at once.
/// [`SleepMonitor`](crate::SleepMonitor) is the provided implementation;
/// implementors supply the configuration, the lifecycle flags and the
/// sampling loop itself, and get the install contract for free.
pub trait EventLoopMonitor: Send + Sync {
    /// The configuration this monitor was built with.
    fn config(&self) -> &MonitorConfig;

    /// The lifecycle flags of this monitor.
    fn lifecycle(&self) -> &Lifecycle;

    /// The sampling loop.
    ///
    /// Usually driven through [`EventLoopMonitor::install`]. The returned
    /// future loops until [`EventLoopMonitor::stop`] is called, so it should
    /// be spawned rather than awaited inline. It resolves to
    /// [`StateViolation::AlreadyRunning`] when another loop of this monitor is
    /// running. Dropping it has the same effect as calling `stop`, and a
    /// `stop` issued before it is first polled makes it finish immediately.
    fn start(&self, scheduler: Arc<dyn Scheduler>) -> BoxFuture<'static, Result<()>>;

    /// Whether the sampling loop is collecting samples.
    ///
    /// An installed monitor is not running until its task has been polled
    /// for the first time.
    fn running(&self) -> bool {
        self.lifecycle().running()
    }

    /// Whether this monitor is installed into an event loop.
    fn installed(&self) -> bool {
        self.lifecycle().installed()
    }

    /// How often the monitor collects a sample.
    fn interval(&self) -> Duration {
        self.config().interval()
    }

    /// Name of the sampling task.
    fn name(&self) -> Option<&str> {
        self.config().name()
    }

    /// Stop the sampling loop. Stopping a stopped monitor does nothing.
    ///
    /// The loop notices at its next wakeup. Afterwards the monitor can be
    /// installed again.
    fn stop(&self) {
        if self.installed() || self.running() {
            debug!(name = ?self.name(), "stopping event loop monitor");
        }
        self.lifecycle().stop();
    }

    /// Install this monitor into `scheduler` and start sampling.
    ///
    /// Returns as soon as the sampling task has been spawned. Fails with
    /// [`StateViolation::LoopClosed`] for a closed loop and with
    /// [`StateViolation::AlreadyInstalled`] when the monitor is already
    /// installed anywhere; in both cases nothing is spawned.
    fn install(&self, scheduler: Arc<dyn Scheduler>) -> Result<()> {
        if scheduler.is_closed() {
            return Err(StateViolation::LoopClosed.into());
        }
        self.lifecycle().claim_install()?;

        let sampling = self.start(scheduler.clone());
        let name = self.name().map(str::to_owned);
        let task = async move {
            if let Err(err) = sampling.await {
                warn!(name = ?name, error = %err, "sampling loop did not start");
            }
        };

        if let Err(err) = scheduler.spawn(self.name(), Box::pin(task)) {
            self.lifecycle().release_install();
            return Err(err);
        }

        debug!(
            name = ?self.name(),
            interval = ?self.interval(),
            "installed event loop monitor"
        );
        Ok(())
    }

    /// Install this monitor into the tokio runtime the caller is running in.
    fn install_current(&self) -> Result<()> {
        let scheduler = TokioScheduler::current()?;
        self.install(Arc::new(scheduler))
    }
}
