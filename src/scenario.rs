//! Demo scenarios driving a monitored event loop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Subcommand;
use loopmon::{Callback, EventLoop, EventLoopMonitor, MonitorConfig, Sample, SleepMonitor};
use tracing::info;

use crate::duration::{format_duration, parse_duration};
use crate::report::Printer;
use crate::settings::Settings;

#[derive(Subcommand, Debug, Clone)]
pub enum Scenario {
    /// Monitor an otherwise idle event loop
    Steady,

    /// Block the event loop with a synchronous sleep, then stop the monitor
    Blocking {
        /// How long the thread is blocked (e.g., "1s", "500ms")
        #[arg(long, default_value = "1s", value_parser = parse_duration)]
        block: Duration,
    },

    /// Run a CPU-bound computation that never yields, then stop the monitor
    Cpu {
        /// Which fibonacci number to compute
        #[arg(long, default_value_t = 38)]
        n: u32,
    },

    /// Add a callback that sleeps far longer than the interval
    SlowCallback {
        /// How long the slow callback sleeps
        #[arg(long, default_value = "2s", value_parser = parse_duration)]
        wait: Duration,
    },

    /// Monitor two event loops on separate threads, one of which blocks
    Threads {
        /// How long the second thread is blocked
        #[arg(long, default_value = "2s", value_parser = parse_duration)]
        block: Duration,
    },
}

impl Scenario {
    pub fn run(&self, settings: &Settings) -> Result<()> {
        match self {
            Scenario::Steady => steady(settings),
            Scenario::Blocking { block } => {
                let block = *block;
                interrupted(settings, move || {
                    info!(block = %format_duration(block), "Blocking the event loop");
                    thread::sleep(block);
                })
            }
            Scenario::Cpu { n } => {
                let n = *n;
                interrupted(settings, move || {
                    info!(n, "Computing fibonacci on the event loop");
                    let value = fibonacci(n);
                    info!(n, value, "Computation finished");
                })
            }
            Scenario::SlowCallback { wait } => slow_callback(settings, *wait),
            Scenario::Threads { block } => threads(settings, *block),
        }
    }
}

fn monitor_config(
    settings: &Settings,
    callbacks: Vec<Arc<dyn Callback>>,
) -> Result<MonitorConfig> {
    let mut builder = MonitorConfig::builder().interval(settings.interval);
    if let Some(name) = &settings.name {
        builder = builder.name(name.clone());
    }
    for callback in callbacks {
        builder = builder.shared_callback(callback);
    }
    builder.build().context("invalid monitor configuration")
}

fn event_loop() -> Result<EventLoop> {
    EventLoop::new().context("failed to build event loop")
}

fn steady(settings: &Settings) -> Result<()> {
    let event_loop = event_loop()?;
    let config = monitor_config(settings, vec![Arc::new(Printer::new(settings.format))])?;
    let monitor = loopmon::create(Some(event_loop.scheduler()), config)?;

    event_loop.run_for(settings.duration)?;
    monitor.stop();
    event_loop.close();
    Ok(())
}

/// Run `interrupt` synchronously on the loop between two quiet periods.
fn interrupted<F>(settings: &Settings, interrupt: F) -> Result<()>
where
    F: FnOnce(),
{
    let event_loop = event_loop()?;
    let config = monitor_config(settings, vec![Arc::new(Printer::new(settings.format))])?;
    let monitor = loopmon::create(Some(event_loop.scheduler()), config)?;

    let interval = settings.interval;
    event_loop.block_on(async move {
        tokio::time::sleep(interval * 2).await;
        interrupt();
        tokio::time::sleep(interval).await;
    })?;

    monitor.stop();
    // Let callbacks submitted before the stop finish printing
    event_loop.run_for(interval)?;
    event_loop.close();
    Ok(())
}

fn slow_callback(settings: &Settings, wait: Duration) -> Result<()> {
    let counter = Arc::new(AtomicUsize::new(0));
    let slow = move |_sample: Sample| {
        let counter = counter.clone();
        async move {
            let idx = counter.fetch_add(1, Ordering::Relaxed);
            info!(idx, "Slow callback started");
            tokio::time::sleep(wait).await;
            info!(idx, "Slow callback finished");
        }
    };

    let event_loop = event_loop()?;
    let config = monitor_config(
        settings,
        vec![Arc::new(Printer::new(settings.format)), Arc::new(slow)],
    )?;
    let monitor = loopmon::create(Some(event_loop.scheduler()), config)?;

    event_loop.run_for(settings.duration)?;
    monitor.stop();
    event_loop.close();
    Ok(())
}

fn threads(settings: &Settings, block: Duration) -> Result<()> {
    let quiet = monitored_thread("main", settings.clone(), None)?;
    let blocked = monitored_thread("another", settings.clone(), Some(block))?;

    for handle in [quiet, blocked] {
        handle
            .join()
            .map_err(|_| anyhow!("monitored thread panicked"))??;
    }
    Ok(())
}

/// Spawn a thread running its own monitored event loop.
fn monitored_thread(
    label: &'static str,
    settings: Settings,
    block: Option<Duration>,
) -> Result<thread::JoinHandle<Result<()>>> {
    thread::Builder::new()
        .name(label.to_string())
        .spawn(move || -> Result<()> {
            let event_loop = event_loop()?;
            let printer = Printer::new(settings.format).label(label);
            let config = monitor_config(&settings, vec![Arc::new(printer)])?;
            let monitor = SleepMonitor::new(config);
            monitor.install(event_loop.scheduler())?;

            event_loop.block_on(async {
                match block {
                    Some(block) => {
                        tokio::time::sleep(settings.duration / 3).await;
                        info!(
                            thread = label,
                            block = %format_duration(block),
                            "Blocking the event loop"
                        );
                        thread::sleep(block);
                        tokio::time::sleep(settings.interval).await;
                    }
                    None => tokio::time::sleep(settings.duration).await,
                }
            })?;

            monitor.stop();
            event_loop.run_for(settings.interval)?;
            Ok(())
        })
        .context("failed to spawn monitored thread")
}

fn fibonacci(n: u32) -> u64 {
    if n <= 2 {
        return 1;
    }
    fibonacci(n - 1) + fibonacci(n - 2)
}
