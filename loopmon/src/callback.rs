//! Callbacks invoked with every sample.

use std::future::Future;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use crate::sample::Sample;

/// Post-processing hook run after every sample.
///
/// The sampling loop never awaits a callback: each invocation is spawned as a
/// detached task, so a slow callback cannot stretch the sampling interval and
/// consecutive invocations may overlap.
///
/// Any `Fn(Sample) -> impl Future<Output = ()>` closure is a callback:
///
/// ```rust
/// use loopmon::{MonitorConfig, Sample};
///
/// let config = MonitorConfig::builder()
///     .callback(|sample: Sample| async move {
///         println!("lag: {:.3}s, tasks: {}", sample.lag_secs(), sample.tasks);
///     })
///     .build()
///     .unwrap();
/// assert_eq!(config.callbacks().len(), 1);
/// ```
pub trait Callback: Send + Sync + 'static {
    /// Build the future that handles `sample`.
    fn call(&self, sample: Sample) -> BoxFuture<'static, ()>;
}

impl<F, Fut> Callback for F
where
    F: Fn(Sample) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, sample: Sample) -> BoxFuture<'static, ()> {
        Box::pin(self(sample))
    }
}

/// Callback forwarding samples into a bounded channel.
///
/// Use [`channel()`] to create one together with its receiver.
#[derive(Debug, Clone)]
pub struct ChannelCallback {
    tx: mpsc::Sender<Sample>,
}

/// Create a channel callback and return it with the receiving end.
///
/// Sends are best effort: when the buffer is full or the receiver is gone
/// the sample is dropped rather than holding up the callback task.
///
/// # Example
///
/// ```rust
/// use loopmon::{callback, MonitorConfig};
///
/// let (cb, mut rx) = callback::channel(16);
/// let config = MonitorConfig::builder().callback(cb).build().unwrap();
///
/// // Later, receive samples
/// // while let Some(sample) = rx.recv().await {
/// //     println!("lag: {:?}", sample.lag);
/// // }
/// ```
pub fn channel(buffer: usize) -> (ChannelCallback, mpsc::Receiver<Sample>) {
    let (tx, rx) = mpsc::channel(buffer);
    (ChannelCallback { tx }, rx)
}

impl Callback for ChannelCallback {
    fn call(&self, sample: Sample) -> BoxFuture<'static, ()> {
        let _ = self.tx.try_send(sample);
        Box::pin(std::future::ready(()))
    }
}

/// Callback emitting one `tracing` event per sample.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    label: Option<String>,
}

impl Trace {
    /// Create a tracing callback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a label to every event, e.g. the name of the monitored thread.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl Callback for Trace {
    fn call(&self, sample: Sample) -> BoxFuture<'static, ()> {
        let label = self.label.clone();
        Box::pin(async move {
            tracing::info!(
                label = label.as_deref().unwrap_or_default(),
                lag_secs = sample.lag_secs(),
                tasks = sample.tasks,
                sampled_at = %sample.sampled_at,
                "event loop sample"
            );
        })
    }
}
