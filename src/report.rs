//! Printing samples to stdout.

use futures_util::future::BoxFuture;
use loopmon::{Callback, Sample};
use serde::Serialize;

use crate::settings::Format;

/// Callback printing every sample on its own line.
#[derive(Debug, Clone)]
pub struct Printer {
    format: Format,
    label: Option<String>,
}

#[derive(Serialize)]
struct Line<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<&'a str>,
    #[serde(flatten)]
    sample: &'a Sample,
}

impl Printer {
    pub fn new(format: Format) -> Self {
        Self {
            format,
            label: None,
        }
    }

    /// Prefix every line with `label`, e.g. the thread being monitored.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn render(&self, sample: &Sample) -> String {
        match self.format {
            Format::Text => {
                let line = format!(
                    "event loop lag: {:.3}, running tasks: {}, at {}",
                    sample.lag_secs(),
                    sample.tasks,
                    sample.sampled_at
                );
                match &self.label {
                    Some(label) => format!("[{:7}] {}", label.to_uppercase(), line),
                    None => line,
                }
            }
            Format::Json => {
                let line = Line {
                    label: self.label.as_deref(),
                    sample,
                };
                serde_json::to_string(&line).unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "failed to serialize sample");
                    String::new()
                })
            }
        }
    }
}

impl Callback for Printer {
    fn call(&self, sample: Sample) -> BoxFuture<'static, ()> {
        let line = self.render(&sample);
        Box::pin(async move {
            if !line.is_empty() {
                println!("{}", line);
            }
        })
    }
}
