//! Layered settings for the demo scenarios.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;

use crate::duration;

/// How samples are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Text,
    Json,
}

impl Format {
    fn as_str(self) -> &'static str {
        match self {
            Format::Text => "text",
            Format::Json => "json",
        }
    }
}

/// Resolved settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Sleep interval of the sampling loop.
    #[serde(deserialize_with = "duration::deserialize")]
    pub interval: Duration,

    /// Name of the sampling task.
    #[serde(default)]
    pub name: Option<String>,

    pub format: Format,

    /// How long a scenario keeps its loop running.
    #[serde(deserialize_with = "duration::deserialize")]
    pub duration: Duration,
}

/// Values given on the command line. They take precedence over every
/// other source.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub interval: Option<String>,
    pub name: Option<String>,
    pub format: Option<Format>,
    pub duration: Option<String>,
}

impl Settings {
    /// Load settings from defaults, an optional file, `LOOPMON_*` environment
    /// variables and command line overrides, in that order.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        Self::load_with(path, Environment::with_prefix("LOOPMON"), overrides)
    }

    fn load_with(path: Option<&Path>, env: Environment, overrides: &Overrides) -> Result<Self> {
        let mut builder = defaults()?;
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        let config = builder
            .add_source(env)
            .set_override_option("interval", overrides.interval.clone())?
            .set_override_option("name", overrides.name.clone())?
            .set_override_option("format", overrides.format.map(Format::as_str))?
            .set_override_option("duration", overrides.duration.clone())?
            .build()
            .context("failed to read settings")?;

        config.try_deserialize().context("invalid settings")
    }
}

fn defaults() -> Result<ConfigBuilder<config::builder::DefaultState>> {
    Ok(Config::builder()
        .set_default("interval", "100ms")?
        .set_default("format", Format::default().as_str())?
        .set_default("duration", "3s")?)
}
