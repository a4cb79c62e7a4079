//! Command line configuration and the JSON files it points at.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::schedule::{RampProfile, Stage};
use crate::targets::TargetPool;

#[derive(Parser, Debug, Clone)]
#[command(name = "screenshot-load")]
#[command(about = "Ramping-VU load generator for the screenshot API", long_about = None)]
pub struct Config {
    /// Base URL of the screenshot service
    #[arg(long, env = "BASE_URL", default_value = "http://localhost:8080")]
    pub base_url: String,

    /// Ramp profile JSON file (k6 ramping-vus options); built-in scaling profile if absent
    #[arg(long, env = "PROFILE")]
    pub profile: Option<PathBuf>,

    /// JSON array of URIs to screenshot; built-in list if absent
    #[arg(long, env = "TARGETS")]
    pub targets: Option<PathBuf>,

    /// Screenshot this single URI on every iteration
    #[arg(long, env = "FIXED_TARGET", conflicts_with = "targets")]
    pub fixed_target: Option<String>,

    /// Pause between iterations of one VU in milliseconds
    #[arg(long, env = "PAUSE_MS", default_value = "1000")]
    pub pause_ms: u64,

    /// Controller tick in milliseconds
    #[arg(long, env = "TICK_MS", default_value = "100")]
    pub tick_ms: u64,

    /// Per-request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "60")]
    pub request_timeout_secs: u64,

    /// Seed for reproducible target selection
    #[arg(long, env = "SEED")]
    pub seed: Option<u64>,

    /// Read response bodies instead of discarding them
    #[arg(long, env = "KEEP_RESPONSE_BODIES")]
    pub keep_response_bodies: bool,

    /// Write the run summary as JSON to this file
    #[arg(long, env = "SUMMARY_JSON")]
    pub summary_json: Option<PathBuf>,
}

impl Config {
    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn ramp_profile(&self) -> Result<RampProfile, ConfigError> {
        match &self.profile {
            Some(path) => ProfileFile::load(path)?.into_profile(),
            None => Ok(RampProfile::scaling()),
        }
    }

    pub fn target_pool(&self) -> Result<TargetPool, ConfigError> {
        match (&self.fixed_target, &self.targets) {
            (Some(uri), _) => Ok(TargetPool::fixed(uri.as_str())),
            (None, Some(path)) => TargetPool::load_from_file(path),
            (None, None) => Ok(TargetPool::default_uris()),
        }
    }
}

/// On-disk ramp profile, shaped like k6's `ramping-vus` scenario options.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileFile {
    #[serde(rename = "startVUs", default)]
    pub start_vus: i64,
    pub stages: Vec<StageFile>,
    #[serde(default)]
    pub graceful_ramp_down: DurationValue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StageFile {
    pub duration: DurationValue,
    pub target: i64,
}

/// A duration as k6 accepts it: a string like `"30s"` or a bare number of
/// milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Text(String),
    Millis(f64),
}

impl Default for DurationValue {
    fn default() -> Self {
        DurationValue::Millis(0.0)
    }
}

impl DurationValue {
    pub fn to_duration(&self) -> Result<Duration, ConfigError> {
        match self {
            DurationValue::Text(text) => parse_duration(text),
            DurationValue::Millis(ms) => {
                let input = ms.to_string();
                if *ms < 0.0 {
                    return Err(ConfigError::NegativeDuration(input));
                }
                nanos_to_duration(ms * 1e6).ok_or(ConfigError::InvalidDuration(input))
            }
        }
    }
}

impl ProfileFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(json: &str) -> Result<Self, sonic_rs::Error> {
        sonic_rs::from_str(json)
    }

    pub fn into_profile(self) -> Result<RampProfile, ConfigError> {
        let start_vus =
            u64::try_from(self.start_vus).map_err(|_| ConfigError::NegativeStartVus(self.start_vus))?;

        let stages = self
            .stages
            .iter()
            .enumerate()
            .map(|(index, stage)| {
                let target = u64::try_from(stage.target).map_err(|_| ConfigError::NegativeTarget {
                    stage: index,
                    value: stage.target,
                })?;
                Ok(Stage::new(stage.duration.to_duration()?, target))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        RampProfile::new(start_vus, stages, self.graceful_ramp_down.to_duration()?)
    }
}

/// Parses k6-style durations: `30s`, `500ms`, `250us`, `1m30s`, `1.5h`, `0`.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let s = input.trim();
    if s.starts_with('-') {
        return Err(ConfigError::NegativeDuration(input.to_string()));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let invalid = || ConfigError::InvalidDuration(input.to_string());
    let mut rest = s;
    let mut nanos = 0.0_f64;

    if rest.is_empty() {
        return Err(invalid());
    }

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if number_len == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "h" => 3_600e9,
            "m" => 60e9,
            "s" => 1e9,
            "ms" => 1e6,
            "us" | "µs" | "μs" => 1e3,
            "ns" => 1.0,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];

        nanos += value * nanos_per_unit;
    }

    nanos_to_duration(nanos).ok_or_else(invalid)
}

fn nanos_to_duration(nanos: f64) -> Option<Duration> {
    if !nanos.is_finite() || nanos < 0.0 || nanos >= u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(nanos.round() as u64))
}
