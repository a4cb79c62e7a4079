//! Ramp profile and the desired-VU evaluation over time.

use std::time::Duration;

use serde::Serialize;

use crate::error::ConfigError;

/// Upper bound on any VU count a profile may ask for.
pub const MAX_VUS: u64 = 100_000;

/// One segment of the ramp: reach `target` VUs by the end of `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// Where the schedule stands at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleState {
    pub desired_vus: u64,
    /// Index of the stage containing the instant, `None` once finished.
    pub stage: Option<usize>,
    pub finished: bool,
}

/// Validated ramping-VU profile. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RampProfile {
    start_vus: u64,
    stages: Vec<Stage>,
    graceful_ramp_down: Duration,
}

impl RampProfile {
    pub fn new(
        start_vus: u64,
        stages: Vec<Stage>,
        graceful_ramp_down: Duration,
    ) -> Result<Self, ConfigError> {
        if stages.is_empty() {
            return Err(ConfigError::EmptyStages);
        }
        if let Some(value) = std::iter::once(start_vus)
            .chain(stages.iter().map(|s| s.target))
            .find(|&vus| vus > MAX_VUS)
        {
            return Err(ConfigError::TooManyVus {
                value,
                max: MAX_VUS,
            });
        }

        let profile = Self {
            start_vus,
            stages,
            graceful_ramp_down,
        };

        if profile.peak_vus() == 0 {
            return Err(ConfigError::NoVirtualUsers);
        }

        Ok(profile)
    }

    /// The scaling profile the screenshot service is characterized with.
    pub fn scaling() -> Self {
        let stage = |target| Stage::new(Duration::from_secs(30), target);
        Self {
            start_vus: 8,
            stages: vec![stage(32), stage(16), stage(24), stage(50)],
            graceful_ramp_down: Duration::ZERO,
        }
    }

    pub fn start_vus(&self) -> u64 {
        self.start_vus
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn graceful_ramp_down(&self) -> Duration {
        self.graceful_ramp_down
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Highest VU count the profile ever asks for.
    pub fn peak_vus(&self) -> u64 {
        self.stages
            .iter()
            .map(|s| s.target)
            .fold(self.start_vus, u64::max)
    }

    pub fn desired_vus(&self, elapsed: Duration) -> u64 {
        self.evaluate(elapsed).desired_vus
    }

    /// Desired VU count at `elapsed`, linearly interpolated inside the
    /// current stage between the previous target and this stage's target.
    pub fn evaluate(&self, elapsed: Duration) -> ScheduleState {
        let mut from = self.start_vus;
        let mut stage_start = Duration::ZERO;

        for (index, stage) in self.stages.iter().enumerate() {
            let stage_end = stage_start + stage.duration;

            // Zero-length stages never contain an instant; they are jumps.
            if elapsed < stage_end {
                let progress =
                    (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                return ScheduleState {
                    desired_vus: interpolate(from, stage.target, progress),
                    stage: Some(index),
                    finished: false,
                };
            }

            from = stage.target;
            stage_start = stage_end;
        }

        ScheduleState {
            desired_vus: from,
            stage: None,
            finished: true,
        }
    }
}

fn interpolate(from: u64, to: u64, progress: f64) -> u64 {
    let value = from as f64 + (to as f64 - from as f64) * progress;
    value.round().max(0.0) as u64
}
