//! Drives the VU pool along the ramp profile.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::aggregator::{Aggregator, RunSummary};
use crate::pool::{VuPool, WorkerFactory};
use crate::schedule::{RampProfile, MAX_VUS};

pub const DEFAULT_TICK: Duration = Duration::from_millis(100);
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

pub struct Controller {
    profile: RampProfile,
    aggregator: Arc<Aggregator>,
    tick: Duration,
}

impl Controller {
    pub fn new(profile: RampProfile, aggregator: Arc<Aggregator>) -> Self {
        Self {
            profile,
            aggregator,
            tick: DEFAULT_TICK,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Runs the whole profile and returns the summary once every virtual
    /// user has stopped.
    pub async fn run<F: WorkerFactory>(&self, factory: F) -> RunSummary {
        let mut pool = VuPool::new(
            factory,
            Arc::clone(&self.aggregator),
            self.profile.graceful_ramp_down(),
        );

        info!(
            "Ramping from {} VUs through {} stages over {:?}",
            self.profile.start_vus(),
            self.profile.stages().len(),
            self.profile.total_duration()
        );

        self.aggregator.start_clock();
        let start = Instant::now();
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_log = Instant::now();
        let mut current_stage = None;

        loop {
            ticker.tick().await;

            let state = self.profile.evaluate(start.elapsed());
            if state.finished {
                break;
            }

            if state.stage != current_stage {
                if let Some(index) = state.stage {
                    let stage = &self.profile.stages()[index];
                    info!(
                        "Stage {}: ramping to {} VUs over {:?}",
                        index + 1,
                        stage.target,
                        stage.duration
                    );
                }
                current_stage = state.stage;
            }

            pool.reap();
            // Profiles are bounded by MAX_VUS, so this never saturates.
            let desired = usize::try_from(state.desired_vus.min(MAX_VUS)).unwrap_or(usize::MAX);
            let change = pool.scale_to(desired);
            if !change.is_empty() {
                debug!(
                    "desired={} started={} stopped={} active={}",
                    desired,
                    change.started.len(),
                    change.stopped.len(),
                    pool.active()
                );
            }

            if last_log.elapsed() >= PROGRESS_INTERVAL {
                let summary = self.aggregator.summary();
                info!(
                    "Stage {}: desired={}, active={}, iterations={}, failed_checks={}",
                    state.stage.map_or(0, |i| i + 1),
                    state.desired_vus,
                    pool.active(),
                    summary.iterations,
                    summary.checks_failed()
                );
                last_log = Instant::now();
            }
        }

        info!("Schedule complete, stopping {} VUs", pool.active());
        pool.shutdown().await;

        self.aggregator.summary()
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::sync::Mutex;

    use super::*;
    use crate::pool::{StopSignal, VuId};
    use crate::schedule::Stage;
    use crate::worker::tests::{context, ScriptedTransport};
    use crate::worker::HttpWorkerFactory;

    /// Idle workers that report how many of them are alive.
    #[derive(Default)]
    struct CountingFactory {
        alive: Arc<Mutex<usize>>,
        peak: Arc<Mutex<usize>>,
    }

    struct AliveGuard(Arc<Mutex<usize>>);

    impl Drop for AliveGuard {
        fn drop(&mut self) {
            *self.0.lock().unwrap() -= 1;
        }
    }

    impl WorkerFactory for CountingFactory {
        fn worker(&self, _id: VuId, stop: StopSignal) -> impl Future<Output = ()> + Send + 'static {
            {
                let mut alive = self.alive.lock().unwrap();
                *alive += 1;
                let mut peak = self.peak.lock().unwrap();
                *peak = (*peak).max(*alive);
            }
            let guard = AliveGuard(Arc::clone(&self.alive));
            async move {
                let _guard = guard;
                let _ = stop.await;
            }
        }
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_follows_profile_and_stops_everything() {
        let profile = RampProfile::new(
            2,
            vec![Stage::new(secs(2), 6), Stage::new(secs(2), 6), Stage::new(secs(2), 1)],
            Duration::ZERO,
        )
        .unwrap();
        let agg = Arc::new(Aggregator::new());
        let factory = Arc::new(CountingFactory::default());

        let started = Instant::now();
        let summary = Controller::new(profile, Arc::clone(&agg))
            .run(Arc::clone(&factory))
            .await;

        let elapsed = started.elapsed();
        assert!(elapsed >= secs(6) && elapsed < secs(7), "ran for {:?}", elapsed);
        assert_eq!(summary.peak_vus, 6);
        assert_eq!(*factory.peak.lock().unwrap(), 6);
        assert_eq!(*factory.alive.lock().unwrap(), 0);
        assert_eq!(summary.vus_started, summary.vus_stopped);
        assert_eq!(agg.active_vus(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_duration_counts_from_run_start() {
        let agg = Arc::new(Aggregator::new());
        tokio::time::sleep(secs(30)).await;

        let profile = RampProfile::new(1, vec![Stage::new(secs(2), 1)], Duration::ZERO).unwrap();
        let summary = Controller::new(profile, Arc::clone(&agg))
            .run(CountingFactory::default())
            .await;

        assert!(
            summary.duration_secs >= 2.0 && summary.duration_secs < 3.0,
            "duration {}",
            summary.duration_secs
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ramp_down_from_16_to_8_stops_mid_pause_workers() {
        let agg = Arc::new(Aggregator::new());
        let ctx = context(ScriptedTransport::default(), Arc::clone(&agg));
        let factory = HttpWorkerFactory::new(ctx, Some(7));
        let mut pool = VuPool::new(factory, Arc::clone(&agg), Duration::ZERO);

        pool.scale_to(16);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(agg.iterations(), 16);

        // Every worker is now inside its one second pause.
        let change = pool.scale_to(8);
        assert_eq!(change.stopped, (0..8).map(VuId).collect::<Vec<_>>());

        tokio::time::timeout(Duration::from_millis(10), pool.drain_stopping())
            .await
            .expect("stopped workers must not finish their pause");
        assert_eq!(pool.active(), 8);
        assert_eq!(agg.summary().vus_stopped, 8);

        // The survivors keep iterating.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(agg.iterations(), 24);
        pool.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_scaling_profile_end_to_end() {
        let agg = Arc::new(Aggregator::new());
        let ctx = context(ScriptedTransport::default(), Arc::clone(&agg));
        let factory = HttpWorkerFactory::new(ctx, Some(1));

        let summary = Controller::new(RampProfile::scaling(), Arc::clone(&agg))
            .with_tick(Duration::from_millis(500))
            .run(factory)
            .await;

        assert_eq!(summary.peak_vus, 50);
        assert_eq!(summary.vus_started, summary.vus_stopped);
        assert!(summary.iterations > 0);
        assert_eq!(summary.requests, summary.iterations);
        let status = summary.check("status is 200").unwrap();
        assert_eq!(status.passes, summary.iterations);
        assert_eq!(status.fails, 0);
    }
}
