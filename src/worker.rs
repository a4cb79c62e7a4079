//! The request/check/pause loop each virtual user runs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

use crate::aggregator::{Aggregator, CheckResult};
use crate::error::TransportError;
use crate::pool::{StopSignal, VuId, WorkerFactory};
use crate::targets::{Endpoint, RequestTarget, TargetPool};
use crate::transport::{Response, Transport};

/// A named assertion over a response. A request that never got a response
/// fails every check.
#[derive(Debug, Clone)]
pub struct Check {
    name: Arc<str>,
    status: u16,
}

impl Check {
    pub fn status_is(status: u16) -> Self {
        Self {
            name: format!("status is {}", status).into(),
            status,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn evaluate(&self, outcome: &Result<Response, TransportError>) -> CheckResult {
        let passed = matches!(outcome, Ok(response) if response.status == self.status);
        CheckResult::new(Arc::clone(&self.name), passed)
    }
}

/// Everything a worker shares with its siblings.
pub struct WorkerContext<T> {
    pub transport: Arc<T>,
    pub endpoint: Endpoint,
    pub targets: TargetPool,
    pub checks: Arc<[Check]>,
    pub aggregator: Arc<Aggregator>,
    pub pause: Duration,
    pub graceful_ramp_down: Duration,
}

impl<T> Clone for WorkerContext<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            endpoint: self.endpoint.clone(),
            targets: self.targets.clone(),
            checks: Arc::clone(&self.checks),
            aggregator: Arc::clone(&self.aggregator),
            pause: self.pause,
            graceful_ramp_down: self.graceful_ramp_down,
        }
    }
}

pub struct Worker<T> {
    id: VuId,
    ctx: WorkerContext<T>,
    rng: StdRng,
}

impl<T: Transport> Worker<T> {
    pub fn new(id: VuId, ctx: WorkerContext<T>, rng: StdRng) -> Self {
        Self { id, ctx, rng }
    }

    /// Runs iterations back to back until `stop` resolves.
    pub async fn run(mut self, mut stop: StopSignal) {
        debug!("{} started", self.id);

        loop {
            let target = self.ctx.targets.select(&mut self.rng).clone();
            let url = self.ctx.endpoint.request_url(&target);
            let started = Instant::now();

            let request = self.ctx.transport.get(url);
            tokio::pin!(request);

            let outcome = tokio::select! {
                outcome = &mut request => outcome,
                _ = &mut stop => {
                    // Only a graceful ramp-down lets the in-flight request land.
                    if !self.ctx.graceful_ramp_down.is_zero() {
                        if let Ok(outcome) = timeout(self.ctx.graceful_ramp_down, request).await {
                            self.record(&target, outcome, started.elapsed());
                        }
                    }
                    break;
                }
            };

            self.record(&target, outcome, started.elapsed());

            tokio::select! {
                _ = sleep(self.ctx.pause) => {}
                _ = &mut stop => break,
            }
        }

        debug!("{} exiting", self.id);
    }

    fn record(
        &self,
        target: &RequestTarget,
        outcome: Result<Response, TransportError>,
        latency: Duration,
    ) {
        let aggregator = &self.ctx.aggregator;

        match &outcome {
            Ok(response) => {
                aggregator.record_request(latency, response.bytes);
                if response.status != 200 {
                    debug!("{} got {} for {}", self.id, response.status, target);
                }
            }
            Err(e) => {
                aggregator.record_transport_error();
                debug!("{} request for {} failed: {}", self.id, target, e);
            }
        }

        for check in self.ctx.checks.iter() {
            aggregator.record(check.evaluate(&outcome));
        }
        aggregator.record_iteration();
    }
}

/// Builds one [`Worker`] per virtual user.
pub struct HttpWorkerFactory<T> {
    ctx: WorkerContext<T>,
    seed: Option<u64>,
}

impl<T: Transport> HttpWorkerFactory<T> {
    pub fn new(ctx: WorkerContext<T>, seed: Option<u64>) -> Self {
        Self { ctx, seed }
    }

    fn rng_for(&self, id: VuId) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(id.0)),
            None => StdRng::from_os_rng(),
        }
    }
}

impl<T: Transport> WorkerFactory for HttpWorkerFactory<T> {
    fn worker(&self, id: VuId, stop: StopSignal) -> impl Future<Output = ()> + Send + 'static {
        Worker::new(id, self.ctx.clone(), self.rng_for(id)).run(stop)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use tokio::sync::oneshot;
    use url::Url;

    use super::*;

    /// Replays scripted outcomes, then answers 200 forever.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        script: Mutex<VecDeque<Result<Response, TransportError>>>,
        pub(crate) seen: Mutex<Vec<Url>>,
        latency: Duration,
    }

    impl ScriptedTransport {
        pub(crate) fn new(script: Vec<Result<Response, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                ..Self::default()
            }
        }

        pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }
    }

    impl Transport for ScriptedTransport {
        async fn get(&self, url: Url) -> Result<Response, TransportError> {
            self.seen.lock().unwrap().push(url);
            let next = self.script.lock().unwrap().pop_front();
            if !self.latency.is_zero() {
                sleep(self.latency).await;
            }
            next.unwrap_or(Ok(Response {
                status: 200,
                bytes: 0,
            }))
        }
    }

    pub(crate) fn context<T>(transport: T, aggregator: Arc<Aggregator>) -> WorkerContext<T> {
        WorkerContext {
            transport: Arc::new(transport),
            endpoint: Endpoint::new("http://localhost:8080").unwrap(),
            targets: TargetPool::fixed("https://google.com"),
            checks: Arc::from([Check::status_is(200)]),
            aggregator,
            pause: Duration::from_secs(1),
            graceful_ramp_down: Duration::ZERO,
        }
    }

    fn ok(status: u16) -> Result<Response, TransportError> {
        Ok(Response { status, bytes: 0 })
    }

    #[test]
    fn test_status_check_name_and_outcomes() {
        let check = Check::status_is(200);
        assert_eq!(check.name(), "status is 200");
        assert!(check.evaluate(&ok(200)).passed);
        assert!(!check.evaluate(&ok(500)).passed);
        assert!(!check.evaluate(&Err(TransportError::Timeout)).passed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_does_not_halt_worker() {
        let agg = Arc::new(Aggregator::new());
        let ctx = context(ScriptedTransport::new(vec![ok(500)]), Arc::clone(&agg));
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(
            Worker::new(VuId(0), ctx, StdRng::seed_from_u64(1)).run(stop_rx),
        );

        sleep(Duration::from_millis(500)).await;
        let tally = agg.tally("status is 200");
        assert_eq!((tally.passes, tally.fails), (0, 1));
        assert_eq!(agg.iterations(), 1);

        // Second iteration only after the one second pause.
        sleep(Duration::from_millis(400)).await;
        assert_eq!(agg.iterations(), 1);

        sleep(Duration::from_millis(200)).await;
        let tally = agg.tally("status is 200");
        assert_eq!((tally.passes, tally.fails), (1, 1));
        assert_eq!(agg.iterations(), 2);

        stop_tx.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(agg.iterations(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_fails_every_check() {
        let agg = Arc::new(Aggregator::new());
        let mut ctx = context(
            ScriptedTransport::new(vec![Err(TransportError::Connect("refused".into()))]),
            Arc::clone(&agg),
        );
        ctx.checks = Arc::from([Check::status_is(200), Check::status_is(204)]);
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(
            Worker::new(VuId(0), ctx, StdRng::seed_from_u64(1)).run(stop_rx),
        );

        sleep(Duration::from_millis(1500)).await;
        stop_tx.send(()).unwrap();
        handle.await.unwrap();

        let summary = agg.summary();
        assert_eq!(summary.transport_errors, 1);
        assert_eq!(summary.iterations, 2);
        assert_eq!(summary.check("status is 200").map(|c| (c.passes, c.fails)), Some((1, 1)));
        assert_eq!(summary.check("status is 204").map(|c| (c.passes, c.fails)), Some((0, 2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cuts_pause_short() {
        let agg = Arc::new(Aggregator::new());
        let ctx = context(ScriptedTransport::default(), Arc::clone(&agg));
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(
            Worker::new(VuId(0), ctx, StdRng::seed_from_u64(1)).run(stop_rx),
        );

        sleep(Duration::from_millis(100)).await;
        let stopped_at = Instant::now();
        stop_tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(stopped_at.elapsed() < Duration::from_millis(1));
        assert_eq!(agg.iterations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_request_without_grace_drops_it() {
        let agg = Arc::new(Aggregator::new());
        let transport = ScriptedTransport::default().with_latency(Duration::from_secs(5));
        let ctx = context(transport, Arc::clone(&agg));
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(
            Worker::new(VuId(0), ctx, StdRng::seed_from_u64(1)).run(stop_rx),
        );

        sleep(Duration::from_secs(1)).await;
        stop_tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(agg.iterations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_request_with_grace_records_it() {
        let agg = Arc::new(Aggregator::new());
        let transport = ScriptedTransport::default().with_latency(Duration::from_secs(2));
        let mut ctx = context(transport, Arc::clone(&agg));
        ctx.graceful_ramp_down = Duration::from_secs(5);
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(
            Worker::new(VuId(0), ctx, StdRng::seed_from_u64(1)).run(stop_rx),
        );

        sleep(Duration::from_secs(1)).await;
        let stopped_at = Instant::now();
        stop_tx.send(()).unwrap();
        handle.await.unwrap();

        // The request lands a second later and the worker exits without pausing.
        let waited = stopped_at.elapsed();
        assert!(waited >= Duration::from_millis(999) && waited < Duration::from_millis(1100));
        assert_eq!(agg.iterations(), 1);
        assert_eq!(agg.tally("status is 200").passes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_hit_the_screenshot_endpoint() {
        let agg = Arc::new(Aggregator::new());
        let transport = Arc::new(ScriptedTransport::default());
        let mut ctx = context(ScriptedTransport::default(), Arc::clone(&agg));
        ctx.transport = Arc::clone(&transport);
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(
            Worker::new(VuId(0), ctx, StdRng::seed_from_u64(1)).run(stop_rx),
        );

        sleep(Duration::from_millis(2500)).await;
        stop_tx.send(()).unwrap();
        handle.await.unwrap();

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|url| url.as_str()
            == "http://localhost:8080/api/screenshot?url=https%3A%2F%2Fgoogle.com"));
    }
}
