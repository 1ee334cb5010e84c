// ABOUTME: Test support utilities.
// ABOUTME: Scripted in-memory driver, metrics and smoke check plus an orchestrator harness.

use async_trait::async_trait;
use parking_lot::Mutex;
use pdo::Orchestrator;
use pdo::config::{RetryPolicy, RolloutConfig};
use pdo::deploy::{Collaborators, Variant};
use pdo::driver::{DriverError, EnvironmentDriver, Readiness, Route};
use pdo::metrics::{MetricsError, MetricsSource};
use pdo::notify::{ChannelNotifier, TransitionEvent};
use pdo::smoke::{SmokeCheck, SmokeError};
use pdo::store::MemoryStateStore;
use pdo::types::{Color, DeploymentId, ImageDigest, ServiceName, TrafficSplit};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env().add_directive("pdo=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

#[allow(dead_code)]
pub fn service() -> ServiceName {
    ServiceName::new("checkout").unwrap()
}

/// A distinct valid digest per `n`.
#[allow(dead_code)]
pub fn digest(n: u8) -> ImageDigest {
    ImageDigest::parse(&format!("sha256:{}", format!("{n:02x}").repeat(32))).unwrap()
}

/// Short windows so a full rollout takes a few minutes of paused time.
#[allow(dead_code)]
pub fn fast_config() -> RolloutConfig {
    let retry = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1));
    RolloutConfig {
        soak_window: Duration::from_secs(60),
        poll_interval: Duration::from_secs(10),
        consecutive_passes_required: 3,
        error_rate_threshold: 0.01,
        latency_threshold_multiplier: 1.5,
        stage_timeout: Duration::from_secs(120),
        ready_timeout: Duration::from_secs(30),
        metrics_window: Duration::from_secs(30),
        driver_retry: retry.clone(),
        rollback_retry: retry,
        traffic_confirm_timeout: Duration::from_secs(5),
        traffic_confirm_interval: Duration::from_secs(1),
    }
}

/// One call the driver received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Apply(Color, ImageDigest),
    WaitReady(Color),
    SetTraffic(TrafficSplit),
    Decommission(Color),
}

/// What the fake router and replicas look like right now.
#[derive(Debug)]
struct World {
    active: TrafficSplit,
    route: Option<Route>,
    calls: Vec<Call>,
}

/// Scripted environment driver. Everything succeeds unless told otherwise.
#[allow(dead_code)]
pub struct FakeDriver {
    world: Arc<Mutex<World>>,
    apply_failures: Mutex<VecDeque<DriverError>>,
    set_traffic_failures: Mutex<VecDeque<DriverError>>,
    decommission_failures: Mutex<HashMap<Color, DriverError>>,
    readiness: Mutex<Readiness>,
    ignore_traffic: Mutex<bool>,
    hang_at: Mutex<Option<u8>>,
    hung: Arc<Notify>,
}

#[allow(dead_code)]
impl FakeDriver {
    fn new(world: Arc<Mutex<World>>) -> Self {
        Self {
            world,
            apply_failures: Mutex::new(VecDeque::new()),
            set_traffic_failures: Mutex::new(VecDeque::new()),
            decommission_failures: Mutex::new(HashMap::new()),
            readiness: Mutex::new(Readiness::Ready),
            ignore_traffic: Mutex::new(false),
            hang_at: Mutex::new(None),
            hung: Arc::new(Notify::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.world.lock().calls.clone()
    }

    /// Candidate weights of every set_traffic_split call, in order.
    pub fn traffic_weights(&self) -> Vec<u8> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::SetTraffic(split) => Some(split.candidate()),
                _ => None,
            })
            .collect()
    }

    pub fn active(&self) -> TrafficSplit {
        self.world.lock().active
    }

    /// Fail the next apply calls with `errors`, in order.
    pub fn fail_apply(&self, errors: impl IntoIterator<Item = DriverError>) {
        self.apply_failures.lock().extend(errors);
    }

    pub fn fail_set_traffic(&self, errors: impl IntoIterator<Item = DriverError>) {
        self.set_traffic_failures.lock().extend(errors);
    }

    /// Fail every decommission of `color` until cleared.
    pub fn fail_decommission(&self, color: Color, error: DriverError) {
        self.decommission_failures.lock().insert(color, error);
    }

    pub fn clear_decommission_failures(&self) {
        self.decommission_failures.lock().clear();
    }

    pub fn set_readiness(&self, readiness: Readiness) {
        *self.readiness.lock() = readiness;
    }

    /// Accept set_traffic_split calls without ever applying them.
    pub fn ignore_traffic(&self) {
        *self.ignore_traffic.lock() = true;
    }

    /// Never return from a set_traffic_split call for candidate weight `weight`.
    pub fn hang_at(&self, weight: u8) {
        *self.hang_at.lock() = Some(weight);
    }

    /// Resolves once a call is hanging.
    pub fn hung(&self) -> Arc<Notify> {
        self.hung.clone()
    }

    fn record(&self, call: Call) {
        self.world.lock().calls.push(call);
    }
}

#[async_trait]
impl EnvironmentDriver for FakeDriver {
    async fn apply(&self, _service: &ServiceName, variant: &Variant) -> Result<(), DriverError> {
        self.record(Call::Apply(variant.color, variant.image_digest.clone()));
        match self.apply_failures.lock().pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn wait_ready(
        &self,
        _service: &ServiceName,
        variant: &Variant,
        timeout: Duration,
    ) -> Result<Readiness, DriverError> {
        self.record(Call::WaitReady(variant.color));
        let readiness = *self.readiness.lock();
        if readiness == Readiness::TimedOut {
            tokio::time::sleep(timeout).await;
        }
        Ok(readiness)
    }

    async fn set_traffic_split(
        &self,
        _service: &ServiceName,
        route: Route,
        split: TrafficSplit,
    ) -> Result<(), DriverError> {
        self.record(Call::SetTraffic(split));
        let hang = *self.hang_at.lock() == Some(split.candidate());
        if hang {
            self.hung.notify_one();
            std::future::pending::<()>().await;
        }
        if let Some(e) = self.set_traffic_failures.lock().pop_front() {
            return Err(e);
        }
        if !*self.ignore_traffic.lock() {
            let mut world = self.world.lock();
            world.active = split;
            world.route = Some(route);
        }
        Ok(())
    }

    async fn active_traffic_split(
        &self,
        _service: &ServiceName,
        _route: Route,
    ) -> Result<TrafficSplit, DriverError> {
        Ok(self.world.lock().active)
    }

    async fn decommission(&self, _service: &ServiceName, variant: &Variant) -> Result<(), DriverError> {
        self.record(Call::Decommission(variant.color));
        match self.decommission_failures.lock().get(&variant.color) {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

/// Metrics keyed by the candidate weight the fake router is serving.
#[allow(dead_code)]
pub struct FakeMetrics {
    world: Arc<Mutex<World>>,
    error_rates: Mutex<HashMap<u8, f64>>,
    candidate_latency: Mutex<HashMap<u8, f64>>,
    unavailable_at: Mutex<Option<u8>>,
    query_delay: Mutex<Option<Duration>>,
}

#[allow(dead_code)]
impl FakeMetrics {
    fn new(world: Arc<Mutex<World>>) -> Self {
        Self {
            world,
            error_rates: Mutex::new(HashMap::new()),
            candidate_latency: Mutex::new(HashMap::new()),
            unavailable_at: Mutex::new(None),
            query_delay: Mutex::new(None),
        }
    }

    pub fn error_rate_at(&self, weight: u8, rate: f64) {
        self.error_rates.lock().insert(weight, rate);
    }

    pub fn latency_at(&self, weight: u8, seconds: f64) {
        self.candidate_latency.lock().insert(weight, seconds);
    }

    /// Every query fails while the router serves `weight`.
    pub fn unavailable_at(&self, weight: u8) {
        *self.unavailable_at.lock() = Some(weight);
    }

    /// Every error-rate query takes `delay` before answering.
    pub fn slow_queries(&self, delay: Duration) {
        *self.query_delay.lock() = Some(delay);
    }

    fn live_weight(&self) -> Result<u8, MetricsError> {
        let weight = self.world.lock().active.candidate();
        if *self.unavailable_at.lock() == Some(weight) {
            return Err(MetricsError::Unavailable("prometheus unreachable".to_string()));
        }
        Ok(weight)
    }
}

const STABLE_LATENCY: f64 = 0.120;

#[async_trait]
impl MetricsSource for FakeMetrics {
    async fn query_error_rate(
        &self,
        _service: &ServiceName,
        _variant: &Variant,
        _window: Duration,
    ) -> Result<f64, MetricsError> {
        let delay = *self.query_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let weight = self.live_weight()?;
        Ok(self.error_rates.lock().get(&weight).copied().unwrap_or(0.001))
    }

    async fn query_latency_p95(
        &self,
        _service: &ServiceName,
        variant: &Variant,
        _window: Duration,
    ) -> Result<f64, MetricsError> {
        let weight = self.live_weight()?;
        let candidate = self.world.lock().route.map(|r| r.candidate);
        if Some(variant.color) != candidate {
            return Ok(STABLE_LATENCY);
        }
        Ok(self
            .candidate_latency
            .lock()
            .get(&weight)
            .copied()
            .unwrap_or(STABLE_LATENCY))
    }
}

/// Smoke check that passes unless told to fail.
#[derive(Default)]
pub struct FakeSmoke {
    failure: Mutex<Option<String>>,
    checked: Mutex<Vec<Color>>,
}

#[allow(dead_code)]
impl FakeSmoke {
    pub fn fail_with(&self, reason: &str) {
        *self.failure.lock() = Some(reason.to_string());
    }

    pub fn checked(&self) -> Vec<Color> {
        self.checked.lock().clone()
    }
}

#[async_trait]
impl SmokeCheck for FakeSmoke {
    async fn check(&self, _service: &ServiceName, variant: &Variant) -> Result<(), SmokeError> {
        self.checked.lock().push(variant.color);
        match self.failure.lock().clone() {
            Some(reason) => Err(SmokeError::AssertionFailed {
                check: "GET /healthz".to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

/// An orchestrator wired to fakes, sharing one in-memory store.
#[allow(dead_code)]
pub struct Harness {
    pub store: Arc<MemoryStateStore>,
    pub driver: Arc<FakeDriver>,
    pub metrics: Arc<FakeMetrics>,
    pub smoke: Arc<FakeSmoke>,
    pub events: mpsc::UnboundedReceiver<TransitionEvent>,
    pub orchestrator: Orchestrator,
}

#[allow(dead_code)]
impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStateStore::new()))
    }

    /// A fresh process: new fakes and orchestrator over an existing store.
    pub fn with_store(store: Arc<MemoryStateStore>) -> Self {
        init_tracing();
        let world = Arc::new(Mutex::new(World {
            active: TrafficSplit::ALL_STABLE,
            route: None,
            calls: Vec::new(),
        }));
        let driver = Arc::new(FakeDriver::new(world.clone()));
        let metrics = Arc::new(FakeMetrics::new(world));
        let smoke = Arc::new(FakeSmoke::default());
        let (notifier, events) = ChannelNotifier::new();

        let orchestrator = Orchestrator::new(Collaborators {
            store: store.clone(),
            driver: driver.clone(),
            metrics: metrics.clone(),
            smoke: smoke.clone(),
            notifier: Arc::new(notifier),
        });

        Self {
            store,
            driver,
            metrics,
            smoke,
            events,
            orchestrator,
        }
    }

    /// Record digest(0) on blue as the running stable version.
    pub fn adopt(&self) -> DeploymentId {
        self.orchestrator
            .adopt_stable(&service(), digest(0), Color::Blue, 2, fast_config())
            .unwrap()
    }

    pub fn start(&self, n: u8) -> DeploymentId {
        self.orchestrator
            .start_deployment(&service(), digest(n), fast_config())
            .unwrap()
    }

    /// Every event delivered so far.
    pub fn drain_events(&mut self) -> Vec<TransitionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
