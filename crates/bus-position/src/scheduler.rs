//! Polling scheduler
//!
//! Drives the fetch → reconcile → publish cycle for one tracked bus on a
//! fixed interval. Every async result is checked against the session epoch
//! and cancellation token before it touches state, so teardown and
//! retargeting are deterministic.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use realtime::{Error, Result};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::config::TrackingConfig;
use crate::geocode::GeocodeEnricher;
use crate::provider::{Geocoder, PositionFeed};
use crate::reconciler::{ConnectionStatus, PathHistory, PositionReconciler, TrackedPosition};
use crate::retry::RetryController;
use crate::route::RouteModel;

/// Lifecycle of the scheduler. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Polling,
    Stopped,
}

/// The bus being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingTarget {
    /// Position of the bus in the upstream array.
    pub slot: usize,
}

/// Everything the presentation layer needs to render one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSnapshot {
    pub epoch: u64,
    pub target: Option<TrackingTarget>,
    pub position: Option<TrackedPosition>,
    pub history: PathHistory,
    pub connection_status: ConnectionStatus,
    pub banner: Option<String>,
}

impl TrackingSnapshot {
    fn empty(epoch: u64, target: Option<TrackingTarget>, history_capacity: usize) -> Self {
        Self {
            epoch,
            target,
            position: None,
            history: PathHistory::new(history_capacity),
            connection_status: ConnectionStatus::Connecting,
            banner: None,
        }
    }
}

/// Per-target state. Replaced wholesale on retarget.
#[derive(Debug)]
struct Session {
    epoch: u64,
    target: TrackingTarget,
    reconciler: Mutex<PositionReconciler>,
    retry: Mutex<RetryController>,
    in_flight: AtomicBool,
    cancel: CancellationToken,
}

impl Session {
    fn snapshot(&self, reconciler: &PositionReconciler) -> TrackingSnapshot {
        TrackingSnapshot {
            epoch: self.epoch,
            target: Some(self.target),
            position: reconciler.position().cloned(),
            history: reconciler.history().clone(),
            connection_status: reconciler.status(),
            banner: reconciler.banner().map(ToString::to_string),
        }
    }
}

// Clears the in-flight flag however the poll ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// State shared between the scheduler handle and its spawned tasks.
#[derive(Debug)]
struct Pipeline<F, G: Geocoder> {
    feed: Arc<F>,
    enricher: Option<GeocodeEnricher<G>>,
    config: TrackingConfig,
    epoch: AtomicU64,
    snapshots: watch::Sender<TrackingSnapshot>,
}

impl<F, G: Geocoder> Pipeline<F, G> {
    fn is_current(&self, session: &Session, token: &CancellationToken) -> bool {
        !token.is_cancelled() && self.epoch.load(Ordering::Acquire) == session.epoch
    }

    // The epoch check runs under the channel's write lock, which the
    // control operations also take when they invalidate a session.
    fn publish(
        &self, session: &Session, token: &CancellationToken, reconciler: &PositionReconciler,
    ) -> bool {
        self.snapshots.send_if_modified(|current| {
            if !self.is_current(session, token) {
                return false;
            }
            *current = session.snapshot(reconciler);
            true
        })
    }
}

/// Periodically polls a [`PositionFeed`] and publishes [`TrackingSnapshot`]s.
#[derive(Debug)]
pub struct PollingScheduler<F, G>
where
    F: PositionFeed + 'static,
    G: Geocoder + 'static,
{
    pipeline: Arc<Pipeline<F, G>>,
    route: Arc<RouteModel>,
    interval: Duration,
    state: SchedulerState,
    session: Option<Arc<Session>>,
    loop_token: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
    root: CancellationToken,
    _shutdown: DropGuard,
}

impl<F, G> PollingScheduler<F, G>
where
    F: PositionFeed + 'static,
    G: Geocoder + 'static,
{
    /// Create an idle scheduler polling at `config.poll_interval`.
    #[must_use]
    pub fn new(feed: Arc<F>, route: Arc<RouteModel>, config: TrackingConfig) -> Self {
        let (snapshots, _) =
            watch::channel(TrackingSnapshot::empty(0, None, config.history_capacity));
        let root = CancellationToken::new();
        let interval = config.poll_interval;

        Self {
            pipeline: Arc::new(Pipeline {
                feed,
                enricher: None,
                config,
                epoch: AtomicU64::new(0),
                snapshots,
            }),
            route,
            interval,
            state: SchedulerState::Idle,
            session: None,
            loop_token: None,
            task: None,
            _shutdown: root.clone().drop_guard(),
            root,
        }
    }

    /// Resolve place names with `geocoder`, unless disabled in config.
    #[must_use]
    pub fn with_geocoder(mut self, geocoder: Arc<G>) -> Self {
        if let Some(pipeline) = Arc::get_mut(&mut self.pipeline)
            && pipeline.config.geocode_enabled
        {
            pipeline.enricher =
                Some(GeocodeEnricher::new(geocoder, pipeline.config.geocode_timeout));
        }
        self
    }

    /// Override the polling interval (the demo route polls faster).
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TrackingSnapshot> {
        self.pipeline.snapshots.subscribe()
    }

    /// Latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> TrackingSnapshot {
        self.pipeline.snapshots.borrow().clone()
    }

    #[must_use]
    pub const fn state(&self) -> SchedulerState {
        self.state
    }

    #[must_use]
    pub fn target(&self) -> Option<TrackingTarget> {
        self.session.as_ref().map(|session| session.target)
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.pipeline.epoch.load(Ordering::Acquire)
    }

    /// Start tracking `target`: fetch now, then on every interval.
    ///
    /// Resumes the existing session after [`Self::pause`] when the target is
    /// unchanged; any other target is a [`Self::retarget`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` once the scheduler has been stopped.
    pub fn start(&mut self, target: TrackingTarget) -> Result<()> {
        match self.state {
            SchedulerState::Stopped => Err(Error::Cancelled),
            SchedulerState::Polling if self.target() == Some(target) => Ok(()),
            SchedulerState::Idle if self.target() == Some(target) => {
                if let Some(session) = self.session.clone() {
                    info!(slot = target.slot, epoch = session.epoch, "resuming tracking");
                    self.spawn_loop(session);
                }
                Ok(())
            }
            _ => self.retarget(target),
        }
    }

    /// Tear down the current session and start afresh on `target`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` once the scheduler has been stopped.
    pub fn retarget(&mut self, target: TrackingTarget) -> Result<()> {
        if self.state == SchedulerState::Stopped {
            return Err(Error::Cancelled);
        }
        self.halt_loop();

        let previous = self.session.take();
        let capacity = self.pipeline.config.history_capacity;
        let mut epoch = 0;
        self.pipeline.snapshots.send_modify(|current| {
            if let Some(session) = &previous {
                session.cancel.cancel();
            }
            epoch = self.pipeline.epoch.fetch_add(1, Ordering::AcqRel) + 1;
            *current = TrackingSnapshot::empty(epoch, Some(target), capacity);
        });
        self.pipeline.feed.reset();

        info!(slot = target.slot, epoch, "tracking target");
        let session = Arc::new(Session {
            epoch,
            target,
            reconciler: Mutex::new(PositionReconciler::new(Arc::clone(&self.route), capacity)),
            retry: Mutex::new(RetryController::new(self.pipeline.config.retry)),
            in_flight: AtomicBool::new(false),
            cancel: self.root.child_token(),
        });
        self.session = Some(Arc::clone(&session));
        self.spawn_loop(session);
        Ok(())
    }

    /// Stop polling but keep the session and the last snapshot.
    pub fn pause(&mut self) {
        if self.state != SchedulerState::Polling {
            return;
        }
        self.halt_loop();
        self.state = SchedulerState::Idle;
        debug!(epoch = self.epoch(), "tracking paused");
    }

    /// Tear down for good. Nothing is published after this returns.
    pub fn stop(&mut self) {
        if self.state == SchedulerState::Stopped {
            return;
        }
        self.halt_loop();

        let previous = self.session.take();
        self.pipeline.snapshots.send_if_modified(|_| {
            if let Some(session) = &previous {
                session.cancel.cancel();
            }
            self.pipeline.epoch.fetch_add(1, Ordering::AcqRel);
            false
        });
        self.root.cancel();
        self.state = SchedulerState::Stopped;
        info!(epoch = self.epoch(), "tracking stopped");
    }

    fn halt_loop(&mut self) {
        if let Some(token) = self.loop_token.take() {
            self.pipeline.snapshots.send_if_modified(|_| {
                token.cancel();
                false
            });
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn spawn_loop(&mut self, session: Arc<Session>) {
        let token = session.cancel.child_token();
        self.loop_token = Some(token.clone());
        self.task = Some(tokio::spawn(run_loop(
            Arc::clone(&self.pipeline),
            session,
            token,
            self.interval,
        )));
        self.state = SchedulerState::Polling;
    }
}

async fn run_loop<F, G>(
    pipeline: Arc<Pipeline<F, G>>, session: Arc<Session>, token: CancellationToken,
    period: Duration,
) where
    F: PositionFeed + 'static,
    G: Geocoder + 'static,
{
    // first tick completes immediately
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if session.in_flight.swap(true, Ordering::AcqRel) {
            debug!(
                monotonic_counter.poll_skipped = 1,
                slot = session.target.slot,
                epoch = session.epoch,
                "previous fetch still in flight, skipping tick"
            );
            continue;
        }

        tokio::spawn(poll(Arc::clone(&pipeline), Arc::clone(&session), token.clone()));
    }

    debug!(slot = session.target.slot, epoch = session.epoch, "polling loop finished");
}

async fn poll<F, G>(pipeline: Arc<Pipeline<F, G>>, session: Arc<Session>, token: CancellationToken)
where
    F: PositionFeed + 'static,
    G: Geocoder + 'static,
{
    let _in_flight = InFlight(&session.in_flight);
    let slot = session.target.slot;

    let result = {
        let mut retry = session.retry.lock().await;
        retry
            .run(&token, || {
                let feed = Arc::clone(&pipeline.feed);
                async move { feed.fetch_positions().await }
            })
            .await
    };

    if !pipeline.is_current(&session, &token) {
        debug!(slot, epoch = session.epoch, "discarding stale fetch result");
        return;
    }

    let mut reconciler = session.reconciler.lock().await;
    match result {
        Ok(samples) => {
            let sample = samples.iter().find(|sample| sample.slot == slot);
            if sample.is_none() {
                debug!(slot, slots = samples.len(), "no sample for tracked slot");
            }

            let before = reconciler.last_fix_seq();
            let fix = reconciler.update(sample).map(|p| (p.latitude, p.longitude));
            let after = reconciler.last_fix_seq();

            if let (Some(seq), Some((latitude, longitude))) = (after, fix)
                && before != after
                && let Some(enricher) = pipeline.enricher.clone()
            {
                // outlives a pause; only retarget or stop drops the lookup
                tokio::spawn(enrich(
                    Arc::clone(&pipeline),
                    Arc::clone(&session),
                    session.cancel.clone(),
                    enricher,
                    seq,
                    (latitude, longitude),
                ));
            }
        }
        Err(Error::Cancelled) => return,
        Err(err) => {
            warn!(monotonic_counter.tracking_lost = 1, slot, error = %err, "live location lost");
            reconciler.mark_retries_exhausted();
            if let Some((latitude, longitude)) = pipeline.config.synthetic_fallback
                && reconciler.apply_synthetic(latitude, longitude)
            {
                warn!(slot, latitude, longitude, "showing synthetic position");
            }
        }
    }

    pipeline.publish(&session, &token, &reconciler);
}

async fn enrich<F, G>(
    pipeline: Arc<Pipeline<F, G>>, session: Arc<Session>, token: CancellationToken,
    enricher: GeocodeEnricher<G>, seq: u64, (latitude, longitude): (f64, f64),
) where
    F: PositionFeed + 'static,
    G: Geocoder + 'static,
{
    let name = enricher.resolve(latitude, longitude).await;

    if !pipeline.is_current(&session, &token) {
        debug!(epoch = session.epoch, "discarding stale place name");
        return;
    }

    let mut reconciler = session.reconciler.lock().await;
    if reconciler.apply_place_name(seq, &name) {
        pipeline.publish(&session, &token, &reconciler);
    }
}
