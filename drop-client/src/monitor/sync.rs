//! The monitor loop.
//!
//! A [`Monitor`] runs one tick per interval:
//! 1. Read the local value and fingerprint it.
//! 2. `head` the remote record (no payload transfer).
//! 3. Ask [`SyncState::plan`] what to do.
//! 4. Push or pull if needed, then record the new state.
//!
//! Ticks are strictly sequential. Cancellation is checked between ticks,
//! never during one, so a transfer in flight always completes (or times
//! out inside the client).

use std::sync::Arc;
use std::time::Duration;

use kvdrop_core::{
    Clock, Plan, SyncEvent, SyncMode, SyncState, SystemClock, TickOutcome, TickPhase,
};
use kvdrop_types::{Fingerprint, PutOptions, Token};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{LocalResource, MonitorError};
use crate::client::{ClientError, SecretClient};
use crate::crypto::Cipher;
use crate::store::RemoteStore;

/// Default time between ticks.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration for one monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Record to keep in step with the local resource.
    pub token: Token,
    /// Sync direction.
    pub mode: SyncMode,
    /// Time between ticks.
    pub interval: Duration,
    /// Options used for every push.
    pub put_options: PutOptions,
}

impl MonitorConfig {
    /// Create a configuration with the default interval and no TTL.
    pub fn new(token: Token, mode: SyncMode) -> Self {
        Self {
            token,
            mode,
            interval: DEFAULT_INTERVAL,
            put_options: PutOptions::default(),
        }
    }

    /// Set the tick interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the options used for pushes.
    pub fn with_put_options(mut self, options: PutOptions) -> Self {
        self.put_options = options;
        self
    }

    /// Check the configuration.
    ///
    /// A monitored record is read on every pull, so it must not have a
    /// read budget.
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.interval.is_zero() {
            return Err(MonitorError::InvalidConfig("interval must be non-zero".into()));
        }
        if self.put_options.max_reads.is_some() {
            return Err(MonitorError::InvalidConfig(
                "monitored records cannot have a read limit".into(),
            ));
        }
        self.put_options
            .validate()
            .map_err(|e| MonitorError::InvalidConfig(e.to_string()))
    }
}

/// Observable monitor status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorStatus {
    /// Current phase.
    pub phase: TickPhase,
    /// Time of the last completed tick (unix milliseconds).
    pub last_sync_ms: Option<u64>,
}

impl Default for MonitorStatus {
    fn default() -> Self {
        Self {
            phase: TickPhase::Idle,
            last_sync_ms: None,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Transfer performed, if any.
    pub outcome: TickOutcome,
    /// Whether both sides had changed since the last sync.
    pub conflict: bool,
}

impl TickReport {
    fn new(outcome: TickOutcome, conflict: bool) -> Self {
        Self { outcome, conflict }
    }
}

/// Keeps one local resource and one remote record in step.
pub struct Monitor<S: RemoteStore, R: LocalResource> {
    client: Arc<SecretClient<S>>,
    resource: R,
    cipher: Arc<Cipher>,
    config: MonitorConfig,
    clock: Arc<dyn Clock>,
    status: watch::Sender<MonitorStatus>,
    events: Option<mpsc::UnboundedSender<SyncEvent>>,
}

impl<S: RemoteStore, R: LocalResource> Monitor<S, R> {
    /// Create a monitor.
    ///
    /// Fails if the configuration is invalid, or if a pull monitor is given
    /// a resource it cannot write.
    pub fn new(
        client: Arc<SecretClient<S>>,
        resource: R,
        cipher: Arc<Cipher>,
        config: MonitorConfig,
    ) -> Result<Self, MonitorError> {
        config.validate()?;
        if config.mode == SyncMode::Pull && !resource.is_writable() {
            return Err(MonitorError::InvalidConfig(
                "pull monitor needs a writable resource".into(),
            ));
        }
        let (status, _) = watch::channel(MonitorStatus::default());
        Ok(Self {
            client,
            resource,
            cipher,
            config,
            clock: Arc::new(SystemClock),
            status,
            events: None,
        })
    }

    /// Use a different clock for sync timestamps.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Report [`SyncEvent`]s on `events` while running.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<SyncEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// The monitor's configuration.
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Watch the monitor's status.
    pub fn subscribe(&self) -> watch::Receiver<MonitorStatus> {
        self.status.subscribe()
    }

    /// Current status.
    pub fn status(&self) -> MonitorStatus {
        *self.status.borrow()
    }

    /// Run one tick against `state` and return the next state.
    ///
    /// On error `state` is still the right input for the next tick: nothing
    /// is recorded unless the tick completed.
    pub async fn tick(&self, state: &SyncState) -> Result<(SyncState, TickReport), MonitorError> {
        self.set_phase(TickPhase::Checking);
        let result = self.tick_inner(state).await;
        let last_sync_ms = match &result {
            Ok((next, _)) => next.last_sync_ms(),
            Err(_) => state.last_sync_ms(),
        };
        self.status.send_replace(MonitorStatus {
            phase: TickPhase::Idle,
            last_sync_ms,
        });
        result
    }

    async fn tick_inner(&self, state: &SyncState) -> Result<(SyncState, TickReport), MonitorError> {
        let token = &self.config.token;

        let local_value = self.resource.read().await?;
        let local = local_value.as_deref().map(Fingerprint::of);

        let remote = match self.client.head(token).await {
            Ok(meta) => Some(meta.fingerprint),
            Err(ClientError::NotFound | ClientError::Expired) => None,
            Err(e) => return Err(e.into()),
        };

        let plan = state.plan(self.config.mode, local, remote);
        debug!(token = %token, ?plan, "tick planned");
        self.set_phase(plan.phase());
        if plan.is_conflict() {
            warn!(token = %token, mode = ?self.config.mode, "both sides changed since last sync");
        }

        match plan {
            Plan::Idle => Ok((
                state.after_idle(self.clock.now_ms()),
                TickReport::new(TickOutcome::Unchanged, false),
            )),
            Plan::Adopt { remote } => Ok((
                state.after_adopt(remote, self.clock.now_ms()),
                TickReport::new(TickOutcome::Adopted, false),
            )),
            Plan::Push { conflict } => {
                let Some(value) = local_value else {
                    return Ok((
                        state.after_idle(self.clock.now_ms()),
                        TickReport::new(TickOutcome::Unchanged, false),
                    ));
                };
                let meta = self
                    .client
                    .put_secret_at(token, &value, self.config.put_options, &self.cipher)
                    .await?;
                let pushed = Fingerprint::of(&value);
                info!(token = %token, fingerprint = %pushed, "pushed local value");
                Ok((
                    state.after_transfer(pushed, meta.fingerprint, self.clock.now_ms()),
                    TickReport::new(TickOutcome::Pushed, conflict),
                ))
            }
            Plan::Pull { conflict } => {
                let retrieved = match self.client.get_secret(token, &self.cipher).await {
                    Ok(retrieved) => retrieved,
                    // Removed between head and get.
                    Err(ClientError::NotFound | ClientError::Expired) => {
                        return Ok((
                            state.after_adopt(None, self.clock.now_ms()),
                            TickReport::new(TickOutcome::Adopted, false),
                        ));
                    }
                    Err(e) => return Err(e.into()),
                };
                let pulled = Fingerprint::of(&retrieved.value);
                if local != Some(pulled) {
                    self.resource.write(&retrieved.value).await?;
                }
                info!(token = %token, fingerprint = %pulled, "pulled remote value");
                Ok((
                    state.after_transfer(pulled, retrieved.meta.fingerprint, self.clock.now_ms()),
                    TickReport::new(TickOutcome::Pulled, conflict),
                ))
            }
        }
    }

    /// Tick every interval until `cancel` fires.
    ///
    /// Transient failures are reported as [`SyncEvent::TickFailed`] and the
    /// loop keeps going with the last good state. Fatal failures end the
    /// loop. Returns the final state on cancellation.
    pub async fn run(
        &self,
        mut state: SyncState,
        cancel: CancellationToken,
    ) -> Result<SyncState, MonitorError> {
        let token = &self.config.token;
        info!(
            token = %token,
            mode = ?self.config.mode,
            interval_ms = self.config.interval.as_millis() as u64,
            "monitor started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.tick(&state).await {
                Ok((next, report)) => {
                    self.report(&next, report);
                    state = next;
                }
                Err(e) if e.is_fatal() => {
                    error!(token = %token, error = %e, "monitor stopped on fatal error");
                    return Err(e);
                }
                Err(e) => {
                    warn!(token = %token, error = %e, "tick failed");
                    self.emit(SyncEvent::TickFailed {
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(token = %token, "monitor stopped");
        Ok(state)
    }

    fn report(&self, next: &SyncState, report: TickReport) {
        if report.conflict {
            self.emit(SyncEvent::Conflict {
                mode: self.config.mode,
            });
        }
        let fingerprint = next.last_local_fingerprint();
        match (report.outcome, fingerprint) {
            (TickOutcome::Pushed, Some(fingerprint)) => {
                self.emit(SyncEvent::Pushed { fingerprint })
            }
            (TickOutcome::Pulled, Some(fingerprint)) => {
                self.emit(SyncEvent::Pulled { fingerprint })
            }
            _ => self.emit(SyncEvent::Unchanged),
        }
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(events) = &self.events {
            // Receiver gone: nobody is listening any more.
            let _ = events.send(event);
        }
    }

    fn set_phase(&self, phase: TickPhase) {
        self.status.send_modify(|status| status.phase = phase);
    }
}

impl<S, R> Monitor<S, R>
where
    S: RemoteStore + 'static,
    R: LocalResource + 'static,
{
    /// Run the monitor on its own task.
    pub fn spawn(self, state: SyncState) -> MonitorHandle {
        let cancel = CancellationToken::new();
        let status = self.subscribe();
        let task_cancel = cancel.clone();
        let join = tokio::spawn(async move { self.run(state, task_cancel).await });
        MonitorHandle {
            cancel,
            status,
            join,
        }
    }
}

impl<S: RemoteStore, R: LocalResource> std::fmt::Debug for Monitor<S, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish()
    }
}

/// Handle to a spawned monitor.
#[derive(Debug)]
pub struct MonitorHandle {
    cancel: CancellationToken,
    status: watch::Receiver<MonitorStatus>,
    join: JoinHandle<Result<SyncState, MonitorError>>,
}

impl MonitorHandle {
    /// Ask the monitor to stop after its current tick.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Current status.
    pub fn status(&self) -> MonitorStatus {
        *self.status.borrow()
    }

    /// Watch status changes.
    pub fn subscribe(&self) -> watch::Receiver<MonitorStatus> {
        self.status.clone()
    }

    /// Whether the task has finished.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the monitor to finish.
    pub async fn join(self) -> Result<SyncState, MonitorError> {
        self.join
            .await
            .map_err(|e| MonitorError::TaskFailed(e.to_string()))?
    }

    /// Stop the monitor and wait for it.
    pub async fn shutdown(self) -> Result<SyncState, MonitorError> {
        self.stop();
        self.join().await
    }
}
