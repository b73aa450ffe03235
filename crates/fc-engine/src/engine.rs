//! The caller-facing engine: sample processing, overrides and queries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use fc_core::{
    AuditEvent, GeofenceRegion, LinearDetector, LocationSample, MembershipDetector,
    MembershipState, RegionId, RegionPatch, RegionScope, TimeEntry, TransitionEvent,
    TransitionKind, TransitionMachine, UserId, recover_membership,
};

use crate::error::{EngineError, bounded};
use crate::lifecycle::{LifecycleManager, TransitionReport};
use crate::monitor::{LocationProvider, MonitorHandle, MonitorStatus, ProviderEvent};
use crate::notify::Notifier;
use crate::registry::{DEFAULT_CACHE_TTL, GeofenceRegistry};
use crate::store::Store;

/// Default bound on each persistence call.
pub const DEFAULT_PERSISTENCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Who is tracked and how.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub user_id: UserId,
    pub scope: RegionScope,
    /// How long a membership change must persist before it is committed.
    pub dwell: chrono::Duration,
    pub cache_ttl: Duration,
    pub persistence_timeout: Duration,
}

impl EngineConfig {
    pub fn new(user_id: UserId, scope: RegionScope) -> Self {
        Self {
            user_id,
            scope,
            dwell: chrono::Duration::zero(),
            cache_ttl: DEFAULT_CACHE_TTL,
            persistence_timeout: DEFAULT_PERSISTENCE_TIMEOUT,
        }
    }
}

/// Snapshot returned by [`Engine::status`].
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub user_id: UserId,
    pub monitor: MonitorStatus,
    pub membership: MembershipState,
    pub active_entry: Option<TimeEntry>,
}

/// Per-user state guarded by the user's lock. The machine is restored from
/// storage on first use.
#[derive(Debug, Default)]
struct UserSession {
    machine: Option<TransitionMachine>,
}

struct Inner {
    config: EngineConfig,
    store: Arc<dyn Store>,
    registry: GeofenceRegistry,
    lifecycle: LifecycleManager,
    detector: Arc<dyn MembershipDetector>,
    sessions: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<UserSession>>>>,
    monitor: MonitorHandle,
}

/// Geofence time tracking engine.
///
/// Cheap to clone; clones share state. All work for one user, whether a
/// location sample or a manual action, runs under that user's lock, so at
/// most one time entry can be opened per user even when samples race.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    pub fn new(config: EngineConfig, store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_detector(config, store, notifier, Arc::new(LinearDetector))
    }

    /// Creates an engine with a custom membership detector.
    pub fn with_detector(
        config: EngineConfig,
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        detector: Arc<dyn MembershipDetector>,
    ) -> Self {
        let timeout = config.persistence_timeout;
        let registry = GeofenceRegistry::new(Arc::clone(&store), config.cache_ttl, timeout);
        let lifecycle = LifecycleManager::new(Arc::clone(&store), notifier, timeout);
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                registry,
                lifecycle,
                detector,
                sessions: Mutex::new(HashMap::new()),
                monitor: MonitorHandle::new(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    fn user(&self) -> &UserId {
        &self.inner.config.user_id
    }

    fn timeout(&self) -> Duration {
        self.inner.config.persistence_timeout
    }

    fn session(&self, user_id: &UserId) -> Arc<tokio::sync::Mutex<UserSession>> {
        let mut sessions = match self.inner.sessions.lock() {
            Ok(sessions) => sessions,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(sessions.entry(user_id.clone()).or_default())
    }

    /// Rebuilds the state machine from the audit log and the open entry.
    async fn restore(&self, user_id: &UserId) -> Result<TransitionMachine, EngineError> {
        let store = &self.inner.store;
        let last = bounded(
            self.timeout(),
            "read last transition",
            store.last_transition_event(user_id),
        )
        .await?;
        let open = bounded(
            self.timeout(),
            "query open time entry",
            store.query_open_time_entry(user_id),
        )
        .await?;
        let state = recover_membership(last.as_ref(), open.as_ref());
        tracing::debug!(user_id = %user_id, ?state, "restored membership state");
        Ok(TransitionMachine::with_state(state, self.inner.config.dwell))
    }

    async fn machine<'a>(
        &self,
        session: &'a mut UserSession,
        user_id: &UserId,
    ) -> Result<&'a mut TransitionMachine, EngineError> {
        let machine = match session.machine.take() {
            Some(machine) => machine,
            None => self.restore(user_id).await?,
        };
        Ok(session.machine.insert(machine))
    }

    // ========== Location processing ==========

    /// Classifies one sample and dispatches any resulting transitions.
    ///
    /// The machine moves past each transition as soon as it is processed.
    /// On error the next sample recomputes only the unprocessed ones.
    pub async fn process_sample(
        &self,
        sample: &LocationSample,
    ) -> Result<Vec<TransitionReport>, EngineError> {
        let user_id = self.user().clone();
        let session = self.session(&user_id);
        let mut session = session.lock().await;
        let machine = self.machine(&mut session, &user_id).await?;

        let regions = self.inner.registry.list(&self.inner.config.scope).await?;
        let detected = self
            .inner
            .detector
            .detect(sample, &regions)
            .map(|region| region.id.clone());
        tracing::trace!(
            lat = sample.position.lat,
            lon = sample.position.lon,
            accuracy_m = sample.accuracy_m,
            detected = ?detected,
            "classified sample"
        );

        let mut next = machine.clone();
        let events = next.advance(detected.as_ref(), sample);
        let mut reports = Vec::with_capacity(events.len());
        for event in &events {
            reports.push(self.dispatch(&user_id, event, &regions).await?);
            machine.settle(event);
        }
        *machine = next;
        Ok(reports)
    }

    /// Re-delivers a transition under the user's lock without touching the
    /// membership state. Safe to repeat.
    pub async fn replay_transition(
        &self,
        event: &TransitionEvent,
    ) -> Result<TransitionReport, EngineError> {
        let user_id = self.user().clone();
        let session = self.session(&user_id);
        let _guard = session.lock().await;
        let regions = self.inner.registry.list(&self.inner.config.scope).await?;
        self.dispatch(&user_id, event, &regions).await
    }

    async fn dispatch(
        &self,
        user_id: &UserId,
        event: &TransitionEvent,
        regions: &[GeofenceRegion],
    ) -> Result<TransitionReport, EngineError> {
        let region = match regions.iter().find(|region| region.id == event.region_id) {
            Some(region) => Some(region.clone()),
            None => self.inner.registry.get(&event.region_id).await?,
        };
        let lifecycle = &self.inner.lifecycle;
        match event.kind {
            TransitionKind::Enter => {
                let region =
                    region.ok_or_else(|| EngineError::RegionNotFound(event.region_id.clone()))?;
                lifecycle.on_enter(user_id, &region, event).await
            }
            TransitionKind::Exit => lifecycle.on_exit(user_id, region.as_ref(), event).await,
        }
    }

    /// Routes one provider update.
    ///
    /// While permission is revoked samples are rejected with
    /// [`EngineError::PermissionDenied`]; a no-fix update is
    /// [`EngineError::SampleUnavailable`]. Neither changes any state.
    pub async fn handle_provider_event(
        &self,
        event: ProviderEvent,
    ) -> Result<Vec<TransitionReport>, EngineError> {
        let monitor = &self.inner.monitor;
        match event {
            ProviderEvent::Sample(sample) => {
                if monitor.status() == MonitorStatus::PermissionDisabled {
                    return Err(EngineError::PermissionDenied);
                }
                self.process_sample(&sample).await
            }
            ProviderEvent::NoFix => Err(EngineError::SampleUnavailable),
            ProviderEvent::PermissionDenied => {
                if monitor.set_permission(false) {
                    tracing::warn!("location permission revoked; monitoring disabled");
                }
                Err(EngineError::PermissionDenied)
            }
            ProviderEvent::PermissionGranted => {
                if monitor.set_permission(true) {
                    tracing::info!("location permission granted; monitoring resumed");
                }
                Ok(Vec::new())
            }
        }
    }

    // ========== Monitor lifecycle ==========

    /// Subscribes to the provider and processes its updates on a background
    /// task until [`Engine::stop`] is called or the provider closes.
    pub async fn start(&self, provider: &dyn LocationProvider) -> Result<(), EngineError> {
        let monitor = &self.inner.monitor;
        let cancel_token = monitor.begin()?;
        let mut receiver = match provider.subscribe().await {
            Ok(receiver) => receiver,
            Err(err) => {
                monitor.finish();
                return Err(err.into());
            }
        };

        let engine = self.clone();
        let task = tokio::spawn(async move {
            tracing::info!(user_id = %engine.user(), "location monitor started");
            let mut processed = 0u64;
            loop {
                let event = tokio::select! {
                    biased;
                    () = cancel_token.cancelled() => {
                        tracing::info!("location monitor cancelled");
                        break;
                    }
                    event = receiver.recv() => event,
                };
                let Some(event) = event else {
                    tracing::info!("location provider closed");
                    break;
                };

                match engine.handle_provider_event(event).await {
                    Ok(reports) => {
                        for report in reports {
                            tracing::debug!(
                                kind = %report.kind,
                                region_id = %report.region_id,
                                outcome = %report.outcome,
                                "transition processed"
                            );
                        }
                    }
                    Err(EngineError::SampleUnavailable) => {
                        tracing::debug!("no location fix");
                    }
                    Err(EngineError::PermissionDenied) => {
                        tracing::debug!("sample ignored while permission is revoked");
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "sample processing failed; retrying on next sample");
                    }
                }
                processed += 1;
            }
            engine.inner.monitor.finish();
            tracing::info!(processed, "location monitor stopped");
        });
        monitor.attach(task);
        Ok(())
    }

    /// Stops the monitor. Open entries stay open.
    pub async fn stop(&self) {
        self.inner.monitor.stop().await;
    }

    /// Waits until the provider closes and every queued update is processed.
    pub async fn wait(&self) {
        self.inner.monitor.wait().await;
    }

    /// Waits for entry and exit alerts that are still being delivered.
    pub async fn flush_alerts(&self) {
        self.inner.lifecycle.flush_alerts().await;
    }

    pub fn monitor_status(&self) -> MonitorStatus {
        self.inner.monitor.status()
    }

    // ========== Manual overrides ==========

    /// Opens an entry at `region_id`, at `at` or now.
    pub async fn manual_clock_in(
        &self,
        region_id: &RegionId,
        at: Option<DateTime<Utc>>,
    ) -> Result<TimeEntry, EngineError> {
        let user_id = self.user().clone();
        let session = self.session(&user_id);
        let _guard = session.lock().await;
        let region = self
            .inner
            .registry
            .get(region_id)
            .await?
            .ok_or_else(|| EngineError::RegionNotFound(region_id.clone()))?;
        self.inner
            .lifecycle
            .manual_clock_in(&user_id, &region, at.unwrap_or_else(Utc::now))
            .await
    }

    /// Closes the open entry, at `at` or now.
    pub async fn manual_clock_out(
        &self,
        at: Option<DateTime<Utc>>,
    ) -> Result<TimeEntry, EngineError> {
        let user_id = self.user().clone();
        let session = self.session(&user_id);
        let _guard = session.lock().await;
        self.inner
            .lifecycle
            .manual_clock_out(&user_id, at.unwrap_or_else(Utc::now))
            .await
    }

    // ========== Regions ==========

    pub async fn add_region(&self, region: GeofenceRegion) -> Result<RegionId, EngineError> {
        self.inner.registry.add(region).await
    }

    pub async fn update_region(
        &self,
        id: &RegionId,
        patch: &RegionPatch,
    ) -> Result<GeofenceRegion, EngineError> {
        self.inner.registry.update(id, patch).await
    }

    pub async fn remove_region(&self, id: &RegionId) -> Result<GeofenceRegion, EngineError> {
        self.inner.registry.remove(id).await
    }

    pub async fn get_region(&self, id: &RegionId) -> Result<Option<GeofenceRegion>, EngineError> {
        self.inner.registry.get(id).await
    }

    /// Regions in the configured scope.
    pub async fn list_regions(
        &self,
        include_inactive: bool,
    ) -> Result<Vec<GeofenceRegion>, EngineError> {
        self.inner
            .registry
            .list_all(&self.inner.config.scope, include_inactive)
            .await
    }

    // ========== Queries ==========

    pub async fn get_active_entry(&self) -> Result<Option<TimeEntry>, EngineError> {
        bounded(
            self.timeout(),
            "query open time entry",
            self.inner.store.query_open_time_entry(self.user()),
        )
        .await
    }

    /// Time entries, most recent first.
    pub async fn get_history(&self, limit: usize) -> Result<Vec<TimeEntry>, EngineError> {
        bounded(
            self.timeout(),
            "list time entries",
            self.inner.store.list_time_entries(self.user(), limit),
        )
        .await
    }

    /// Audit events, most recent first.
    pub async fn get_audit_log(&self, limit: usize) -> Result<Vec<AuditEvent>, EngineError> {
        bounded(
            self.timeout(),
            "list audit events",
            self.inner.store.list_audit_events(self.user(), limit),
        )
        .await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let user_id = self.user().clone();
        let session = self.session(&user_id);
        let mut session = session.lock().await;
        let membership = self.machine(&mut session, &user_id).await?.state().clone();
        let active_entry = self.get_active_entry().await?;
        Ok(EngineStatus {
            user_id,
            monitor: self.monitor_status(),
            membership,
            active_entry,
        })
    }
}
