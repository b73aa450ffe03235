//! Applies transitions and operator overrides to time entries.
//!
//! Every path checks the open entry before writing, so reprocessing the same
//! transition after a failure is harmless. The store's one-open-entry
//! constraint turns a race lost to another process into a conflict.
//!
//! Entry writes run on their own tasks. A write that outlasts the timeout is
//! never abandoned midway: it is settled before the next read of the open
//! entry, so a retry always sees what actually landed.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use fc_core::{
    AuditEvent, AuditKind, AuditOutcome, ClockSource, EntryClose, EntryId, GeofenceRegion, RegionId,
    TimeEntry, TransitionEvent, TransitionKind, UserId,
};

use crate::error::{EngineError, bounded};
use crate::notify::{Notifier, dispatch};
use crate::store::{Store, StoreError};

/// What one dispatched transition did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionReport {
    pub kind: TransitionKind,
    pub region_id: RegionId,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<EntryId>,
}

pub struct LifecycleManager {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
    alerts: Mutex<Vec<JoinHandle<()>>>,
    unsettled: Mutex<Vec<JoinHandle<()>>>,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self {
            store,
            notifier,
            timeout,
            alerts: Mutex::new(Vec::new()),
            unsettled: Mutex::new(Vec::new()),
        }
    }

    fn alert(&self, title: &str, message: String) {
        let task = dispatch(Arc::clone(&self.notifier), title.to_string(), message);
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.retain(|task| !task.is_finished());
            alerts.push(task);
        }
    }

    /// Waits for alerts still being delivered.
    pub async fn flush_alerts(&self) {
        let pending = self
            .alerts
            .lock()
            .map(|mut alerts| std::mem::take(&mut *alerts))
            .unwrap_or_default();
        for task in pending {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "alert task ended abnormally");
            }
        }
    }

    /// Handles an Enter transition.
    ///
    /// Opens an entry when auto clock-in is enabled and the user has none.
    /// An existing open entry, for any region, is a conflict and nothing is
    /// created.
    pub async fn on_enter(
        &self,
        user_id: &UserId,
        region: &GeofenceRegion,
        event: &TransitionEvent,
    ) -> Result<TransitionReport, EngineError> {
        let result = self.apply_enter(user_id, region, event).await;
        let report = self.audit_transition(user_id, event, result).await?;
        if region.entry_alert {
            let message = match report.outcome {
                AuditOutcome::Created => format!("Clocked in at {}", region.name),
                _ => format!("Arrived at {}", region.name),
            };
            self.alert("Entered site", message);
        }
        Ok(report)
    }

    /// Handles an Exit transition.
    ///
    /// `region` is `None` when the region was deleted after the worker
    /// entered it; the entry is then closed as if auto clock-out were on.
    pub async fn on_exit(
        &self,
        user_id: &UserId,
        region: Option<&GeofenceRegion>,
        event: &TransitionEvent,
    ) -> Result<TransitionReport, EngineError> {
        let result = self.apply_exit(user_id, region, event).await;
        let report = self.audit_transition(user_id, event, result).await?;
        if let Some(region) = region.filter(|region| region.exit_alert) {
            let message = match report.outcome {
                AuditOutcome::Closed | AuditOutcome::Flagged => {
                    format!("Clocked out of {}", region.name)
                }
                _ => format!("Left {}", region.name),
            };
            self.alert("Left site", message);
        }
        Ok(report)
    }

    async fn apply_enter(
        &self,
        user_id: &UserId,
        region: &GeofenceRegion,
        event: &TransitionEvent,
    ) -> Result<(AuditOutcome, Option<EntryId>), EngineError> {
        if !region.auto_clock_in {
            tracing::debug!(region_id = %region.id, "auto clock-in disabled");
            return Ok((AuditOutcome::NoOp, None));
        }

        if let Some(open) = self.open_entry(user_id).await? {
            tracing::warn!(
                user_id = %user_id,
                region_id = %region.id,
                open_entry = %open.id,
                "enter ignored: time entry already open"
            );
            return Ok((AuditOutcome::Conflict, Some(open.id)));
        }

        let entry = TimeEntry::open(
            user_id.clone(),
            region,
            event.timestamp,
            Some(event.sample.position),
            ClockSource::Auto,
        );
        match self.insert_entry(&entry).await? {
            Inserted::Created => {
                tracing::info!(
                    user_id = %user_id,
                    region_id = %region.id,
                    entry_id = %entry.id,
                    "clocked in"
                );
                Ok((AuditOutcome::Created, Some(entry.id)))
            }
            Inserted::Conflict => {
                tracing::warn!(
                    user_id = %user_id,
                    region_id = %region.id,
                    "enter lost race: time entry opened concurrently"
                );
                Ok((AuditOutcome::Conflict, None))
            }
        }
    }

    async fn apply_exit(
        &self,
        user_id: &UserId,
        region: Option<&GeofenceRegion>,
        event: &TransitionEvent,
    ) -> Result<(AuditOutcome, Option<EntryId>), EngineError> {
        if region.is_some_and(|region| !region.auto_clock_out) {
            tracing::debug!(region_id = %event.region_id, "auto clock-out disabled");
            return Ok((AuditOutcome::NoOp, None));
        }

        let open = match self.open_entry(user_id).await? {
            Some(open) if open.region_id == event.region_id => open,
            Some(open) => {
                tracing::debug!(
                    region_id = %event.region_id,
                    open_region = %open.region_id,
                    "exit ignored: open entry belongs to another region"
                );
                return Ok((AuditOutcome::NoOp, None));
            }
            None => return Ok((AuditOutcome::NoOp, None)),
        };

        let close = open.close_at(
            event.timestamp,
            Some(event.sample.position),
            ClockSource::Auto,
        );
        if !self.close_entry(&open.id, &close).await? {
            return Ok((AuditOutcome::NoOp, None));
        }

        if close.needs_review {
            tracing::warn!(
                entry_id = %open.id,
                clock_in = %open.clock_in_time,
                clock_out = %close.clock_out_time,
                "clock-out precedes clock-in; hours clamped and entry flagged"
            );
            return Ok((AuditOutcome::Flagged, Some(open.id)));
        }
        tracing::info!(
            user_id = %user_id,
            entry_id = %open.id,
            hours = close.total_hours,
            "clocked out"
        );
        Ok((AuditOutcome::Closed, Some(open.id)))
    }

    /// Opens an entry on operator request.
    pub async fn manual_clock_in(
        &self,
        user_id: &UserId,
        region: &GeofenceRegion,
        at: DateTime<Utc>,
    ) -> Result<TimeEntry, EngineError> {
        if let Some(open) = self.open_entry(user_id).await? {
            self.audit_manual(
                user_id,
                AuditKind::ManualClockIn,
                Some(region.id.clone()),
                at,
                AuditOutcome::Conflict,
                Some(open.id.clone()),
            )
            .await;
            return Err(EngineError::ConflictDetected {
                user_id: user_id.clone(),
                existing: Some(open.id),
            });
        }

        let entry = TimeEntry::open(user_id.clone(), region, at, None, ClockSource::Manual);
        let inserted = match self.insert_entry(&entry).await {
            Ok(inserted) => inserted,
            Err(err) => {
                let audit = AuditEvent::for_manual(
                    user_id.clone(),
                    AuditKind::ManualClockIn,
                    Some(region.id.clone()),
                    at,
                    AuditOutcome::Failed,
                    // Names the entry a timed-out insert may still create.
                    Some(entry.id.clone()),
                )
                .with_detail(err.to_string());
                self.record(&audit).await;
                return Err(err);
            }
        };
        if inserted == Inserted::Conflict {
            self.audit_manual(
                user_id,
                AuditKind::ManualClockIn,
                Some(region.id.clone()),
                at,
                AuditOutcome::Conflict,
                None,
            )
            .await;
            return Err(EngineError::ConflictDetected {
                user_id: user_id.clone(),
                existing: None,
            });
        }

        self.audit_manual(
            user_id,
            AuditKind::ManualClockIn,
            Some(region.id.clone()),
            at,
            AuditOutcome::Created,
            Some(entry.id.clone()),
        )
        .await;
        tracing::info!(user_id = %user_id, entry_id = %entry.id, "manual clock-in");
        Ok(entry)
    }

    /// Closes the open entry on operator request.
    pub async fn manual_clock_out(
        &self,
        user_id: &UserId,
        at: DateTime<Utc>,
    ) -> Result<TimeEntry, EngineError> {
        let Some(mut entry) = self.open_entry(user_id).await? else {
            return Err(EngineError::NoOpenEntry {
                user_id: user_id.clone(),
            });
        };

        let close = entry.close_at(at, None, ClockSource::Manual);
        let closed = match self.close_entry(&entry.id, &close).await {
            Ok(closed) => closed,
            Err(err) => {
                let audit = AuditEvent::for_manual(
                    user_id.clone(),
                    AuditKind::ManualClockOut,
                    Some(entry.region_id.clone()),
                    at,
                    AuditOutcome::Failed,
                    Some(entry.id.clone()),
                )
                .with_detail(err.to_string());
                self.record(&audit).await;
                return Err(err);
            }
        };
        if !closed {
            return Err(EngineError::NoOpenEntry {
                user_id: user_id.clone(),
            });
        }

        entry.apply_close(&close);
        let outcome = if close.needs_review {
            tracing::warn!(entry_id = %entry.id, "manual clock-out precedes clock-in; entry flagged");
            AuditOutcome::Flagged
        } else {
            AuditOutcome::Closed
        };
        self.audit_manual(
            user_id,
            AuditKind::ManualClockOut,
            Some(entry.region_id.clone()),
            at,
            outcome,
            Some(entry.id.clone()),
        )
        .await;
        tracing::info!(user_id = %user_id, entry_id = %entry.id, "manual clock-out");
        Ok(entry)
    }

    async fn open_entry(&self, user_id: &UserId) -> Result<Option<TimeEntry>, EngineError> {
        self.settle_writes().await?;
        bounded(
            self.timeout,
            "query open time entry",
            self.store.query_open_time_entry(user_id),
        )
        .await
    }

    async fn insert_entry(&self, entry: &TimeEntry) -> Result<Inserted, EngineError> {
        let operation = "insert time entry";
        let store = Arc::clone(&self.store);
        let entry = entry.clone();
        let written = self
            .write(operation, async move { store.insert_time_entry(&entry).await })
            .await?;
        match written {
            Ok(()) => Ok(Inserted::Created),
            Err(StoreError::OpenEntryExists { .. }) => Ok(Inserted::Conflict),
            Err(err) => Err(EngineError::from_store(operation, err)),
        }
    }

    async fn close_entry(&self, id: &EntryId, close: &EntryClose) -> Result<bool, EngineError> {
        let operation = "close time entry";
        let store = Arc::clone(&self.store);
        let id = id.clone();
        let close = close.clone();
        self.write(operation, async move { store.update_time_entry(&id, &close).await })
            .await?
            .map_err(|err| EngineError::from_store(operation, err))
    }

    /// Runs an entry write on its own task.
    ///
    /// The write gets a second timeout window to report back. If it is still
    /// running after that, its outcome is unknown: the task is kept and
    /// awaited before the next open-entry read.
    async fn write<T, F>(
        &self,
        operation: &'static str,
        call: F,
    ) -> Result<Result<T, StoreError>, EngineError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, StoreError>> + Send + 'static,
    {
        let (sender, mut receiver) = oneshot::channel();
        let task = tokio::spawn(async move {
            let _ = sender.send(call.await);
        });

        if let Ok(written) = tokio::time::timeout(self.timeout, &mut receiver).await {
            return written.map_err(|_| EngineError::write_aborted(operation));
        }
        tracing::warn!(operation, "write exceeded the persistence timeout; waiting for it to settle");
        if let Ok(written) = tokio::time::timeout(self.timeout, &mut receiver).await {
            return written.map_err(|_| EngineError::write_aborted(operation));
        }

        tracing::warn!(operation, "write outcome unknown; settling before the next read");
        if let Ok(mut unsettled) = self.unsettled.lock() {
            unsettled.push(task);
        }
        Err(EngineError::outcome_unknown(operation, self.timeout))
    }

    /// Waits for writes whose outcome was reported unknown.
    async fn settle_writes(&self) -> Result<(), EngineError> {
        let mut pending = self
            .unsettled
            .lock()
            .map(|mut unsettled| std::mem::take(&mut *unsettled))
            .unwrap_or_default();
        while let Some(mut task) = pending.pop() {
            match tokio::time::timeout(self.timeout, &mut task).await {
                Ok(Ok(())) => tracing::debug!("earlier write settled"),
                Ok(Err(err)) => tracing::warn!(error = %err, "earlier write ended abnormally"),
                Err(_) => {
                    pending.push(task);
                    if let Ok(mut unsettled) = self.unsettled.lock() {
                        unsettled.append(&mut pending);
                    }
                    return Err(EngineError::write_pending());
                }
            }
        }
        Ok(())
    }

    /// Records the result of a transition. A failure is recorded too, then
    /// returned so the caller leaves the transition uncommitted.
    async fn audit_transition(
        &self,
        user_id: &UserId,
        event: &TransitionEvent,
        result: Result<(AuditOutcome, Option<EntryId>), EngineError>,
    ) -> Result<TransitionReport, EngineError> {
        match result {
            Ok((outcome, entry_id)) => {
                let audit =
                    AuditEvent::for_transition(user_id.clone(), event, outcome, entry_id.clone());
                self.record(&audit).await;
                Ok(TransitionReport {
                    kind: event.kind,
                    region_id: event.region_id.clone(),
                    outcome,
                    entry_id,
                })
            }
            Err(err) => {
                let audit =
                    AuditEvent::for_transition(user_id.clone(), event, AuditOutcome::Failed, None)
                        .with_detail(err.to_string());
                self.record(&audit).await;
                Err(err)
            }
        }
    }

    async fn audit_manual(
        &self,
        user_id: &UserId,
        kind: AuditKind,
        region_id: Option<RegionId>,
        at: DateTime<Utc>,
        outcome: AuditOutcome,
        entry_id: Option<EntryId>,
    ) {
        let audit = AuditEvent::for_manual(user_id.clone(), kind, region_id, at, outcome, entry_id);
        self.record(&audit).await;
    }

    /// Appends to the audit log. Failures are logged, never propagated.
    async fn record(&self, audit: &AuditEvent) {
        if let Err(err) = bounded(
            self.timeout,
            "append audit event",
            self.store.append_event(audit),
        )
        .await
        {
            tracing::warn!(
                error = %err,
                kind = %audit.kind,
                outcome = %audit.outcome,
                "failed to append audit event"
            );
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inserted {
    Created,
    Conflict,
}
