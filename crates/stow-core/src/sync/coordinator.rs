//! One reconciliation pass per (owner, kind)

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::report::Outcome;
use super::{InFlightCreates, PassKey, PassLocks, PassReport};
use crate::config::EngineConfig;
use crate::db::{RecordStore, SyncFilter};
use crate::error::{Error, Result};
use crate::models::{OwnerId, Payload, RecordKind, RemoteId, SyncState, SyncedRecord};
use crate::remote::{ConnectivityProbe, GatewayError, GatewayResult, RemoteGateway};
use crate::util::unix_millis_now;

/// Bound on compare-and-swap retries for a single write-back
const MAX_WRITE_ATTEMPTS: usize = 16;

/// Per-call limits applied inside a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassSettings {
    pub call_timeout: Duration,
    pub max_concurrent_calls: usize,
}

impl Default for PassSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(15),
            max_concurrent_calls: 4,
        }
    }
}

impl From<&EngineConfig> for PassSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            call_timeout: config.call_timeout,
            max_concurrent_calls: config.max_concurrent_calls,
        }
    }
}

/// Everything the coordinators of one engine share
pub struct SyncContext<S> {
    pub store: Arc<S>,
    pub probe: Arc<dyn ConnectivityProbe>,
    pub inflight: InFlightCreates,
    pub locks: PassLocks,
    pub settings: PassSettings,
}

impl<S> Clone for SyncContext<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            probe: Arc::clone(&self.probe),
            inflight: self.inflight.clone(),
            locks: self.locks.clone(),
            settings: self.settings,
        }
    }
}

impl<S: RecordStore> SyncContext<S> {
    pub fn new(store: Arc<S>, probe: Arc<dyn ConnectivityProbe>, settings: PassSettings) -> Self {
        Self {
            store,
            probe,
            inflight: InFlightCreates::new(),
            locks: PassLocks::new(),
            settings,
        }
    }
}

/// A pass the scheduler can run without knowing the payload type
#[async_trait]
pub trait PassRunner: Send + Sync {
    fn kind(&self) -> RecordKind;

    async fn run_pass(&self, owner: &OwnerId) -> PassReport;
}

/// Result of importing remote records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Remote records unknown locally, inserted as synced
    pub imported: usize,
    /// Synced records whose payload was replaced by the remote copy
    pub refreshed: usize,
    pub unchanged: usize,
}

/// Drives records of one payload type through the sync state machine
pub struct SyncCoordinator<T: Payload, S: RecordStore> {
    ctx: SyncContext<S>,
    gateway: Arc<dyn RemoteGateway<T>>,
}

impl<T: Payload, S: RecordStore> SyncCoordinator<T, S> {
    pub fn new(ctx: SyncContext<S>, gateway: Arc<dyn RemoteGateway<T>>) -> Self {
        Self { ctx, gateway }
    }

    /// Run one pass: creates, then updates, then deletes.
    ///
    /// Remote failures are logged and leave records untouched for the next
    /// pass; the returned report says what happened.
    pub async fn run_pass(&self, owner: &OwnerId) -> PassReport {
        let key = PassKey::new(owner.clone(), T::KIND);
        let _pass = self.ctx.locks.acquire(&key).await;
        let mut report = PassReport::new(owner.clone(), T::KIND);

        let pending = match self
            .ctx
            .store
            .list_where::<T>(owner, SyncFilter::Unsynced)
            .await
        {
            Ok(pending) => pending.len(),
            Err(error) => {
                warn!(%key, %error, "could not read pending records");
                report.failed += 1;
                return report.finish();
            }
        };
        if pending == 0 {
            debug!(%key, "nothing to sync");
            return report.finish();
        }

        if !self.ctx.probe.is_reachable().await {
            info!(%key, pending, "remote unreachable, pass skipped");
            report.skipped_offline = pending;
            let report = report.finish();
            self.log_pass(&report).await;
            return report;
        }

        self.create_phase(owner, &mut report).await;
        self.update_phase(owner, &mut report).await;
        self.delete_phase(owner, &mut report).await;

        let report = report.finish();
        info!(
            %key,
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            discarded = report.discarded,
            failed = report.failed,
            superseded = report.superseded,
            "sync pass finished"
        );
        self.log_pass(&report).await;
        report
    }

    /// Import remote records the store does not know and refresh synced ones.
    ///
    /// Records with a pending local change are never overwritten.
    pub async fn backfill(&self, owner: &OwnerId) -> Result<BackfillReport> {
        let key = PassKey::new(owner.clone(), T::KIND);
        let _pass = self.ctx.locks.acquire(&key).await;

        let remote_records = self.call(self.gateway.list(owner)).await?;
        let mut report = BackfillReport::default();

        for remote in remote_records {
            let local = self
                .ctx
                .store
                .get_by_remote_id::<T>(owner, &remote.remote_id)
                .await?;
            match local {
                None => {
                    let record =
                        SyncedRecord::from_remote(owner.clone(), remote.remote_id, remote.payload);
                    self.ctx.store.insert(&record).await?;
                    report.imported += 1;
                }
                Some(local)
                    if matches!(local.state, SyncState::Synced { .. })
                        && local.payload != remote.payload =>
                {
                    let refreshed = SyncedRecord {
                        payload: remote.payload,
                        updated_at: unix_millis_now(),
                        ..local
                    };
                    if self.ctx.store.update(&refreshed).await? {
                        report.refreshed += 1;
                    } else {
                        report.unchanged += 1;
                    }
                }
                Some(_) => report.unchanged += 1,
            }
        }

        info!(
            %key,
            imported = report.imported,
            refreshed = report.refreshed,
            "backfill finished"
        );
        Ok(report)
    }

    async fn create_phase(&self, owner: &OwnerId, report: &mut PassReport) {
        let Some(records) = self.phase_records(owner, SyncFilter::LocalOnly, report).await else {
            return;
        };
        let outcomes: Vec<Outcome> = stream::iter(records)
            .map(|record| self.create_guarded(record))
            .buffer_unordered(self.concurrency())
            .collect()
            .await;
        outcomes.into_iter().for_each(|outcome| report.record(outcome));
    }

    async fn update_phase(&self, owner: &OwnerId, report: &mut PassReport) {
        let Some(records) = self
            .phase_records(owner, SyncFilter::PendingUpdate, report)
            .await
        else {
            return;
        };
        let outcomes: Vec<Outcome> = stream::iter(records)
            .map(|record| self.update_guarded(record))
            .buffer_unordered(self.concurrency())
            .collect()
            .await;
        outcomes.into_iter().for_each(|outcome| report.record(outcome));
    }

    async fn delete_phase(&self, owner: &OwnerId, report: &mut PassReport) {
        let Some(records) = self
            .phase_records(owner, SyncFilter::PendingDelete, report)
            .await
        else {
            return;
        };
        let outcomes: Vec<Outcome> = stream::iter(records)
            .map(|record| self.delete_guarded(record))
            .buffer_unordered(self.concurrency())
            .collect()
            .await;
        outcomes.into_iter().for_each(|outcome| report.record(outcome));
    }

    async fn create_guarded(&self, record: SyncedRecord<T>) -> Outcome {
        let result = self.create_one(&record).await;
        abort_as_failure("create", &record, result)
    }

    async fn update_guarded(&self, record: SyncedRecord<T>) -> Outcome {
        let result = self.update_one(&record).await;
        abort_as_failure("update", &record, result)
    }

    async fn delete_guarded(&self, record: SyncedRecord<T>) -> Outcome {
        let result = self.delete_one(&record).await;
        abort_as_failure("delete", &record, result)
    }

    async fn phase_records(
        &self,
        owner: &OwnerId,
        filter: SyncFilter,
        report: &mut PassReport,
    ) -> Option<Vec<SyncedRecord<T>>> {
        match self.ctx.store.list_where::<T>(owner, filter).await {
            Ok(records) => Some(records),
            Err(error) => {
                warn!(kind = %T::KIND, ?filter, %error, "could not list records for phase");
                report.failed += 1;
                None
            }
        }
    }

    async fn create_one(&self, listed: &SyncedRecord<T>) -> Result<Outcome> {
        let owner = &listed.owner;
        let (dispatched, claim) = {
            let _gate = self.ctx.inflight.lock().await;
            let Some(current) = self.ctx.store.get::<T>(owner, &listed.local_id).await? else {
                return Ok(Outcome::Skipped);
            };
            if current.state != SyncState::LocalOnly {
                return Ok(Outcome::Skipped);
            }
            let Some(claim) = self.ctx.inflight.claim(current.local_id) else {
                return Ok(Outcome::Skipped);
            };
            (current, claim)
        };

        debug!(local_id = %dispatched.local_id, kind = %T::KIND, "dispatching create");
        let result = self.call(self.gateway.create(owner, &dispatched.payload)).await;

        let _gate = self.ctx.inflight.lock().await;
        let outcome = match result {
            Ok(remote_id) => self.settle_created(&dispatched, remote_id).await,
            Err(error) => {
                warn!(local_id = %dispatched.local_id, kind = %T::KIND, %error, "remote create failed");
                self.settle_failed_create(&dispatched).await
            }
        };
        drop(claim);
        outcome
    }

    /// Record the assigned remote id whatever happened locally in the meantime
    async fn settle_created(
        &self,
        dispatched: &SyncedRecord<T>,
        remote_id: RemoteId,
    ) -> Result<Outcome> {
        let owner = &dispatched.owner;
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let Some(current) = self.ctx.store.get::<T>(owner, &dispatched.local_id).await? else {
                warn!(
                    local_id = %dispatched.local_id,
                    %remote_id,
                    "record vanished while its create was in flight; remote copy orphaned"
                );
                return Ok(Outcome::Created { superseded: true });
            };

            let (next, superseded) = match &current.state {
                SyncState::LocalOnly if current.revision == dispatched.revision => (
                    SyncState::Synced {
                        remote_id: remote_id.clone(),
                    },
                    false,
                ),
                SyncState::LocalOnly => (
                    SyncState::PendingUpdate {
                        remote_id: remote_id.clone(),
                    },
                    true,
                ),
                SyncState::PendingDelete { remote_id: None } => (
                    SyncState::PendingDelete {
                        remote_id: Some(remote_id.clone()),
                    },
                    true,
                ),
                other => {
                    return Err(Error::LocalStorage(format!(
                        "record {} left local_only while its create was in flight (now {})",
                        current.local_id,
                        other.label()
                    )));
                }
            };

            if self.ctx.store.update(&current.with_state(next)).await? {
                return Ok(Outcome::Created { superseded });
            }
        }
        Err(write_contention(dispatched))
    }

    /// Failed create: unchanged, unless the record was deleted meanwhile
    async fn settle_failed_create(&self, dispatched: &SyncedRecord<T>) -> Result<Outcome> {
        let owner = &dispatched.owner;
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let Some(current) = self.ctx.store.get::<T>(owner, &dispatched.local_id).await? else {
                return Ok(Outcome::Failed);
            };
            if current.state != (SyncState::PendingDelete { remote_id: None }) {
                return Ok(Outcome::Failed);
            }
            if self
                .ctx
                .store
                .delete::<T>(owner, &current.local_id, current.revision)
                .await?
            {
                debug!(local_id = %current.local_id, "discarded record deleted during failed create");
                return Ok(Outcome::Discarded);
            }
        }
        Err(write_contention(dispatched))
    }

    async fn update_one(&self, listed: &SyncedRecord<T>) -> Result<Outcome> {
        let owner = &listed.owner;
        let Some(dispatched) = self.ctx.store.get::<T>(owner, &listed.local_id).await? else {
            return Ok(Outcome::Skipped);
        };
        let SyncState::PendingUpdate { remote_id } = &dispatched.state else {
            return Ok(Outcome::Skipped);
        };

        if let Err(error) = self
            .call(self.gateway.update(owner, remote_id, &dispatched.payload))
            .await
        {
            warn!(local_id = %dispatched.local_id, %remote_id, %error, "remote update failed");
            return Ok(Outcome::Failed);
        }

        let synced = dispatched.with_state(SyncState::Synced {
            remote_id: remote_id.clone(),
        });
        let applied = self.ctx.store.update(&synced).await?;
        if !applied {
            debug!(local_id = %dispatched.local_id, "record changed during update, stays pending");
        }
        Ok(Outcome::Updated {
            superseded: !applied,
        })
    }

    async fn delete_one(&self, listed: &SyncedRecord<T>) -> Result<Outcome> {
        let owner = &listed.owner;
        let Some(current) = self.ctx.store.get::<T>(owner, &listed.local_id).await? else {
            return Ok(Outcome::Skipped);
        };
        let SyncState::PendingDelete { remote_id } = &current.state else {
            return Ok(Outcome::Skipped);
        };

        let Some(remote_id) = remote_id else {
            // Never accepted remotely: drop the row unless a create is still out
            let _gate = self.ctx.inflight.lock().await;
            if self.ctx.inflight.is_in_flight(&current.local_id) {
                return Ok(Outcome::Skipped);
            }
            let removed = self
                .ctx
                .store
                .delete::<T>(owner, &current.local_id, current.revision)
                .await?;
            return Ok(if removed {
                Outcome::Discarded
            } else {
                Outcome::Skipped
            });
        };

        if let Err(error) = self.call(self.gateway.delete(owner, remote_id)).await {
            warn!(local_id = %current.local_id, %remote_id, %error, "remote delete failed");
            return Ok(Outcome::Failed);
        }

        let mut expected = current.revision;
        for _ in 0..MAX_WRITE_ATTEMPTS {
            if self
                .ctx
                .store
                .delete::<T>(owner, &current.local_id, expected)
                .await?
            {
                return Ok(Outcome::Deleted);
            }
            match self.ctx.store.get::<T>(owner, &current.local_id).await? {
                Some(latest) => expected = latest.revision,
                None => return Ok(Outcome::Deleted),
            }
        }
        Err(write_contention(&current))
    }

    async fn call<R>(&self, call: impl Future<Output = GatewayResult<R>>) -> GatewayResult<R> {
        let limit = self.ctx.settings.call_timeout;
        tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
            Err(GatewayError::Unreachable(format!(
                "call timed out after {}s",
                limit.as_secs_f32()
            )))
        })
    }

    fn concurrency(&self) -> usize {
        self.ctx.settings.max_concurrent_calls.max(1)
    }

    async fn log_pass(&self, report: &PassReport) {
        let failed = report.failed + report.skipped_offline;
        if let Err(error) = self
            .ctx
            .store
            .record_pass(
                &report.owner,
                T::KIND,
                report.started_at,
                u64::try_from(failed).unwrap_or(u64::MAX),
            )
            .await
        {
            warn!(kind = %T::KIND, %error, "could not record pass outcome");
        }
    }
}

/// Local failures abort one record's processing, never the batch
fn abort_as_failure<T: Payload>(
    operation: &str,
    record: &SyncedRecord<T>,
    result: Result<Outcome>,
) -> Outcome {
    result.unwrap_or_else(|error| {
        warn!(local_id = %record.local_id, kind = %T::KIND, operation, %error, "record processing aborted");
        Outcome::Failed
    })
}

fn write_contention<T>(record: &SyncedRecord<T>) -> Error {
    Error::LocalStorage(format!(
        "gave up writing record {} after {MAX_WRITE_ATTEMPTS} conflicting attempts",
        record.local_id
    ))
}

#[async_trait]
impl<T: Payload, S: RecordStore> PassRunner for SyncCoordinator<T, S> {
    fn kind(&self) -> RecordKind {
        T::KIND
    }

    async fn run_pass(&self, owner: &OwnerId) -> PassReport {
        Self::run_pass(self, owner).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LibSqlRecordStore;
    use crate::intents::{DeleteOutcome, MutationIntents};
    use crate::models::{Note, Task};
    use crate::testing::{ScriptedGateway, ScriptedProbe};
    use pretty_assertions::assert_eq;

    struct Harness {
        store: Arc<LibSqlRecordStore>,
        probe: Arc<ScriptedProbe>,
        notes: Arc<ScriptedGateway<Note>>,
        coordinator: Arc<SyncCoordinator<Note, LibSqlRecordStore>>,
        intents: MutationIntents<LibSqlRecordStore>,
        owner: OwnerId,
    }

    async fn harness() -> Harness {
        let store = Arc::new(LibSqlRecordStore::open_in_memory().await.unwrap());
        let probe = Arc::new(ScriptedProbe::default());
        let notes = Arc::new(ScriptedGateway::<Note>::new());
        let ctx = SyncContext::new(
            Arc::clone(&store),
            Arc::clone(&probe) as Arc<dyn ConnectivityProbe>,
            PassSettings::default(),
        );
        let intents = MutationIntents::new(Arc::clone(&store), ctx.inflight.clone(), None);
        let coordinator = Arc::new(SyncCoordinator::new(
            ctx,
            Arc::clone(&notes) as Arc<dyn RemoteGateway<Note>>,
        ));
        Harness {
            store,
            probe,
            notes,
            coordinator,
            intents,
            owner: OwnerId::new("user-1").unwrap(),
        }
    }

    impl Harness {
        async fn note(&self, local_id: &crate::models::LocalId) -> Option<SyncedRecord<Note>> {
            self.store.get::<Note>(&self.owner, local_id).await.unwrap()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn round_trip_assigns_remote_id_and_remote_holds_payload() {
        let h = harness().await;
        let record = h
            .intents
            .insert(&h.owner, Note::new("Groceries", "milk, eggs"))
            .await
            .unwrap();

        let report = h.coordinator.run_pass(&h.owner).await;
        assert_eq!(report.created, 1);
        assert!(report.is_clean());

        let synced = h.note(&record.local_id).await.unwrap();
        let SyncState::Synced { remote_id } = &synced.state else {
            panic!("expected synced, got {:?}", synced.state);
        };
        assert_eq!(
            h.notes.fetch(&h.owner, remote_id),
            Some(Note::new("Groceries", "milk, eggs"))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn second_pass_issues_no_calls() {
        let h = harness().await;
        h.intents
            .insert(&h.owner, Note::new("once", ""))
            .await
            .unwrap();
        h.coordinator.run_pass(&h.owner).await;
        let calls_after_first = h.notes.calls();
        let probes_after_first = h.probe.checks();

        let report = h.coordinator.run_pass(&h.owner).await;
        assert!(!report.did_work());
        assert_eq!(h.notes.calls(), calls_after_first);
        assert_eq!(h.probe.checks(), probes_after_first);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remote_id_never_changes_after_assignment() {
        let h = harness().await;
        let record = h
            .intents
            .insert(&h.owner, Note::new("v1", ""))
            .await
            .unwrap();
        h.coordinator.run_pass(&h.owner).await;
        let first = h.note(&record.local_id).await.unwrap().remote_id().cloned();

        h.intents
            .update(&h.owner, &record.local_id, Note::new("v2", ""))
            .await
            .unwrap();
        let report = h.coordinator.run_pass(&h.owner).await;
        assert_eq!(report.updated, 1);
        assert_eq!(report.created, 0);

        let after = h.note(&record.local_id).await.unwrap();
        assert_eq!(after.remote_id().cloned(), first);
        assert_eq!(h.notes.calls().create, 1);
        assert_eq!(h.notes.remote_count(&h.owner), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_create_stays_local_only_and_is_retried_unmodified() {
        let h = harness().await;
        let record = h
            .intents
            .insert(&h.owner, Note::new("retry me", ""))
            .await
            .unwrap();
        h.notes.set_offline(true);

        let report = h.coordinator.run_pass(&h.owner).await;
        assert_eq!(report.failed, 1);
        let after_failure = h.note(&record.local_id).await.unwrap();
        assert_eq!(after_failure, record);

        h.notes.set_offline(false);
        let report = h.coordinator.run_pass(&h.owner).await;
        assert_eq!(report.created, 1);
        let synced = h.note(&record.local_id).await.unwrap();
        assert_eq!(synced.payload, Note::new("retry me", ""));
        assert!(matches!(synced.state, SyncState::Synced { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_probe_skips_pass_without_calls() {
        let h = harness().await;
        h.intents
            .insert(&h.owner, Note::new("offline", ""))
            .await
            .unwrap();
        h.probe.set_reachable(false);

        let report = h.coordinator.run_pass(&h.owner).await;
        assert_eq!(report.skipped_offline, 1);
        assert_eq!(h.notes.calls().total(), 0);

        let log = h.store.pass_log(&h.owner).await.unwrap();
        assert_eq!(log[0].last_success_at, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn edit_during_create_ends_pending_update_with_newer_payload() {
        let h = harness().await;
        let record = h
            .intents
            .insert(&h.owner, Note::new("draft", ""))
            .await
            .unwrap();
        let gate = h.notes.gate_creates();

        let coordinator = Arc::clone(&h.coordinator);
        let owner = h.owner.clone();
        let pass = tokio::spawn(async move { coordinator.run_pass(&owner).await });

        gate.entered().await;
        h.intents
            .update(&h.owner, &record.local_id, Note::new("final", ""))
            .await
            .unwrap();
        // Keep the follow-up update of the same pass from landing
        h.notes.fail_next_updates(1);
        gate.release();

        let report = pass.await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.superseded, 1);
        assert_eq!(report.failed, 1);

        let after = h.note(&record.local_id).await.unwrap();
        assert_eq!(after.payload, Note::new("final", ""));
        let SyncState::PendingUpdate { remote_id } = &after.state else {
            panic!("expected pending update, got {:?}", after.state);
        };
        // The remote still has the payload that was dispatched
        assert_eq!(
            h.notes.fetch(&h.owner, remote_id),
            Some(Note::new("draft", ""))
        );

        let report = h.coordinator.run_pass(&h.owner).await;
        assert_eq!(report.updated, 1);
        assert_eq!(
            h.notes.fetch(&h.owner, remote_id),
            Some(Note::new("final", ""))
        );
    }

    async fn synced_note(h: &Harness, title: &str) -> (SyncedRecord<Note>, RemoteId) {
        let record = h.intents.insert(&h.owner, Note::new(title, "")).await.unwrap();
        h.coordinator.run_pass(&h.owner).await;
        let synced = h.note(&record.local_id).await.unwrap();
        let remote_id = synced.remote_id().cloned().unwrap();
        (synced, remote_id)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn edit_during_update_stays_pending_with_newer_payload() {
        let h = harness().await;
        let (record, remote_id) = synced_note(&h, "v1").await;
        h.intents
            .update(&h.owner, &record.local_id, Note::new("v2", ""))
            .await
            .unwrap();
        let gate = h.notes.gate_updates();

        let coordinator = Arc::clone(&h.coordinator);
        let owner = h.owner.clone();
        let pass = tokio::spawn(async move { coordinator.run_pass(&owner).await });

        gate.entered().await;
        h.intents
            .update(&h.owner, &record.local_id, Note::new("v3", ""))
            .await
            .unwrap();
        gate.release();

        let report = pass.await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.superseded, 1);

        let after = h.note(&record.local_id).await.unwrap();
        assert_eq!(after.payload, Note::new("v3", ""));
        assert_eq!(
            after.state,
            SyncState::PendingUpdate {
                remote_id: remote_id.clone()
            }
        );
        assert_eq!(h.notes.fetch(&h.owner, &remote_id), Some(Note::new("v2", "")));

        // Pre-release the gate so the retry is not parked
        gate.release();
        let report = h.coordinator.run_pass(&h.owner).await;
        assert_eq!(report.updated, 1);
        assert_eq!(report.superseded, 0);
        assert_eq!(
            h.note(&record.local_id).await.unwrap().state,
            SyncState::Synced {
                remote_id: remote_id.clone()
            }
        );
        assert_eq!(h.notes.fetch(&h.owner, &remote_id), Some(Note::new("v3", "")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_during_update_keeps_tombstone_with_remote_id() {
        let h = harness().await;
        let (record, remote_id) = synced_note(&h, "v1").await;
        h.intents
            .update(&h.owner, &record.local_id, Note::new("v2", ""))
            .await
            .unwrap();
        let gate = h.notes.gate_updates();

        let coordinator = Arc::clone(&h.coordinator);
        let owner = h.owner.clone();
        let pass = tokio::spawn(async move { coordinator.run_pass(&owner).await });

        gate.entered().await;
        assert_eq!(
            h.intents
                .delete::<Note>(&h.owner, &record.local_id)
                .await
                .unwrap(),
            DeleteOutcome::Tombstoned
        );
        // Hold the tombstone through this pass's delete phase
        h.notes.fail_next_deletes(1);
        gate.release();

        let report = pass.await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.superseded, 1);
        assert_eq!(report.deleted, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(
            h.note(&record.local_id).await.unwrap().state,
            SyncState::PendingDelete {
                remote_id: Some(remote_id.clone())
            }
        );

        let report = h.coordinator.run_pass(&h.owner).await;
        assert_eq!(report.deleted, 1);
        assert!(h.note(&record.local_id).await.is_none());
        assert_eq!(h.notes.fetch(&h.owner, &remote_id), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_during_successful_create_deletes_remote_copy() {
        let h = harness().await;
        let record = h
            .intents
            .insert(&h.owner, Note::new("short lived", ""))
            .await
            .unwrap();
        let gate = h.notes.gate_creates();

        let coordinator = Arc::clone(&h.coordinator);
        let owner = h.owner.clone();
        let pass = tokio::spawn(async move { coordinator.run_pass(&owner).await });

        gate.entered().await;
        let intents = h.intents.clone();
        let owner = h.owner.clone();
        let local_id = record.local_id;
        // The delete waits on the in-flight gate only while the create is settled
        let delete = tokio::spawn(async move { intents.delete::<Note>(&owner, &local_id).await });
        let outcome = delete.await.unwrap().unwrap();
        assert_eq!(outcome, DeleteOutcome::Tombstoned);
        assert_eq!(
            h.note(&record.local_id).await.unwrap().state,
            SyncState::PendingDelete { remote_id: None }
        );

        gate.release();
        let report = pass.await.unwrap();

        assert_eq!(report.created, 1);
        assert_eq!(report.deleted, 1);
        assert!(h.note(&record.local_id).await.is_none());
        assert_eq!(h.notes.remote_count(&h.owner), 0);
        assert_eq!(h.notes.calls().delete, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_during_failed_create_discards_locally() {
        let h = harness().await;
        let record = h
            .intents
            .insert(&h.owner, Note::new("doomed", ""))
            .await
            .unwrap();
        h.notes.fail_next_creates(1);
        let gate = h.notes.gate_creates();

        let coordinator = Arc::clone(&h.coordinator);
        let owner = h.owner.clone();
        let pass = tokio::spawn(async move { coordinator.run_pass(&owner).await });

        gate.entered().await;
        let outcome = h
            .intents
            .delete::<Note>(&h.owner, &record.local_id)
            .await
            .unwrap();
        assert_eq!(outcome, DeleteOutcome::Tombstoned);
        gate.release();

        let report = pass.await.unwrap();
        assert_eq!(report.discarded, 1);
        assert!(h.note(&record.local_id).await.is_none());
        assert_eq!(h.notes.calls().delete, 0);
        assert_eq!(h.notes.remote_count(&h.owner), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn local_only_delete_never_calls_remote() {
        let h = harness().await;
        let record = h
            .intents
            .insert(&h.owner, Note::new("never synced", ""))
            .await
            .unwrap();

        let outcome = h
            .intents
            .delete::<Note>(&h.owner, &record.local_id)
            .await
            .unwrap();
        assert_eq!(outcome, DeleteOutcome::Removed);

        h.coordinator.run_pass(&h.owner).await;
        assert!(h.note(&record.local_id).await.is_none());
        assert_eq!(h.notes.calls().total(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_remote_delete_keeps_tombstone() {
        let h = harness().await;
        let record = h
            .intents
            .insert(&h.owner, Note::new("keep trying", ""))
            .await
            .unwrap();
        h.coordinator.run_pass(&h.owner).await;
        h.intents
            .delete::<Note>(&h.owner, &record.local_id)
            .await
            .unwrap();
        h.notes.fail_next_deletes(1);

        let report = h.coordinator.run_pass(&h.owner).await;
        assert_eq!(report.failed, 1);
        let tombstone = h.note(&record.local_id).await.unwrap();
        assert!(tombstone.state.flags().tombstoned);
        assert!(tombstone.remote_id().is_some());

        let report = h.coordinator.run_pass(&h.owner).await;
        assert_eq!(report.deleted, 1);
        assert!(h.note(&record.local_id).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tombstone_without_remote_id_is_discarded_without_calls() {
        let h = harness().await;
        let record = SyncedRecord::new(h.owner.clone(), Note::new("orphan", ""))
            .with_state(SyncState::PendingDelete { remote_id: None });
        h.store.insert(&record).await.unwrap();

        let report = h.coordinator.run_pass(&h.owner).await;
        assert_eq!(report.discarded, 1);
        assert_eq!(h.notes.calls().total(), 0);
        assert!(h.note(&record.local_id).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_update_is_retried_next_pass() {
        let h = harness().await;
        let record = h
            .intents
            .insert(&h.owner, Note::new("v1", ""))
            .await
            .unwrap();
        h.coordinator.run_pass(&h.owner).await;
        h.intents
            .update(&h.owner, &record.local_id, Note::new("v2", ""))
            .await
            .unwrap();
        h.notes.fail_next_updates(1);

        let report = h.coordinator.run_pass(&h.owner).await;
        assert_eq!(report.failed, 1);
        assert!(h.note(&record.local_id).await.unwrap().state.flags().dirty);

        let report = h.coordinator.run_pass(&h.owner).await;
        assert_eq!(report.updated, 1);
        assert!(h.note(&record.local_id).await.unwrap().state.flags().synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn backfill_imports_unknown_and_refreshes_synced_records() {
        let h = harness().await;
        let imported_id = h.notes.seed(&h.owner, Note::new("from web", ""));

        let local = h
            .intents
            .insert(&h.owner, Note::new("local", ""))
            .await
            .unwrap();
        h.coordinator.run_pass(&h.owner).await;
        let synced_remote = h.note(&local.local_id).await.unwrap().remote_id().cloned().unwrap();
        // Another device edited it
        h.notes
            .update(&h.owner, &synced_remote, &Note::new("edited elsewhere", ""))
            .await
            .unwrap();

        let report = h.coordinator.backfill(&h.owner).await.unwrap();
        assert_eq!(
            report,
            BackfillReport {
                imported: 1,
                refreshed: 1,
                unchanged: 0,
            }
        );

        let imported = h
            .store
            .get_by_remote_id::<Note>(&h.owner, &imported_id)
            .await
            .unwrap()
            .unwrap();
        assert!(imported.state.flags().synced);
        assert_eq!(
            h.note(&local.local_id).await.unwrap().payload,
            Note::new("edited elsewhere", "")
        );

        let again = h.coordinator.backfill(&h.owner).await.unwrap();
        assert_eq!(again.unchanged, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn backfill_never_overwrites_pending_edits() {
        let h = harness().await;
        let local = h
            .intents
            .insert(&h.owner, Note::new("mine", ""))
            .await
            .unwrap();
        h.coordinator.run_pass(&h.owner).await;
        let remote_id = h.note(&local.local_id).await.unwrap().remote_id().cloned().unwrap();
        h.notes
            .update(&h.owner, &remote_id, &Note::new("theirs", ""))
            .await
            .unwrap();
        h.intents
            .update(&h.owner, &local.local_id, Note::new("mine, edited", ""))
            .await
            .unwrap();

        let report = h.coordinator.backfill(&h.owner).await.unwrap();
        assert_eq!(report.unchanged, 1);
        assert_eq!(
            h.note(&local.local_id).await.unwrap().payload,
            Note::new("mine, edited", "")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn hung_gateway_call_times_out_as_failure() {
        let store = Arc::new(LibSqlRecordStore::open_in_memory().await.unwrap());
        let tasks = Arc::new(ScriptedGateway::<Task>::new());
        let _gate = tasks.gate_creates();
        let ctx = SyncContext::new(
            Arc::clone(&store),
            Arc::new(ScriptedProbe::default()),
            PassSettings {
                call_timeout: Duration::from_millis(50),
                max_concurrent_calls: 2,
            },
        );
        let coordinator = SyncCoordinator::new(ctx, tasks as Arc<dyn RemoteGateway<Task>>);
        let owner = OwnerId::new("user-1").unwrap();
        let record = SyncedRecord::new(owner.clone(), Task::new("stuck"));
        store.insert(&record).await.unwrap();

        let report = coordinator.run_pass(&owner).await;
        assert_eq!(report.failed, 1);
        let after = store.get::<Task>(&owner, &record.local_id).await.unwrap().unwrap();
        assert_eq!(after.state, SyncState::LocalOnly);
    }
}
