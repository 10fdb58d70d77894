//! Wiring of store, gateways, coordinators, scheduler, and intents

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::{normalize_base_url, EngineConfig};
use crate::db::{Database, LibSqlRecordStore, RecordStore};
use crate::error::{Error, Result};
use crate::intents::MutationIntents;
use crate::models::{Note, OwnerId, RecordKind, Task, TimerConfig};
use crate::remote::{ConnectivityProbe, HttpConnectivityProbe, HttpGateway, RemoteGateway};
use crate::sync::{
    BackfillReport, PassReport, PassRunner, PassSettings, SyncContext, SyncCoordinator,
    SyncHandle, SyncScheduler,
};

/// One remote gateway per synchronized domain type
pub struct Gateways {
    pub notes: Arc<dyn RemoteGateway<Note>>,
    pub tasks: Arc<dyn RemoteGateway<Task>>,
    pub timers: Arc<dyn RemoteGateway<TimerConfig>>,
}

impl Gateways {
    /// REST gateways sharing one HTTP client
    pub fn http(config: &EngineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;
        let base_url = normalize_base_url(config.api_base_url.clone())?;
        Ok(Self {
            notes: Arc::new(HttpGateway::<Note>::with_client(base_url.clone(), client.clone())),
            tasks: Arc::new(HttpGateway::<Task>::with_client(base_url.clone(), client.clone())),
            timers: Arc::new(HttpGateway::<TimerConfig>::with_client(base_url, client)),
        })
    }
}

/// The offline-first sync engine.
///
/// Construction spawns the scheduler worker, so it must happen inside a tokio
/// runtime.
pub struct SyncEngine<S: RecordStore = LibSqlRecordStore> {
    store: Arc<S>,
    notes: Arc<SyncCoordinator<Note, S>>,
    tasks: Arc<SyncCoordinator<Task, S>>,
    timers: Arc<SyncCoordinator<TimerConfig, S>>,
    intents: MutationIntents<S>,
    handle: SyncHandle,
    worker: JoinHandle<()>,
}

impl SyncEngine<LibSqlRecordStore> {
    /// Engine over a local database talking REST to `config.api_base_url`
    pub fn open(db: Database, config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let gateways = Gateways::http(config)?;
        let probe = Arc::new(HttpConnectivityProbe::from_config(config)?);
        Ok(Self::with_parts(
            Arc::new(LibSqlRecordStore::new(db)),
            gateways,
            probe,
            PassSettings::from(config),
        ))
    }
}

impl<S: RecordStore> SyncEngine<S> {
    pub fn with_parts(
        store: Arc<S>,
        gateways: Gateways,
        probe: Arc<dyn ConnectivityProbe>,
        settings: PassSettings,
    ) -> Self {
        let ctx = SyncContext::new(Arc::clone(&store), probe, settings);
        let notes = Arc::new(SyncCoordinator::new(ctx.clone(), gateways.notes));
        let tasks = Arc::new(SyncCoordinator::new(ctx.clone(), gateways.tasks));
        let timers = Arc::new(SyncCoordinator::new(ctx.clone(), gateways.timers));

        let runners = vec![
            Arc::clone(&notes) as Arc<dyn PassRunner>,
            Arc::clone(&tasks) as Arc<dyn PassRunner>,
            Arc::clone(&timers) as Arc<dyn PassRunner>,
        ];
        let (handle, worker) = SyncScheduler::spawn(runners, CancellationToken::new());
        let intents = MutationIntents::new(Arc::clone(&store), ctx.inflight, Some(handle.clone()));

        Self {
            store,
            notes,
            tasks,
            timers,
            intents,
            handle,
            worker,
        }
    }

    /// Read access to local records
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub const fn intents(&self) -> &MutationIntents<S> {
        &self.intents
    }

    pub const fn handle(&self) -> &SyncHandle {
        &self.handle
    }

    /// Reconnect/resume signal: schedule a pass for every kind
    pub fn resume(&self, owner: &OwnerId) {
        self.handle.request_all(owner);
    }

    /// Run a pass for every kind now and wait for the reports
    pub async fn sync_now(&self, owner: &OwnerId) -> Vec<PassReport> {
        vec![
            self.notes.run_pass(owner).await,
            self.tasks.run_pass(owner).await,
            self.timers.run_pass(owner).await,
        ]
    }

    /// Import remote records for every kind
    pub async fn backfill(&self, owner: &OwnerId) -> Result<Vec<(RecordKind, BackfillReport)>> {
        Ok(vec![
            (RecordKind::Note, self.notes.backfill(owner).await?),
            (RecordKind::Task, self.tasks.backfill(owner).await?),
            (RecordKind::Timer, self.timers.backfill(owner).await?),
        ])
    }

    /// Wait for scheduled passes to finish. `false` if `timeout` elapsed first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.handle.drain())
            .await
            .is_ok()
    }

    /// Cancel running passes and stop the scheduler
    pub async fn shutdown(self) {
        self.handle.shutdown().await;
        if let Err(error) = self.worker.await {
            warn!(%error, "sync scheduler ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SyncFilter;
    use crate::intents::DeleteOutcome;
    use crate::models::{SyncState, SyncedRecord};
    use crate::testing::{ScriptedGateway, ScriptedProbe};
    use pretty_assertions::assert_eq;

    const DRAIN: Duration = Duration::from_secs(5);

    struct Fixture {
        engine: SyncEngine<LibSqlRecordStore>,
        notes: Arc<ScriptedGateway<Note>>,
        tasks: Arc<ScriptedGateway<Task>>,
        timers: Arc<ScriptedGateway<TimerConfig>>,
        probe: Arc<ScriptedProbe>,
        owner: OwnerId,
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn http_gateways_normalize_the_base_url() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/notes"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "remote_id": "r-1",
                "payload": { "title": "slash", "body": "" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = EngineConfig::new(server.uri()).unwrap();
        config.api_base_url.push_str("//");
        let gateways = Gateways::http(&config).unwrap();
        let remote_id = gateways
            .notes
            .create(&OwnerId::new("user-1").unwrap(), &Note::new("slash", ""))
            .await
            .unwrap();
        assert_eq!(remote_id.as_str(), "r-1");
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(LibSqlRecordStore::open_in_memory().await.unwrap());
        let notes = Arc::new(ScriptedGateway::new());
        let tasks = Arc::new(ScriptedGateway::new());
        let timers = Arc::new(ScriptedGateway::new());
        let probe = Arc::new(ScriptedProbe::default());
        let engine = SyncEngine::with_parts(
            store,
            Gateways {
                notes: Arc::clone(&notes) as Arc<dyn RemoteGateway<Note>>,
                tasks: Arc::clone(&tasks) as Arc<dyn RemoteGateway<Task>>,
                timers: Arc::clone(&timers) as Arc<dyn RemoteGateway<TimerConfig>>,
            },
            Arc::clone(&probe) as Arc<dyn ConnectivityProbe>,
            PassSettings::default(),
        );
        Fixture {
            engine,
            notes,
            tasks,
            timers,
            probe,
            owner: OwnerId::new("user-1").unwrap(),
        }
    }

    async fn get<T: crate::models::Payload>(
        fixture: &Fixture,
        record: &SyncedRecord<T>,
    ) -> Option<SyncedRecord<T>> {
        fixture
            .engine
            .store()
            .get::<T>(&fixture.owner, &record.local_id)
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_note_and_task_sync_and_delete_waits_for_remote_ack() {
        let f = fixture().await;
        f.probe.set_reachable(false);
        let intents = f.engine.intents();

        let n1 = intents
            .insert(&f.owner, Note::new("N1", "written offline"))
            .await
            .unwrap();
        let t1 = intents.insert(&f.owner, Task::new("T1")).await.unwrap();
        assert!(f.engine.drain(DRAIN).await);
        assert_eq!(get(&f, &n1).await.unwrap().state, SyncState::LocalOnly);
        assert_eq!(get(&f, &t1).await.unwrap().state, SyncState::LocalOnly);

        f.probe.set_reachable(true);
        f.engine.resume(&f.owner);
        assert!(f.engine.drain(DRAIN).await);

        let n1_remote = get(&f, &n1).await.unwrap().remote_id().cloned().unwrap();
        let t1_remote = get(&f, &t1).await.unwrap().remote_id().cloned().unwrap();
        assert_eq!(f.notes.fetch(&f.owner, &n1_remote), Some(n1.payload.clone()));
        assert_eq!(f.tasks.fetch(&f.owner, &t1_remote), Some(t1.payload.clone()));

        f.notes.fail_next_deletes(1);
        assert_eq!(
            intents.delete::<Note>(&f.owner, &n1.local_id).await.unwrap(),
            DeleteOutcome::Tombstoned
        );
        assert!(f.engine.drain(DRAIN).await);
        assert_eq!(
            get(&f, &n1).await.unwrap().state,
            SyncState::PendingDelete {
                remote_id: Some(n1_remote.clone())
            }
        );
        assert!(f.notes.fetch(&f.owner, &n1_remote).is_some());

        f.engine.resume(&f.owner);
        assert!(f.engine.drain(DRAIN).await);
        assert!(get(&f, &n1).await.is_none());
        assert!(f.notes.fetch(&f.owner, &n1_remote).is_none());
        assert_eq!(f.notes.calls().delete, 2);
        assert!(get(&f, &t1).await.unwrap().state.flags().synced);

        f.engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mutations_schedule_passes_and_publish_reports() {
        let f = fixture().await;
        let mut events = f.engine.handle().subscribe();

        let timer = f
            .engine
            .intents()
            .insert(&f.owner, TimerConfig::default())
            .await
            .unwrap();
        assert!(f.engine.drain(DRAIN).await);

        let report = events.recv().await.unwrap();
        assert_eq!(report.kind, RecordKind::Timer);
        assert_eq!(report.created, 1);
        assert!(get(&f, &timer).await.unwrap().state.flags().synced);
        assert_eq!(f.timers.calls().create, 1);

        f.engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_now_reports_every_kind_and_is_idempotent() {
        let f = fixture().await;
        f.probe.set_reachable(false);
        f.engine
            .intents()
            .insert(&f.owner, Note::new("a", ""))
            .await
            .unwrap();
        f.engine
            .intents()
            .insert(&f.owner, Task::new("b"))
            .await
            .unwrap();
        assert!(f.engine.drain(DRAIN).await);
        f.probe.set_reachable(true);

        let reports = f.engine.sync_now(&f.owner).await;
        let kinds: Vec<RecordKind> = reports.iter().map(|report| report.kind).collect();
        assert_eq!(kinds, RecordKind::ALL.to_vec());
        assert_eq!(reports.iter().map(|report| report.created).sum::<usize>(), 2);

        let calls_before = f.notes.calls().total() + f.tasks.calls().total();
        let again = f.engine.sync_now(&f.owner).await;
        assert!(again.iter().all(|report| !report.did_work()));
        assert_eq!(f.notes.calls().total() + f.tasks.calls().total(), calls_before);

        let pending = f
            .engine
            .store()
            .list_where::<Note>(&f.owner, SyncFilter::Unsynced)
            .await
            .unwrap();
        assert!(pending.is_empty());
        f.engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn backfill_imports_every_kind() {
        let f = fixture().await;
        f.notes.seed(&f.owner, Note::new("remote note", ""));
        f.timers.seed(&f.owner, TimerConfig::default());

        let reports = f.engine.backfill(&f.owner).await.unwrap();
        let imported: Vec<(RecordKind, usize)> = reports
            .iter()
            .map(|(kind, report)| (*kind, report.imported))
            .collect();
        assert_eq!(
            imported,
            vec![
                (RecordKind::Note, 1),
                (RecordKind::Task, 0),
                (RecordKind::Timer, 1)
            ]
        );

        let notes = f.engine.store().list_all::<Note>(&f.owner).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].state.flags().synced);
        f.engine.shutdown().await;
    }
}
