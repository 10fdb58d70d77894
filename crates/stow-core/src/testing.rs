//! Scripted in-process fakes for the remote boundary.
//!
//! `ScriptedGateway` keeps remote records in memory, counts every call, and
//! can be told to fail or to park creates and updates until a test releases
//! them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::models::{OwnerId, Payload, RemoteId};
use crate::remote::{ConnectivityProbe, GatewayError, GatewayResult, RemoteGateway, RemoteRecord};

/// Calls received by a [`ScriptedGateway`], failed ones included
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub list: usize,
}

impl CallCounts {
    pub const fn total(&self) -> usize {
        self.create + self.update + self.delete + self.list
    }
}

/// Parks gated calls until released.
///
/// `entered` fires once a gated call has been received; `release` lets one
/// parked call proceed.
#[derive(Debug, Default)]
pub struct CallGate {
    entered: Notify,
    release: Notify,
}

impl CallGate {
    /// Wait until a gated call is parked
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let one parked call continue
    pub fn release(&self) {
        self.release.notify_one();
    }
}

struct Script<T> {
    records: BTreeMap<(OwnerId, RemoteId), T>,
    next_id: u64,
    calls: CallCounts,
    offline: bool,
    failing_creates: usize,
    failing_updates: usize,
    failing_deletes: usize,
}

/// In-memory remote service for one domain type
pub struct ScriptedGateway<T> {
    script: Mutex<Script<T>>,
    create_gate: Mutex<Option<Arc<CallGate>>>,
    update_gate: Mutex<Option<Arc<CallGate>>>,
}

impl<T: Payload> Default for ScriptedGateway<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Payload> ScriptedGateway<T> {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                records: BTreeMap::new(),
                next_id: 1,
                calls: CallCounts::default(),
                offline: false,
                failing_creates: 0,
                failing_updates: 0,
                failing_deletes: 0,
            }),
            create_gate: Mutex::new(None),
            update_gate: Mutex::new(None),
        }
    }

    /// Every call fails as unreachable while set
    pub fn set_offline(&self, offline: bool) {
        self.script().offline = offline;
    }

    /// Reject the next `count` creates with a 500
    pub fn fail_next_creates(&self, count: usize) {
        self.script().failing_creates = count;
    }

    pub fn fail_next_updates(&self, count: usize) {
        self.script().failing_updates = count;
    }

    pub fn fail_next_deletes(&self, count: usize) {
        self.script().failing_deletes = count;
    }

    /// Park every subsequent create on the returned gate
    pub fn gate_creates(&self) -> Arc<CallGate> {
        install_gate(&self.create_gate)
    }

    /// Park every subsequent update on the returned gate
    pub fn gate_updates(&self) -> Arc<CallGate> {
        install_gate(&self.update_gate)
    }

    pub fn calls(&self) -> CallCounts {
        self.script().calls
    }

    /// Remote copy of a record, as a fresh fetch would return it
    pub fn fetch(&self, owner: &OwnerId, remote_id: &RemoteId) -> Option<T> {
        self.script()
            .records
            .get(&(owner.clone(), remote_id.clone()))
            .cloned()
    }

    /// Number of remote records held for `owner`
    pub fn remote_count(&self, owner: &OwnerId) -> usize {
        self.script()
            .records
            .keys()
            .filter(|(record_owner, _)| record_owner == owner)
            .count()
    }

    /// Put a record on the remote side without counting a call
    pub fn seed(&self, owner: &OwnerId, payload: T) -> RemoteId {
        let mut script = self.script();
        let remote_id = script.allocate_id();
        script
            .records
            .insert((owner.clone(), remote_id.clone()), payload);
        remote_id
    }

    fn script(&self) -> MutexGuard<'_, Script<T>> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn install_gate(slot: &Mutex<Option<Arc<CallGate>>>) -> Arc<CallGate> {
    let gate = Arc::new(CallGate::default());
    *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&gate));
    gate
}

async fn pass_gate(slot: &Mutex<Option<Arc<CallGate>>>) {
    let gate = slot.lock().unwrap_or_else(PoisonError::into_inner).clone();
    if let Some(gate) = gate {
        gate.entered.notify_one();
        gate.release.notified().await;
    }
}

impl<T> Script<T> {
    fn allocate_id(&mut self) -> RemoteId {
        let id = self.next_id;
        self.next_id += 1;
        RemoteId::new(format!("remote-{id}")).unwrap_or_else(|_| unreachable!())
    }

    fn check_online(&self) -> GatewayResult<()> {
        if self.offline {
            Err(GatewayError::Unreachable("scripted offline".to_string()))
        } else {
            Ok(())
        }
    }
}

fn take_failure(counter: &mut usize) -> GatewayResult<()> {
    if *counter > 0 {
        *counter -= 1;
        return Err(GatewayError::Rejected {
            status: 500,
            message: "scripted failure".to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl<T: Payload> RemoteGateway<T> for ScriptedGateway<T> {
    async fn create(&self, owner: &OwnerId, payload: &T) -> GatewayResult<RemoteId> {
        self.script().calls.create += 1;
        pass_gate(&self.create_gate).await;

        let mut script = self.script();
        script.check_online()?;
        take_failure(&mut script.failing_creates)?;
        let remote_id = script.allocate_id();
        script
            .records
            .insert((owner.clone(), remote_id.clone()), payload.clone());
        Ok(remote_id)
    }

    async fn update(
        &self,
        owner: &OwnerId,
        remote_id: &RemoteId,
        payload: &T,
    ) -> GatewayResult<()> {
        self.script().calls.update += 1;
        pass_gate(&self.update_gate).await;

        let mut script = self.script();
        script.check_online()?;
        take_failure(&mut script.failing_updates)?;
        match script.records.get_mut(&(owner.clone(), remote_id.clone())) {
            Some(stored) => {
                *stored = payload.clone();
                Ok(())
            }
            None => Err(GatewayError::Rejected {
                status: 404,
                message: format!("unknown record {remote_id}"),
            }),
        }
    }

    async fn delete(&self, owner: &OwnerId, remote_id: &RemoteId) -> GatewayResult<()> {
        let mut script = self.script();
        script.calls.delete += 1;
        script.check_online()?;
        take_failure(&mut script.failing_deletes)?;
        script.records.remove(&(owner.clone(), remote_id.clone()));
        Ok(())
    }

    async fn list(&self, owner: &OwnerId) -> GatewayResult<Vec<RemoteRecord<T>>> {
        let mut script = self.script();
        script.calls.list += 1;
        script.check_online()?;
        Ok(script
            .records
            .iter()
            .filter(|((record_owner, _), _)| record_owner == owner)
            .map(|((_, remote_id), payload)| RemoteRecord {
                remote_id: remote_id.clone(),
                payload: payload.clone(),
            })
            .collect())
    }
}

/// Probe whose answer the test controls
#[derive(Debug)]
pub struct ScriptedProbe {
    reachable: AtomicBool,
    checks: AtomicUsize,
}

impl Default for ScriptedProbe {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ScriptedProbe {
    pub const fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
            checks: AtomicUsize::new(0),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// How many times the probe was consulted
    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectivityProbe for ScriptedProbe {
    async fn is_reachable(&self) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.reachable.load(Ordering::SeqCst)
    }
}
