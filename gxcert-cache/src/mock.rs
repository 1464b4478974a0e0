//! In-memory collaborators for tests and local development.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use gxcert_core::{
    Address, CertId, Certificate, ContentError, ContentId, EntityKind, Grant, GrantId, Group,
    GroupId, GxCertResult, Profile, SourceError,
};
use tokio::sync::{mpsc, Semaphore};

use crate::notify::{CacheEvent, NotificationSink};
use crate::source::{BlobFetcher, RemoteSource};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Remote source operation, for call accounting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceCall {
    Profile,
    Group,
    GroupIds,
    Certificate,
    IssuedGrants,
    ReceivedGrants,
    Grant,
    GroupCertificates,
}

impl SourceCall {
    fn entity_kind(self) -> EntityKind {
        match self {
            SourceCall::Profile => EntityKind::Profile,
            SourceCall::Group | SourceCall::GroupIds => EntityKind::Group,
            SourceCall::Certificate | SourceCall::GroupCertificates => EntityKind::Certificate,
            SourceCall::IssuedGrants | SourceCall::ReceivedGrants | SourceCall::Grant => {
                EntityKind::Grant
            }
        }
    }
}

/// Mock remote source backed by hash maps.
///
/// Entity lookups for unknown keys fail with `NotFound`; list lookups for
/// unknown keys return an empty list.
#[derive(Debug, Default)]
pub struct MockRemoteSource {
    profiles: RwLock<HashMap<Address, Profile>>,
    groups: RwLock<HashMap<GroupId, Group>>,
    group_ids: RwLock<HashMap<Address, Vec<GroupId>>>,
    certificates: RwLock<HashMap<CertId, Certificate>>,
    issued_grants: RwLock<HashMap<CertId, Vec<Grant>>>,
    received_grants: RwLock<HashMap<Address, Vec<Grant>>>,
    grants: RwLock<HashMap<GrantId, Grant>>,
    group_certificates: RwLock<HashMap<GroupId, Vec<Certificate>>>,
    calls: Mutex<HashMap<(SourceCall, String), usize>>,
    failing: RwLock<HashSet<(SourceCall, String)>>,
}

impl MockRemoteSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_profile(&self, profile: Profile) {
        write(&self.profiles).insert(profile.address.clone(), profile);
    }

    pub fn insert_group(&self, group: Group) {
        write(&self.groups).insert(group.group_id, group);
    }

    pub fn set_group_ids(&self, address: Address, group_ids: Vec<GroupId>) {
        write(&self.group_ids).insert(address, group_ids);
    }

    pub fn insert_certificate(&self, certificate: Certificate) {
        write(&self.certificates).insert(certificate.cert_id, certificate);
    }

    pub fn insert_grant(&self, grant: Grant) {
        write(&self.grants).insert(grant.grant_id, grant);
    }

    /// Register the grants issued for a certificate; each is also fetchable by id.
    pub fn set_issued_grants(&self, cert_id: CertId, grants: Vec<Grant>) {
        for grant in &grants {
            self.insert_grant(grant.clone());
        }
        write(&self.issued_grants).insert(cert_id, grants);
    }

    /// Register the grants received by an address; each is also fetchable by id.
    pub fn set_received_grants(&self, address: Address, grants: Vec<Grant>) {
        for grant in &grants {
            self.insert_grant(grant.clone());
        }
        write(&self.received_grants).insert(address, grants);
    }

    /// Register a group's certificates; each is also fetchable by id.
    pub fn set_group_certificates(&self, group_id: GroupId, certificates: Vec<Certificate>) {
        for certificate in &certificates {
            self.insert_certificate(certificate.clone());
        }
        write(&self.group_certificates).insert(group_id, certificates);
    }

    /// Make `call` for `key` fail with `RequestFailed` until [`Self::recover`].
    pub fn fail(&self, call: SourceCall, key: impl ToString) {
        write(&self.failing).insert((call, key.to_string()));
    }

    pub fn recover(&self, call: SourceCall, key: impl ToString) {
        write(&self.failing).remove(&(call, key.to_string()));
    }

    /// Number of `call` invocations for `key`.
    pub fn calls(&self, call: SourceCall, key: impl ToString) -> usize {
        lock(&self.calls)
            .get(&(call, key.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.calls).values().sum()
    }

    fn record(&self, call: SourceCall, key: &dyn ToString) -> GxCertResult<String> {
        let key = key.to_string();
        *lock(&self.calls).entry((call, key.clone())).or_insert(0) += 1;
        if read(&self.failing).contains(&(call, key.clone())) {
            return Err(SourceError::RequestFailed {
                entity_kind: call.entity_kind(),
                key,
                reason: "injected failure".to_string(),
            }
            .into());
        }
        Ok(key)
    }

    fn found<K, V>(map: &RwLock<HashMap<K, V>>, key: &K, call: SourceCall, name: String) -> GxCertResult<V>
    where
        K: Eq + std::hash::Hash,
        V: Clone,
    {
        read(map).get(key).cloned().ok_or_else(|| {
            SourceError::NotFound {
                entity_kind: call.entity_kind(),
                key: name,
            }
            .into()
        })
    }

    fn listed<K, V>(map: &RwLock<HashMap<K, Vec<V>>>, key: &K) -> Vec<V>
    where
        K: Eq + std::hash::Hash,
        V: Clone,
    {
        read(map).get(key).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl RemoteSource for MockRemoteSource {
    async fn fetch_profile(&self, address: &Address) -> GxCertResult<Profile> {
        let name = self.record(SourceCall::Profile, address)?;
        Self::found(&self.profiles, address, SourceCall::Profile, name)
    }

    async fn fetch_group(&self, group_id: GroupId) -> GxCertResult<Group> {
        let name = self.record(SourceCall::Group, &group_id)?;
        Self::found(&self.groups, &group_id, SourceCall::Group, name)
    }

    async fn fetch_group_ids(&self, address: &Address) -> GxCertResult<Vec<GroupId>> {
        self.record(SourceCall::GroupIds, address)?;
        Ok(Self::listed(&self.group_ids, address))
    }

    async fn fetch_certificate(&self, cert_id: CertId) -> GxCertResult<Certificate> {
        let name = self.record(SourceCall::Certificate, &cert_id)?;
        Self::found(&self.certificates, &cert_id, SourceCall::Certificate, name)
    }

    async fn fetch_issued_grants(&self, cert_id: CertId) -> GxCertResult<Vec<Grant>> {
        self.record(SourceCall::IssuedGrants, &cert_id)?;
        Ok(Self::listed(&self.issued_grants, &cert_id))
    }

    async fn fetch_received_grants(&self, address: &Address) -> GxCertResult<Vec<Grant>> {
        self.record(SourceCall::ReceivedGrants, address)?;
        Ok(Self::listed(&self.received_grants, address))
    }

    async fn fetch_grant(&self, grant_id: GrantId) -> GxCertResult<Grant> {
        let name = self.record(SourceCall::Grant, &grant_id)?;
        Self::found(&self.grants, &grant_id, SourceCall::Grant, name)
    }

    async fn fetch_group_certificates(&self, group_id: GroupId) -> GxCertResult<Vec<Certificate>> {
        self.record(SourceCall::GroupCertificates, &group_id)?;
        Ok(Self::listed(&self.group_certificates, &group_id))
    }
}

/// Mock blob fetcher. Unknown content ids are unavailable.
///
/// A gated fetcher holds every resolution until [`Self::release`] hands out
/// permits, so tests can observe state before background hydration finishes.
#[derive(Debug, Default)]
pub struct MockBlobFetcher {
    urls: RwLock<HashMap<ContentId, String>>,
    calls: Mutex<HashMap<ContentId, usize>>,
    gate: Option<Semaphore>,
}

impl MockBlobFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn insert(&self, content_id: impl Into<ContentId>, url: impl Into<String>) {
        write(&self.urls).insert(content_id.into(), url.into());
    }

    /// Let `count` held resolutions proceed.
    pub fn release(&self, count: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(count);
        }
    }

    pub fn calls_for(&self, content_id: &str) -> usize {
        lock(&self.calls)
            .get(&ContentId::new(content_id))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.calls).values().sum()
    }
}

#[async_trait]
impl BlobFetcher for MockBlobFetcher {
    async fn resolve(&self, content_id: &ContentId) -> Result<String, ContentError> {
        *lock(&self.calls).entry(content_id.clone()).or_insert(0) += 1;
        if let Some(gate) = &self.gate {
            let permit = gate.acquire().await.map_err(|e| ContentError::Gateway {
                reason: e.to_string(),
            })?;
            permit.forget();
        }
        read(&self.urls)
            .get(content_id)
            .cloned()
            .ok_or_else(|| ContentError::Unavailable {
                content_id: content_id.clone(),
                reason: "not pinned".to_string(),
            })
    }
}

/// Sink that records every event.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<CacheEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CacheEvent> {
        lock(&self.events).clone()
    }

    pub fn event_names(&self) -> Vec<String> {
        lock(&self.events).iter().map(|e| e.event.clone()).collect()
    }

    pub fn count(&self, event: &str) -> usize {
        lock(&self.events).iter().filter(|e| e.event == event).count()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, event: CacheEvent) {
        lock(&self.events).push(event);
    }
}

/// Sink forwarding events into a channel, for awaiting background hydration.
#[derive(Debug)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<CacheEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CacheEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, event: CacheEvent) {
        // A dropped receiver means nobody is listening anymore.
        let _ = self.sender.send(event);
    }
}
