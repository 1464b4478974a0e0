//! Notification sink and cache events.
//!
//! Resolvers report store mutations to a caller-supplied sink, typically a UI
//! state store. The sink is synchronous and its result is never inspected.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use gxcert_core::{
    Address, CertId, Certificate, ContentId, Grant, GrantId, Group, GroupId, Profile,
};
use serde::Serialize;

/// Tags of store-update events.
pub mod events {
    pub const PROFILE_CACHE: &str = "UPDATE_PROFILE_CACHE";
    pub const GROUP_CACHE: &str = "UPDATE_GROUP_CACHE";
    pub const GROUPS_CACHE: &str = "UPDATE_GROUPS_CACHE";
    pub const CERTIFICATE_CACHE: &str = "UPDATE_CERTIFICATE_CACHE";
    pub const GROUP_CERTIFICATES_CACHE: &str = "UPDATE_GROUP_CERTIFICATES_CACHE";
    pub const USER_CERT_CACHE: &str = "UPDATE_USER_CERT_CACHE";
    pub const ISSUED_USER_CERT_CACHE: &str = "UPDATE_ISSUED_USER_CERT_CACHE";
    pub const RECEIVED_USER_CERT_CACHE: &str = "UPDATE_RECEIVED_USER_CERT_CACHE";
    pub const IMAGE_CACHE: &str = "UPDATE_IMAGE_CACHE";
}

/// Payload of a cache event.
///
/// Store-update events carry the full contents of the mutated store;
/// background-hydration events carry the entity or list the image was
/// attached to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "store", content = "data", rename_all = "camelCase")]
pub enum CachePayload {
    Profiles(HashMap<Address, Profile>),
    Groups(HashMap<GroupId, Group>),
    GroupsByOwner(HashMap<Address, Vec<Group>>),
    Certificates(HashMap<CertId, Certificate>),
    GroupCertificates(HashMap<GroupId, Vec<Certificate>>),
    Grants(HashMap<GrantId, Grant>),
    IssuedGrants(HashMap<CertId, Vec<Grant>>),
    ReceivedGrants(HashMap<Address, Vec<Grant>>),
    Images(HashMap<ContentId, String>),
    Profile(Profile),
    Group(Group),
    Certificate(Certificate),
    CertificateList(Vec<Certificate>),
}

/// An `{event, payload}` pair delivered to a [`NotificationSink`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEvent {
    pub event: String,
    pub payload: CachePayload,
}

impl CacheEvent {
    pub fn new(event: impl Into<String>, payload: CachePayload) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

/// Receiver of cache events.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: CacheEvent);
}

impl<F> NotificationSink for F
where
    F: Fn(CacheEvent) + Send + Sync,
{
    fn notify(&self, event: CacheEvent) {
        self(event)
    }
}

/// Shared sink handle; background hydration keeps a clone past the call.
pub type SharedSink = Arc<dyn NotificationSink>;

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl NotificationSink for NoopSink {
    fn notify(&self, _event: CacheEvent) {}
}

impl NoopSink {
    pub fn shared() -> SharedSink {
        Arc::new(NoopSink)
    }
}

/// Deliver an event from detached work. A panicking sink is logged, never
/// propagated.
pub(crate) fn notify_detached(sink: &SharedSink, event: CacheEvent) {
    let tag = event.event.clone();
    if catch_unwind(AssertUnwindSafe(|| sink.notify(event))).is_err() {
        tracing::error!(event = %tag, "Notification sink panicked during background hydration");
    }
}
