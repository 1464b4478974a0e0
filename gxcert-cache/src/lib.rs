//! GxCert Cache - Hydration Cache Manager
//!
//! Resolves a root entity (profile, group, certificate, grant) plus the chain
//! of relations a [`TraversalSpec`] asks for, reusing cached entries unless a
//! directive forces a refresh, and reports every store mutation to a
//! [`NotificationSink`].
//!
//! The remote entity source and the content blob fetcher are consumed through
//! the [`RemoteSource`] and [`BlobFetcher`] traits. [`GatewayBlobFetcher`] is
//! an HTTP implementation of the latter; [`mock`] holds in-memory versions of
//! both for tests.

mod image;
mod manager;

pub mod gateway;
pub mod mock;
pub mod notify;
pub mod source;
pub mod store;
pub mod telemetry;
pub mod traversal;

pub use gateway::GatewayBlobFetcher;
pub use manager::{HydrationCacheManager, HydrationCacheManagerBuilder};
pub use mock::{ChannelSink, MockBlobFetcher, MockRemoteSource, RecordingSink, SourceCall};
pub use notify::{events, CacheEvent, CachePayload, NoopSink, NotificationSink, SharedSink};
pub use source::{BlobFetcher, RemoteSource, SourceSelector, SourceSlots};
pub use store::{CacheStats, CacheStores, KeyedStore};
pub use telemetry::init_tracing;
pub use traversal::{Directive, Fetch, ImageFetch, TraversalSpec};
