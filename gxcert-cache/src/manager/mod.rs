//! Hydration cache manager.
//!
//! One entry point per entity kind. Each entry point runs the same three
//! phases: base resolution (fetch-or-reuse under the directive for its own
//! kind), relation hydration (recursing with the remaining specification),
//! and notification (store snapshots for every store written in the call).
//!
//! # Example
//!
//! ```ignore
//! let manager = HydrationCacheManager::new(source, blobs);
//! let spec = TraversalSpec::new()
//!     .with(Directive::fetch(DirectiveKind::Certificate, false))
//!     .with(Directive::image(DirectiveKind::CertificateImage, ImageFetch::waited(false)))
//!     .with(Directive::fetch(DirectiveKind::Group, false));
//!
//! let certificate = manager.get_certificate(cert_id, &sink, &spec).await?;
//! assert!(certificate.group.is_some());
//! ```

mod certificate;
mod grant;
mod group;
mod profile;

use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use gxcert_core::{EntityKind, GxCertResult};

use crate::image::ImageResolver;
use crate::source::{BlobFetcher, RemoteSource, SourceSlots};
use crate::store::{CacheCounters, CacheStats, CacheStores, KeyedStore};
use crate::traversal::{Fetch, TraversalSpec};

/// Client-side hydration cache over a remote entity graph.
///
/// Stores are shared by every call on the manager and never evicted. Two
/// concurrent calls for the same key may both miss and both fetch; the later
/// write wins.
pub struct HydrationCacheManager {
    stores: Arc<CacheStores>,
    sources: SourceSlots,
    images: ImageResolver,
    counters: Arc<CacheCounters>,
}

/// Builder for [`HydrationCacheManager`].
pub struct HydrationCacheManagerBuilder {
    primary: Arc<dyn RemoteSource>,
    blobs: Arc<dyn BlobFetcher>,
    alternates: Vec<Arc<dyn RemoteSource>>,
    stores: Option<Arc<CacheStores>>,
}

impl HydrationCacheManagerBuilder {
    /// Add an alternate source, selectable per call by its index.
    pub fn with_alternate(mut self, source: Arc<dyn RemoteSource>) -> Self {
        self.alternates.push(source);
        self
    }

    /// Use existing stores instead of empty ones, e.g. to serve the same
    /// cache through a manager bound to another source.
    pub fn with_stores(mut self, stores: Arc<CacheStores>) -> Self {
        self.stores = Some(stores);
        self
    }

    pub fn build(self) -> HydrationCacheManager {
        let stores = self.stores.unwrap_or_default();
        let counters = Arc::new(CacheCounters::default());
        HydrationCacheManager {
            images: ImageResolver::new(self.blobs, Arc::clone(&stores), Arc::clone(&counters)),
            sources: SourceSlots::new(self.primary, self.alternates),
            stores,
            counters,
        }
    }
}

impl HydrationCacheManager {
    /// Create a manager with empty stores and no alternate sources.
    pub fn new(primary: Arc<dyn RemoteSource>, blobs: Arc<dyn BlobFetcher>) -> Self {
        Self::builder(primary, blobs).build()
    }

    pub fn builder(
        primary: Arc<dyn RemoteSource>,
        blobs: Arc<dyn BlobFetcher>,
    ) -> HydrationCacheManagerBuilder {
        HydrationCacheManagerBuilder {
            primary,
            blobs,
            alternates: Vec::new(),
            stores: None,
        }
    }

    /// Swap the primary source handle.
    ///
    /// Calls already in flight may be served by either handle.
    pub fn set_primary_source(&self, source: Arc<dyn RemoteSource>) {
        tracing::info!("Primary remote source replaced");
        self.sources.set_primary(source);
    }

    pub fn stores(&self) -> &Arc<CacheStores> {
        &self.stores
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// Base resolution: reuse `store[key]` unless `fetch.refresh` is set,
    /// otherwise call the remote source and overwrite the entry.
    ///
    /// Returns the value and whether the store was written.
    async fn fetch_or_reuse<K, V, F, Fut>(
        &self,
        store: &KeyedStore<K, V>,
        key: &K,
        fetch: Fetch,
        spec: &TraversalSpec,
        entity_kind: EntityKind,
        remote: F,
    ) -> GxCertResult<(V, bool)>
    where
        K: Eq + Hash + Clone + Display,
        V: Clone,
        F: FnOnce(Arc<dyn RemoteSource>) -> Fut,
        Fut: Future<Output = GxCertResult<V>>,
    {
        let source = self.sources.select(spec.source())?;
        if !fetch.refresh {
            if let Some(value) = store.get(key).await {
                self.counters.hit();
                tracing::debug!(entity = %entity_kind, key = %key, "Cache hit");
                return Ok((value, false));
            }
        }

        self.counters.miss();
        self.counters.remote_fetch();
        tracing::debug!(
            entity = %entity_kind,
            key = %key,
            refresh = fetch.refresh,
            "Fetching from remote source"
        );
        let value = remote(source).await?;
        store.put(key.clone(), value.clone()).await;
        Ok((value, true))
    }
}
