//! Image (leaf) hydration.
//!
//! Content ids are shared across entity kinds: a content id resolved for a
//! profile is reused for a certificate with the same image. Failures are
//! recovered here: the caller gets an empty string and the failure is logged.

use std::future::Future;
use std::sync::Arc;

use gxcert_core::ContentId;

use crate::notify::{events, notify_detached, CacheEvent, CachePayload, SharedSink};
use crate::source::BlobFetcher;
use crate::store::{CacheCounters, CacheStores};
use crate::traversal::ImageFetch;

/// Outcome of planning an image hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ImagePlan {
    /// The URL is known now (cache hit or waited resolution).
    Ready(String),
    /// Resolution must happen in the background.
    Deferred,
}

#[derive(Clone)]
pub(crate) struct ImageResolver {
    blobs: Arc<dyn BlobFetcher>,
    stores: Arc<CacheStores>,
    counters: Arc<CacheCounters>,
}

impl ImageResolver {
    pub(crate) fn new(
        blobs: Arc<dyn BlobFetcher>,
        stores: Arc<CacheStores>,
        counters: Arc<CacheCounters>,
    ) -> Self {
        Self {
            blobs,
            stores,
            counters,
        }
    }

    /// Only a waited hop resolves here. A background hop is always deferred,
    /// cache hit or not; the detached task re-checks the store before
    /// fetching, so a hit still costs no remote call.
    pub(crate) async fn plan(
        &self,
        content_id: &ContentId,
        image: &ImageFetch,
        sink: &SharedSink,
    ) -> ImagePlan {
        if !image.wait {
            return ImagePlan::Deferred;
        }
        if !image.refresh {
            if let Some(url) = self.stores.images.get(content_id).await {
                return ImagePlan::Ready(url);
            }
        }
        ImagePlan::Ready(self.fetch(content_id, sink, false).await)
    }

    /// Resolve from a background task. Re-checks the store first so a content
    /// id resolved meanwhile by another hop is not fetched twice.
    pub(crate) async fn resolve_detached(
        &self,
        content_id: &ContentId,
        refresh: bool,
        sink: &SharedSink,
    ) -> String {
        if !refresh {
            if let Some(url) = self.stores.images.get(content_id).await {
                return url;
            }
        }
        self.fetch(content_id, sink, true).await
    }

    async fn fetch(&self, content_id: &ContentId, sink: &SharedSink, detached: bool) -> String {
        self.counters.image_fetch();
        match self.blobs.resolve(content_id).await {
            Ok(url) => {
                self.stores.images.put(content_id.clone(), url.clone()).await;
                let event = CacheEvent::new(
                    events::IMAGE_CACHE,
                    CachePayload::Images(self.stores.images.snapshot().await),
                );
                if detached {
                    notify_detached(sink, event);
                } else {
                    sink.notify(event);
                }
                url
            }
            Err(err) => {
                self.counters.image_failure();
                tracing::warn!(content_id = %content_id, error = %err, "Image resolution failed");
                String::new()
            }
        }
    }
}

/// Run hydration work without awaiting it.
///
/// The work is spawned onto the current tokio runtime with no handle kept:
/// no cancellation, no backpressure. Outside a runtime it runs inline before
/// returning.
pub(crate) async fn run_detached<F>(label: &'static str, work: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            tracing::debug!(task = label, "Spawning background hydration");
            drop(handle.spawn(work));
        }
        Err(_) => {
            tracing::debug!(task = label, "No tokio runtime, hydrating inline");
            work.await;
        }
    }
}
