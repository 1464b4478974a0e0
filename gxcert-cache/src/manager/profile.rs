//! Profile resolution.

use std::sync::Arc;

use gxcert_core::{Address, ContentId, DirectiveKind, EntityKind, GxCertResult, Profile};

use super::HydrationCacheManager;
use crate::image::{run_detached, ImagePlan};
use crate::notify::{events, notify_detached, CacheEvent, CachePayload, SharedSink};
use crate::traversal::{Fetch, ImageFetch, TraversalSpec};

impl HydrationCacheManager {
    /// Resolve the profile of `address` under the `profile` directive.
    ///
    /// Follows `profileImage` into the profile's icon.
    pub async fn get_profile(
        &self,
        address: &Address,
        sink: &SharedSink,
        spec: &TraversalSpec,
    ) -> GxCertResult<Profile> {
        let (fetch, rest) = spec.require(DirectiveKind::Profile)?;
        self.resolve_profile(address, fetch, &rest, sink).await
    }

    /// Profile resolution with the root directive already consumed. Also
    /// serves the recipient-profile hop of a grant.
    pub(crate) async fn resolve_profile(
        &self,
        address: &Address,
        fetch: Fetch,
        spec: &TraversalSpec,
        sink: &SharedSink,
    ) -> GxCertResult<Profile> {
        let (mut profile, mut touched) = self
            .fetch_or_reuse(
                &self.stores.profiles,
                address,
                fetch,
                spec,
                EntityKind::Profile,
                |source| async move { source.fetch_profile(address).await },
            )
            .await?;

        if let (Some(image), _) = spec.take_image(DirectiveKind::ProfileImage) {
            match self.images.plan(&profile.icon, &image, sink).await {
                ImagePlan::Ready(url) => {
                    if profile.image_url.as_deref() != Some(url.as_str()) {
                        profile.image_url = Some(url.clone());
                        self.stores
                            .profiles
                            .update(address, |stored| stored.image_url = Some(url))
                            .await;
                        touched = true;
                    }
                }
                ImagePlan::Deferred => {
                    // The stored entry keeps its image until the task replaces it.
                    profile.image_url = None;
                    self.spawn_profile_image(address.clone(), profile.icon.clone(), image, sink)
                        .await;
                }
            }
        }

        if touched {
            sink.notify(CacheEvent::new(
                events::PROFILE_CACHE,
                CachePayload::Profiles(self.stores.profiles.snapshot().await),
            ));
        }
        Ok(profile)
    }

    async fn spawn_profile_image(
        &self,
        address: Address,
        icon: ContentId,
        image: ImageFetch,
        sink: &SharedSink,
    ) {
        let images = self.images.clone();
        let stores = Arc::clone(&self.stores);
        let sink = Arc::clone(sink);
        run_detached("profile_image", async move {
            let url = images.resolve_detached(&icon, image.refresh, &sink).await;
            // The entry may have been refreshed with another icon meanwhile.
            let updated = stores
                .profiles
                .update(&address, |stored| {
                    if stored.icon == icon {
                        stored.image_url = Some(url);
                    }
                })
                .await
                .filter(|stored| stored.icon == icon);

            match (image.notify_event, updated) {
                (Some(tag), Some(profile)) => {
                    notify_detached(&sink, CacheEvent::new(tag, CachePayload::Profile(profile)));
                }
                _ => tracing::debug!(address = %address, "Background profile image attached"),
            }
        })
        .await;
    }
}
