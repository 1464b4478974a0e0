//! Group and membership-index resolution.

use std::sync::Arc;

use gxcert_core::{
    Address, ContentId, DirectiveKind, EntityKind, Group, GroupId, GroupMember, GxCertResult,
};

use super::HydrationCacheManager;
use crate::image::{run_detached, ImagePlan};
use crate::notify::{events, notify_detached, CacheEvent, CachePayload, SharedSink};
use crate::traversal::{Fetch, ImageFetch, TraversalSpec};

impl HydrationCacheManager {
    /// Resolve a group under the `group` directive.
    ///
    /// Follows `profileImage` into every member's icon.
    pub async fn get_group(
        &self,
        group_id: GroupId,
        sink: &SharedSink,
        spec: &TraversalSpec,
    ) -> GxCertResult<Group> {
        let (fetch, rest) = spec.require(DirectiveKind::Group)?;
        self.resolve_group(group_id, fetch, &rest, sink).await
    }

    pub(crate) async fn resolve_group(
        &self,
        group_id: GroupId,
        fetch: Fetch,
        spec: &TraversalSpec,
        sink: &SharedSink,
    ) -> GxCertResult<Group> {
        let (mut group, mut touched) = self
            .fetch_or_reuse(
                &self.stores.groups,
                &group_id,
                fetch,
                spec,
                EntityKind::Group,
                |source| async move { source.fetch_group(group_id).await },
            )
            .await?;

        if let (Some(image), _) = spec.take_image(DirectiveKind::ProfileImage) {
            let mut deferred = Vec::new();
            let mut attached = false;
            for member in &mut group.members {
                match self.images.plan(&member.icon, &image, sink).await {
                    ImagePlan::Ready(url) => {
                        if member.image_url.as_deref() != Some(url.as_str()) {
                            member.image_url = Some(url);
                            attached = true;
                        }
                    }
                    ImagePlan::Deferred => {
                        member.image_url = None;
                        deferred.push((member.address.clone(), member.icon.clone()));
                    }
                }
            }

            if attached {
                self.stores
                    .groups
                    .update(&group_id, |stored| {
                        merge_member_images(&mut stored.members, &group.members)
                    })
                    .await;
                touched = true;
            }
            if !deferred.is_empty() {
                self.spawn_member_images(group_id, deferred, image, sink).await;
            }
        }

        if touched {
            sink.notify(CacheEvent::new(
                events::GROUP_CACHE,
                CachePayload::Groups(self.stores.groups.snapshot().await),
            ));
        }
        Ok(group)
    }

    /// Resolve the groups `address` belongs to under the `groupId` directive.
    ///
    /// Each group goes through the group resolver with the `group` directive
    /// when present, otherwise with the `groupId` freshness.
    pub async fn get_groups_for_owner(
        &self,
        address: &Address,
        sink: &SharedSink,
        spec: &TraversalSpec,
    ) -> GxCertResult<Vec<Group>> {
        let (fetch, rest) = spec.require(DirectiveKind::GroupId)?;
        let source = self.sources.select(spec.source())?;

        let cached = if fetch.refresh {
            None
        } else {
            self.stores.groups_by_owner.get(address).await
        };
        let (group_ids, fetched) = match &cached {
            Some(groups) => {
                self.counters.hit();
                tracing::debug!(owner = %address, "Membership index hit");
                (groups.iter().map(|g| g.group_id).collect::<Vec<_>>(), false)
            }
            None => {
                self.counters.miss();
                self.counters.remote_fetch();
                tracing::debug!(owner = %address, refresh = fetch.refresh, "Fetching group ids");
                (source.fetch_group_ids(address).await?, true)
            }
        };

        let (group_fetch, rest) = rest.take_fetch(DirectiveKind::Group);
        let group_fetch = group_fetch.unwrap_or(fetch);
        let mut groups = Vec::with_capacity(group_ids.len());
        for group_id in group_ids {
            groups.push(self.resolve_group(group_id, group_fetch, &rest, sink).await?);
        }

        if fetched || cached.as_ref() != Some(&groups) {
            self.stores
                .groups_by_owner
                .put(address.clone(), groups.clone())
                .await;
            sink.notify(CacheEvent::new(
                events::GROUPS_CACHE,
                CachePayload::GroupsByOwner(self.stores.groups_by_owner.snapshot().await),
            ));
        }
        Ok(groups)
    }

    /// One detached task per group; it emits once, after every deferred member
    /// image was resolved.
    async fn spawn_member_images(
        &self,
        group_id: GroupId,
        deferred: Vec<(Address, ContentId)>,
        image: ImageFetch,
        sink: &SharedSink,
    ) {
        let images = self.images.clone();
        let stores = Arc::clone(&self.stores);
        let sink = Arc::clone(sink);
        run_detached("member_images", async move {
            let mut updated = None;
            for (address, icon) in deferred {
                let url = images.resolve_detached(&icon, image.refresh, &sink).await;
                updated = stores
                    .groups
                    .update(&group_id, |stored| {
                        for member in &mut stored.members {
                            if member.address == address && member.icon == icon {
                                member.image_url = Some(url.clone());
                            }
                        }
                    })
                    .await;
            }

            match (image.notify_event, updated) {
                (Some(tag), Some(group)) => {
                    notify_detached(&sink, CacheEvent::new(tag, CachePayload::Group(group)));
                }
                _ => tracing::debug!(group_id = %group_id, "Background member images attached"),
            }
        })
        .await;
    }
}

/// Copy attached member images onto the stored member list, matching members
/// by address and icon.
fn merge_member_images(stored: &mut [GroupMember], hydrated: &[GroupMember]) {
    for member in stored.iter_mut() {
        let attached = hydrated
            .iter()
            .find(|h| h.address == member.address && h.icon == member.icon)
            .and_then(|h| h.image_url.clone());
        if attached.is_some() {
            member.image_url = attached;
        }
    }
}
