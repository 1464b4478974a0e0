//! Certificate and group-certificate index resolution.

use std::sync::Arc;

use gxcert_core::{CertId, Certificate, ContentId, DirectiveKind, EntityKind, GroupId, GxCertResult};

use super::HydrationCacheManager;
use crate::image::{run_detached, ImagePlan};
use crate::notify::{events, notify_detached, CacheEvent, CachePayload, SharedSink};
use crate::traversal::{Fetch, ImageFetch, TraversalSpec};

impl HydrationCacheManager {
    /// Resolve a certificate under the `certificate` directive.
    ///
    /// Follows `certificateImage` into the certificate's image and `group`
    /// into its owning group. A failing group hop fails the call.
    pub async fn get_certificate(
        &self,
        cert_id: CertId,
        sink: &SharedSink,
        spec: &TraversalSpec,
    ) -> GxCertResult<Certificate> {
        let (fetch, rest) = spec.require(DirectiveKind::Certificate)?;
        self.resolve_certificate(cert_id, fetch, &rest, sink).await
    }

    pub(crate) async fn resolve_certificate(
        &self,
        cert_id: CertId,
        fetch: Fetch,
        spec: &TraversalSpec,
        sink: &SharedSink,
    ) -> GxCertResult<Certificate> {
        let (mut certificate, mut touched) = self
            .fetch_or_reuse(
                &self.stores.certificates,
                &cert_id,
                fetch,
                spec,
                EntityKind::Certificate,
                |source| async move { source.fetch_certificate(cert_id).await },
            )
            .await?;

        let (image, rest) = spec.take_image(DirectiveKind::CertificateImage);
        let (group, rest) = rest.take_fetch(DirectiveKind::Group);
        let mut attached = false;

        if let Some(image) = image {
            match self.images.plan(&certificate.image, &image, sink).await {
                ImagePlan::Ready(url) => {
                    if certificate.image_url.as_deref() != Some(url.as_str()) {
                        certificate.image_url = Some(url);
                        attached = true;
                    }
                }
                ImagePlan::Deferred => {
                    certificate.image_url = None;
                    self.spawn_certificate_image(cert_id, certificate.image.clone(), image, sink)
                        .await;
                }
            }
        }

        if let Some(group_fetch) = group {
            let group = self
                .resolve_group(certificate.group_id, group_fetch, &rest, sink)
                .await?;
            if certificate.group.as_ref() != Some(&group) {
                certificate.group = Some(group);
                attached = true;
            }
        }

        if attached {
            self.stores
                .certificates
                .update(&cert_id, |stored| attach_certificate_relations(stored, &certificate))
                .await;
            touched = true;
        }
        if touched {
            self.emit_certificates(sink).await;
        }
        Ok(certificate)
    }

    /// Resolve the certificates issued by a group under the `certificate`
    /// directive.
    ///
    /// Follows `certificateImage` into every certificate's image and
    /// `userCert` into every certificate's issued grants.
    pub async fn get_group_certificates(
        &self,
        group_id: GroupId,
        sink: &SharedSink,
        spec: &TraversalSpec,
    ) -> GxCertResult<Vec<Certificate>> {
        let (fetch, rest) = spec.require(DirectiveKind::Certificate)?;
        let (mut certificates, fetched) = self
            .fetch_or_reuse(
                &self.stores.group_certificates,
                &group_id,
                fetch,
                &rest,
                EntityKind::Certificate,
                |source| async move { source.fetch_group_certificates(group_id).await },
            )
            .await?;

        let mut certificates_touched = false;
        if fetched {
            for certificate in &certificates {
                certificates_touched |= self
                    .stores
                    .certificates
                    .insert_if_absent(certificate.cert_id, certificate.clone())
                    .await;
            }
        }

        let (image, rest) = rest.take_image(DirectiveKind::CertificateImage);
        let (user_cert, rest) = rest.take_fetch(DirectiveKind::UserCert);
        let mut deferred = Vec::new();
        let mut list_changed = false;

        for certificate in &mut certificates {
            let mut attached = false;
            if let Some(image) = &image {
                match self.images.plan(&certificate.image, image, sink).await {
                    ImagePlan::Ready(url) => {
                        if certificate.image_url.as_deref() != Some(url.as_str()) {
                            certificate.image_url = Some(url);
                            attached = true;
                        }
                    }
                    ImagePlan::Deferred => {
                        certificate.image_url = None;
                        deferred.push((certificate.cert_id, certificate.image.clone()));
                    }
                }
            }
            if let Some(grant_fetch) = user_cert {
                let grants = self
                    .resolve_issued_grants(certificate.cert_id, grant_fetch, &rest, sink)
                    .await?;
                if certificate.user_certs.as_ref() != Some(&grants) {
                    certificate.user_certs = Some(grants);
                    attached = true;
                }
            }

            if attached {
                self.stores
                    .certificates
                    .update(&certificate.cert_id, |stored| {
                        attach_certificate_relations(stored, certificate)
                    })
                    .await;
                certificates_touched = true;
                list_changed = true;
            }
        }

        // The index entry must hold the hydrated list before background
        // hydration starts amending it.
        if list_changed {
            self.stores
                .group_certificates
                .put(group_id, certificates.clone())
                .await;
        }
        if let (Some(image), false) = (image, deferred.is_empty()) {
            self.spawn_list_images(group_id, deferred, image, sink).await;
        }

        if fetched || list_changed {
            sink.notify(CacheEvent::new(
                events::GROUP_CERTIFICATES_CACHE,
                CachePayload::GroupCertificates(self.stores.group_certificates.snapshot().await),
            ));
        }
        if certificates_touched {
            self.emit_certificates(sink).await;
        }
        Ok(certificates)
    }

    async fn emit_certificates(&self, sink: &SharedSink) {
        sink.notify(CacheEvent::new(
            events::CERTIFICATE_CACHE,
            CachePayload::Certificates(self.stores.certificates.snapshot().await),
        ));
    }

    async fn spawn_certificate_image(
        &self,
        cert_id: CertId,
        content_id: ContentId,
        image: ImageFetch,
        sink: &SharedSink,
    ) {
        let images = self.images.clone();
        let stores = Arc::clone(&self.stores);
        let sink = Arc::clone(sink);
        run_detached("certificate_image", async move {
            let url = images.resolve_detached(&content_id, image.refresh, &sink).await;
            let updated = stores
                .certificates
                .update(&cert_id, |stored| {
                    if stored.image == content_id {
                        stored.image_url = Some(url);
                    }
                })
                .await
                .filter(|stored| stored.image == content_id);

            match (image.notify_event, updated) {
                (Some(tag), Some(certificate)) => {
                    notify_detached(
                        &sink,
                        CacheEvent::new(tag, CachePayload::Certificate(certificate)),
                    );
                }
                _ => tracing::debug!(cert_id = %cert_id, "Background certificate image attached"),
            }
        })
        .await;
    }

    /// One detached task per list; it amends both the primary entries and the
    /// index entry, then emits the hydrated list once.
    async fn spawn_list_images(
        &self,
        group_id: GroupId,
        deferred: Vec<(CertId, ContentId)>,
        image: ImageFetch,
        sink: &SharedSink,
    ) {
        let images = self.images.clone();
        let stores = Arc::clone(&self.stores);
        let sink = Arc::clone(sink);
        run_detached("certificate_list_images", async move {
            let mut updated = None;
            for (cert_id, content_id) in deferred {
                let url = images.resolve_detached(&content_id, image.refresh, &sink).await;
                stores
                    .certificates
                    .update(&cert_id, |stored| {
                        if stored.image == content_id {
                            stored.image_url = Some(url.clone());
                        }
                    })
                    .await;
                updated = stores
                    .group_certificates
                    .update(&group_id, |list| {
                        for stored in list.iter_mut() {
                            if stored.cert_id == cert_id && stored.image == content_id {
                                stored.image_url = Some(url.clone());
                            }
                        }
                    })
                    .await;
            }

            match (image.notify_event, updated) {
                (Some(tag), Some(certificates)) => {
                    notify_detached(
                        &sink,
                        CacheEvent::new(tag, CachePayload::CertificateList(certificates)),
                    );
                }
                _ => tracing::debug!(group_id = %group_id, "Background certificate images attached"),
            }
        })
        .await;
    }
}

/// Copy the relation fields attached in this call onto the stored entry.
fn attach_certificate_relations(stored: &mut Certificate, hydrated: &Certificate) {
    if hydrated.image_url.is_some() && stored.image == hydrated.image {
        stored.image_url = hydrated.image_url.clone();
    }
    if hydrated.group.is_some() {
        stored.group = hydrated.group.clone();
    }
    if hydrated.user_certs.is_some() {
        stored.user_certs = hydrated.user_certs.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use crate::mock::{ChannelSink, SourceCall};
    use crate::traversal::Directive;
    use std::time::Duration;

    fn cert_spec() -> TraversalSpec {
        TraversalSpec::new().with(Directive::fetch(DirectiveKind::Certificate, false))
    }

    #[tokio::test]
    async fn test_certificate_without_image_directive_skips_blob_fetcher() {
        let h = harness();
        h.source.insert_certificate(certificate(1, 10, "QmCert"));
        h.blobs.insert("QmCert", "blob:cert");

        let cert = h
            .manager
            .get_certificate(CertId::new(1), &h.sink, &cert_spec())
            .await
            .unwrap();
        assert!(cert.image_url.is_none());
        assert!(cert.group.is_none());
        assert_eq!(h.blobs.total_calls(), 0);
        assert_eq!(h.source.calls(SourceCall::Group, 10), 0);
    }

    #[tokio::test]
    async fn test_unresolvable_image_yields_empty_string() {
        let h = harness();
        h.source.insert_certificate(certificate(1, 10, "Qm999"));
        let spec = cert_spec().with(Directive::image(
            DirectiveKind::CertificateImage,
            ImageFetch::waited(false),
        ));

        let cert = h.manager.get_certificate(CertId::new(1), &h.sink, &spec).await.unwrap();
        assert_eq!(cert.image_url.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_group_hop_attaches_group_with_member_images() {
        let h = harness();
        h.source.insert_certificate(certificate(1, 10, "QmCert"));
        h.source.insert_group(group(10, &[("0xA", "QmA")]));
        h.blobs.insert("QmCert", "blob:cert");
        h.blobs.insert("QmA", "blob:a");
        let spec = cert_spec()
            .with(Directive::image(
                DirectiveKind::CertificateImage,
                ImageFetch::waited(false),
            ))
            .with(Directive::fetch(DirectiveKind::Group, false))
            .with(Directive::image(
                DirectiveKind::ProfileImage,
                ImageFetch::waited(false),
            ));

        let cert = h.manager.get_certificate(CertId::new(1), &h.sink, &spec).await.unwrap();
        assert_eq!(cert.image_url.as_deref(), Some("blob:cert"));
        let group = cert.group.clone().unwrap();
        assert_eq!(group.members[0].image_url.as_deref(), Some("blob:a"));

        let stored = h.manager.stores().certificates.get(&CertId::new(1)).await.unwrap();
        assert_eq!(stored, cert);
        assert!(h.recorder.count(events::GROUP_CACHE) >= 1);
        assert!(h.recorder.count(events::CERTIFICATE_CACHE) >= 1);
    }

    #[tokio::test]
    async fn test_background_image_refresh_returns_certificate_without_image() {
        let h = harness();
        h.source.insert_certificate(certificate(1, 10, "QmCert"));
        h.blobs.insert("QmCert", "blob:v1");
        let waited = cert_spec().with(Directive::image(
            DirectiveKind::CertificateImage,
            ImageFetch::waited(false),
        ));
        h.manager.get_certificate(CertId::new(1), &h.sink, &waited).await.unwrap();
        h.blobs.insert("QmCert", "blob:v2");
        let (channel, mut rx) = ChannelSink::new();
        let sink: SharedSink = Arc::new(channel);
        let background = cert_spec().with(Directive::image(
            DirectiveKind::CertificateImage,
            ImageFetch::background(true, Some("CERT_IMAGE_READY")),
        ));

        let cert = h
            .manager
            .get_certificate(CertId::new(1), &sink, &background)
            .await
            .unwrap();
        assert!(cert.image_url.is_none());

        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if event.event == "CERT_IMAGE_READY" {
                match event.payload {
                    CachePayload::Certificate(cert) => {
                        assert_eq!(cert.image_url.as_deref(), Some("blob:v2"))
                    }
                    other => panic!("unexpected payload {other:?}"),
                }
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_group_hop_failure_propagates() {
        let h = harness();
        h.source.insert_certificate(certificate(1, 10, "QmCert"));
        let spec = cert_spec().with(Directive::fetch(DirectiveKind::Group, false));

        assert!(h.manager.get_certificate(CertId::new(1), &h.sink, &spec).await.is_err());
    }

    #[tokio::test]
    async fn test_group_certificates_fan_out_into_issued_grants() {
        let h = harness();
        h.source.set_group_certificates(
            GroupId::new(10),
            vec![certificate(1, 10, "Qm1"), certificate(2, 10, "Qm2")],
        );
        h.source
            .set_issued_grants(CertId::new(1), vec![grant(100, 1, "0xG", "0xA")]);
        let spec = cert_spec().with(Directive::fetch(DirectiveKind::UserCert, false));

        let certs = h
            .manager
            .get_group_certificates(GroupId::new(10), &h.sink, &spec)
            .await
            .unwrap();
        assert_eq!(certs[0].user_certs.as_ref().map(Vec::len), Some(1));
        assert_eq!(certs[1].user_certs, Some(Vec::new()));
        // Grants found through the fan-out land in the primary grant store.
        assert!(h
            .manager
            .stores()
            .grants
            .contains(&gxcert_core::GrantId::new(100))
            .await);
        assert_eq!(
            h.manager.stores().group_certificates.get(&GroupId::new(10)).await,
            Some(certs.clone())
        );
    }

    #[tokio::test]
    async fn test_group_certificates_keep_known_primary_entries() {
        let h = harness();
        h.source.insert_certificate(certificate(1, 10, "Qm1"));
        h.source.insert_group(group(10, &[]));
        let hop = cert_spec().with(Directive::fetch(DirectiveKind::Group, false));
        h.manager.get_certificate(CertId::new(1), &h.sink, &hop).await.unwrap();

        h.source
            .set_group_certificates(GroupId::new(10), vec![certificate(1, 10, "Qm1")]);
        h.manager
            .get_group_certificates(GroupId::new(10), &h.sink, &cert_spec())
            .await
            .unwrap();

        let stored = h.manager.stores().certificates.get(&CertId::new(1)).await.unwrap();
        assert!(stored.group.is_some());
    }

    #[tokio::test]
    async fn test_group_certificate_images_in_background() {
        let h = harness();
        h.source.set_group_certificates(
            GroupId::new(10),
            vec![certificate(1, 10, "Qm1"), certificate(2, 10, "Qm2")],
        );
        h.blobs.insert("Qm1", "blob:1");
        h.blobs.insert("Qm2", "blob:2");
        let (channel, mut rx) = ChannelSink::new();
        let sink: SharedSink = Arc::new(channel);
        let spec = cert_spec().with(Directive::image(
            DirectiveKind::CertificateImage,
            ImageFetch::background(false, Some("CERT_IMAGES_READY")),
        ));

        let certs = h
            .manager
            .get_group_certificates(GroupId::new(10), &sink, &spec)
            .await
            .unwrap();
        assert!(certs.iter().all(|c| c.image_url.is_none()));

        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if event.event == "CERT_IMAGES_READY" {
                match event.payload {
                    CachePayload::CertificateList(list) => {
                        let urls: Vec<_> =
                            list.iter().map(|c| c.image_url.as_deref()).collect();
                        assert_eq!(urls, vec![Some("blob:1"), Some("blob:2")]);
                    }
                    other => panic!("unexpected payload {other:?}"),
                }
                break;
            }
        }
        let stored = h.manager.stores().certificates.get(&CertId::new(2)).await.unwrap();
        assert_eq!(stored.image_url.as_deref(), Some("blob:2"));
    }
}
