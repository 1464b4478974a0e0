//! Grant (user certificate) resolution and the issued / received indexes.

use std::collections::HashMap;

use gxcert_core::{
    Address, CertId, Certificate, DirectiveKind, EntityKind, Grant, GrantId, GxCertResult, Profile,
};

use super::HydrationCacheManager;
use crate::notify::{events, CacheEvent, CachePayload, SharedSink};
use crate::traversal::{Fetch, TraversalSpec};

impl HydrationCacheManager {
    /// Resolve a grant under the `userCert` directive.
    ///
    /// Follows `certificate` into the granted certificate and
    /// `profile-on-grant` into the recipient's profile.
    pub async fn get_grant(
        &self,
        grant_id: GrantId,
        sink: &SharedSink,
        spec: &TraversalSpec,
    ) -> GxCertResult<Grant> {
        let (fetch, rest) = spec.require(DirectiveKind::UserCert)?;
        let (mut grant, fetched) = self
            .fetch_or_reuse(
                &self.stores.grants,
                &grant_id,
                fetch,
                &rest,
                EntityKind::Grant,
                |source| async move { source.fetch_grant(grant_id).await },
            )
            .await?;

        let attached = self
            .hydrate_grant(&mut grant, &rest, sink, true, &mut HopMemo::default())
            .await?;
        if fetched || attached {
            self.emit_grants(sink).await;
        }
        Ok(grant)
    }

    /// Resolve the grants issued for a certificate under the `userCert`
    /// directive, following `certificate` and `profile-on-grant` per grant.
    pub async fn get_issued_grants(
        &self,
        cert_id: CertId,
        sink: &SharedSink,
        spec: &TraversalSpec,
    ) -> GxCertResult<Vec<Grant>> {
        let (fetch, rest) = spec.require(DirectiveKind::UserCert)?;
        self.resolve_issued_grants(cert_id, fetch, &rest, sink).await
    }

    pub(crate) async fn resolve_issued_grants(
        &self,
        cert_id: CertId,
        fetch: Fetch,
        spec: &TraversalSpec,
        sink: &SharedSink,
    ) -> GxCertResult<Vec<Grant>> {
        let (grants, fetched) = self
            .fetch_or_reuse(
                &self.stores.issued_grants,
                &cert_id,
                fetch,
                spec,
                EntityKind::Grant,
                |source| async move { source.fetch_issued_grants(cert_id).await },
            )
            .await?;

        let (grants, changed) = self.hydrate_grant_list(grants, fetched, spec, sink, true).await?;
        if changed {
            self.stores.issued_grants.put(cert_id, grants.clone()).await;
        }
        if fetched || changed {
            sink.notify(CacheEvent::new(
                events::ISSUED_USER_CERT_CACHE,
                CachePayload::IssuedGrants(self.stores.issued_grants.snapshot().await),
            ));
        }
        Ok(grants)
    }

    /// Resolve the grants received by `address` under the `userCert`
    /// directive, following `certificate` per grant. Recipient profiles are
    /// not hydrated here; the recipient is `address` itself.
    pub async fn get_received_grants(
        &self,
        address: &Address,
        sink: &SharedSink,
        spec: &TraversalSpec,
    ) -> GxCertResult<Vec<Grant>> {
        let (fetch, rest) = spec.require(DirectiveKind::UserCert)?;
        let (grants, fetched) = self
            .fetch_or_reuse(
                &self.stores.received_grants,
                address,
                fetch,
                &rest,
                EntityKind::Grant,
                |source| async move { source.fetch_received_grants(address).await },
            )
            .await?;

        let (grants, changed) = self.hydrate_grant_list(grants, fetched, &rest, sink, false).await?;
        if changed {
            self.stores
                .received_grants
                .put(address.clone(), grants.clone())
                .await;
        }
        if fetched || changed {
            sink.notify(CacheEvent::new(
                events::RECEIVED_USER_CERT_CACHE,
                CachePayload::ReceivedGrants(self.stores.received_grants.snapshot().await),
            ));
        }
        Ok(grants)
    }

    /// Dedup a fetched index list into the primary grant store, then hydrate
    /// every member in list order. Each certificate and recipient is resolved
    /// at most once per list, whatever its freshness.
    ///
    /// Returns the hydrated list and whether any member gained a relation.
    async fn hydrate_grant_list(
        &self,
        mut grants: Vec<Grant>,
        fetched: bool,
        spec: &TraversalSpec,
        sink: &SharedSink,
        include_profile: bool,
    ) -> GxCertResult<(Vec<Grant>, bool)> {
        let mut grants_touched = false;
        if fetched {
            for grant in &grants {
                // Known grants keep the relation fields already attached.
                grants_touched |= self
                    .stores
                    .grants
                    .insert_if_absent(grant.grant_id, grant.clone())
                    .await;
            }
        }

        let mut memo = HopMemo::default();
        let mut changed = false;
        for grant in &mut grants {
            changed |= self
                .hydrate_grant(grant, spec, sink, include_profile, &mut memo)
                .await?;
        }

        if grants_touched || changed {
            self.emit_grants(sink).await;
        }
        Ok((grants, changed))
    }

    /// Grant-level relation hydration. Both relation directives are consumed
    /// before recursing, so neither hop sees the other's directive.
    ///
    /// Writes attached fields back into the primary entry and returns whether
    /// anything was attached.
    async fn hydrate_grant(
        &self,
        grant: &mut Grant,
        spec: &TraversalSpec,
        sink: &SharedSink,
        include_profile: bool,
        memo: &mut HopMemo,
    ) -> GxCertResult<bool> {
        let (certificate, rest) = spec.take_fetch(DirectiveKind::Certificate);
        let (profile, rest) = rest.take_fetch(DirectiveKind::ProfileOnGrant);
        let mut attached = false;

        if let Some(fetch) = certificate {
            let certificate = match memo.certificates.get(&grant.cert_id) {
                Some(certificate) => certificate.clone(),
                None => {
                    let certificate = self
                        .resolve_certificate(grant.cert_id, fetch, &rest, sink)
                        .await?;
                    memo.certificates.insert(grant.cert_id, certificate.clone());
                    certificate
                }
            };
            if grant.certificate.as_deref() != Some(&certificate) {
                grant.certificate = Some(Box::new(certificate));
                attached = true;
            }
        }

        if let (Some(fetch), true) = (profile, include_profile) {
            let resolved = match memo.profiles.get(&grant.to) {
                Some(resolved) => resolved.clone(),
                None => {
                    let resolved = match self.resolve_profile(&grant.to, fetch, &rest, sink).await {
                        Ok(profile) => Some(profile),
                        Err(err) => {
                            tracing::warn!(
                                grant_id = %grant.grant_id,
                                recipient = %grant.to,
                                error = %err,
                                "Recipient profile hydration failed"
                            );
                            None
                        }
                    };
                    memo.profiles.insert(grant.to.clone(), resolved.clone());
                    resolved
                }
            };
            if let Some(profile) = resolved {
                if grant.to_profile.as_ref() != Some(&profile) {
                    grant.to_profile = Some(profile);
                    attached = true;
                }
            }
        }

        if attached {
            self.stores
                .grants
                .update(&grant.grant_id, |stored| attach_grant_relations(stored, grant))
                .await;
        }
        Ok(attached)
    }

    async fn emit_grants(&self, sink: &SharedSink) {
        sink.notify(CacheEvent::new(
            events::USER_CERT_CACHE,
            CachePayload::Grants(self.stores.grants.snapshot().await),
        ));
    }
}

/// Relations already resolved within one call. A failed recipient profile is
/// remembered as `None`.
#[derive(Default)]
struct HopMemo {
    certificates: HashMap<CertId, Certificate>,
    profiles: HashMap<Address, Option<Profile>>,
}

/// Copy the relation fields attached in this call onto the stored entry.
fn attach_grant_relations(stored: &mut Grant, hydrated: &Grant) {
    if hydrated.certificate.is_some() {
        stored.certificate = hydrated.certificate.clone();
    }
    if hydrated.to_profile.is_some() {
        stored.to_profile = hydrated.to_profile.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use crate::mock::SourceCall;
    use crate::traversal::Directive;

    fn user_cert_spec(refresh: bool) -> TraversalSpec {
        TraversalSpec::new().with(Directive::fetch(DirectiveKind::UserCert, refresh))
    }

    #[tokio::test]
    async fn test_issued_grants_gain_certificate_on_second_call() {
        let h = harness();
        h.source.insert_certificate(certificate(1, 10, "QmCert"));
        h.source.set_issued_grants(
            CertId::new(1),
            vec![grant(100, 1, "0xG", "0xA"), grant(101, 1, "0xG", "0xB")],
        );

        let bare = h
            .manager
            .get_issued_grants(CertId::new(1), &h.sink, &user_cert_spec(true))
            .await
            .unwrap();
        assert!(bare.iter().all(|g| g.certificate.is_none()));

        let spec = user_cert_spec(false).with(Directive::fetch(DirectiveKind::Certificate, false));
        let hydrated = h
            .manager
            .get_issued_grants(CertId::new(1), &h.sink, &spec)
            .await
            .unwrap();
        assert_eq!(hydrated.len(), 2);
        assert!(hydrated
            .iter()
            .all(|g| g.certificate.as_ref().map(|c| c.cert_id) == Some(CertId::new(1))));
        assert_eq!(h.source.calls(SourceCall::IssuedGrants, 1), 1);
        assert_eq!(h.source.calls(SourceCall::Certificate, 1), 1);
    }

    #[tokio::test]
    async fn test_refreshed_certificate_is_fetched_once_per_list() {
        let h = harness();
        h.source.insert_certificate(certificate(1, 10, "QmCert"));
        h.source.set_issued_grants(
            CertId::new(1),
            vec![
                grant(100, 1, "0xG", "0xA"),
                grant(101, 1, "0xG", "0xB"),
                grant(102, 1, "0xG", "0xC"),
            ],
        );
        let spec = user_cert_spec(false).with(Directive::fetch(DirectiveKind::Certificate, true));

        let grants = h
            .manager
            .get_issued_grants(CertId::new(1), &h.sink, &spec)
            .await
            .unwrap();
        assert!(grants.iter().all(|g| g.certificate.is_some()));
        assert_eq!(h.source.calls(SourceCall::Certificate, 1), 1);
        assert_eq!(h.recorder.count(events::CERTIFICATE_CACHE), 1);
    }

    #[tokio::test]
    async fn test_shared_recipient_is_resolved_once_per_list() {
        let h = harness();
        h.source.insert_profile(profile("0xA", "alice", "Qm123"));
        h.source.set_issued_grants(
            CertId::new(1),
            vec![grant(100, 1, "0xG", "0xA"), grant(101, 1, "0xH", "0xA")],
        );
        let spec =
            user_cert_spec(false).with(Directive::fetch(DirectiveKind::ProfileOnGrant, true));

        let grants = h
            .manager
            .get_issued_grants(CertId::new(1), &h.sink, &spec)
            .await
            .unwrap();
        assert!(grants.iter().all(|g| g.to_profile.is_some()));
        assert_eq!(h.source.calls(SourceCall::Profile, "0xA"), 1);
    }

    #[tokio::test]
    async fn test_grant_dedup_across_indexes_preserves_relations() {
        let h = harness();
        let shared = grant(100, 1, "0xG", "0xA");
        h.source.insert_certificate(certificate(1, 10, "QmCert"));
        h.source.set_issued_grants(CertId::new(1), vec![shared.clone()]);
        h.source
            .set_received_grants(Address::new("0xA"), vec![shared.clone()]);

        let spec = user_cert_spec(false).with(Directive::fetch(DirectiveKind::Certificate, false));
        h.manager
            .get_issued_grants(CertId::new(1), &h.sink, &spec)
            .await
            .unwrap();
        h.manager
            .get_received_grants(&Address::new("0xA"), &h.sink, &user_cert_spec(false))
            .await
            .unwrap();

        assert_eq!(h.manager.stores().grants.len().await, 1);
        let stored = h.manager.stores().grants.get(&GrantId::new(100)).await.unwrap();
        assert!(stored.certificate.is_some());
    }

    #[tokio::test]
    async fn test_recipient_profile_failure_is_swallowed() {
        let h = harness();
        h.source.insert_grant(grant(100, 1, "0xG", "0xMissing"));
        let spec = user_cert_spec(false).with(Directive::fetch(DirectiveKind::ProfileOnGrant, false));

        let grant = h
            .manager
            .get_grant(GrantId::new(100), &h.sink, &spec)
            .await
            .unwrap();
        assert!(grant.to_profile.is_none());
        assert_eq!(h.source.calls(SourceCall::Profile, "0xMissing"), 1);
    }

    #[tokio::test]
    async fn test_grant_hydrates_certificate_and_recipient() {
        let h = harness();
        h.source.insert_grant(grant(100, 1, "0xG", "0xA"));
        h.source.insert_certificate(certificate(1, 10, "QmCert"));
        h.source.insert_profile(profile("0xA", "alice", "Qm123"));
        let spec = user_cert_spec(false)
            .with(Directive::fetch(DirectiveKind::Certificate, false))
            .with(Directive::fetch(DirectiveKind::ProfileOnGrant, false));

        let grant = h
            .manager
            .get_grant(GrantId::new(100), &h.sink, &spec)
            .await
            .unwrap();
        assert_eq!(grant.certificate.as_ref().unwrap().title, "cert-1");
        assert_eq!(grant.to_profile.as_ref().unwrap().name, "alice");
        assert_eq!(
            h.manager.stores().grants.get(&GrantId::new(100)).await,
            Some(grant)
        );
    }

    #[tokio::test]
    async fn test_received_grants_never_hydrate_recipient_profile() {
        let h = harness();
        let owner = Address::new("0xA");
        h.source.insert_profile(profile("0xA", "alice", "Qm123"));
        h.source
            .set_received_grants(owner.clone(), vec![grant(100, 1, "0xG", "0xA")]);
        let spec = user_cert_spec(false).with(Directive::fetch(DirectiveKind::ProfileOnGrant, false));

        let grants = h.manager.get_received_grants(&owner, &h.sink, &spec).await.unwrap();
        assert!(grants[0].to_profile.is_none());
        assert_eq!(h.source.calls(SourceCall::Profile, &owner), 0);
    }

    #[tokio::test]
    async fn test_certificate_failure_in_list_fails_the_call() {
        let h = harness();
        h.source
            .set_issued_grants(CertId::new(1), vec![grant(100, 1, "0xG", "0xA")]);
        let spec = user_cert_spec(false).with(Directive::fetch(DirectiveKind::Certificate, false));

        assert!(h
            .manager
            .get_issued_grants(CertId::new(1), &h.sink, &spec)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_cached_index_emits_nothing() {
        let h = harness();
        h.source
            .set_issued_grants(CertId::new(1), vec![grant(100, 1, "0xG", "0xA")]);
        h.manager
            .get_issued_grants(CertId::new(1), &h.sink, &user_cert_spec(false))
            .await
            .unwrap();
        h.recorder.clear();

        h.manager
            .get_issued_grants(CertId::new(1), &h.sink, &user_cert_spec(false))
            .await
            .unwrap();
        assert!(h.recorder.events().is_empty());
    }
}
