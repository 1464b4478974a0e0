//! GxCert Test Utilities
//!
//! Shared test infrastructure for the GxCert workspace:
//! - Proptest generators for entities and traversal specifications
//! - Fixtures seeding the in-memory source and blob fetcher
//! - Assertions on `GxCertResult` outcomes

pub use gxcert_cache::{
    events, CacheEvent, CachePayload, ChannelSink, Directive, HydrationCacheManager, ImageFetch,
    MockBlobFetcher, MockRemoteSource, NoopSink, RecordingSink, SharedSink, SourceCall,
    TraversalSpec,
};
pub use gxcert_core::{
    Address, CertId, Certificate, ContentId, DirectiveKind, EntityKind, Grant, GrantId, Group,
    GroupId, GroupMember, GxCertError, GxCertResult, Profile, SourceError, Timestamp,
    TraversalError,
};

use chrono::Utc;
use std::sync::Arc;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for GxCert entities and traversal specifications.

    use super::*;
    use proptest::prelude::*;

    // === Identity Generators ===

    pub fn arb_address() -> impl Strategy<Value = Address> {
        "0x[0-9a-f]{8}".prop_map(Address::new)
    }

    pub fn arb_content_id() -> impl Strategy<Value = ContentId> {
        "Qm[1-9A-HJ-NP-Za-km-z]{12}".prop_map(ContentId::new)
    }

    pub fn arb_group_id() -> impl Strategy<Value = GroupId> {
        (1u64..10_000).prop_map(GroupId::new)
    }

    pub fn arb_cert_id() -> impl Strategy<Value = CertId> {
        (1u64..10_000).prop_map(CertId::new)
    }

    pub fn arb_grant_id() -> impl Strategy<Value = GrantId> {
        (1u64..10_000).prop_map(GrantId::new)
    }

    /// Generate a Timestamp within 2020-2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    // === Entity Generators ===

    pub fn arb_profile() -> impl Strategy<Value = Profile> {
        (arb_address(), "[a-z]{3,10}", arb_content_id()).prop_map(|(address, name, icon)| {
            Profile {
                address,
                email: format!("{name}@example.org"),
                name,
                icon,
                image_url: None,
            }
        })
    }

    pub fn arb_group_member() -> impl Strategy<Value = GroupMember> {
        (arb_address(), "[a-z]{3,10}", arb_content_id()).prop_map(|(address, name, icon)| {
            GroupMember {
                address,
                name,
                icon,
                image_url: None,
            }
        })
    }

    pub fn arb_group() -> impl Strategy<Value = Group> {
        (
            arb_group_id(),
            "[A-Za-z ]{3,20}",
            prop::collection::vec(arb_group_member(), 0..6),
        )
            .prop_map(|(group_id, name, members)| Group {
                group_id,
                name,
                residence: "Sapporo".to_string(),
                phone: "011-000-0000".to_string(),
                members,
            })
    }

    pub fn arb_certificate(group_id: GroupId) -> impl Strategy<Value = Certificate> {
        (arb_cert_id(), "[A-Za-z ]{3,20}", arb_content_id()).prop_map(
            move |(cert_id, title, image)| Certificate {
                cert_id,
                group_id,
                title,
                description: "generated certificate".to_string(),
                image,
                image_url: None,
                group: None,
                user_certs: None,
            },
        )
    }

    pub fn arb_grant(cert_id: CertId) -> impl Strategy<Value = Grant> {
        (arb_grant_id(), arb_address(), arb_address(), arb_timestamp()).prop_map(
            move |(grant_id, from, to, timestamp)| Grant {
                grant_id,
                cert_id,
                from,
                to,
                timestamp,
                certificate: None,
                to_profile: None,
            },
        )
    }

    // === Traversal Generators ===

    pub fn arb_directive_kind() -> impl Strategy<Value = DirectiveKind> {
        proptest::sample::select(DirectiveKind::ALL.to_vec())
    }

    pub fn arb_image_fetch() -> impl Strategy<Value = ImageFetch> {
        (any::<bool>(), any::<bool>(), proptest::option::of("[A-Z_]{3,16}")).prop_map(
            |(refresh, wait, notify_event)| ImageFetch {
                refresh,
                wait,
                notify_event,
            },
        )
    }

    pub fn arb_directive() -> impl Strategy<Value = Directive> {
        (arb_directive_kind(), arb_image_fetch()).prop_map(|(kind, image)| {
            if kind.is_image() {
                Directive::image(kind, image)
            } else {
                Directive::fetch(kind, image.refresh)
            }
        })
    }

    /// A directive list in wire order, possibly repeating kinds.
    pub fn arb_directive_list() -> impl Strategy<Value = Vec<Directive>> {
        prop::collection::vec(arb_directive(), 0..12)
    }

    pub fn arb_traversal_spec() -> impl Strategy<Value = TraversalSpec> {
        arb_directive_list().prop_map(TraversalSpec::from)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built entities and seeded collaborators for common scenarios.

    use super::*;
    use chrono::TimeZone;

    pub const ALICE: &str = "0xA";
    pub const ALICE_ICON: &str = "Qm123";
    pub const ALICE_IMAGE_URL: &str = "blob:alice";
    pub const ISSUER: &str = "0xIssuer";
    pub const CERT_IMAGE: &str = "QmCert";
    pub const CERT_IMAGE_URL: &str = "blob:cert";
    pub const UNRESOLVABLE: &str = "Qm999";

    pub fn alice_profile() -> Profile {
        Profile {
            address: Address::new(ALICE),
            name: "alice".to_string(),
            email: "alice@example.org".to_string(),
            icon: ContentId::new(ALICE_ICON),
            image_url: None,
        }
    }

    pub fn issuer_group() -> Group {
        Group {
            group_id: GroupId::new(1),
            name: "Ocean Cleanup".to_string(),
            residence: "Kamakura".to_string(),
            phone: "0467-00-0000".to_string(),
            members: vec![GroupMember {
                address: Address::new(ISSUER),
                name: "issuer".to_string(),
                icon: ContentId::new(ALICE_ICON),
                image_url: None,
            }],
        }
    }

    pub fn beach_certificate() -> Certificate {
        Certificate {
            cert_id: CertId::new(1),
            group_id: GroupId::new(1),
            title: "Beach Cleanup".to_string(),
            description: "Joined the spring beach cleanup".to_string(),
            image: ContentId::new(CERT_IMAGE),
            image_url: None,
            group: None,
            user_certs: None,
        }
    }

    pub fn grant_to(grant_id: u64, recipient: &str) -> Grant {
        Grant {
            grant_id: GrantId::new(grant_id),
            cert_id: CertId::new(1),
            from: Address::new(ISSUER),
            to: Address::new(recipient),
            timestamp: Utc
                .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
                .single()
                .unwrap_or_else(Utc::now),
            certificate: None,
            to_profile: None,
        }
    }

    /// Source holding alice, the issuer group, the beach certificate and one
    /// grant of it to alice (grant 10), reachable through both indexes.
    pub fn seeded_source() -> Arc<MockRemoteSource> {
        let source = Arc::new(MockRemoteSource::new());
        source.insert_profile(alice_profile());
        source.insert_group(issuer_group());
        source.set_group_ids(Address::new(ALICE), vec![GroupId::new(1)]);
        source.set_group_certificates(GroupId::new(1), vec![beach_certificate()]);
        source.set_issued_grants(CertId::new(1), vec![grant_to(10, ALICE)]);
        source.set_received_grants(Address::new(ALICE), vec![grant_to(10, ALICE)]);
        source
    }

    /// Blob fetcher resolving alice's icon and the certificate image.
    pub fn seeded_blobs() -> Arc<MockBlobFetcher> {
        let blobs = Arc::new(MockBlobFetcher::new());
        blobs.insert(ALICE_ICON, ALICE_IMAGE_URL);
        blobs.insert(CERT_IMAGE, CERT_IMAGE_URL);
        blobs
    }

    /// Spec of plain fetch directives, in the given order.
    pub fn spec(directives: &[(DirectiveKind, bool)]) -> TraversalSpec {
        directives
            .iter()
            .map(|(kind, refresh)| Directive::fetch(*kind, *refresh))
            .collect()
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on hydration outcomes.

    use super::*;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &GxCertResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &GxCertResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    /// Assert the call was rejected for lacking the root directive `kind`.
    #[track_caller]
    pub fn assert_missing_directive<T: std::fmt::Debug>(
        result: &GxCertResult<T>,
        kind: DirectiveKind,
    ) {
        match result {
            Err(GxCertError::Traversal(TraversalError::MissingDirective { kind: k })) => {
                assert_eq!(*k, kind, "Wrong kind in MissingDirective error");
            }
            other => panic!("Expected MissingDirective for {}, got: {:?}", kind, other),
        }
    }

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &GxCertResult<T>, entity_kind: EntityKind) {
        match result {
            Err(GxCertError::Source(SourceError::NotFound { entity_kind: ek, .. })) => {
                assert_eq!(*ek, entity_kind, "Wrong entity kind in NotFound error");
            }
            other => panic!("Expected NotFound error for {}, got: {:?}", entity_kind, other),
        }
    }

    /// Assert that `events` carries `tag` exactly `count` times.
    #[track_caller]
    pub fn assert_event_count(events: &[CacheEvent], tag: &str, count: usize) {
        let seen = events.iter().filter(|e| e.event == tag).count();
        assert_eq!(seen, count, "Expected {count} {tag} events, saw {seen}");
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_seeded_source_fixture() {
        let source = fixtures::seeded_source();
        assert_eq!(source.total_calls(), 0);
        let blobs = fixtures::seeded_blobs();
        assert_eq!(blobs.total_calls(), 0);
    }

    #[test]
    fn test_spec_fixture_keeps_first_directive() {
        let spec = fixtures::spec(&[
            (DirectiveKind::Profile, false),
            (DirectiveKind::Profile, true),
            (DirectiveKind::ProfileImage, true),
        ]);
        assert_eq!(spec.len(), 2);
        assert!(!spec.get(DirectiveKind::Profile).map(Directive::refresh).unwrap_or(true));
    }

    #[tokio::test]
    async fn test_missing_root_directive_assertion() {
        let manager =
            HydrationCacheManager::new(fixtures::seeded_source(), fixtures::seeded_blobs());
        let result = manager
            .get_profile(
                &Address::new(fixtures::ALICE),
                &NoopSink::shared(),
                &fixtures::spec(&[(DirectiveKind::ProfileImage, false)]),
            )
            .await;
        assertions::assert_missing_directive(&result, DirectiveKind::Profile);
    }

    proptest! {
        #[test]
        fn prop_generated_directives_match_their_kind(kind in generators::arb_directive_kind()) {
            let directive = Directive::fetch(kind, true);
            prop_assert_eq!(directive.kind(), kind);
            prop_assert!(directive.refresh());
        }

        #[test]
        fn prop_generated_grants_carry_no_relations(
            grant in generators::arb_grant(CertId::new(1))
        ) {
            prop_assert!(grant.certificate.is_none());
            prop_assert!(grant.to_profile.is_none());
            prop_assert_eq!(grant.cert_id, CertId::new(1));
        }
    }
}
