//! Remote collaborators consumed by the hydration cache.
//!
//! The cache never talks to the ledger or to content-addressed storage
//! directly; it goes through these traits so any client (RPC, in-memory mock,
//! HTTP gateway) can back it.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use gxcert_core::{
    Address, CertId, Certificate, ContentError, ContentId, Grant, GrantId, Group, GroupId,
    GxCertResult, Profile, TraversalError,
};

/// Source of raw entities, by identifier or by owner.
///
/// Implementations return entities without relation fields attached.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn fetch_profile(&self, address: &Address) -> GxCertResult<Profile>;

    async fn fetch_group(&self, group_id: GroupId) -> GxCertResult<Group>;

    /// Ids of the groups `address` belongs to.
    async fn fetch_group_ids(&self, address: &Address) -> GxCertResult<Vec<GroupId>>;

    async fn fetch_certificate(&self, cert_id: CertId) -> GxCertResult<Certificate>;

    /// Grants issued for a certificate.
    async fn fetch_issued_grants(&self, cert_id: CertId) -> GxCertResult<Vec<Grant>>;

    /// Grants received by an address.
    async fn fetch_received_grants(&self, address: &Address) -> GxCertResult<Vec<Grant>>;

    async fn fetch_grant(&self, grant_id: GrantId) -> GxCertResult<Grant>;

    /// Certificates issued by a group.
    async fn fetch_group_certificates(&self, group_id: GroupId) -> GxCertResult<Vec<Certificate>>;
}

/// Resolver of content ids into locally usable resource handles (URLs).
#[async_trait]
pub trait BlobFetcher: Send + Sync {
    async fn resolve(&self, content_id: &ContentId) -> Result<String, ContentError>;
}

/// Which source handle serves a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceSelector {
    /// The swappable primary handle.
    #[default]
    Primary,
    /// One of the alternates fixed at construction, by index.
    Alternate(usize),
}

/// Source handles owned by a manager.
///
/// The primary slot is process-wide mutable state: swapping it while calls
/// are in flight leaves unspecified which handle serves those calls.
pub struct SourceSlots {
    primary: RwLock<Arc<dyn RemoteSource>>,
    alternates: Vec<Arc<dyn RemoteSource>>,
}

impl SourceSlots {
    pub fn new(primary: Arc<dyn RemoteSource>, alternates: Vec<Arc<dyn RemoteSource>>) -> Self {
        Self {
            primary: RwLock::new(primary),
            alternates,
        }
    }

    pub fn set_primary(&self, source: Arc<dyn RemoteSource>) {
        *self.primary.write().unwrap_or_else(PoisonError::into_inner) = source;
    }

    pub fn alternate_count(&self) -> usize {
        self.alternates.len()
    }

    pub fn select(&self, selector: SourceSelector) -> Result<Arc<dyn RemoteSource>, TraversalError> {
        match selector {
            SourceSelector::Primary => Ok(self
                .primary
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()),
            SourceSelector::Alternate(index) => self
                .alternates
                .get(index)
                .cloned()
                .ok_or(TraversalError::UnknownSource {
                    index,
                    available: self.alternates.len(),
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRemoteSource;

    #[tokio::test]
    async fn test_select_primary_and_alternate() {
        let primary = Arc::new(MockRemoteSource::new());
        let alternate = Arc::new(MockRemoteSource::new());
        let slots = SourceSlots::new(primary.clone(), vec![alternate.clone()]);

        slots
            .select(SourceSelector::Alternate(0))
            .unwrap()
            .fetch_group_ids(&Address::new("0xA"))
            .await
            .unwrap();
        assert_eq!(alternate.total_calls(), 1);
        assert_eq!(primary.total_calls(), 0);
    }

    #[test]
    fn test_select_unknown_alternate_fails() {
        let slots = SourceSlots::new(Arc::new(MockRemoteSource::new()), Vec::new());
        let err = slots.select(SourceSelector::Alternate(2)).err().unwrap();
        assert_eq!(
            err,
            TraversalError::UnknownSource {
                index: 2,
                available: 0
            }
        );
    }

    #[tokio::test]
    async fn test_set_primary_swaps_handle() {
        let first = Arc::new(MockRemoteSource::new());
        let second = Arc::new(MockRemoteSource::new());
        let slots = SourceSlots::new(first.clone(), Vec::new());

        slots.set_primary(second.clone());
        slots
            .select(SourceSelector::Primary)
            .unwrap()
            .fetch_group_ids(&Address::new("0xA"))
            .await
            .unwrap();
        assert_eq!(first.total_calls(), 0);
        assert_eq!(second.total_calls(), 1);
    }
}
