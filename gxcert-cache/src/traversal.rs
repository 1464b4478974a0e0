//! Traversal specifications.
//!
//! A [`TraversalSpec`] declares which relations a resolution follows and how
//! fresh each hop must be. It holds at most one [`Directive`] per
//! [`DirectiveKind`]; resolvers consume the directive for their own kind and
//! hand the *remaining* spec to nested hops, so a directive consumed by an
//! ancestor is never seen again deeper in the same traversal.
//!
//! # Example
//!
//! ```
//! use gxcert_cache::{Directive, ImageFetch, TraversalSpec};
//! use gxcert_core::DirectiveKind;
//!
//! let spec = TraversalSpec::new()
//!     .with(Directive::fetch(DirectiveKind::Certificate, false))
//!     .with(Directive::image(DirectiveKind::CertificateImage, ImageFetch::waited(false)));
//!
//! let (fetch, rest) = spec.require(DirectiveKind::Certificate).unwrap();
//! assert!(!fetch.refresh);
//! assert!(!rest.contains(DirectiveKind::Certificate));
//! assert!(rest.contains(DirectiveKind::CertificateImage));
//! ```

use std::collections::BTreeMap;

use gxcert_core::{DirectiveKind, TraversalError};
use serde::{Deserialize, Serialize};

use crate::source::SourceSelector;

/// Freshness setting of an entity hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Fetch {
    /// `false` reuses the cached value when present; `true` always hits the
    /// remote source and overwrites the cache.
    pub refresh: bool,
}

impl Fetch {
    pub fn cached() -> Self {
        Self { refresh: false }
    }

    pub fn refreshed() -> Self {
        Self { refresh: true }
    }
}

/// Settings of an image (leaf) hop.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageFetch {
    pub refresh: bool,
    /// `true` populates the image field before the resolver returns.
    /// `false` hands the entity back without it and resolves in the background.
    #[serde(default)]
    pub wait: bool,
    /// Event emitted once background resolution attached the image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_event: Option<String>,
}

impl ImageFetch {
    pub fn waited(refresh: bool) -> Self {
        Self {
            refresh,
            wait: true,
            notify_event: None,
        }
    }

    pub fn background(refresh: bool, notify_event: Option<impl Into<String>>) -> Self {
        Self {
            refresh,
            wait: false,
            notify_event: notify_event.map(Into::into),
        }
    }
}

/// One element of a traversal specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Directive {
    #[serde(rename = "profile")]
    Profile(Fetch),
    #[serde(rename = "profileImage")]
    ProfileImage(ImageFetch),
    #[serde(rename = "group")]
    Group(Fetch),
    #[serde(rename = "groupId")]
    GroupId(Fetch),
    #[serde(rename = "certificate")]
    Certificate(Fetch),
    #[serde(rename = "certificateImage")]
    CertificateImage(ImageFetch),
    #[serde(rename = "userCert")]
    UserCert(Fetch),
    #[serde(rename = "profile-on-grant")]
    ProfileOnGrant(Fetch),
}

impl Directive {
    /// Build a directive of any kind. Image kinds get `wait: false` and no event.
    pub fn fetch(kind: DirectiveKind, refresh: bool) -> Self {
        let fetch = Fetch { refresh };
        match kind {
            DirectiveKind::Profile => Self::Profile(fetch),
            DirectiveKind::Group => Self::Group(fetch),
            DirectiveKind::GroupId => Self::GroupId(fetch),
            DirectiveKind::Certificate => Self::Certificate(fetch),
            DirectiveKind::UserCert => Self::UserCert(fetch),
            DirectiveKind::ProfileOnGrant => Self::ProfileOnGrant(fetch),
            DirectiveKind::ProfileImage | DirectiveKind::CertificateImage => Self::image(
                kind,
                ImageFetch {
                    refresh,
                    ..ImageFetch::default()
                },
            ),
        }
    }

    /// Build an image directive. Non-image kinds keep only `refresh`.
    pub fn image(kind: DirectiveKind, image: ImageFetch) -> Self {
        match kind {
            DirectiveKind::ProfileImage => Self::ProfileImage(image),
            DirectiveKind::CertificateImage => Self::CertificateImage(image),
            other => Self::fetch(other, image.refresh),
        }
    }

    pub fn kind(&self) -> DirectiveKind {
        match self {
            Self::Profile(_) => DirectiveKind::Profile,
            Self::ProfileImage(_) => DirectiveKind::ProfileImage,
            Self::Group(_) => DirectiveKind::Group,
            Self::GroupId(_) => DirectiveKind::GroupId,
            Self::Certificate(_) => DirectiveKind::Certificate,
            Self::CertificateImage(_) => DirectiveKind::CertificateImage,
            Self::UserCert(_) => DirectiveKind::UserCert,
            Self::ProfileOnGrant(_) => DirectiveKind::ProfileOnGrant,
        }
    }

    pub fn refresh(&self) -> bool {
        match self {
            Self::ProfileImage(image) | Self::CertificateImage(image) => image.refresh,
            Self::Profile(fetch)
            | Self::Group(fetch)
            | Self::GroupId(fetch)
            | Self::Certificate(fetch)
            | Self::UserCert(fetch)
            | Self::ProfileOnGrant(fetch) => fetch.refresh,
        }
    }

    fn into_fetch(self) -> Fetch {
        Fetch {
            refresh: self.refresh(),
        }
    }

    fn into_image(self) -> ImageFetch {
        match self {
            Self::ProfileImage(image) | Self::CertificateImage(image) => image,
            other => ImageFetch {
                refresh: other.refresh(),
                ..ImageFetch::default()
            },
        }
    }
}

/// Ordered set of directives, at most one per kind.
///
/// Serializes as the JSON list form `[{"kind": ..., "refresh": ...}, ...]`.
/// The source selector is per-call state and is not part of the wire form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Directive>", into = "Vec<Directive>")]
pub struct TraversalSpec {
    directives: BTreeMap<DirectiveKind, Directive>,
    source: SourceSelector,
}

impl TraversalSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directive. An existing directive of the same kind wins.
    pub fn with(mut self, directive: Directive) -> Self {
        self.directives.entry(directive.kind()).or_insert(directive);
        self
    }

    /// Route every hop of this traversal through the given source handle.
    pub fn with_source(mut self, source: SourceSelector) -> Self {
        self.source = source;
        self
    }

    pub fn source(&self) -> SourceSelector {
        self.source
    }

    pub fn get(&self, kind: DirectiveKind) -> Option<&Directive> {
        self.directives.get(&kind)
    }

    pub fn contains(&self, kind: DirectiveKind) -> bool {
        self.directives.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    pub fn kinds(&self) -> impl Iterator<Item = DirectiveKind> + '_ {
        self.directives.keys().copied()
    }

    /// Return the directive for `kind` (if any) and a copy of this spec
    /// without it. `self` is left untouched.
    pub fn consume(&self, kind: DirectiveKind) -> (Option<Directive>, TraversalSpec) {
        let mut remaining = self.clone();
        let directive = remaining.directives.remove(&kind);
        (directive, remaining)
    }

    /// Consume an entity hop directive.
    pub fn take_fetch(&self, kind: DirectiveKind) -> (Option<Fetch>, TraversalSpec) {
        let (directive, remaining) = self.consume(kind);
        (directive.map(Directive::into_fetch), remaining)
    }

    /// Consume an image hop directive.
    pub fn take_image(&self, kind: DirectiveKind) -> (Option<ImageFetch>, TraversalSpec) {
        let (directive, remaining) = self.consume(kind);
        (directive.map(Directive::into_image), remaining)
    }

    /// Consume the directive for the root kind being resolved.
    pub fn require(&self, kind: DirectiveKind) -> Result<(Fetch, TraversalSpec), TraversalError> {
        match self.take_fetch(kind) {
            (Some(fetch), remaining) => Ok((fetch, remaining)),
            (None, _) => Err(TraversalError::MissingDirective { kind }),
        }
    }
}

impl FromIterator<Directive> for TraversalSpec {
    fn from_iter<I: IntoIterator<Item = Directive>>(iter: I) -> Self {
        iter.into_iter()
            .fold(TraversalSpec::new(), |spec, directive| spec.with(directive))
    }
}

impl From<Vec<Directive>> for TraversalSpec {
    fn from(directives: Vec<Directive>) -> Self {
        directives.into_iter().collect()
    }
}

impl From<TraversalSpec> for Vec<Directive> {
    fn from(spec: TraversalSpec) -> Self {
        spec.directives.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cert_spec() -> TraversalSpec {
        TraversalSpec::new()
            .with(Directive::fetch(DirectiveKind::Certificate, false))
            .with(Directive::image(
                DirectiveKind::CertificateImage,
                ImageFetch::waited(false),
            ))
            .with(Directive::fetch(DirectiveKind::Group, true))
    }

    #[test]
    fn test_consume_removes_only_matching_kind() {
        let spec = cert_spec();
        let (directive, rest) = spec.consume(DirectiveKind::Group);

        assert_eq!(directive, Some(Directive::Group(Fetch::refreshed())));
        assert_eq!(rest.len(), 2);
        assert!(!rest.contains(DirectiveKind::Group));
        // The original is not mutated.
        assert_eq!(spec.len(), 3);
    }

    #[test]
    fn test_consume_missing_kind_returns_none_and_same_spec() {
        let spec = cert_spec();
        let (directive, rest) = spec.consume(DirectiveKind::ProfileOnGrant);
        assert!(directive.is_none());
        assert_eq!(rest, spec);
    }

    #[test]
    fn test_require_missing_root_is_precondition_violation() {
        let spec = TraversalSpec::new().with(Directive::fetch(DirectiveKind::Certificate, false));
        let err = spec.require(DirectiveKind::Profile).unwrap_err();
        assert_eq!(
            err,
            TraversalError::MissingDirective {
                kind: DirectiveKind::Profile
            }
        );
    }

    #[test]
    fn test_first_directive_of_a_kind_wins() {
        let spec: TraversalSpec = vec![
            Directive::fetch(DirectiveKind::Profile, false),
            Directive::fetch(DirectiveKind::Profile, true),
        ]
        .into();
        assert_eq!(spec.len(), 1);
        assert!(!spec.get(DirectiveKind::Profile).unwrap().refresh());
    }

    #[test]
    fn test_take_image_from_fetch_variant_defaults_to_background() {
        let spec = TraversalSpec::new().with(Directive::fetch(DirectiveKind::ProfileImage, true));
        let (image, _) = spec.take_image(DirectiveKind::ProfileImage);
        assert_eq!(
            image,
            Some(ImageFetch {
                refresh: true,
                wait: false,
                notify_event: None
            })
        );
    }

    #[test]
    fn test_deserializes_list_form() {
        let json = r#"[
            {"kind": "certificate", "refresh": false},
            {"kind": "certificateImage", "refresh": false, "wait": true},
            {"kind": "profileImage", "refresh": true, "notifyEvent": "PROFILE_IMAGE_READY"},
            {"kind": "profile-on-grant", "refresh": false}
        ]"#;
        let spec: TraversalSpec = serde_json::from_str(json).unwrap();

        assert_eq!(spec.len(), 4);
        assert_eq!(spec.source(), SourceSelector::Primary);
        let (image, _) = spec.take_image(DirectiveKind::ProfileImage);
        let image = image.unwrap();
        assert!(image.refresh);
        assert!(!image.wait);
        assert_eq!(image.notify_event.as_deref(), Some("PROFILE_IMAGE_READY"));
        assert!(spec.contains(DirectiveKind::ProfileOnGrant));
    }

    #[test]
    fn test_rejects_unknown_kind_and_missing_refresh() {
        assert!(serde_json::from_str::<TraversalSpec>(r#"[{"kind": "avatar", "refresh": false}]"#).is_err());
        assert!(serde_json::from_str::<TraversalSpec>(r#"[{"kind": "profile"}]"#).is_err());
    }

    #[test]
    fn test_serializes_back_to_list_form() {
        let spec = TraversalSpec::new()
            .with(Directive::fetch(DirectiveKind::UserCert, true))
            .with(Directive::image(
                DirectiveKind::ProfileImage,
                ImageFetch::background(false, Some("IMG")),
            ));
        let value = serde_json::to_value(&spec).unwrap();
        let list = value.as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["kind"], "profileImage");
        assert_eq!(list[0]["notifyEvent"], "IMG");
        assert_eq!(list[1]["kind"], "userCert");
        assert_eq!(list[1]["refresh"], true);
    }

    #[test]
    fn test_source_selector_survives_consumption() {
        let spec = cert_spec().with_source(SourceSelector::Alternate(1));
        let (_, rest) = spec.require(DirectiveKind::Certificate).unwrap();
        assert_eq!(rest.source(), SourceSelector::Alternate(1));
    }
}
