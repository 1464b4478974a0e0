//! Enum types for GxCert entities and traversal directives

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Entity kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Profile,
    Group,
    Certificate,
    Grant,
    Image,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            EntityKind::Profile => "Profile",
            EntityKind::Group => "Group",
            EntityKind::Certificate => "Certificate",
            EntityKind::Grant => "Grant",
            EntityKind::Image => "Image",
        };
        f.write_str(value)
    }
}

/// Kind of a traversal directive.
///
/// The declaration order is the iteration order of a traversal
/// specification; it carries no processing meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DirectiveKind {
    #[serde(rename = "profile")]
    Profile,
    #[serde(rename = "profileImage")]
    ProfileImage,
    #[serde(rename = "group")]
    Group,
    #[serde(rename = "groupId")]
    GroupId,
    #[serde(rename = "certificate")]
    Certificate,
    #[serde(rename = "certificateImage")]
    CertificateImage,
    #[serde(rename = "userCert")]
    UserCert,
    #[serde(rename = "profile-on-grant")]
    ProfileOnGrant,
}

impl DirectiveKind {
    pub const ALL: [DirectiveKind; 8] = [
        DirectiveKind::Profile,
        DirectiveKind::ProfileImage,
        DirectiveKind::Group,
        DirectiveKind::GroupId,
        DirectiveKind::Certificate,
        DirectiveKind::CertificateImage,
        DirectiveKind::UserCert,
        DirectiveKind::ProfileOnGrant,
    ];

    /// Wire name used in the JSON list form of a traversal specification.
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            DirectiveKind::Profile => "profile",
            DirectiveKind::ProfileImage => "profileImage",
            DirectiveKind::Group => "group",
            DirectiveKind::GroupId => "groupId",
            DirectiveKind::Certificate => "certificate",
            DirectiveKind::CertificateImage => "certificateImage",
            DirectiveKind::UserCert => "userCert",
            DirectiveKind::ProfileOnGrant => "profile-on-grant",
        }
    }

    pub fn from_wire_str(s: &str) -> Result<Self, DirectiveKindParseError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_wire_str() == s)
            .ok_or_else(|| DirectiveKindParseError(s.to_string()))
    }

    /// The entity kind this directive resolves.
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            DirectiveKind::Profile | DirectiveKind::ProfileOnGrant => EntityKind::Profile,
            DirectiveKind::ProfileImage | DirectiveKind::CertificateImage => EntityKind::Image,
            DirectiveKind::Group | DirectiveKind::GroupId => EntityKind::Group,
            DirectiveKind::Certificate => EntityKind::Certificate,
            DirectiveKind::UserCert => EntityKind::Grant,
        }
    }

    /// Whether directives of this kind carry `wait`/`notifyEvent` settings.
    pub fn is_image(&self) -> bool {
        self.entity_kind() == EntityKind::Image
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire_str())
    }
}

impl FromStr for DirectiveKind {
    type Err = DirectiveKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_wire_str(s)
    }
}

/// Error when parsing an invalid directive kind string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveKindParseError(pub String);

impl fmt::Display for DirectiveKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid directive kind: {}", self.0)
    }
}

impl std::error::Error for DirectiveKindParseError {}
