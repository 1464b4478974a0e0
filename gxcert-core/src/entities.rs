//! Core entity structures
//!
//! Records are replaced wholesale on refresh. Relation fields are `None`
//! until a traversal attaches them after the base fetch.

use crate::{Address, CertId, ContentId, GrantId, GroupId, Timestamp};
use serde::{Deserialize, Serialize};

/// Profile of an account, keyed by owner address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub address: Address,
    pub name: String,
    pub email: String,
    pub icon: ContentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Profile summary embedded in a group's member list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub address: Address,
    pub name: String,
    pub icon: ContentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Social group issuing certificates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub group_id: GroupId,
    pub name: String,
    pub residence: String,
    pub phone: String,
    pub members: Vec<GroupMember>,
}

/// Certificate issued by a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub cert_id: CertId,
    pub group_id: GroupId,
    pub title: String,
    pub description: String,
    pub image: ContentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<Group>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_certs: Option<Vec<Grant>>,
}

/// Grant of a certificate to a recipient (a "user certificate").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    #[serde(rename = "userCertId")]
    pub grant_id: GrantId,
    pub cert_id: CertId,
    pub from: Address,
    pub to: Address,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<Box<Certificate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_profile: Option<Profile>,
}
