//! GxCert Core - Entity Types
//!
//! Pure data structures shared by the cache and its collaborators.
//! This crate contains ONLY data types - no hydration logic.

pub mod config;
pub mod entities;
pub mod enums;
pub mod error;
pub mod identity;

pub use config::{GatewayConfig, GxCertConfig, CONFIG_PATH_VAR};
pub use entities::{Certificate, Grant, Group, GroupMember, Profile};
pub use enums::{DirectiveKind, DirectiveKindParseError, EntityKind};
pub use error::{ConfigError, ContentError, GxCertError, GxCertResult, SourceError, TraversalError};
pub use identity::{Address, CertId, ContentId, GrantId, GroupId, Timestamp};
