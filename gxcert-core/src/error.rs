//! Error types for GxCert cache operations

use crate::{ContentId, DirectiveKind, EntityKind};
use thiserror::Error;

/// Remote entity source errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("Entity not found: {entity_kind} with key {key}")]
    NotFound { entity_kind: EntityKind, key: String },

    #[error("Request for {entity_kind} {key} failed: {reason}")]
    RequestFailed {
        entity_kind: EntityKind,
        key: String,
        reason: String,
    },

    #[error("Invalid response for {entity_kind}: {reason}")]
    InvalidResponse { entity_kind: EntityKind, reason: String },
}

/// Content-addressed blob resolution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContentError {
    #[error("Content unavailable: {content_id}: {reason}")]
    Unavailable { content_id: ContentId, reason: String },

    #[error("Gateway error: {reason}")]
    Gateway { reason: String },
}

/// Traversal specification precondition violations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TraversalError {
    #[error("Traversal specification has no directive for root kind {kind}")]
    MissingDirective { kind: DirectiveKind },

    #[error("Unknown alternate source {index}: {available} configured")]
    UnknownSource { index: usize, available: usize },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing configuration file path (set GXCERT_CONFIG)")]
    MissingConfigPath,

    #[error("Failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },

    #[error("Telemetry initialization failed: {reason}")]
    Telemetry { reason: String },
}

/// Master error type for all GxCert cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GxCertError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Content error: {0}")]
    Content(#[from] ContentError),

    #[error("Traversal error: {0}")]
    Traversal(#[from] TraversalError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for GxCert cache operations.
pub type GxCertResult<T> = Result<T, GxCertError>;

// =============================================================================
// TESTS
// =============================================================================
