use crate::domain::{UniqueId, VersionTag};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
pub use thiserror::Error;

/// Error taxonomy for the mirror. Kinds, not type names: every variant maps
/// to one of the families in the design (NotFound, ValidationError,
/// InvalidArgument, Upstream, Integrity, I/O).
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("extension metadata not found for {0}")]
    ExtensionMetadataNotFound(UniqueId),

    #[error("version metadata not found for {0}")]
    VersionMetadataNotFound(VersionTag),

    #[error("version not found: {0}")]
    VersionNotFound(VersionTag),

    #[error("missing asset {asset} for {tag}")]
    MissingAsset { tag: VersionTag, asset: String },

    #[error("not found in cache: {0}")]
    CacheNotFound(String),

    #[error("invalid unique id: {0}")]
    InvalidUniqueId(String),

    #[error("invalid version tag: {0}")]
    InvalidVersionTag(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("metadata uid mismatch: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("extension not found upstream")]
    ExtensionNotFound,

    #[error("extension has no versions upstream")]
    ExtensionHasNoVersions,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cache error: {0}")]
    Cache(#[from] sqlx::Error),

    #[error("object storage error: {0}")]
    ObjectStore(String),
}

/// A non-fatal finding produced while walking the backend during `reindex`:
/// one Extension/Version combination that fails the "valid version" invariant.
#[derive(Debug, Error)]
#[error("invalid version {tag}: {reason}")]
pub struct ValidationError {
    pub tag: VersionTag,
    pub reason: String,
}

pub type Result<T> = std::result::Result<T, MirrorError>;

impl IntoResponse for MirrorError {
    fn into_response(self) -> Response {
        let status = match &self {
            MirrorError::ExtensionMetadataNotFound(_)
            | MirrorError::VersionMetadataNotFound(_)
            | MirrorError::VersionNotFound(_)
            | MirrorError::MissingAsset { .. }
            | MirrorError::CacheNotFound(_)
            | MirrorError::ExtensionNotFound => StatusCode::NOT_FOUND,
            MirrorError::InvalidUniqueId(_)
            | MirrorError::InvalidVersionTag(_)
            | MirrorError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
