pub mod fs;
pub mod s3;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::config::{EXTENSION_METADATA_FILE, VERSION_METADATA_FILE};
use crate::domain::{AssetType, Extension, UniqueId, Version, VersionTag};
use crate::error::Result;

/// Stable, hierarchical persistence of extension metadata, version
/// metadata, and asset blobs, plus enumeration. Implemented by the
/// filesystem and S3-compatible variants; selected at startup by
/// configuration (`config::BackendKind`).
#[async_trait]
pub trait Backend: Send + Sync {
    /// Writes metadata JSON with `versions` emptied. Creates parent
    /// prefixes as needed. Overwrites.
    async fn save_extension_metadata(&self, extension: &Extension) -> Result<()>;

    /// Writes version metadata at the version-platform prefix. Overwrites.
    async fn save_version_metadata(&self, uid: &UniqueId, version: &Version) -> Result<()>;

    /// Writes an asset blob. Content type is remembered only where the
    /// backend supports it (object metadata); the filesystem backend
    /// ignores it.
    async fn save_asset(
        &self,
        tag: &VersionTag,
        asset_type: AssetType,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<()>;

    async fn load_extension_metadata(&self, uid: &UniqueId) -> Result<Vec<u8>>;

    async fn load_version_metadata(&self, tag: &VersionTag) -> Result<Vec<u8>>;

    /// Streaming read handle to the blob.
    async fn load_asset(
        &self,
        tag: &VersionTag,
        asset_type: AssetType,
    ) -> Result<Box<dyn AsyncRead + Unpin + Send>>;

    /// Reads up to 512 bytes and runs MIME sniffing.
    async fn detect_asset_content_type(
        &self,
        tag: &VersionTag,
        asset_type: AssetType,
    ) -> Result<String>;

    async fn list_unique_ids(&self) -> Result<Vec<UniqueId>>;

    /// Enumerates all `<version>/<platform>` pairs. The pre-release flag
    /// is not recoverable from the path alone — callers get a partial tag.
    async fn list_version_tags(&self, uid: &UniqueId) -> Result<Vec<VersionTag>>;

    /// Deletes at the tag's granularity (platform/version/extension
    /// depending on how much of the tag is populated), then cascades:
    /// removes the version directory if now empty, the extension
    /// directory if it now has no versions, the publisher directory if it
    /// now has no extensions.
    async fn remove(&self, tag: &VersionTag) -> Result<()>;
}

/// The identical key layout shared by both backend variants: `/`-separated,
/// lowercased components, optionally under a configured `<prefix>`.
pub mod key_layout {
    use crate::domain::{AssetType, UniqueId, VersionTag};

    use super::{EXTENSION_METADATA_FILE, VERSION_METADATA_FILE};

    pub fn extension_prefix(prefix: &str, uid: &UniqueId) -> String {
        join(prefix, &[&uid.publisher.to_lowercase(), &uid.name.to_lowercase()])
    }

    pub fn extension_metadata_key(prefix: &str, uid: &UniqueId) -> String {
        format!("{}/{}", extension_prefix(prefix, uid), EXTENSION_METADATA_FILE)
    }

    pub fn version_prefix(prefix: &str, tag: &VersionTag) -> String {
        let version = tag.version.as_deref().unwrap_or("");
        join(
            prefix,
            &[
                &tag.uid.publisher.to_lowercase(),
                &tag.uid.name.to_lowercase(),
                version,
                tag.platform_or_universal(),
            ],
        )
    }

    pub fn version_metadata_key(prefix: &str, tag: &VersionTag) -> String {
        format!("{}/{}", version_prefix(prefix, tag), VERSION_METADATA_FILE)
    }

    pub fn asset_key(prefix: &str, tag: &VersionTag, asset_type: AssetType) -> String {
        format!("{}/{}", version_prefix(prefix, tag), asset_type.key_segment())
    }

    fn join(prefix: &str, parts: &[&str]) -> String {
        let joined = parts.join("/");
        if prefix.is_empty() {
            joined
        } else {
            format!("{}/{}", prefix.trim_end_matches('/'), joined)
        }
    }
}
