pub mod client;

use async_trait::async_trait;

use crate::domain::query::Query;
use crate::domain::{AssetType, Extension, UniqueId, Version};
use crate::error::Result;

pub use client::HttpUpstreamClient;

/// Talks the upstream marketplace's `extensionquery` JSON protocol and the
/// single-extension "latest" endpoint. One HTTP implementation; a trait so
/// the pipeline and CLI can be tested against a stub.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Runs an arbitrary query and returns the parsed extensions plus the
    /// `TotalCount` metadata item.
    async fn query(&self, query: &Query) -> Result<(Vec<Extension>, i64)>;

    /// The metadata the acquisition pipeline feeds to its per-version logic:
    /// every version of the extension, not just upstream's own notion of
    /// "latest". Empty extension list maps to `ExtensionNotFound`; an empty
    /// version list on the first extension maps to `ExtensionHasNoVersions`.
    async fn fetch_for_acquisition(&self, uid: &UniqueId) -> Result<Extension>;

    /// GET `<gallery-host>/_gallery/<publisher>/<name>/latest`, the
    /// alternate single-extension endpoint.
    async fn fetch_latest_endpoint(&self, uid: &UniqueId) -> Result<Extension>;

    /// Downloads one asset blob, returning its bytes and the response
    /// `Content-Type` (parameters after `;` trimmed).
    async fn download_asset(
        &self,
        version: &Version,
        asset_type: AssetType,
    ) -> Result<(Vec<u8>, Option<String>)>;
}
