use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use log::{error, info, warn};
use std::sync::Arc;

use crate::backend::Backend;
use crate::cache::Cache;
use crate::config::DEFAULT_CONCURRENT_EXTENSIONS;
use crate::domain::{Extension, UniqueId, Version, VersionTag, UNIVERSAL_PLATFORM};
use crate::error::Result;
use crate::upstream::UpstreamClient;

/// One unit of work for the acquisition pipeline. Two requests are equal
/// iff uid, version, preRelease match and their target-platform sets match
/// (order-independent).
#[derive(Debug, Clone)]
pub struct AcquireRequest {
    pub uid: UniqueId,
    pub version: Option<String>,
    pub target_platforms: Vec<String>,
    pub pre_release: bool,
    pub force: bool,
}

impl AcquireRequest {
    pub fn new(uid: UniqueId) -> Self {
        Self {
            uid,
            version: None,
            target_platforms: Vec::new(),
            pre_release: false,
            force: false,
        }
    }
}

impl PartialEq for AcquireRequest {
    fn eq(&self, other: &Self) -> bool {
        if self.uid != other.uid || self.version != other.version || self.pre_release != other.pre_release {
            return false;
        }
        let mut a = self.target_platforms.clone();
        let mut b = other.target_platforms.clone();
        a.sort();
        b.sort();
        a == b
    }
}

/// Step 3's skip rules: pre-release filtering (unless an explicit version
/// was requested) and target-platform membership (an empty set matches
/// any platform).
fn version_matches_request(request: &AcquireRequest, version: &Version) -> bool {
    if let Some(requested_version) = &request.version {
        if &version.version != requested_version {
            return false;
        }
    } else if version.is_pre_release() && !request.pre_release {
        return false;
    }

    if request.target_platforms.is_empty() {
        return true;
    }
    let platform = version.target_platform.as_deref().unwrap_or(UNIVERSAL_PLATFORM);
    request.target_platforms.iter().any(|p| p == platform)
}

fn dedup_requests(requests: Vec<AcquireRequest>) -> Vec<AcquireRequest> {
    let mut out: Vec<AcquireRequest> = Vec::new();
    for req in requests {
        if !out.iter().any(|existing| existing == &req) {
            out.push(req);
        }
    }
    out
}

/// Orchestrates `Backend` + `Cache` + `UpstreamClient` with bounded
/// concurrency and per-version rollback.
pub struct Pipeline {
    backend: Arc<dyn Backend>,
    cache: Cache,
    upstream: Arc<dyn UpstreamClient>,
    concurrency: usize,
}

impl Pipeline {
    pub fn new(backend: Arc<dyn Backend>, cache: Cache, upstream: Arc<dyn UpstreamClient>) -> Self {
        Self {
            backend,
            cache,
            upstream,
            concurrency: DEFAULT_CONCURRENT_EXTENSIONS,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Deduplicates the batch, then processes requests with a bounded
    /// worker pool; one request's failure never aborts the batch.
    pub async fn run_batch(&self, requests: Vec<AcquireRequest>) -> Vec<Result<()>> {
        let requests = dedup_requests(requests);
        stream::iter(requests)
            .map(|req| {
                let mut visited = Vec::new();
                self.acquire(req, &mut visited)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    pub async fn acquire_one(&self, request: AcquireRequest) -> Result<()> {
        let mut visited = Vec::new();
        self.acquire(request, &mut visited).await
    }

    fn acquire<'a>(&'a self, request: AcquireRequest, visited: &'a mut Vec<UniqueId>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if visited.contains(&request.uid) {
                warn!("extension pack cycle detected at {}, skipping", request.uid);
                return Ok(());
            }
            visited.push(request.uid.clone());

            let extension = self.upstream.fetch_for_acquisition(&request.uid).await?;

            if let Some(first) = extension.versions.first() {
                if first.is_extension_pack() {
                    for pack_uid in first.extension_pack() {
                        let pack_request = AcquireRequest {
                            uid: pack_uid,
                            version: None,
                            target_platforms: request.target_platforms.clone(),
                            pre_release: request.pre_release,
                            force: request.force,
                        };
                        self.acquire(pack_request, visited).await?;
                    }
                }
            }

            self.acquire_single(&request, &extension).await
        })
    }

    async fn acquire_single(&self, request: &AcquireRequest, extension: &Extension) -> Result<()> {
        self.backend.save_extension_metadata(extension).await?;
        let extension_bytes = serde_json::to_vec(extension)?;
        self.cache.put_extension(&request.uid, &extension_bytes).await?;

        let mut any_written = false;
        for version in &extension.versions {
            if !version_matches_request(request, version) {
                continue;
            }

            let platform = version
                .target_platform
                .clone()
                .unwrap_or_else(|| UNIVERSAL_PLATFORM.to_string());
            let tag = VersionTag::new(request.uid.clone(), Some(version.version.clone()), Some(platform));

            if !request.force {
                if let Ok(existing) = self.cache.find_by_version_tag(&tag).await {
                    let replace = existing.is_pre_release() && !version.is_pre_release();
                    if !replace {
                        continue;
                    }
                }
            }

            match self.write_version(&tag, version).await {
                Ok(()) => {
                    any_written = true;
                }
                Err(e) => {
                    error!("asset write failed for {tag}: {e}, rolling back");
                    if let Err(rollback_err) = self.backend.remove(&tag).await {
                        error!("rollback (backend) failed for {tag}: {rollback_err}");
                    }
                    if let Err(rollback_err) = self.cache.delete(&tag).await {
                        error!("rollback (cache) failed for {tag}: {rollback_err}");
                    }
                }
            }
        }

        if any_written {
            self.cache.index_extension(self.backend.as_ref(), &request.uid).await?;
            info!("acquired {}", request.uid);
        }
        Ok(())
    }

    async fn write_version(&self, tag: &VersionTag, version: &Version) -> Result<()> {
        self.backend.save_version_metadata(&tag.uid, version).await?;
        let version_bytes = serde_json::to_vec(version)?;
        self.cache.put_version(&tag.uid, &version_bytes).await?;

        for asset in &version.assets {
            let (bytes, content_type) = self.upstream.download_asset(version, asset.asset_type).await?;
            self.backend
                .save_asset(tag, asset.asset_type, content_type.as_deref(), &bytes)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_version(version: &str, pre_release: bool, platform: Option<&str>) -> Version {
        Version {
            version: version.to_string(),
            target_platform: platform.map(str::to_string),
            last_updated: chrono::Utc::now(),
            properties: if pre_release {
                vec![crate::domain::Property {
                    key: crate::domain::model::PROP_PRE_RELEASE.into(),
                    value: "true".into(),
                }]
            } else {
                vec![]
            },
            assets: vec![],
            asset_uri: String::new(),
            fallback_asset_uri: String::new(),
        }
    }

    #[test]
    fn dedup_keeps_first_and_drops_equal_requests() {
        let a = AcquireRequest {
            uid: UniqueId::new("golang", "Go"),
            version: None,
            target_platforms: vec!["linux-x64".into(), "universal".into()],
            pre_release: false,
            force: false,
        };
        let b = AcquireRequest {
            target_platforms: vec!["universal".into(), "linux-x64".into()],
            ..a.clone()
        };
        let c = AcquireRequest {
            uid: UniqueId::new("redhat", "java"),
            ..a.clone()
        };
        let deduped = dedup_requests(vec![a, b, c]);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn version_matches_request_respects_pre_release_and_platform_filters() {
        let request = AcquireRequest {
            uid: UniqueId::new("golang", "Go"),
            version: None,
            target_platforms: vec!["linux-x64".into()],
            pre_release: false,
            force: false,
        };

        assert!(!version_matches_request(&request, &mk_version("2.0.0", true, Some("linux-x64"))));
        assert!(version_matches_request(&request, &mk_version("1.9.0", false, Some("linux-x64"))));
        assert!(!version_matches_request(&request, &mk_version("1.9.0", false, Some("darwin-x64"))));
    }

    #[test]
    fn version_matches_request_with_explicit_version_ignores_pre_release_skip() {
        let request = AcquireRequest {
            uid: UniqueId::new("golang", "Go"),
            version: Some("2.0.0".into()),
            target_platforms: vec![],
            pre_release: false,
            force: false,
        };

        assert!(version_matches_request(&request, &mk_version("2.0.0", true, None)));
        assert!(!version_matches_request(&request, &mk_version("1.9.0", false, None)));
    }
}
