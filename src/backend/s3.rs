use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use chrono::Utc;
use log::debug;
use tokio::io::AsyncRead;

use super::{key_layout, Backend};
use crate::domain::{AssetType, Extension, UniqueId, Version, VersionTag};
use crate::error::{MirrorError, Result};

/// S3-compatible object store. `ListUniqueIDs` is implemented as two
/// non-recursive listings (publishers, then names under each publisher).
/// The optional delta mode additionally writes a zero-byte marker to
/// `delta/YYYY_MM_DD/<original-key>` on every write, to support external
/// replication.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: String,
    delta_markers: bool,
}

impl S3Backend {
    pub async fn new(
        endpoint: Option<&str>,
        bucket: impl Into<String>,
        credentials_file: Option<&str>,
        credentials_profile: Option<&str>,
        key_prefix: impl Into<String>,
        delta_markers: bool,
    ) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let Some(profile) = credentials_profile {
            loader = loader.profile_name(profile);
        }
        if let Some(file) = credentials_file {
            // The profile-file provider looks at AWS_SHARED_CREDENTIALS_FILE;
            // set it for the duration of config resolution so a caller-given
            // path is honored without requiring it to already be exported.
            std::env::set_var("AWS_SHARED_CREDENTIALS_FILE", file);
        }
        let sdk_config = loader.load().await;
        let client = Client::new(&sdk_config);
        Ok(Self {
            client,
            bucket: bucket.into(),
            prefix: key_prefix.into(),
            delta_markers,
        })
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: Option<&str>) -> Result<()> {
        let mut req = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes));
        if let Some(ct) = content_type {
            req = req.content_type(ct);
        }
        req.send()
            .await
            .map_err(|e| MirrorError::ObjectStore(e.to_string()))?;

        if self.delta_markers {
            let date = Utc::now().format("%Y_%m_%d");
            let marker_key = format!("delta/{date}/{key}");
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&marker_key)
                .body(ByteStream::from(Vec::new()))
                .send()
                .await
                .map_err(|e| MirrorError::ObjectStore(e.to_string()))?;
            debug!("wrote delta marker {marker_key}");
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> std::result::Result<Vec<u8>, ()> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|_| ())?;
        let bytes = resp.body.collect().await.map_err(|_| ())?;
        Ok(bytes.into_bytes().to_vec())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let mut continuation = None;
        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = &continuation {
                req = req.continuation_token(token);
            }
            let resp = req
                .send()
                .await
                .map_err(|e| MirrorError::ObjectStore(e.to_string()))?;
            for obj in resp.contents() {
                if let Some(key) = obj.key() {
                    self.client
                        .delete_object()
                        .bucket(&self.bucket)
                        .key(key)
                        .send()
                        .await
                        .map_err(|e| MirrorError::ObjectStore(e.to_string()))?;
                }
            }
            match resp.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(())
    }

    async fn has_any_under(&self, prefix: &str) -> Result<bool> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .max_keys(1)
            .send()
            .await
            .map_err(|e| MirrorError::ObjectStore(e.to_string()))?;
        Ok(resp.key_count().unwrap_or(0) > 0)
    }
}

#[async_trait]
impl Backend for S3Backend {
    async fn save_extension_metadata(&self, extension: &Extension) -> Result<()> {
        let key = key_layout::extension_metadata_key(&self.prefix, &extension.uid);
        let stripped = extension.without_versions();
        let bytes = serde_json::to_vec(&stripped)?;
        self.put(&key, bytes, Some("application/json")).await
    }

    async fn save_version_metadata(&self, uid: &UniqueId, version: &Version) -> Result<()> {
        let tag = VersionTag::new(uid.clone(), Some(version.version.clone()), version.target_platform.clone());
        let key = key_layout::version_metadata_key(&self.prefix, &tag);
        let bytes = serde_json::to_vec(version)?;
        self.put(&key, bytes, Some("application/json")).await
    }

    async fn save_asset(
        &self,
        tag: &VersionTag,
        asset_type: AssetType,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<()> {
        let key = key_layout::asset_key(&self.prefix, tag, asset_type);
        self.put(&key, bytes.to_vec(), content_type).await
    }

    async fn load_extension_metadata(&self, uid: &UniqueId) -> Result<Vec<u8>> {
        let key = key_layout::extension_metadata_key(&self.prefix, uid);
        self.get(&key)
            .await
            .map_err(|_| MirrorError::ExtensionMetadataNotFound(uid.clone()))
    }

    async fn load_version_metadata(&self, tag: &VersionTag) -> Result<Vec<u8>> {
        let key = key_layout::version_metadata_key(&self.prefix, tag);
        self.get(&key)
            .await
            .map_err(|_| MirrorError::VersionMetadataNotFound(tag.clone()))
    }

    async fn load_asset(
        &self,
        tag: &VersionTag,
        asset_type: AssetType,
    ) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
        let bytes = self.get(&key_layout::asset_key(&self.prefix, tag, asset_type))
            .await
            .map_err(|_| MirrorError::MissingAsset {
                tag: tag.clone(),
                asset: asset_type.to_string(),
            })?;
        Ok(Box::new(std::io::Cursor::new(bytes)))
    }

    async fn detect_asset_content_type(
        &self,
        tag: &VersionTag,
        asset_type: AssetType,
    ) -> Result<String> {
        let bytes = self.get(&key_layout::asset_key(&self.prefix, tag, asset_type))
            .await
            .map_err(|_| MirrorError::MissingAsset {
                tag: tag.clone(),
                asset: asset_type.to_string(),
            })?;
        let head = &bytes[..bytes.len().min(512)];
        Ok(infer::get(head)
            .map(|kind| kind.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string()))
    }

    async fn list_unique_ids(&self) -> Result<Vec<UniqueId>> {
        let mut out = Vec::new();
        let publisher_prefix = if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix.trim_end_matches('/'))
        };
        let publishers = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&publisher_prefix)
            .delimiter("/")
            .send()
            .await
            .map_err(|e| MirrorError::ObjectStore(e.to_string()))?;

        for common in publishers.common_prefixes() {
            let Some(publisher_path) = common.prefix() else {
                continue;
            };
            let publisher = publisher_path
                .trim_start_matches(&publisher_prefix)
                .trim_end_matches('/')
                .to_string();
            if publisher.is_empty() {
                continue;
            }
            let names = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(publisher_path)
                .delimiter("/")
                .send()
                .await
                .map_err(|e| MirrorError::ObjectStore(e.to_string()))?;
            for common_name in names.common_prefixes() {
                let Some(name_path) = common_name.prefix() else {
                    continue;
                };
                let name = name_path
                    .trim_start_matches(publisher_path)
                    .trim_end_matches('/')
                    .to_string();
                if name.is_empty() {
                    continue;
                }
                out.push(UniqueId::new(publisher.clone(), name));
            }
        }
        Ok(out)
    }

    async fn list_version_tags(&self, uid: &UniqueId) -> Result<Vec<VersionTag>> {
        let mut out = Vec::new();
        let ext_prefix = format!("{}/", key_layout::extension_prefix(&self.prefix, uid));
        let versions = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&ext_prefix)
            .delimiter("/")
            .send()
            .await
            .map_err(|e| MirrorError::ObjectStore(e.to_string()))?;
        for common in versions.common_prefixes() {
            let Some(version_path) = common.prefix() else {
                continue;
            };
            let version = version_path
                .trim_start_matches(&ext_prefix)
                .trim_end_matches('/')
                .to_string();
            if version.is_empty() {
                continue;
            }
            let platforms = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(version_path)
                .delimiter("/")
                .send()
                .await
                .map_err(|e| MirrorError::ObjectStore(e.to_string()))?;
            for common_platform in platforms.common_prefixes() {
                let Some(platform_path) = common_platform.prefix() else {
                    continue;
                };
                let platform = platform_path
                    .trim_start_matches(version_path)
                    .trim_end_matches('/')
                    .to_string();
                if platform.is_empty() {
                    continue;
                }
                out.push(VersionTag::new(uid.clone(), Some(version.clone()), Some(platform)));
            }
        }
        Ok(out)
    }

    async fn remove(&self, tag: &VersionTag) -> Result<()> {
        let prefix = if tag.version.is_none() {
            format!("{}/", key_layout::extension_prefix(&self.prefix, &tag.uid))
        } else if tag.platform.is_none() {
            format!(
                "{}/{}/",
                key_layout::extension_prefix(&self.prefix, &tag.uid),
                tag.version.as_deref().unwrap()
            )
        } else {
            format!("{}/", key_layout::version_prefix(&self.prefix, tag))
        };
        self.delete_prefix(&prefix).await?;

        // Cascade: remove the version directory's parent if empty, then
        // the extension's, mirroring the filesystem backend's walk-up.
        if tag.version.is_some() {
            let version_prefix = format!(
                "{}/{}/",
                key_layout::extension_prefix(&self.prefix, &tag.uid),
                tag.version.as_deref().unwrap()
            );
            if !self.has_any_under(&version_prefix).await? {
                self.delete_prefix(&version_prefix).await?;
            }
        }
        let ext_prefix = format!("{}/", key_layout::extension_prefix(&self.prefix, &tag.uid));
        if !self.has_any_under(&ext_prefix).await? {
            self.delete_prefix(&ext_prefix).await?;
        }
        Ok(())
    }
}
