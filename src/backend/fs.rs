use async_trait::async_trait;
use log::debug;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{key_layout, Backend};
use crate::domain::{AssetType, Extension, UniqueId, Version, VersionTag};
use crate::error::{MirrorError, Result};

/// Directory mode 0755, file mode 0666 — applied on Unix only; a no-op
/// elsewhere.
#[cfg(unix)]
fn set_dir_mode(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}
#[cfg(not(unix))]
fn set_dir_mode(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_file_mode(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666))
}
#[cfg(not(unix))]
fn set_file_mode(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Filesystem-backed object store, rooted at a configured path. Concurrent
/// writes to the same key are not serialized here — the acquisition
/// pipeline provides per-version isolation.
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    async fn write_file(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
            set_dir_mode(parent)?;
        }
        fs::write(&path, bytes).await?;
        set_file_mode(&path)?;
        Ok(())
    }

    async fn read_file(&self, key: &str) -> std::io::Result<Vec<u8>> {
        fs::read(self.path_for(key)).await
    }

    /// Removes `dir` if it is now empty, then recurses upward through its
    /// ancestors until hitting `self.root` or a non-empty directory —
    /// cascading delete of empty parents.
    async fn remove_empty_ancestors(&self, start: &Path) {
        let mut current = start.to_path_buf();
        loop {
            if current == self.root || !current.starts_with(&self.root) {
                return;
            }
            let mut entries = match fs::read_dir(&current).await {
                Ok(e) => e,
                Err(_) => return,
            };
            let is_empty = entries.next_entry().await.ok().flatten().is_none();
            if !is_empty {
                return;
            }
            if fs::remove_dir(&current).await.is_err() {
                return;
            }
            debug!("removed empty directory {}", current.display());
            match current.parent() {
                Some(p) => current = p.to_path_buf(),
                None => return,
            }
        }
    }
}

#[async_trait]
impl Backend for FsBackend {
    async fn save_extension_metadata(&self, extension: &Extension) -> Result<()> {
        let key = key_layout::extension_metadata_key("", &extension.uid);
        let stripped = extension.without_versions();
        let bytes = serde_json::to_vec(&stripped)?;
        self.write_file(&key, &bytes).await
    }

    async fn save_version_metadata(&self, uid: &UniqueId, version: &Version) -> Result<()> {
        let tag = VersionTag::new(uid.clone(), Some(version.version.clone()), version.target_platform.clone());
        let key = key_layout::version_metadata_key("", &tag);
        let bytes = serde_json::to_vec(version)?;
        self.write_file(&key, &bytes).await
    }

    async fn save_asset(
        &self,
        tag: &VersionTag,
        asset_type: AssetType,
        _content_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<()> {
        let key = key_layout::asset_key("", tag, asset_type);
        self.write_file(&key, bytes).await
    }

    async fn load_extension_metadata(&self, uid: &UniqueId) -> Result<Vec<u8>> {
        let key = key_layout::extension_metadata_key("", uid);
        self.read_file(&key)
            .await
            .map_err(|_| MirrorError::ExtensionMetadataNotFound(uid.clone()))
    }

    async fn load_version_metadata(&self, tag: &VersionTag) -> Result<Vec<u8>> {
        let key = key_layout::version_metadata_key("", tag);
        self.read_file(&key)
            .await
            .map_err(|_| MirrorError::VersionMetadataNotFound(tag.clone()))
    }

    async fn load_asset(
        &self,
        tag: &VersionTag,
        asset_type: AssetType,
    ) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
        let key = key_layout::asset_key("", tag, asset_type);
        let file = fs::File::open(self.path_for(&key)).await.map_err(|_| {
            MirrorError::MissingAsset {
                tag: tag.clone(),
                asset: asset_type.to_string(),
            }
        })?;
        Ok(Box::new(file))
    }

    async fn detect_asset_content_type(
        &self,
        tag: &VersionTag,
        asset_type: AssetType,
    ) -> Result<String> {
        let mut reader = self.load_asset(tag, asset_type).await?;
        let mut buf = [0u8; 512];
        let n = reader.read(&mut buf).await?;
        Ok(infer::get(&buf[..n])
            .map(|kind| kind.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string()))
    }

    async fn list_unique_ids(&self) -> Result<Vec<UniqueId>> {
        let mut out = Vec::new();
        let mut publishers = match fs::read_dir(&self.root).await {
            Ok(d) => d,
            Err(_) => return Ok(out),
        };
        while let Some(publisher_entry) = publishers.next_entry().await? {
            if !publisher_entry.file_type().await?.is_dir() {
                continue;
            }
            let publisher_name = publisher_entry.file_name().to_string_lossy().to_string();
            let mut names = fs::read_dir(publisher_entry.path()).await?;
            while let Some(name_entry) = names.next_entry().await? {
                if !name_entry.file_type().await?.is_dir() {
                    continue;
                }
                let name = name_entry.file_name().to_string_lossy().to_string();
                out.push(UniqueId::new(publisher_name.clone(), name));
            }
        }
        Ok(out)
    }

    async fn list_version_tags(&self, uid: &UniqueId) -> Result<Vec<VersionTag>> {
        let mut out = Vec::new();
        let ext_dir = self.path_for(&key_layout::extension_prefix("", uid));
        let mut versions = match fs::read_dir(&ext_dir).await {
            Ok(d) => d,
            Err(_) => return Ok(out),
        };
        while let Some(version_entry) = versions.next_entry().await? {
            if !version_entry.file_type().await?.is_dir() {
                continue;
            }
            let version = version_entry.file_name().to_string_lossy().to_string();
            let mut platforms = fs::read_dir(version_entry.path()).await?;
            while let Some(platform_entry) = platforms.next_entry().await? {
                if !platform_entry.file_type().await?.is_dir() {
                    continue;
                }
                let platform = platform_entry.file_name().to_string_lossy().to_string();
                out.push(VersionTag::new(uid.clone(), Some(version.clone()), Some(platform)));
            }
        }
        Ok(out)
    }

    async fn remove(&self, tag: &VersionTag) -> Result<()> {
        if tag.version.is_none() {
            // Extension granularity: drop the whole extension directory.
            let dir = self.path_for(&key_layout::extension_prefix("", &tag.uid));
            if fs::metadata(&dir).await.is_ok() {
                fs::remove_dir_all(&dir).await?;
            }
            if let Some(parent) = dir.parent() {
                self.remove_empty_ancestors(parent).await;
            }
            return Ok(());
        }

        if tag.platform.is_none() {
            // Version granularity: drop every platform under this version.
            let version_dir = self
                .path_for(&key_layout::extension_prefix("", &tag.uid))
                .join(tag.version.as_deref().unwrap());
            if fs::metadata(&version_dir).await.is_ok() {
                fs::remove_dir_all(&version_dir).await?;
            }
            if let Some(parent) = version_dir.parent() {
                self.remove_empty_ancestors(parent).await;
            }
            return Ok(());
        }

        // Platform (leaf) granularity.
        let platform_dir = self.path_for(&key_layout::version_prefix("", tag));
        if fs::metadata(&platform_dir).await.is_ok() {
            fs::remove_dir_all(&platform_dir).await?;
        }
        if let Some(parent) = platform_dir.parent() {
            self.remove_empty_ancestors(parent).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Asset, Property};
    use chrono::Utc;
    use tempfile::tempdir;

    fn sample_version(version: &str) -> Version {
        Version {
            version: version.to_string(),
            target_platform: None,
            last_updated: Utc::now(),
            properties: vec![Property {
                key: "Microsoft.VisualStudio.Code.PreRelease".into(),
                value: "false".into(),
            }],
            assets: vec![Asset {
                asset_type: AssetType::VsixPackage,
                source: "https://example.test/vsix".into(),
            }],
            asset_uri: "https://example.test/assets".into(),
            fallback_asset_uri: "https://example.test/fallback".into(),
        }
    }

    #[tokio::test]
    async fn round_trips_extension_and_version_metadata() {
        let dir = tempdir().unwrap();
        let backend = FsBackend::new(dir.path());
        let uid = UniqueId::new("golang", "Go");
        let ext = Extension {
            uid: uid.clone(),
            extension_uuid: "uuid-golang-go".into(),
            display_name: "Go".into(),
            publisher_display_name: "Go Team".into(),
            short_description: "Go language support".into(),
            categories: vec![],
            tags: vec![],
            deployment_type: 0,
            statistics: Default::default(),
            published_date: Utc::now(),
            last_updated: Utc::now(),
            versions: vec![sample_version("0.40.0")],
        };
        backend.save_extension_metadata(&ext).await.unwrap();
        let loaded = backend.load_extension_metadata(&uid).await.unwrap();
        assert!(!loaded.is_empty());

        backend
            .save_version_metadata(&uid, &sample_version("0.40.0"))
            .await
            .unwrap();
        let tag = VersionTag::new(uid.clone(), Some("0.40.0".into()), Some("universal".into()));
        let loaded_version = backend.load_version_metadata(&tag).await.unwrap();
        assert!(!loaded_version.is_empty());
    }

    #[tokio::test]
    async fn save_and_load_asset_round_trips() {
        let dir = tempdir().unwrap();
        let backend = FsBackend::new(dir.path());
        let tag = VersionTag::new(
            UniqueId::new("golang", "Go"),
            Some("0.40.0".into()),
            Some("universal".into()),
        );
        backend
            .save_asset(&tag, AssetType::VsixPackage, Some("application/zip"), b"PK\x03\x04")
            .await
            .unwrap();
        let mut reader = backend.load_asset(&tag, AssetType::VsixPackage).await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"PK\x03\x04");
    }

    #[tokio::test]
    async fn missing_asset_is_reported() {
        let dir = tempdir().unwrap();
        let backend = FsBackend::new(dir.path());
        let tag = VersionTag::new(
            UniqueId::new("golang", "Go"),
            Some("0.40.0".into()),
            Some("universal".into()),
        );
        let err = backend.load_asset(&tag, AssetType::VsixPackage).await.unwrap_err();
        assert!(matches!(err, MirrorError::MissingAsset { .. }));
    }

    #[tokio::test]
    async fn remove_cascades_empty_parents() {
        let dir = tempdir().unwrap();
        let backend = FsBackend::new(dir.path());
        let tag = VersionTag::new(
            UniqueId::new("golang", "Go"),
            Some("0.40.0".into()),
            Some("universal".into()),
        );
        backend
            .save_asset(&tag, AssetType::VsixPackage, None, b"data")
            .await
            .unwrap();
        backend.remove(&tag).await.unwrap();

        let ids = backend.list_unique_ids().await.unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn list_unique_ids_enumerates_publisher_name_pairs() {
        let dir = tempdir().unwrap();
        let backend = FsBackend::new(dir.path());
        let tag = VersionTag::new(
            UniqueId::new("golang", "Go"),
            Some("0.40.0".into()),
            Some("universal".into()),
        );
        backend
            .save_asset(&tag, AssetType::VsixPackage, None, b"data")
            .await
            .unwrap();
        let ids = backend.list_unique_ids().await.unwrap();
        assert_eq!(ids, vec![UniqueId::new("golang", "Go")]);
    }
}
