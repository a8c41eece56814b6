pub mod translate;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use log::{debug, warn};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool, Transaction};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::backend::Backend;
use crate::config::DEFAULT_REINDEX_CONCURRENCY;
use crate::domain::query::Query;
use crate::domain::{Extension, UniqueId, Version, VersionTag, UNIVERSAL_PLATFORM};
use crate::error::{MirrorError, Result, ValidationError};

pub use translate::QueryResult;

/// The authoritative index for read queries: an embedded SQLite store with
/// `extension`, `version`, and an `extension_fts` FTS5 virtual table,
/// mirroring backend metadata. Writes are serialized through a mutex
/// because the embedded engine is single-writer; reads run unsynchronized
/// against the pool's other connections, relying on WAL for concurrency.
#[derive(Clone)]
pub struct Cache {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

/// Aggregate counters for the `info`/`stats` CLI surface.
#[derive(Debug, Clone)]
pub struct Stats {
    pub extension_count: i64,
    pub version_count: i64,
    pub platforms: Vec<String>,
    pub last_updated: Option<chrono::DateTime<Utc>>,
}

impl Cache {
    pub async fn open(path: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(|e| MirrorError::Cache(sqlx::Error::Configuration(e.into())))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(opts)
            .await?;
        let cache = Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        };
        cache.create_schema().await?;
        Ok(cache)
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA_EXTENSION).execute(&self.pool).await?;
        sqlx::query(SCHEMA_VERSION).execute(&self.pool).await?;
        sqlx::query(SCHEMA_FTS).execute(&self.pool).await?;
        Ok(())
    }

    /// Drops and recreates all tables.
    pub async fn reset(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DROP TABLE IF EXISTS extension_fts").execute(&self.pool).await?;
        sqlx::query("DROP TABLE IF EXISTS version").execute(&self.pool).await?;
        sqlx::query("DROP TABLE IF EXISTS extension").execute(&self.pool).await?;
        drop(_guard);
        self.create_schema().await
    }

    /// Upsert by uid; verifies the JSON's own publisher+name equal `uid`
    /// (case-insensitive) and fails otherwise. Runs in one transaction.
    pub async fn put_extension(&self, uid: &UniqueId, json_bytes: &[u8]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        upsert_extension(&mut tx, uid, json_bytes).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Upsert by tag; derives `pre_release` from the properties list,
    /// defaulting to `"false"`.
    pub async fn put_version(&self, uid: &UniqueId, json_bytes: &[u8]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        upsert_version(&mut tx, uid, json_bytes).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Loads extension metadata + all version metadata from the backend and
    /// writes both within one transaction. Every version's declared assets
    /// are checked via `detect_asset_content_type` before it's indexed; a
    /// version that fails this check is left out of the cache and reported
    /// as a `ValidationError` instead, rather than caching a row that points
    /// at a backend object whose assets are gone.
    pub async fn index_extension(&self, backend: &dyn Backend, uid: &UniqueId) -> Result<Vec<ValidationError>> {
        let ext_bytes = backend.load_extension_metadata(uid).await?;
        let tags = backend.list_version_tags(uid).await?;

        let mut invalid = Vec::new();
        let mut valid_versions = Vec::new();
        for tag in &tags {
            let version_bytes = backend.load_version_metadata(tag).await?;
            let version: Version = serde_json::from_slice(&version_bytes)?;
            match validate_assets(backend, tag, &version).await {
                Ok(()) => valid_versions.push(version_bytes),
                Err(reason) => invalid.push(ValidationError { tag: tag.clone(), reason }),
            }
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        upsert_extension(&mut tx, uid, &ext_bytes).await?;
        for version_bytes in &valid_versions {
            upsert_version(&mut tx, uid, version_bytes).await?;
        }
        tx.commit().await?;
        Ok(invalid)
    }

    /// Lists all UniqueIDs at the backend and runs `index_extension` for
    /// each with bounded parallelism.
    pub async fn reindex(&self, backend: Arc<dyn Backend>) -> Result<Vec<ValidationError>> {
        self.reset().await?;
        let uids = backend.list_unique_ids().await?;
        let cache = self.clone();
        let results: Vec<Vec<ValidationError>> = stream::iter(uids)
            .map(|uid| {
                let backend = backend.clone();
                let cache = cache.clone();
                async move {
                    match cache.index_extension(backend.as_ref(), &uid).await {
                        Ok(invalid) => invalid,
                        Err(e) => {
                            warn!("reindex: {uid} failed: {e}");
                            vec![ValidationError {
                                tag: VersionTag::new(uid, None, None),
                                reason: e.to_string(),
                            }]
                        }
                    }
                }
            })
            .buffer_unordered(DEFAULT_REINDEX_CONCURRENCY)
            .collect()
            .await;
        Ok(results.into_iter().flatten().collect())
    }

    /// Returns the extension with the latest version per platform attached.
    pub async fn find_by_unique_id(&self, uid: &UniqueId) -> Result<Extension> {
        let uid_str = uid.to_string();
        let row = sqlx::query("SELECT metadata FROM extension WHERE uid = ? COLLATE NOCASE")
            .bind(&uid_str)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MirrorError::CacheNotFound(uid_str.clone()))?;
        let metadata: String = row.try_get("metadata")?;
        let mut extension: Extension = serde_json::from_str(&metadata)?;

        let version_rows = sqlx::query(
            "SELECT metadata, platform, last_updated FROM version WHERE uid = ? COLLATE NOCASE",
        )
        .bind(&uid_str)
        .fetch_all(&self.pool)
        .await?;

        let mut by_platform: std::collections::HashMap<String, (String, Version)> =
            std::collections::HashMap::new();
        for row in version_rows {
            let metadata: String = row.try_get("metadata")?;
            let platform: String = row.try_get("platform")?;
            let last_updated: String = row.try_get("last_updated")?;
            let version: Version = serde_json::from_str(&metadata)?;
            match by_platform.get(&platform) {
                Some((existing_last_updated, _)) if existing_last_updated >= &last_updated => {}
                _ => {
                    by_platform.insert(platform, (last_updated, version));
                }
            }
        }
        extension.versions = by_platform.into_values().map(|(_, v)| v).collect();
        Ok(extension)
    }

    pub async fn find_by_version_tag(&self, tag: &VersionTag) -> Result<Version> {
        let tag_str = tag_string(&tag.uid, tag.version.as_deref().unwrap_or(""), tag.platform_or_universal());
        let row = sqlx::query("SELECT metadata FROM version WHERE tag = ? COLLATE NOCASE")
            .bind(&tag_str)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MirrorError::VersionNotFound(tag.clone()))?;
        let metadata: String = row.try_get("metadata")?;
        Ok(serde_json::from_str(&metadata)?)
    }

    /// Prefix match on the string form of the tag.
    pub async fn list_version_tags(&self, prefix: &str) -> Result<Vec<VersionTag>> {
        let like = format!("{}%", prefix.replace('%', "\\%"));
        let rows = sqlx::query("SELECT tag FROM version WHERE tag LIKE ? ESCAPE '\\' COLLATE NOCASE")
            .bind(like)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                let tag: String = row.try_get("tag")?;
                tag.parse().map_err(|_| MirrorError::InvalidQuery(tag))
            })
            .collect()
    }

    pub async fn list_platforms(&self, uid: &UniqueId) -> Result<Vec<String>> {
        let uid_str = uid.to_string();
        let rows = sqlx::query(
            "SELECT DISTINCT platform FROM version WHERE uid = ? COLLATE NOCASE ORDER BY platform",
        )
        .bind(uid_str)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|r| Ok(r.try_get("platform")?)).collect()
    }

    pub async fn exists(&self, uid: &UniqueId, platform: &str) -> Result<bool> {
        let uid_str = uid.to_string();
        let row = sqlx::query(
            "SELECT COUNT(*) as c FROM version WHERE uid = ? COLLATE NOCASE AND platform = ?",
        )
        .bind(uid_str)
        .bind(platform)
        .fetch_one(&self.pool)
        .await?;
        let count: i64 = row.try_get("c")?;
        Ok(count > 0)
    }

    /// Mirrors the backend's tiered semantics (platform/version/extension);
    /// when the last version of an extension is deleted, deletes the
    /// extension row too.
    pub async fn delete(&self, tag: &VersionTag) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let uid_str = tag.uid.to_string();
        let mut tx = self.pool.begin().await?;

        match (&tag.version, &tag.platform) {
            (None, _) => {
                sqlx::query("DELETE FROM version WHERE uid = ? COLLATE NOCASE")
                    .bind(&uid_str)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM extension WHERE uid = ? COLLATE NOCASE")
                    .bind(&uid_str)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM extension_fts WHERE extension_id = ?")
                    .bind(&uid_str)
                    .execute(&mut *tx)
                    .await?;
            }
            (Some(version), None) => {
                sqlx::query("DELETE FROM version WHERE uid = ? COLLATE NOCASE AND version = ?")
                    .bind(&uid_str)
                    .bind(version)
                    .execute(&mut *tx)
                    .await?;
            }
            (Some(version), Some(platform)) => {
                sqlx::query(
                    "DELETE FROM version WHERE uid = ? COLLATE NOCASE AND version = ? AND platform = ?",
                )
                .bind(&uid_str)
                .bind(version)
                .bind(platform)
                .execute(&mut *tx)
                .await?;
            }
        }

        if tag.version.is_some() {
            let row = sqlx::query("SELECT COUNT(*) as c FROM version WHERE uid = ? COLLATE NOCASE")
                .bind(&uid_str)
                .fetch_one(&mut *tx)
                .await?;
            let remaining: i64 = row.try_get("c")?;
            if remaining == 0 {
                sqlx::query("DELETE FROM extension WHERE uid = ? COLLATE NOCASE")
                    .bind(&uid_str)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM extension_fts WHERE extension_id = ?")
                    .bind(&uid_str)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn run(&self, query: &Query) -> Result<QueryResult> {
        translate::run(&self.pool, query).await
    }

    pub async fn stats(&self) -> Result<Stats> {
        let ext_row = sqlx::query("SELECT COUNT(*) as c FROM extension")
            .fetch_one(&self.pool)
            .await?;
        let extension_count: i64 = ext_row.try_get("c")?;

        let ver_row = sqlx::query("SELECT COUNT(*) as c FROM version")
            .fetch_one(&self.pool)
            .await?;
        let version_count: i64 = ver_row.try_get("c")?;

        let platform_rows = sqlx::query("SELECT DISTINCT platform FROM version ORDER BY platform")
            .fetch_all(&self.pool)
            .await?;
        let platforms = platform_rows
            .into_iter()
            .map(|r| r.try_get::<String, _>("platform"))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let last_updated_row =
            sqlx::query("SELECT MAX(updated_at) as m FROM extension").fetch_one(&self.pool).await?;
        let last_updated: Option<String> = last_updated_row.try_get("m")?;
        let last_updated = last_updated.and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
            .map(|d| d.with_timezone(&Utc));

        Ok(Stats {
            extension_count,
            version_count,
            platforms,
            last_updated,
        })
    }
}

fn tag_string(uid: &UniqueId, version: &str, platform: &str) -> String {
    format!("{uid}@{version}:{platform}")
}

/// Checks every asset a version declares actually loads from the backend,
/// matching the same check `prune` runs, so a version that's lost a blob
/// never gets indexed as if it were still complete.
async fn validate_assets(backend: &dyn Backend, tag: &VersionTag, version: &Version) -> std::result::Result<(), String> {
    for asset in &version.assets {
        backend
            .detect_asset_content_type(tag, asset.asset_type)
            .await
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}

async fn upsert_extension(
    tx: &mut Transaction<'_, sqlx::Sqlite>,
    uid: &UniqueId,
    json_bytes: &[u8],
) -> Result<()> {
    let extension: Extension = serde_json::from_slice(json_bytes)?;
    if extension.uid != *uid {
        return Err(MirrorError::Integrity {
            expected: uid.to_string(),
            actual: extension.uid.to_string(),
        });
    }
    let uid_str = uid.to_string();
    let install = extension.install_count();
    let weighted_rating = extension.weighted_rating();
    let metadata = serde_json::to_string(&extension.without_versions())?;
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO extension (uid, install, weighted_rating, metadata, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(uid) DO UPDATE SET
            install = excluded.install,
            weighted_rating = excluded.weighted_rating,
            metadata = excluded.metadata,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&uid_str)
    .bind(install)
    .bind(weighted_rating)
    .bind(&metadata)
    .bind(&now)
    .bind(&now)
    .execute(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM extension_fts WHERE extension_id = ?")
        .bind(&uid_str)
        .execute(&mut **tx)
        .await?;
    sqlx::query(
        "INSERT INTO extension_fts (extension_id, extension_name, display_name, publisher_name, short_description) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&uid_str)
    .bind(&extension.uid.name)
    .bind(&extension.display_name)
    .bind(&extension.publisher_display_name)
    .bind(&extension.short_description)
    .execute(&mut **tx)
    .await?;

    debug!("indexed extension {uid_str}");
    Ok(())
}

async fn upsert_version(
    tx: &mut Transaction<'_, sqlx::Sqlite>,
    uid: &UniqueId,
    json_bytes: &[u8],
) -> Result<()> {
    let version: Version = serde_json::from_slice(json_bytes)?;
    let uid_str = uid.to_string();
    let platform = version.target_platform.clone().unwrap_or_else(|| UNIVERSAL_PLATFORM.to_string());
    let tag = tag_string(uid, &version.version, &platform);
    let pre_release = if version.is_pre_release() { "true" } else { "false" };
    let metadata = serde_json::to_string(&version)?;
    let last_updated = version.last_updated.to_rfc3339();
    let now = Utc::now().to_rfc3339();

    // A previously pre-release version may be replaced if upstream flips it
    // to stable: `!(existed.pre_release && !new.pre_release)` is the
    // replace condition, so we always upsert here (stable-over-stable and
    // pre-release-over-pre-release overwrite too, matching "immutable once
    // all assets are written" being enforced by the pipeline, not the cache).
    sqlx::query(
        r#"
        INSERT INTO version (uid, tag, last_updated, pre_release, metadata, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(tag) DO UPDATE SET
            last_updated = excluded.last_updated,
            pre_release = excluded.pre_release,
            metadata = excluded.metadata,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&uid_str)
    .bind(&tag)
    .bind(&last_updated)
    .bind(pre_release)
    .bind(&metadata)
    .bind(&now)
    .bind(&now)
    .execute(&mut **tx)
    .await?;

    debug!("indexed version {tag}");
    Ok(())
}

const SCHEMA_EXTENSION: &str = r#"
CREATE TABLE IF NOT EXISTS extension (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid TEXT NOT NULL UNIQUE,
    extension_id TEXT GENERATED ALWAYS AS (json_extract(metadata, '$.extension_uuid')) STORED,
    display_name TEXT GENERATED ALWAYS AS (json_extract(metadata, '$.display_name')) STORED,
    published_date TEXT GENERATED ALWAYS AS (json_extract(metadata, '$.published_date')) STORED,
    weighted_rating REAL NOT NULL DEFAULT 0,
    install REAL NOT NULL DEFAULT 0,
    metadata TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#;

const SCHEMA_VERSION: &str = r#"
CREATE TABLE IF NOT EXISTS version (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid TEXT NOT NULL,
    version TEXT GENERATED ALWAYS AS (json_extract(metadata, '$.version')) STORED,
    platform TEXT GENERATED ALWAYS AS (COALESCE(json_extract(metadata, '$.target_platform'), 'universal')) STORED,
    tag TEXT NOT NULL UNIQUE COLLATE NOCASE,
    last_updated TEXT GENERATED ALWAYS AS (json_extract(metadata, '$.last_updated')) STORED,
    pre_release TEXT NOT NULL DEFAULT 'false',
    metadata TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#;

const SCHEMA_FTS: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS extension_fts USING fts5(
    extension_id UNINDEXED,
    extension_name,
    display_name,
    publisher_name,
    short_description
)"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Asset, AssetType, Property};

    fn sample_extension(uid: &UniqueId) -> Extension {
        Extension {
            uid: uid.clone(),
            extension_uuid: "uuid-1".into(),
            display_name: "Go".into(),
            publisher_display_name: "Go Team".into(),
            short_description: "Rich Go language support".into(),
            categories: vec![],
            tags: vec![],
            deployment_type: 0,
            statistics: [("install".to_string(), 42.0)].into_iter().collect(),
            published_date: Utc::now(),
            last_updated: Utc::now(),
            versions: vec![],
        }
    }

    fn sample_version(version: &str, pre_release: bool) -> Version {
        Version {
            version: version.to_string(),
            target_platform: None,
            last_updated: Utc::now(),
            properties: vec![Property {
                key: "Microsoft.VisualStudio.Code.PreRelease".into(),
                value: pre_release.to_string(),
            }],
            assets: vec![Asset {
                asset_type: AssetType::VsixPackage,
                source: "https://example.test/vsix".into(),
            }],
            asset_uri: "https://example.test/assets".into(),
            fallback_asset_uri: "https://example.test/fallback".into(),
        }
    }

    async fn open_memory() -> Cache {
        Cache::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn put_extension_rejects_uid_mismatch() {
        let cache = open_memory().await;
        let ext = sample_extension(&UniqueId::new("golang", "Go"));
        let bytes = serde_json::to_vec(&ext).unwrap();
        let err = cache
            .put_extension(&UniqueId::new("other", "pkg"), &bytes)
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::Integrity { .. }));
    }

    #[tokio::test]
    async fn put_and_find_extension_round_trips() {
        let cache = open_memory().await;
        let uid = UniqueId::new("golang", "Go");
        let ext = sample_extension(&uid);
        let bytes = serde_json::to_vec(&ext).unwrap();
        cache.put_extension(&uid, &bytes).await.unwrap();

        let version = sample_version("0.40.0", false);
        let vbytes = serde_json::to_vec(&version).unwrap();
        cache.put_version(&uid, &vbytes).await.unwrap();

        let found = cache.find_by_unique_id(&uid).await.unwrap();
        assert_eq!(found.uid, uid);
        assert_eq!(found.versions.len(), 1);
        assert_eq!(found.install_count(), 42.0);
    }

    #[tokio::test]
    async fn delete_extension_granularity_clears_everything() {
        let cache = open_memory().await;
        let uid = UniqueId::new("golang", "Go");
        let ext = sample_extension(&uid);
        cache.put_extension(&uid, &serde_json::to_vec(&ext).unwrap()).await.unwrap();
        let version = sample_version("0.40.0", false);
        cache.put_version(&uid, &serde_json::to_vec(&version).unwrap()).await.unwrap();

        cache.delete(&VersionTag::new(uid.clone(), None, None)).await.unwrap();
        let err = cache.find_by_unique_id(&uid).await.unwrap_err();
        assert!(matches!(err, MirrorError::CacheNotFound(_)));
    }

    #[tokio::test]
    async fn deleting_last_version_removes_extension_row() {
        let cache = open_memory().await;
        let uid = UniqueId::new("golang", "Go");
        cache.put_extension(&uid, &serde_json::to_vec(&sample_extension(&uid)).unwrap()).await.unwrap();
        let version = sample_version("0.40.0", false);
        cache.put_version(&uid, &serde_json::to_vec(&version).unwrap()).await.unwrap();

        cache
            .delete(&VersionTag::new(uid.clone(), Some("0.40.0".into()), Some("universal".into())))
            .await
            .unwrap();

        assert!(cache.find_by_unique_id(&uid).await.is_err());
    }
}
