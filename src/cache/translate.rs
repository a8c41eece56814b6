//! Translates a `domain::query::Query` into SQL against the `extension`,
//! `version`, and `extension_fts` tables, implementing the `Cache::run`
//! contract: a query with no filters is rejected, SearchText goes through
//! FTS, ExtensionName/ExtensionID match literally, sort and pagination
//! happen last.
use sqlx::{Row, SqlitePool};

use crate::domain::model::compare_version_strings;
use crate::domain::query::{FilterType, Query, QueryFlags, SortBy};
use crate::domain::{Extension, Version};
use crate::error::{MirrorError, Result};

/// One page of extensions plus the total count before pagination, mirroring
/// the upstream envelope's `resultMetadata[0].metadataItems[0].count`.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub extensions: Vec<Extension>,
    pub total_count: i64,
}

pub async fn run(pool: &SqlitePool, query: &Query) -> Result<QueryResult> {
    let Some(filter) = query.filters.first() else {
        return Err(MirrorError::InvalidQuery("query has no filters".to_string()));
    };

    let search_text = find_value(filter, FilterType::SearchText);
    let extension_names: Vec<&str> = find_values(filter, FilterType::ExtensionName);
    let extension_ids: Vec<&str> = find_values(filter, FilterType::ExtensionId);

    let mut candidates = if let Some(text) = search_text {
        fts_match(pool, text).await?
    } else if !extension_names.is_empty() {
        match_literal(pool, "uid", &extension_names).await?
    } else if !extension_ids.is_empty() {
        match_literal(pool, "extension_id", &extension_ids).await?
    } else {
        all_extensions(pool).await?
    };

    sort_extensions(&mut candidates, SortBy::from_i32(filter.sort_by));

    let total_count = candidates.len() as i64;
    let page_number = filter.page_number.max(1);
    let page_size = filter.page_size.max(0);
    let begin = ((page_number - 1) * page_size).clamp(0, total_count);
    let end = (begin + page_size).min(total_count);
    let mut page: Vec<Extension> = candidates
        .into_iter()
        .skip(begin as usize)
        .take((end - begin).max(0) as usize)
        .collect();

    let flags = query.flags();
    for extension in &mut page {
        attach_versions(pool, extension, flags).await?;
    }

    Ok(QueryResult {
        extensions: page,
        total_count,
    })
}

fn find_value<'a>(filter: &'a crate::domain::query::QueryFilter, filter_type: FilterType) -> Option<&'a str> {
    filter
        .criteria
        .iter()
        .find(|c| c.filter_type == filter_type as i32)
        .map(|c| c.value.as_str())
}

fn find_values<'a>(filter: &'a crate::domain::query::QueryFilter, filter_type: FilterType) -> Vec<&'a str> {
    filter
        .criteria
        .iter()
        .filter(|c| c.filter_type == filter_type as i32)
        .map(|c| c.value.as_str())
        .collect()
}

async fn all_extensions(pool: &SqlitePool) -> Result<Vec<Extension>> {
    let rows = sqlx::query("SELECT metadata FROM extension").fetch_all(pool).await?;
    rows_to_extensions(rows)
}

async fn fts_match(pool: &SqlitePool, text: &str) -> Result<Vec<Extension>> {
    let rows = sqlx::query(
        r#"
        SELECT e.metadata FROM extension e
        JOIN extension_fts f ON f.extension_id = e.uid
        WHERE extension_fts MATCH ?
        "#,
    )
    .bind(fts_query(text))
    .fetch_all(pool)
    .await?;
    rows_to_extensions(rows)
}

/// FTS5 treats bare text as a MATCH query; quoting keeps multi-word phrases
/// from being parsed as FTS query syntax.
fn fts_query(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

async fn match_literal(pool: &SqlitePool, column: &str, values: &[&str]) -> Result<Vec<Extension>> {
    let placeholders = values.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let sql = format!("SELECT metadata FROM extension WHERE {column} IN ({placeholders}) COLLATE NOCASE");
    let mut q = sqlx::query(&sql);
    for v in values {
        q = q.bind(*v);
    }
    let rows = q.fetch_all(pool).await?;
    rows_to_extensions(rows)
}

fn rows_to_extensions(rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Vec<Extension>> {
    rows.into_iter()
        .map(|row| {
            let metadata: String = row.try_get("metadata")?;
            Ok(serde_json::from_str(&metadata)?)
        })
        .collect()
}

fn sort_extensions(extensions: &mut [Extension], sort_by: SortBy) {
    match sort_by {
        SortBy::Name => extensions.sort_by(|a, b| a.display_name.cmp(&b.display_name)),
        SortBy::InstallCount => extensions.sort_by(|a, b| {
            b.install_count()
                .partial_cmp(&a.install_count())
                .unwrap_or(std::cmp::Ordering::Equal)
        }),
        SortBy::PublishedDate => extensions.sort_by(|a, b| b.published_date.cmp(&a.published_date)),
        SortBy::Rating => extensions.sort_by(|a, b| {
            b.weighted_rating()
                .partial_cmp(&a.weighted_rating())
                .unwrap_or(std::cmp::Ordering::Equal)
        }),
        SortBy::None => {}
    }
}

async fn attach_versions(pool: &SqlitePool, extension: &mut Extension, flags: QueryFlags) -> Result<()> {
    let uid_str = extension.uid.to_string();
    let rows = sqlx::query("SELECT metadata, last_updated FROM version WHERE uid = ? COLLATE NOCASE")
        .bind(&uid_str)
        .fetch_all(pool)
        .await?;

    let mut versions: Vec<(String, Version)> = rows
        .into_iter()
        .map(|row| {
            let metadata: String = row.try_get("metadata")?;
            let last_updated: String = row.try_get("last_updated")?;
            let version: Version = serde_json::from_str(&metadata)?;
            Ok::<_, crate::error::MirrorError>((last_updated, version))
        })
        .collect::<Result<Vec<_>>>()?;

    if flags.contains(QueryFlags::INCLUDE_LATEST_VERSION_ONLY) {
        versions.sort_by(|a, b| a.0.cmp(&b.0));
        extension.versions = versions.into_iter().next_back().map(|(_, v)| v).into_iter().collect();
    } else {
        versions.sort_by(|a, b| compare_version_strings(&b.1.version, &a.1.version));
        extension.versions = versions.into_iter().map(|(_, v)| v).collect();
    }
    Ok(())
}
