use std::io::Write as _;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::warn;
use tokio::io::AsyncReadExt;

use crate::domain::query::Query;
use crate::domain::{AssetType, UniqueId, VersionTag};
use crate::error::Result;

use super::rewrite;
use super::AppState;

const EXTENSIONQUERY_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// `GET /asset/<publisher>/<name>/<version>/<platform>/<type>`: loads the
/// blob, sniffs its content type, and always gzips the body regardless of
/// the client's `Accept-Encoding` — the contract calls for unconditional
/// gzip, not negotiated compression.
pub async fn get_asset(
    State(state): State<AppState>,
    Path((publisher, name, version, platform, asset_type)): Path<(String, String, String, String, String)>,
) -> Result<Response> {
    let asset_type: AssetType = asset_type.parse()?;
    let tag = VersionTag::new(UniqueId::new(publisher, name), Some(version), Some(platform));

    let content_type = state.backend.detect_asset_content_type(&tag, asset_type).await?;
    let mut reader = state.backend.load_asset(&tag, asset_type).await?;
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).await?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&bytes)?;
    let gzipped = encoder.finish()?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_ENCODING, "gzip".to_string()),
        ],
        gzipped,
    )
        .into_response())
}

/// `GET /_gallery/<publisher>/<name>/latest`: the single-extension lookup
/// the upstream gallery protocol mirrors, served from the cache.
pub async fn get_latest(
    State(state): State<AppState>,
    Path((publisher, name)): Path<(String, String)>,
) -> Result<Response> {
    let uid = UniqueId::new(publisher, name);
    let mut extension = state.cache.find_by_unique_id(&uid).await?;
    rewrite::rewrite_extension(&mut extension, &state.external_url);
    let wire = crate::domain::wire::WireExtension::from_domain(&extension);
    let body = serde_json::to_vec(&wire)?;
    Ok((StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], body).into_response())
}

/// `POST /_apis/public/gallery/extensionquery`: translates the request into
/// a `Cache::run` call, rewrites every returned extension's asset URLs, and
/// wraps the result in the upstream envelope shape.
pub async fn post_extensionquery(
    State(state): State<AppState>,
    Json(query): Json<Query>,
) -> Result<Response> {
    let result = state.cache.run(&query).await.map_err(|e| {
        warn!("extensionquery failed: {e}");
        e
    })?;

    let extensions = result
        .extensions
        .into_iter()
        .map(|mut extension| {
            rewrite::rewrite_extension(&mut extension, &state.external_url);
            crate::domain::wire::WireExtension::from_domain(&extension)
        })
        .collect();

    let envelope = crate::domain::wire::MarketplaceResponse {
        results: vec![crate::domain::wire::ResultItem {
            extensions,
            paging_token: None,
            result_metadata: vec![crate::domain::wire::ResultMetadata {
                metadata_type: "ResultCount".to_string(),
                metadata_items: vec![crate::domain::wire::MetadataItem {
                    name: "TotalCount".to_string(),
                    count: result.total_count,
                }],
            }],
        }],
    };

    let body = serde_json::to_vec(&envelope)?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, EXTENSIONQUERY_CONTENT_TYPE)],
        body,
    )
        .into_response())
}
