use async_trait::async_trait;
use log::{debug, error};

use crate::config::{MARKETPLACE_API_VERSION, USER_AGENT};
use crate::domain::query::Query;
use crate::domain::wire::MarketplaceResponse;
use crate::domain::{AssetType, Extension, UniqueId, Version};
use crate::error::{MirrorError, Result};

use super::UpstreamClient;

/// Talks the real marketplace over HTTPS, issuing both the full
/// extensionquery protocol and the alternate single-extension "latest"
/// endpoint.
pub struct HttpUpstreamClient {
    client: reqwest::Client,
    query_url: String,
    gallery_host: String,
}

impl HttpUpstreamClient {
    pub fn new(query_url: impl Into<String>, gallery_host: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder().gzip(true).build()?;
        Ok(Self {
            client,
            query_url: query_url.into(),
            gallery_host: gallery_host.into(),
        })
    }

    async fn post_query(&self, query: &Query) -> Result<MarketplaceResponse> {
        debug!("posting query to {}", self.query_url);
        let resp = self
            .client
            .post(&self.query_url)
            .header("Content-Type", "application/json")
            .header(
                "Accept",
                format!("application/json;api-version={}", MARKETPLACE_API_VERSION),
            )
            .header("User-Agent", USER_AGENT)
            .json(query)
            .send()
            .await?;
        if !resp.status().is_success() {
            error!("extensionquery failed with status {}", resp.status());
            return Err(MirrorError::Upstream(format!(
                "extensionquery returned {}",
                resp.status()
            )));
        }
        let body = resp.text().await?;
        if std::env::var("RUST_LOG").is_ok_and(|v| v == "debug") {
            debug!("extensionquery response: {body}");
        }
        serde_json::from_str(&body).map_err(MirrorError::from)
    }
}

/// `<version.assetUri>/<assetType>`, with `?targetPlatform=<platform>`
/// appended unless the platform is universal.
fn asset_download_url(version: &Version, asset_type: AssetType) -> String {
    let base = format!("{}/{}", version.asset_uri, asset_type.wire_type());
    match version.target_platform.as_deref() {
        Some(platform) if platform != crate::domain::UNIVERSAL_PLATFORM => {
            format!("{base}?targetPlatform={platform}")
        }
        _ => base,
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn query(&self, query: &Query) -> Result<(Vec<Extension>, i64)> {
        let response = self.post_query(query).await?;
        let Some(result) = response.results.into_iter().next() else {
            return Ok((vec![], 0));
        };
        let total_count = result
            .result_metadata
            .iter()
            .find(|m| m.metadata_type == "ResultCount")
            .and_then(|m| m.metadata_items.iter().find(|i| i.name == "TotalCount"))
            .map(|i| i.count)
            .unwrap_or(result.extensions.len() as i64);
        let extensions = result
            .extensions
            .into_iter()
            .filter_map(|e| e.into_domain())
            .collect();
        Ok((extensions, total_count))
    }

    async fn fetch_for_acquisition(&self, uid: &UniqueId) -> Result<Extension> {
        let query = Query::all_versions_by_unique_id(&uid.to_string());
        let response = self.post_query(&query).await?;
        let result = response
            .results
            .into_iter()
            .next()
            .ok_or(MirrorError::ExtensionNotFound)?;
        let wire_extension = result
            .extensions
            .into_iter()
            .next()
            .ok_or(MirrorError::ExtensionNotFound)?;
        if wire_extension.versions.is_empty() {
            return Err(MirrorError::ExtensionHasNoVersions);
        }
        wire_extension.into_domain().ok_or(MirrorError::ExtensionNotFound)
    }

    async fn fetch_latest_endpoint(&self, uid: &UniqueId) -> Result<Extension> {
        let url = format!(
            "https://{}/_gallery/{}/{}/latest",
            self.gallery_host, uid.publisher, uid.name
        );
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(MirrorError::Upstream(format!(
                "latest endpoint returned {}",
                resp.status()
            )));
        }
        let wire_extension: crate::domain::wire::WireExtension = resp.json().await?;
        wire_extension.into_domain().ok_or(MirrorError::ExtensionNotFound)
    }

    async fn download_asset(
        &self,
        version: &Version,
        asset_type: AssetType,
    ) -> Result<(Vec<u8>, Option<String>)> {
        let url = asset_download_url(version, asset_type);
        debug!("downloading asset {asset_type} from {url}");
        let resp = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT_ENCODING, "gzip")
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(MirrorError::Upstream(format!(
                "asset download {url} returned {}",
                resp.status()
            )));
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
        let bytes = resp.bytes().await?.to_vec();
        Ok((bytes, content_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UniqueId;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetch_for_acquisition_rejects_empty_extensions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_apis/public/gallery/extensionquery"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{"extensions": [], "resultMetadata": []}]
            })))
            .mount(&server)
            .await;

        let client = HttpUpstreamClient::new(
            format!("{}/_apis/public/gallery/extensionquery", server.uri()),
            "example.test",
        )
        .unwrap();

        let err = client
            .fetch_for_acquisition(&UniqueId::new("golang", "Go"))
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::ExtensionNotFound));
    }

    #[tokio::test]
    async fn fetch_for_acquisition_rejects_no_versions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_apis/public/gallery/extensionquery"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{
                    "extensions": [{
                        "publisher": {"publisherName": "golang", "displayName": "Go Team", "flags": "", "domain": null, "isDomainVerified": false},
                        "extensionId": "uuid-1",
                        "extensionName": "Go",
                        "displayName": "Go",
                        "flags": "",
                        "lastUpdated": "2025-03-09T04:19:46.193Z",
                        "publishedDate": "2021-06-29T14:26:17.88Z",
                        "shortDescription": "",
                        "versions": [],
                        "deploymentType": 0,
                        "statistics": []
                    }],
                    "resultMetadata": []
                }]
            })))
            .mount(&server)
            .await;

        let client = HttpUpstreamClient::new(
            format!("{}/_apis/public/gallery/extensionquery", server.uri()),
            "example.test",
        )
        .unwrap();

        let err = client
            .fetch_for_acquisition(&UniqueId::new("golang", "Go"))
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::ExtensionHasNoVersions));
    }

    #[test]
    fn asset_download_url_appends_target_platform_except_universal() {
        let version = Version {
            version: "1.0.0".into(),
            target_platform: Some("linux-x64".into()),
            last_updated: chrono::Utc::now(),
            properties: vec![],
            assets: vec![],
            asset_uri: "https://example.test/assets".into(),
            fallback_asset_uri: "https://example.test/fallback".into(),
        };
        let url = asset_download_url(&version, AssetType::VsixPackage);
        assert_eq!(
            url,
            "https://example.test/assets/Microsoft.VisualStudio.Services.VSIXPackage?targetPlatform=linux-x64"
        );

        let universal = Version {
            target_platform: None,
            ..version
        };
        let url = asset_download_url(&universal, AssetType::VsixPackage);
        assert_eq!(
            url,
            "https://example.test/assets/Microsoft.VisualStudio.Services.VSIXPackage"
        );
    }
}
