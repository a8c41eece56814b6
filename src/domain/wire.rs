//! Upstream JSON wire shapes: the full extensionquery response plus the
//! single-extension "latest" response. Kept separate from the internal
//! `domain::model` types so the internal model stays free of upstream
//! quirks (string flags, string timestamps) — conversion happens once, at
//! the `upstream` boundary.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::model::{Asset, AssetType, Extension as DomainExtension, Property, Version as DomainVersion};
use crate::domain::UniqueId;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MarketplaceResponse {
    pub results: Vec<ResultItem>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResultItem {
    pub extensions: Vec<WireExtension>,
    #[serde(rename = "pagingToken")]
    pub paging_token: Option<String>,
    #[serde(rename = "resultMetadata")]
    pub result_metadata: Vec<ResultMetadata>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WireExtension {
    pub publisher: WirePublisher,
    #[serde(rename = "extensionId")]
    pub extension_id: String,
    #[serde(rename = "extensionName")]
    pub extension_name: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(default)]
    pub flags: String,
    #[serde(rename = "lastUpdated")]
    pub last_updated: DateTime<Utc>,
    #[serde(rename = "publishedDate")]
    pub published_date: DateTime<Utc>,
    #[serde(rename = "shortDescription", default)]
    pub short_description: String,
    #[serde(default)]
    pub versions: Vec<WireVersion>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(rename = "deploymentType", default)]
    pub deployment_type: i32,
    #[serde(default)]
    pub statistics: Vec<WireStatistic>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WirePublisher {
    #[serde(rename = "publisherId", default)]
    pub publisher_id: String,
    #[serde(rename = "publisherName")]
    pub publisher_name: String,
    #[serde(rename = "displayName", default)]
    pub display_name: String,
    #[serde(default)]
    pub flags: String,
    pub domain: Option<String>,
    #[serde(rename = "isDomainVerified", default)]
    pub is_domain_verified: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WireVersion {
    pub version: String,
    #[serde(default)]
    pub flags: String,
    #[serde(rename = "lastUpdated")]
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub files: Vec<WireFile>,
    pub properties: Option<Vec<WireProperty>>,
    #[serde(rename = "assetUri", default)]
    pub asset_uri: String,
    #[serde(rename = "fallbackAssetUri", default)]
    pub fallback_asset_uri: String,
    #[serde(rename = "targetPlatform")]
    pub target_platform: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WireFile {
    #[serde(rename = "assetType")]
    pub asset_type: String,
    pub source: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WireProperty {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WireStatistic {
    #[serde(rename = "statisticName")]
    pub statistic_name: String,
    pub value: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResultMetadata {
    #[serde(rename = "metadataType")]
    pub metadata_type: String,
    #[serde(rename = "metadataItems")]
    pub metadata_items: Vec<MetadataItem>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MetadataItem {
    pub name: String,
    pub count: i64,
}

/// Flags strings synthesized for re-serialization. The upstream protocol's
/// original flags are not retained by the internal model, so a fixed
/// validated/public stand-in is used — fine for a mirror, since editor
/// clients only gate on a handful of known flag tokens.
const SYNTHETIC_EXTENSION_FLAGS: &str = "validated, public";
const SYNTHETIC_VERSION_FLAGS: &str = "validated";

impl WireExtension {
    /// Builds the wire shape served back to editor clients from the
    /// internal model — the inverse of `into_domain`, used by the gallery
    /// server rather than the upstream client.
    pub fn from_domain(extension: &DomainExtension) -> Self {
        let statistics = extension
            .statistics
            .iter()
            .map(|(name, value)| WireStatistic {
                statistic_name: name.clone(),
                value: *value,
            })
            .collect();
        WireExtension {
            publisher: WirePublisher {
                publisher_id: String::new(),
                publisher_name: extension.uid.publisher.clone(),
                display_name: extension.publisher_display_name.clone(),
                flags: String::new(),
                domain: None,
                is_domain_verified: false,
            },
            extension_id: extension.extension_uuid.clone(),
            extension_name: extension.uid.name.clone(),
            display_name: extension.display_name.clone(),
            flags: SYNTHETIC_EXTENSION_FLAGS.to_string(),
            last_updated: extension.last_updated,
            published_date: extension.published_date,
            short_description: extension.short_description.clone(),
            versions: extension.versions.iter().map(WireVersion::from_domain).collect(),
            categories: extension.categories.clone(),
            tags: extension.tags.clone(),
            deployment_type: extension.deployment_type,
            statistics,
        }
    }

    pub fn into_domain(self) -> Option<DomainExtension> {
        let uid = UniqueId::new(self.publisher.publisher_name, self.extension_name);
        let statistics: HashMap<String, f64> = self
            .statistics
            .into_iter()
            .map(|s| (s.statistic_name, s.value))
            .collect();
        let versions = self
            .versions
            .into_iter()
            .map(WireVersion::into_domain)
            .collect();
        Some(DomainExtension {
            uid,
            extension_uuid: self.extension_id,
            display_name: self.display_name,
            publisher_display_name: self.publisher.display_name,
            short_description: self.short_description,
            categories: self.categories,
            tags: self.tags,
            deployment_type: self.deployment_type,
            statistics,
            published_date: self.published_date,
            last_updated: self.last_updated,
            versions,
        })
    }
}

impl WireVersion {
    pub fn from_domain(version: &DomainVersion) -> Self {
        let files = version
            .assets
            .iter()
            .map(|a| WireFile {
                asset_type: a.asset_type.wire_type().to_string(),
                source: a.source.clone(),
            })
            .collect();
        let properties = version
            .properties
            .iter()
            .map(|p| WireProperty {
                key: p.key.clone(),
                value: p.value.clone(),
            })
            .collect();
        WireVersion {
            version: version.version.clone(),
            flags: SYNTHETIC_VERSION_FLAGS.to_string(),
            last_updated: version.last_updated,
            files,
            properties: Some(properties),
            asset_uri: version.asset_uri.clone(),
            fallback_asset_uri: version.fallback_asset_uri.clone(),
            target_platform: version.target_platform.clone(),
        }
    }

    pub fn into_domain(self) -> DomainVersion {
        let properties = self
            .properties
            .unwrap_or_default()
            .into_iter()
            .map(|p| Property {
                key: p.key,
                value: p.value,
            })
            .collect();
        let assets = self
            .files
            .into_iter()
            .filter_map(|f| {
                AssetType::from_wire_type(&f.asset_type).map(|asset_type| Asset {
                    asset_type,
                    source: f.source,
                })
            })
            .collect();
        DomainVersion {
            version: self.version,
            target_platform: self.target_platform,
            last_updated: self.last_updated,
            properties,
            assets,
            asset_uri: self.asset_uri,
            fallback_asset_uri: self.fallback_asset_uri,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_domain_round_trips_assets_and_statistics() {
        use crate::domain::{Asset, Property, UniqueId};
        use std::collections::HashMap;

        let version = DomainVersion {
            version: "1.2.3".into(),
            target_platform: Some("linux-x64".into()),
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
        };
        let mut statistics = HashMap::new();
        statistics.insert("install".to_string(), 7.0);
        let extension = DomainExtension {
            uid: UniqueId::new("golang", "Go"),
            extension_uuid: "uuid-1".into(),
            display_name: "Go".into(),
            publisher_display_name: "Go Team".into(),
            short_description: "Rich Go language support".into(),
            categories: vec![],
            tags: vec![],
            deployment_type: 0,
            statistics,
            published_date: Utc::now(),
            last_updated: Utc::now(),
            versions: vec![version],
        };

        let wire = WireExtension::from_domain(&extension);
        assert_eq!(wire.publisher.publisher_name, "golang");
        assert_eq!(wire.versions[0].files[0].asset_type, AssetType::VsixPackage.wire_type());
        assert_eq!(wire.statistics[0].statistic_name, "install");

        let round_tripped = wire.into_domain().unwrap();
        assert_eq!(round_tripped.uid, extension.uid);
        assert_eq!(round_tripped.versions[0].assets.len(), 1);
    }

    #[test]
    fn parses_sample_response() {
        let json = r#"{
            "results": [
                {
                    "extensions": [
                        {
                            "publisher": {
                                "publisherId": "7c1c19cd-78eb-4dfb-8999-99caf7679002",
                                "publisherName": "golang",
                                "displayName": "Go Team at Google",
                                "flags": "verified",
                                "domain": null,
                                "isDomainVerified": false
                            },
                            "extensionId": "23c4aeee-f844-43cd-b53e-1113e483f1a6",
                            "extensionName": "Go",
                            "displayName": "Go",
                            "flags": "validated, public",
                            "lastUpdated": "2025-03-09T04:19:46.193Z",
                            "publishedDate": "2021-06-29T14:26:17.88Z",
                            "shortDescription": "Rich Go language support",
                            "versions": [
                                {
                                    "version": "0.40.0",
                                    "flags": "validated",
                                    "lastUpdated": "2025-03-09T04:19:46.193Z",
                                    "files": [
                                        {
                                            "assetType": "Microsoft.VisualStudio.Services.VSIXPackage",
                                            "source": "https://example.test/vsix"
                                        }
                                    ],
                                    "properties": [
                                        {"key": "Microsoft.VisualStudio.Code.PreRelease", "value": "false"}
                                    ],
                                    "assetUri": "https://example.test/assets",
                                    "fallbackAssetUri": "https://example.test/fallback",
                                    "targetPlatform": null
                                }
                            ],
                            "deploymentType": 0,
                            "statistics": [
                                {"statisticName": "install", "value": 42.0}
                            ]
                        }
                    ],
                    "pagingToken": null,
                    "resultMetadata": [
                        {"metadataType": "ResultCount", "metadataItems": [{"name": "TotalCount", "count": 1}]}
                    ]
                }
            ]
        }"#;

        let parsed: MarketplaceResponse = serde_json::from_str(json).unwrap();
        let ext = parsed.results[0].extensions[0].clone().into_domain().unwrap();
        assert_eq!(ext.uid.to_string(), "golang.Go");
        assert_eq!(ext.install_count(), 42.0);
        assert_eq!(ext.versions[0].assets.len(), 1);
        assert!(!ext.versions[0].is_pre_release());
    }
}
