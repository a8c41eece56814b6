use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::UniqueId;
use crate::error::MirrorError;

/// Well-known version properties, named exactly as the upstream protocol
/// names them.
pub const PROP_PRE_RELEASE: &str = "Microsoft.VisualStudio.Code.PreRelease";
pub const PROP_EXTENSION_PACK: &str = "Microsoft.VisualStudio.Code.ExtensionPack";

/// Statistic keys pulled out into dedicated cache columns.
pub const STAT_INSTALL: &str = "install";
pub const STAT_AVERAGE_RATING: &str = "averagerating";
pub const STAT_WEIGHTED_RATING: &str = "weightedRating";
pub const STAT_RATING_COUNT: &str = "ratingcount";

/// The fixed set of asset kinds a Version can carry. The variant name is
/// also the filename/key-path segment under the backend (see
/// `backend::key_layout`); `wire_type` is the longer string the upstream
/// protocol uses in a version's `files[].assetType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AssetType {
    Manifest,
    #[serde(rename = "Content.Changelog")]
    ContentChangelog,
    #[serde(rename = "Content.Details")]
    ContentDetails,
    #[serde(rename = "Content.License")]
    ContentLicense,
    #[serde(rename = "Icons.Default")]
    IconsDefault,
    #[serde(rename = "Icons.Small")]
    IconsSmall,
    VsixManifest,
    #[serde(rename = "VSIXPackage")]
    VsixPackage,
    VsixSignature,
}

impl AssetType {
    pub const ALL: [AssetType; 9] = [
        AssetType::Manifest,
        AssetType::ContentChangelog,
        AssetType::ContentDetails,
        AssetType::ContentLicense,
        AssetType::IconsDefault,
        AssetType::IconsSmall,
        AssetType::VsixManifest,
        AssetType::VsixPackage,
        AssetType::VsixSignature,
    ];

    /// The filename used under the backend's key layout. Reserved names
    /// (`_ext_metadata.json`, `_ver_metadata.json`) must never collide with
    /// any of these.
    pub fn key_segment(&self) -> &'static str {
        match self {
            AssetType::Manifest => "Manifest",
            AssetType::ContentChangelog => "Content.Changelog",
            AssetType::ContentDetails => "Content.Details",
            AssetType::ContentLicense => "Content.License",
            AssetType::IconsDefault => "Icons.Default",
            AssetType::IconsSmall => "Icons.Small",
            AssetType::VsixManifest => "VsixManifest",
            AssetType::VsixPackage => "VSIXPackage",
            AssetType::VsixSignature => "VsixSignature",
        }
    }

    /// The `assetType` string the real upstream marketplace protocol uses.
    pub fn wire_type(&self) -> &'static str {
        match self {
            AssetType::Manifest => "Microsoft.VisualStudio.Code.Manifest",
            AssetType::ContentChangelog => "Microsoft.VisualStudio.Services.Content.Changelog",
            AssetType::ContentDetails => "Microsoft.VisualStudio.Services.Content.Details",
            AssetType::ContentLicense => "Microsoft.VisualStudio.Services.Content.License",
            AssetType::IconsDefault => "Microsoft.VisualStudio.Services.Icons.Default",
            AssetType::IconsSmall => "Microsoft.VisualStudio.Services.Icons.Small",
            AssetType::VsixManifest => "Microsoft.VisualStudio.Services.VsixManifest",
            AssetType::VsixPackage => "Microsoft.VisualStudio.Services.VSIXPackage",
            AssetType::VsixSignature => "Microsoft.VisualStudio.Services.VsixSignature",
        }
    }

    pub fn from_wire_type(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.wire_type() == s)
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key_segment())
    }
}

impl FromStr for AssetType {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.key_segment() == s)
            .ok_or_else(|| MirrorError::InvalidQuery(format!("unknown asset type {s}")))
    }
}

/// A typed file reference belonging to one Version.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Asset {
    pub asset_type: AssetType,
    pub source: String,
}

/// A key/value property attached to a Version.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Property {
    pub key: String,
    pub value: String,
}

/// Version information for an extension.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Version {
    pub version: String,
    pub target_platform: Option<String>,
    pub last_updated: DateTime<Utc>,
    pub properties: Vec<Property>,
    pub assets: Vec<Asset>,
    pub asset_uri: String,
    pub fallback_asset_uri: String,
}

impl Version {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }

    /// `Microsoft.VisualStudio.Code.PreRelease` value, case-insensitively
    /// compared to `"true"`; absent means stable.
    pub fn is_pre_release(&self) -> bool {
        self.property(PROP_PRE_RELEASE)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// UniqueIDs referenced by `Microsoft.VisualStudio.Code.ExtensionPack`,
    /// parsed from its comma-separated value. Invalid entries are skipped
    /// rather than failing the whole version.
    pub fn extension_pack(&self) -> Vec<UniqueId> {
        self.property(PROP_EXTENSION_PACK)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .filter_map(|s| s.parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_extension_pack(&self) -> bool {
        !self.extension_pack().is_empty()
    }

    pub fn asset(&self, asset_type: AssetType) -> Option<&Asset> {
        self.assets.iter().find(|a| a.asset_type == asset_type)
    }
}

impl PartialEq for Asset {
    fn eq(&self, other: &Self) -> bool {
        self.asset_type == other.asset_type
    }
}

/// The metadata record for an extension. `versions` may be empty in the
/// stored form — versions are persisted separately under their own keys.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Extension {
    pub uid: UniqueId,
    /// Upstream's own UUID for this extension (`extensionId` on the wire).
    /// Matched literally by the `ExtensionID` query criterion.
    pub extension_uuid: String,
    pub display_name: String,
    pub publisher_display_name: String,
    pub short_description: String,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub deployment_type: i32,
    pub statistics: HashMap<String, f64>,
    pub published_date: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub versions: Vec<Version>,
}

impl Extension {
    pub fn statistic(&self, key: &str) -> f64 {
        self.statistics.get(key).copied().unwrap_or(0.0)
    }

    pub fn install_count(&self) -> f64 {
        self.statistic(STAT_INSTALL)
    }

    pub fn weighted_rating(&self) -> f64 {
        self.statistic(STAT_WEIGHTED_RATING)
    }

    /// Returns a copy with `versions` emptied, matching
    /// `SaveExtensionMetadata`'s contract (versions live under their own
    /// backend keys).
    pub fn without_versions(&self) -> Extension {
        Extension {
            versions: Vec::new(),
            ..self.clone()
        }
    }

    /// Semver-maximum version whose pre-release flag is false; `None` if
    /// every version is pre-release or the list is empty.
    pub fn latest_stable(&self) -> Option<&Version> {
        latest_matching(&self.versions, false)
    }

    /// Semver-maximum among all versions, pre-release included.
    pub fn latest_any(&self) -> Option<&Version> {
        latest_matching(&self.versions, true)
    }
}

fn latest_matching(versions: &[Version], allow_pre_release: bool) -> Option<&Version> {
    versions
        .iter()
        .filter(|v| allow_pre_release || !v.is_pre_release())
        .max_by(|a, b| compare_version_strings(&a.version, &b.version))
}

/// The standard semver comparator, tolerant of the informal `"v1.2.3"`
/// prefix some upstream payloads use, falling back to a lexical compare
/// when a side doesn't parse as semver at all.
pub fn compare_version_strings(a: &str, b: &str) -> std::cmp::Ordering {
    match (parse_lenient_semver(a), parse_lenient_semver(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

fn parse_lenient_semver(v: &str) -> Option<semver::Version> {
    let trimmed = v.strip_prefix('v').unwrap_or(v);
    semver::Version::parse(trimmed).ok().or_else(|| {
        // Tolerate bare `major.minor` / `major` forms by padding with zeros,
        // since upstream version strings aren't always full semver.
        let mut parts: Vec<&str> = trimmed.split('.').collect();
        while parts.len() < 3 {
            parts.push("0");
        }
        semver::Version::parse(&parts.join(".")).ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_type_round_trips_through_key_segment() {
        for a in AssetType::ALL {
            let parsed: AssetType = a.key_segment().parse().unwrap();
            assert_eq!(a, parsed);
        }
    }

    #[test]
    fn pre_release_flag_is_case_insensitive() {
        let v = Version {
            version: "1.0.0".into(),
            target_platform: None,
            last_updated: Utc::now(),
            properties: vec![Property {
                key: PROP_PRE_RELEASE.into(),
                value: "True".into(),
            }],
            assets: vec![],
            asset_uri: String::new(),
            fallback_asset_uri: String::new(),
        };
        assert!(v.is_pre_release());
    }

    #[test]
    fn extension_pack_parses_comma_separated_uids() {
        let v = Version {
            version: "1.0.0".into(),
            target_platform: None,
            last_updated: Utc::now(),
            properties: vec![Property {
                key: PROP_EXTENSION_PACK.into(),
                value: "foo.bar, baz.qux".into(),
            }],
            assets: vec![],
            asset_uri: String::new(),
            fallback_asset_uri: String::new(),
        };
        let pack = v.extension_pack();
        assert_eq!(pack.len(), 2);
        assert_eq!(pack[0].to_string(), "foo.bar");
        assert_eq!(pack[1].to_string(), "baz.qux");
    }

    #[test]
    fn compare_version_strings_orders_semver() {
        assert_eq!(
            compare_version_strings("1.2.0", "1.10.0"),
            std::cmp::Ordering::Less
        );
        assert_eq!(
            compare_version_strings("2.0.0", "1.99.0"),
            std::cmp::Ordering::Greater
        );
    }

    #[test]
    fn latest_stable_skips_pre_release() {
        let mk = |version: &str, pre: bool| Version {
            version: version.into(),
            target_platform: None,
            last_updated: Utc::now(),
            properties: if pre {
                vec![Property {
                    key: PROP_PRE_RELEASE.into(),
                    value: "true".into(),
                }]
            } else {
                vec![]
            },
            assets: vec![],
            asset_uri: String::new(),
            fallback_asset_uri: String::new(),
        };
        let ext = Extension {
            uid: UniqueId::new("p", "n"),
            extension_uuid: "uuid-p-n".into(),
            display_name: String::new(),
            publisher_display_name: String::new(),
            short_description: String::new(),
            categories: vec![],
            tags: vec![],
            deployment_type: 0,
            statistics: HashMap::new(),
            published_date: Utc::now(),
            last_updated: Utc::now(),
            versions: vec![mk("2.0.0", true), mk("1.9.0", false)],
        };
        assert_eq!(ext.latest_stable().unwrap().version, "1.9.0");
        assert_eq!(ext.latest_any().unwrap().version, "2.0.0");
    }
}
