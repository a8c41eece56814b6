//! Asset URL rewriting for the gallery façade: every asset source and
//! version asset URI served to editor clients is replaced with a local
//! `/asset/...` URL under the configured external URL, regardless of what
//! the backend or cache actually stored as `source`.

use crate::domain::{Extension, UniqueId, Version, UNIVERSAL_PLATFORM};

/// Rewrites every version's `asset_uri`/`fallback_asset_uri` and every
/// asset's `source` in place.
pub fn rewrite_extension(extension: &mut Extension, external_url: &str) {
    let uid = extension.uid.clone();
    for version in &mut extension.versions {
        rewrite_version(&uid, version, external_url);
    }
}

fn rewrite_version(uid: &UniqueId, version: &mut Version, external_url: &str) {
    let platform = version.target_platform.as_deref().unwrap_or(UNIVERSAL_PLATFORM);
    let base = asset_base_url(external_url, uid, &version.version, platform);
    for asset in &mut version.assets {
        asset.source = format!("{base}/{}", asset.asset_type.key_segment());
    }
    version.asset_uri = base.clone();
    version.fallback_asset_uri = base;
}

/// `<external-url>/asset/<publisher>/<name>/<version>/<platform>`, matching
/// the `/asset` route's own path segments exactly.
pub fn asset_base_url(external_url: &str, uid: &UniqueId, version: &str, platform: &str) -> String {
    format!(
        "{}/asset/{}/{}/{}/{}",
        external_url.trim_end_matches('/'),
        uid.publisher,
        uid.name,
        version,
        platform,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Asset, AssetType};

    #[test]
    fn rewrites_asset_source_and_version_uris() {
        let uid = UniqueId::new("golang", "Go");
        let mut extension = Extension {
            uid: uid.clone(),
            extension_uuid: "uuid-1".into(),
            display_name: String::new(),
            publisher_display_name: String::new(),
            short_description: String::new(),
            categories: vec![],
            tags: vec![],
            deployment_type: 0,
            statistics: Default::default(),
            published_date: chrono::Utc::now(),
            last_updated: chrono::Utc::now(),
            versions: vec![Version {
                version: "0.40.0".into(),
                target_platform: Some("linux-x64".into()),
                last_updated: chrono::Utc::now(),
                properties: vec![],
                assets: vec![Asset {
                    asset_type: AssetType::VsixPackage,
                    source: "https://upstream.test/vsix".into(),
                }],
                asset_uri: "https://upstream.test/assets".into(),
                fallback_asset_uri: "https://upstream.test/fallback".into(),
            }],
        };

        rewrite_extension(&mut extension, "http://127.0.0.1:7777");

        let version = &extension.versions[0];
        assert_eq!(version.asset_uri, "http://127.0.0.1:7777/asset/golang/Go/0.40.0/linux-x64");
        assert_eq!(version.fallback_asset_uri, version.asset_uri);
        assert_eq!(
            version.assets[0].source,
            "http://127.0.0.1:7777/asset/golang/Go/0.40.0/linux-x64/VSIXPackage"
        );
    }

    #[test]
    fn universal_platform_defaults_when_target_platform_absent() {
        let uid = UniqueId::new("redhat", "java");
        let base = asset_base_url("http://mirror.local/", &uid, "1.0.0", UNIVERSAL_PLATFORM);
        assert_eq!(base, "http://mirror.local/asset/redhat/java/1.0.0/universal");
    }
}
