use crate::domain::UniqueId;
use crate::error::MirrorError;
use std::fmt;
use std::str::FromStr;

/// Sentinel platform string used only at serialization boundaries (cache
/// column, wire protocol) for a Version with no explicit target platform.
pub const UNIVERSAL_PLATFORM: &str = "universal";

/// uniqueID + version + target platform + pre-release flag.
///
/// The pre-release flag is deliberately excluded from `Display`/`FromStr`
/// and from equality: the canonical string form is `uid@version:platform`,
/// and a VersionTag uniquely identifies at most one Version by that triple
/// alone (see the store invariant). `ListVersionTags` on the backend can
/// only recover uid/version/platform from a directory walk, never the
/// pre-release flag — callers that need it look it up from cached/loaded
/// metadata.
#[derive(Debug, Clone)]
pub struct VersionTag {
    pub uid: UniqueId,
    pub version: Option<String>,
    pub platform: Option<String>,
    pub pre_release: bool,
}

impl VersionTag {
    pub fn new(uid: UniqueId, version: Option<String>, platform: Option<String>) -> Self {
        Self {
            uid,
            version,
            platform,
            pre_release: false,
        }
    }

    pub fn with_pre_release(mut self, pre_release: bool) -> Self {
        self.pre_release = pre_release;
        self
    }

    /// Platform as it appears in the backend key layout / cache column,
    /// substituting the universal sentinel when unset.
    pub fn platform_or_universal(&self) -> &str {
        self.platform.as_deref().unwrap_or(UNIVERSAL_PLATFORM)
    }
}

impl PartialEq for VersionTag {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid && self.version == other.version && self.platform == other.platform
    }
}
impl Eq for VersionTag {}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uid)?;
        if let Some(version) = &self.version {
            write!(f, "@{}", version)?;
            if let Some(platform) = &self.platform {
                write!(f, ":{}", platform)?;
            }
        }
        Ok(())
    }
}

impl FromStr for VersionTag {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('@') {
            None => {
                // Bare uid is valid; `uid:platform` with no version is not.
                if s.contains(':') {
                    return Err(MirrorError::InvalidVersionTag(s.to_string()));
                }
                let uid: UniqueId = s.parse().map_err(|_| invalid(s))?;
                Ok(Self::new(uid, None, None))
            }
            Some((uid_part, rest)) => {
                if rest.is_empty() {
                    return Err(invalid(s));
                }
                let uid: UniqueId = uid_part.parse().map_err(|_| invalid(s))?;
                match rest.split_once(':') {
                    None => Ok(Self::new(uid, Some(rest.to_string()), None)),
                    Some((version, platform)) => {
                        if version.is_empty() || platform.is_empty() {
                            return Err(invalid(s));
                        }
                        Ok(Self::new(uid, Some(version.to_string()), Some(platform.to_string())))
                    }
                }
            }
        }
    }
}

fn invalid(s: &str) -> MirrorError {
    MirrorError::InvalidVersionTag(s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_uid_is_valid() {
        let tag: VersionTag = "golang.Go".parse().unwrap();
        assert_eq!(tag.version, None);
        assert_eq!(tag.platform, None);
        assert_eq!(tag.to_string(), "golang.Go");
    }

    #[test]
    fn uid_and_version_is_valid() {
        let tag: VersionTag = "golang.Go@0.40.0".parse().unwrap();
        assert_eq!(tag.version.as_deref(), Some("0.40.0"));
        assert_eq!(tag.platform, None);
    }

    #[test]
    fn uid_version_platform_is_valid() {
        let tag: VersionTag = "golang.Go@0.40.0:linux-x64".parse().unwrap();
        assert_eq!(tag.version.as_deref(), Some("0.40.0"));
        assert_eq!(tag.platform.as_deref(), Some("linux-x64"));
    }

    #[test]
    fn uid_colon_platform_without_version_is_invalid() {
        assert!("golang.Go:linux-x64".parse::<VersionTag>().is_err());
    }

    #[test]
    fn empty_right_hand_side_is_invalid() {
        assert!("golang.Go@".parse::<VersionTag>().is_err());
        assert!("golang.Go@0.40.0:".parse::<VersionTag>().is_err());
    }

    #[test]
    fn round_trips_through_display_and_parse() {
        let tag = VersionTag::new(
            UniqueId::new("golang", "Go"),
            Some("0.40.0".to_string()),
            Some("linux-x64".to_string()),
        );
        let parsed: VersionTag = tag.to_string().parse().unwrap();
        assert_eq!(tag, parsed);

        let bare = VersionTag::new(UniqueId::new("golang", "Go"), None, None);
        let parsed_bare: VersionTag = bare.to_string().parse().unwrap();
        assert_eq!(bare, parsed_bare);
    }
}
