//! Picking the newest image tag a client version can safely use

use crate::registry::TagSource;
use crate::{CoreError, Result};
use semver::{Prerelease, Version};
use std::cmp::Ordering;
use tracing::debug;

/// Outcome of a compatibility lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibleTag {
    /// Tag to install, `v`-prefixed, or `latest` for development builds
    pub tag: String,
    /// A newer release exists beyond the compatibility boundary
    pub has_breaking_newer: bool,
}

/// A parsed tag together with the string it came from
#[derive(Debug, Clone)]
pub struct VersionTag {
    pub version: Version,
    pub original: String,
}

impl VersionTag {
    pub fn parse(tag: &str) -> Result<Self> {
        Ok(Self {
            version: parse_tolerant(tag)?,
            original: tag.to_string(),
        })
    }
}

/// Parse a version leniently.
///
/// Surrounding whitespace and a leading `v` are ignored, a missing minor or
/// patch number counts as 0 and leading zeros are dropped, so `v1.2` reads
/// as `1.2.0` and `01.02.03` as `1.2.3`.
pub fn parse_tolerant(input: &str) -> Result<Version> {
    let trimmed = input.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    let split = trimmed
        .find(|c: char| c == '-' || c == '+')
        .unwrap_or(trimmed.len());
    let (core, suffix) = trimmed.split_at(split);

    let mut parts: Vec<&str> = core
        .split('.')
        .map(|part| {
            let stripped = part.trim_start_matches('0');
            if stripped.is_empty() && !part.is_empty() {
                "0"
            } else {
                stripped
            }
        })
        .collect();
    if parts.len() > 3 {
        return Err(CoreError::InvalidVersion(input.to_string()));
    }
    while parts.len() < 3 {
        parts.push("0");
    }

    Version::parse(&format!("{}{}", parts.join("."), suffix))
        .map_err(|e| CoreError::InvalidVersion(format!("{}: {}", input, e)))
}

fn precedence(v: &Version) -> (u64, u64, u64, &Prerelease) {
    (v.major, v.minor, v.patch, &v.pre)
}

/// Compare by semver precedence, ignoring build metadata
pub fn compare(a: &Version, b: &Version) -> Ordering {
    precedence(a).cmp(&precedence(b))
}

/// Lowest version considered breaking for `current`.
///
/// From 1.0 on a major bump breaks; on 0.x lines a minor bump does.
pub fn boundary(current: &Version) -> Version {
    if current.major >= 1 {
        Version::new(current.major + 1, 0, 0)
    } else {
        Version::new(0, current.minor + 1, 0)
    }
}

/// Newest stable tag in `[current, boundary(current))`, and whether any
/// stable tag lies at or past the boundary
pub fn compatible_stable(tags: &[String], current: &Version) -> (Option<Version>, bool) {
    let breaking = boundary(current);
    let mut newest: Option<Version> = None;
    let mut has_breaking_newer = false;

    for tag in tags {
        let Ok(v) = parse_tolerant(tag) else {
            continue;
        };
        if !v.pre.is_empty() {
            continue;
        }
        if compare(&v, current) == Ordering::Less {
            continue;
        }
        if compare(&v, &breaking) != Ordering::Less {
            has_breaking_newer = true;
            continue;
        }
        if newest
            .as_ref()
            .map_or(true, |n| compare(&v, n) == Ordering::Greater)
        {
            newest = Some(v);
        }
    }

    (newest, has_breaking_newer)
}

/// Pre-release clients only ever get their exact version; anything newer is
/// reported as breaking
pub fn compatible_prerelease(tags: &[String], current: &Version) -> (Option<Version>, bool) {
    let mut selected = None;
    let mut has_breaking_newer = false;

    for tag in tags {
        let Ok(v) = parse_tolerant(tag) else {
            continue;
        };
        match compare(&v, current) {
            Ordering::Equal => selected = Some(current.clone()),
            Ordering::Greater => has_breaking_newer = true,
            Ordering::Less => {}
        }
    }

    (selected, has_breaking_newer)
}

/// Resolve the tag of `image` to install for a client at version `current`.
///
/// Development builds (empty version or `dev`) always get `latest` and no
/// registry request is made.
pub async fn resolve_compatible_tag(
    source: &dyn TagSource,
    image: &str,
    current: &str,
) -> Result<CompatibleTag> {
    if current.is_empty() || current == "dev" {
        return Ok(CompatibleTag {
            tag: "latest".to_string(),
            has_breaking_newer: false,
        });
    }

    let client = parse_tolerant(current)?;
    let tags = source.fetch_tags(image).await?;
    debug!("Registry lists {} tags for {}", tags.len(), image);

    let (newest, has_breaking_newer) = if client.pre.is_empty() {
        compatible_stable(&tags, &client)
    } else {
        compatible_prerelease(&tags, &client)
    };

    let newest = newest.ok_or_else(|| CoreError::NoCompatibleTag(image.to_string()))?;
    Ok(CompatibleTag {
        tag: format!("v{}", newest),
        has_breaking_newer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    struct StaticTags {
        tags: Vec<String>,
        fetches: AtomicUsize,
    }

    impl StaticTags {
        fn new(tags: &[&str]) -> Self {
            Self {
                tags: tags.iter().map(|t| t.to_string()).collect(),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TagSource for StaticTags {
        async fn fetch_tags(&self, _image: &str) -> Result<Vec<String>> {
            self.fetches.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(self.tags.clone())
        }
    }

    async fn resolve(tags: &[&str], current: &str) -> Result<CompatibleTag> {
        resolve_compatible_tag(&StaticTags::new(tags), "srcd/gitbase", current).await
    }

    #[test]
    fn test_parse_tolerant() {
        assert_eq!(parse_tolerant("v1.2.3").unwrap(), Version::new(1, 2, 3));
        assert_eq!(parse_tolerant(" 1.2 ").unwrap(), Version::new(1, 2, 0));
        assert_eq!(parse_tolerant("V2").unwrap(), Version::new(2, 0, 0));
        assert_eq!(parse_tolerant("01.02.03").unwrap(), Version::new(1, 2, 3));
        assert_eq!(parse_tolerant("v0.10.0").unwrap(), Version::new(0, 10, 0));

        let pre = parse_tolerant("v1.0-beta.1").unwrap();
        assert_eq!(pre.to_string(), "1.0.0-beta.1");

        assert!(parse_tolerant("latest").is_err());
        assert!(parse_tolerant("").is_err());
        assert!(parse_tolerant("1.2.3.4").is_err());
    }

    #[test]
    fn test_boundary() {
        assert_eq!(boundary(&Version::new(1, 2, 0)), Version::new(2, 0, 0));
        assert_eq!(boundary(&Version::new(0, 5, 3)), Version::new(0, 6, 0));
    }

    #[test]
    fn test_build_metadata_ignored() {
        let a = Version::parse("1.2.3+linux").unwrap();
        let b = Version::parse("1.2.3").unwrap();
        assert_eq!(compare(&a, &b), Ordering::Equal);
    }

    #[tokio::test]
    async fn test_stable_client_picks_newest_in_major() {
        let result = resolve(&["v1.2.1", "v1.3.0", "v2.0.0"], "1.2.0").await.unwrap();
        assert_eq!(result.tag, "v1.3.0");
        assert!(result.has_breaking_newer);
    }

    #[tokio::test]
    async fn test_zero_major_treats_minor_as_breaking() {
        let result = resolve(&["v0.5.1", "v0.6.0"], "v0.5.0").await.unwrap();
        assert_eq!(result.tag, "v0.5.1");
        assert!(result.has_breaking_newer);
    }

    #[tokio::test]
    async fn test_prerelease_client_gets_exact_match() {
        let result = resolve(&["v1.0.0-beta.1", "v1.0.0"], "1.0.0-beta.1")
            .await
            .unwrap();
        assert_eq!(result.tag, "v1.0.0-beta.1");
        assert!(result.has_breaking_newer);
    }

    #[tokio::test]
    async fn test_stable_client_skips_old_prerelease_and_junk_tags() {
        let result = resolve(
            &["latest", "v1.1.9", "v1.2.0", "v1.4.0-rc.1", "nightly", "v1.2.5"],
            "v1.2.0",
        )
        .await
        .unwrap();
        assert_eq!(result.tag, "v1.2.5");
        assert!(!result.has_breaking_newer);
    }

    #[tokio::test]
    async fn test_no_compatible_tag() {
        let err = resolve(&["v1.0.0", "v3.0.0"], "2.0.0").await.unwrap_err();
        assert!(matches!(err, CoreError::NoCompatibleTag(ref image) if image == "srcd/gitbase"));

        let err = resolve(&["v1.0.0"], "1.0.0-rc.1").await.unwrap_err();
        assert!(matches!(err, CoreError::NoCompatibleTag(_)));
    }

    #[tokio::test]
    async fn test_dev_builds_use_latest_without_fetching() {
        let source = StaticTags::new(&["v1.0.0"]);
        for current in ["", "dev"] {
            let result = resolve_compatible_tag(&source, "srcd/gitbase", current)
                .await
                .unwrap();
            assert_eq!(
                result,
                CompatibleTag {
                    tag: "latest".to_string(),
                    has_breaking_newer: false,
                }
            );
        }
        assert_eq!(source.fetches.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_client_version() {
        let err = resolve(&["v1.0.0"], "not-a-version").await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidVersion(_)));
    }
}
