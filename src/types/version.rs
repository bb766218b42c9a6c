// ABOUTME: Permissive semantic version parsing and comparison.
// ABOUTME: Non-SemVer versions compare as Unknown instead of blocking operations.

use std::fmt;

/// A parsed `major.minor.patch` version. Pre-release and build suffixes
/// (`-rc1`, `+build5`) are accepted on the patch component and ignored for
/// ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// How a target version relates to the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionRelation {
    /// Target is strictly newer.
    Upgrade,
    /// Target equals current.
    Same,
    /// Target is strictly older.
    Downgrade,
    /// Either side is not valid SemVer; comparison is skipped.
    /// Catalogs are allowed to use non-SemVer version strings, so this is
    /// treated as permissive rather than an error.
    Unknown,
}

/// Parse a `major.minor.patch` string. Returns `None` for anything that
/// doesn't match, including missing components and empty numerics.
pub fn parse_semver(value: &str) -> Option<SemVer> {
    let value = value.trim();
    // Strip pre-release / build metadata from the tail before splitting.
    let core = value
        .split_once(['-', '+'])
        .map(|(head, _)| head)
        .unwrap_or(value);

    let mut parts = core.split('.');
    let major = parse_component(parts.next()?)?;
    let minor = parse_component(parts.next()?)?;
    let patch = parse_component(parts.next()?)?;
    if parts.next().is_some() {
        return None;
    }

    Some(SemVer {
        major,
        minor,
        patch,
    })
}

fn parse_component(s: &str) -> Option<u64> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Compare two version strings. Yields `Unknown` unless both sides parse.
pub fn compare(current: &str, target: &str) -> VersionRelation {
    match (parse_semver(current), parse_semver(target)) {
        (Some(cur), Some(tgt)) => {
            if tgt > cur {
                VersionRelation::Upgrade
            } else if tgt == cur {
                VersionRelation::Same
            } else {
                VersionRelation::Downgrade
            }
        }
        _ => VersionRelation::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_versions() {
        assert_eq!(
            parse_semver("2.10.3"),
            Some(SemVer {
                major: 2,
                minor: 10,
                patch: 3
            })
        );
    }

    #[test]
    fn parses_prerelease_and_build_suffixes() {
        assert_eq!(parse_semver("1.2.3-rc1").map(|v| v.patch), Some(3));
        assert_eq!(parse_semver("1.2.3+build5").map(|v| v.major), Some(1));
    }

    #[test]
    fn rejects_malformed_versions() {
        assert_eq!(parse_semver("1.2"), None);
        assert_eq!(parse_semver("1.2.3.4"), None);
        assert_eq!(parse_semver("abc"), None);
        assert_eq!(parse_semver("1.x.3"), None);
        assert_eq!(parse_semver(""), None);
    }

    #[test]
    fn compares_by_numeric_components() {
        assert_eq!(compare("2.0.0", "2.1.0"), VersionRelation::Upgrade);
        assert_eq!(compare("2.0.0", "2.0.0"), VersionRelation::Same);
        assert_eq!(compare("2.0.0", "1.9.9"), VersionRelation::Downgrade);
        // 10 > 9 numerically, not lexically
        assert_eq!(compare("1.9.0", "1.10.0"), VersionRelation::Upgrade);
    }

    #[test]
    fn non_semver_compares_as_unknown() {
        assert_eq!(compare("2.0.0", "abc"), VersionRelation::Unknown);
        assert_eq!(compare("latest", "2.0.0"), VersionRelation::Unknown);
    }
}
