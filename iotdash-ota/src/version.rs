//! Dotted firmware version comparison.
//!
//! Versions are compared component by component. Components that are missing,
//! empty or not a plain non-negative integer count as zero, so `"1.2"`,
//! `"1.2.0"` and `"1.2.x"` are all the same version. Numeric components are
//! compared by magnitude without parsing, so there is no upper bound on their
//! size. Comparison never fails.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Digits of one component without leading zeros; `""` stands for zero.
fn component(part: Option<&str>) -> &str {
    let digits = part.map(str::trim).unwrap_or("");
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return "";
    }
    digits.trim_start_matches('0')
}

/// Order two zero-stripped digit strings numerically.
fn compare_components(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Compare two dotted version strings.
///
/// Returns `Less` if `a` is older than `b`, `Greater` if newer and `Equal`
/// when every component matches after zero padding.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left: Vec<&str> = a.split('.').collect();
    let right: Vec<&str> = b.split('.').collect();
    let len = left.len().max(right.len());

    for i in 0..len {
        let l = component(left.get(i).copied());
        let r = component(right.get(i).copied());
        match compare_components(l, r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    Ordering::Equal
}

/// True when `latest` is strictly newer than `current`.
pub fn has_update(current: &str, latest: &str) -> bool {
    compare_versions(current, latest) == Ordering::Less
}

/// A firmware version as reported by a device or offered by the server.
///
/// Equality and ordering follow [`compare_versions`], so `"1.2"` equals
/// `"1.2.0"` even though the strings differ.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when `other` is newer than this version.
    pub fn is_older_than(&self, other: &Version) -> bool {
        has_update(&self.0, &other.0)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        compare_versions(&self.0, &other.0) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_versions(&self.0, &other.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Version {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_comparison() {
        assert_eq!(compare_versions("1.0.0", "1.1.0"), Ordering::Less);
        assert_eq!(compare_versions("2.0", "1.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.2", "1.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("0.1.0", "0.0.99"), Ordering::Greater);
    }

    #[test]
    fn test_comparison_is_antisymmetric() {
        let pairs = [
            ("1.0.0", "1.1.0"),
            ("2.0", "1.9.9"),
            ("1.2", "1.2.0"),
            ("1.2.3", "1.3"),
            ("10.0", "9.99.99"),
            ("1.0.0.1", "1.0"),
            ("abc", "0.0.1"),
        ];
        for (a, b) in pairs {
            assert_eq!(compare_versions(a, b), compare_versions(b, a).reverse(), "{a} vs {b}");
        }
    }

    #[test]
    fn test_unequal_component_counts() {
        assert_eq!(compare_versions("1.2", "1.2.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.2.3", "1.3"), Ordering::Less);
        assert_eq!(compare_versions("1.2", "1.2.0.1"), Ordering::Less);
    }

    #[test]
    fn test_malformed_components_degrade_to_zero() {
        assert_eq!(compare_versions("1.x.3", "1.0.3"), Ordering::Equal);
        assert_eq!(compare_versions("", "0.0"), Ordering::Equal);
        assert_eq!(compare_versions("1..2", "1.0.2"), Ordering::Equal);
        assert_eq!(compare_versions("v1.0", "0.5"), Ordering::Less);
        assert_eq!(compare_versions("+1", "0"), Ordering::Equal);
        assert_eq!(compare_versions("1.-2", "1.0"), Ordering::Equal);
    }

    #[test]
    fn test_large_components() {
        assert_eq!(compare_versions("1.99999999999999999999", "1.5"), Ordering::Greater);
        assert_eq!(compare_versions("99999999999999999999999", "1"), Ordering::Greater);
        assert_eq!(
            compare_versions("1.18446744073709551616", "1.18446744073709551615"),
            Ordering::Greater
        );
        assert_eq!(compare_versions("1.000000000000000000000042", "1.42"), Ordering::Equal);
        assert!(has_update("2.5", "2.100000000000000000000"));
    }

    #[test]
    fn test_has_update() {
        assert!(has_update("1.0.0", "1.1.0"));
        assert!(!has_update("1.1.0", "1.1.0"));
        assert!(!has_update("1.2.0", "1.1.9"));
        assert!(has_update("1.0", "1.0.1"));
    }

    #[test]
    fn test_version_ordering() {
        let mut versions = vec![Version::from("1.1.0"), Version::from("1.0.1"), Version::from("1.0.0")];
        versions.sort();
        let sorted: Vec<&str> = versions.iter().map(|v| v.as_str()).collect();
        assert_eq!(sorted, vec!["1.0.0", "1.0.1", "1.1.0"]);

        assert_eq!(Version::from("1.2"), Version::from("1.2.0"));
        assert!(Version::from("1.0").is_older_than(&Version::from("1.0.1")));
    }
}
