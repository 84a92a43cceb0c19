//! Release version labels as published by the mirrors.
//!
//! Labels are dotted numeric runs (`19.16.39`), sometimes followed by a
//! marker such as `beta` or `alpha`. Ordering is numeric segment by
//! segment, not semver: mirrors publish four-segment and two-segment
//! versions side by side.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::LazyLock;

static DOTTED_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)+").expect("valid version pattern"));

/// A release version label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    /// Create a version from a label, trimming surrounding whitespace.
    pub fn new(v: &str) -> Self {
        Self(v.trim().to_string())
    }

    /// Return the label as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Dash-substituted form used in mirror URLs (`17.3.2` -> `17-3-2`).
    pub fn dashed(&self) -> String {
        self.0.replace('.', "-")
    }

    /// `major.minor` prefix, when the label has at least two numeric segments.
    pub fn major_minor(&self) -> Option<String> {
        match self.segments().as_slice() {
            [major, minor, ..] => Some(format!("{major}.{minor}")),
            _ => None,
        }
    }

    /// True for alpha and beta builds (case-insensitive substring match).
    pub fn is_prerelease(&self) -> bool {
        is_prerelease_label(&self.0)
    }

    /// Leading numeric dot-segments of the label.
    pub fn segments(&self) -> Vec<u64> {
        self.0
            .split('.')
            .map_while(|part| {
                let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
                digits.parse::<u64>().ok()
            })
            .collect()
    }

    /// Find the first dotted numeric run in free text.
    ///
    /// ```
    /// use rvbuild_schema::Version;
    ///
    /// let v = Version::extract("YouTube 19.16.39 (nodpi)").unwrap();
    /// assert_eq!(v.as_str(), "19.16.39");
    /// assert!(Version::extract("no digits here").is_none());
    /// ```
    pub fn extract(text: &str) -> Option<Self> {
        DOTTED_RUN.find(text).map(|m| Self::new(m.as_str()))
    }

    /// Recover a dotted version from its dash-substituted URL form.
    pub fn from_dashed(dashed: &str) -> Self {
        Self::new(&dashed.replace('-', "."))
    }
}

/// True when a free-text label marks an alpha or beta build.
pub fn is_prerelease_label(label: &str) -> bool {
    let lower = label.to_lowercase();
    lower.contains("alpha") || lower.contains("beta")
}

/// Greatest stable version among `versions`.
///
/// ```
/// use rvbuild_schema::{Version, version::latest_stable};
///
/// let found = ["19.15.1", "19.17.0-beta", "19.16.39"].map(Version::new);
/// assert_eq!(latest_stable(found).unwrap().as_str(), "19.16.39");
/// ```
pub fn latest_stable<I>(versions: I) -> Option<Version>
where
    I: IntoIterator<Item = Version>,
{
    versions
        .into_iter()
        .filter(|v| !v.is_prerelease() && !v.segments().is_empty())
        .max()
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.segments();
        let b = other.segments();
        for i in 0..a.len().max(b.len()) {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            match x.cmp(&y) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for Version {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for Version {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Version {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl PartialEq<&str> for Version {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dashed_form() {
        assert_eq!(Version::new("17.3.2").dashed(), "17-3-2");
        assert_eq!(Version::from_dashed("17-3-2"), "17.3.2");
    }

    #[test]
    fn prerelease_markers_any_case() {
        for label in ["1.0.0-beta", "2.0 Alpha", "3.1.BETA.2", "4 alpha1"] {
            assert!(Version::new(label).is_prerelease(), "{label}");
        }
        assert!(!Version::new("19.16.39").is_prerelease());
    }

    #[test]
    fn latest_stable_skips_prereleases() {
        let versions = ["20.1.0 beta", "19.9.9", "20.0.0-ALPHA", "19.10.0"].map(Version::new);
        assert_eq!(latest_stable(versions).unwrap(), "19.10.0");

        let only_betas = ["1.0-beta", "2.0-alpha"].map(Version::new);
        assert!(latest_stable(only_betas).is_none());
    }

    #[test]
    fn ordering_is_numeric_per_segment() {
        assert!(Version::new("19.10.0") > Version::new("19.9.9"));
        assert!(Version::new("1.2") < Version::new("1.2.1"));
        assert!(Version::new("2.0.0.100") > Version::new("2.0.0.99"));
    }

    #[test]
    fn extract_finds_first_dotted_run() {
        assert_eq!(
            Version::extract("Instagram 312.0.0.34.111 beta").unwrap(),
            "312.0.0.34.111"
        );
        assert!(Version::extract("version 12 only").is_none());
        assert_eq!(Version::extract("v1.2.").unwrap(), "1.2");
        assert_eq!(Version::extract("build 2024.05.1-1").unwrap(), "2024.05.1");
        assert_eq!(Version::extract("19-16-39 or 19.16.40").unwrap(), "19.16.40");
    }

    #[test]
    fn major_minor_prefix() {
        assert_eq!(Version::new("17.3.2").major_minor().unwrap(), "17.3");
        assert!(Version::new("17").major_minor().is_none());
    }
}
