//! Semantic versions for Image Builder resources
//!
//! Image Builder only accepts `MAJOR.MINOR.PATCH` with plain unsigned integers.
//! Parsing is strict: a malformed segment is an error rather than a silent zero,
//! so `v1.2.3` or `1.x.0` never turn into a different version behind the user's back.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while parsing a version string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("version '{0}' must have the form MAJOR.MINOR.PATCH")]
    Shape(String),

    #[error("version '{version}' has a non-numeric segment '{segment}'")]
    Segment { version: String, segment: String },

    #[error("no patch version left after '{0}'")]
    Exhausted(String),
}

/// A `MAJOR.MINOR.PATCH` version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SemanticVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemanticVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Same major.minor, patch + 1. `None` once the patch number is exhausted.
    pub fn bump_patch(self) -> Option<Self> {
        Some(Self {
            patch: self.patch.checked_add(1)?,
            ..self
        })
    }

    /// Whether `other` shares this version's major.minor line
    pub fn same_line(&self, other: &SemanticVersion) -> bool {
        self.major == other.major && self.minor == other.minor
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

fn parse_segment(version: &str, segment: &str) -> Result<u64, VersionError> {
    let invalid = || VersionError::Segment {
        version: version.to_string(),
        segment: segment.to_string(),
    };
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    segment.parse().map_err(|_| invalid())
}

impl FromStr for SemanticVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(VersionError::Shape(s.to_string()));
        }
        Ok(Self {
            major: parse_segment(s, parts[0])?,
            minor: parse_segment(s, parts[1])?,
            patch: parse_segment(s, parts[2])?,
        })
    }
}

/// Normalize a user-supplied version into something Image Builder accepts.
///
/// Empty and `latest` become `1.0.0`; one or two numeric segments are padded
/// with zeros. Anything else must already be a valid three-part version.
pub fn normalize(version: &str) -> Result<SemanticVersion, VersionError> {
    let trimmed = version.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("latest") {
        return Ok(SemanticVersion::new(1, 0, 0));
    }

    let parts: Vec<&str> = trimmed.split('.').collect();
    if parts.len() > 3 {
        return Err(VersionError::Shape(trimmed.to_string()));
    }
    let mut numbers = [0u64; 3];
    for (slot, part) in numbers.iter_mut().zip(&parts) {
        *slot = parse_segment(trimmed, part)?;
    }
    Ok(SemanticVersion::new(numbers[0], numbers[1], numbers[2]))
}

/// Pick a component version that does not collide with any existing one.
///
/// If `requested` is unused it is returned as-is. Otherwise the result is one
/// past the highest patch on the same major.minor line, advanced further until
/// its string form differs from every entry in `existing`. Existing entries that
/// do not parse are ignored for the patch scan but still count as taken.
pub fn next_available(
    requested: SemanticVersion,
    existing: &[String],
) -> Result<SemanticVersion, VersionError> {
    let taken = |v: &SemanticVersion| existing.iter().any(|e| e == &v.to_string());
    if !taken(&requested) {
        return Ok(requested);
    }

    let highest = existing
        .iter()
        .filter_map(|e| e.parse::<SemanticVersion>().ok())
        .filter(|v| v.same_line(&requested))
        .max()
        .unwrap_or(requested)
        .max(requested);

    let exhausted = |v: SemanticVersion| VersionError::Exhausted(v.to_string());
    let mut candidate = highest.bump_patch().ok_or_else(|| exhausted(highest))?;
    while taken(&candidate) {
        candidate = candidate.bump_patch().ok_or_else(|| exhausted(candidate))?;
    }
    Ok(candidate)
}

/// Sort version strings newest first. Unparseable entries sort last.
pub fn sort_descending(versions: &mut [String]) {
    versions.sort_by(|a, b| {
        let a = a.parse::<SemanticVersion>().ok();
        let b = b.parse::<SemanticVersion>().ok();
        b.cmp(&a)
    });
}
