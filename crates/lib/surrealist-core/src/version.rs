//! Server version parsing and the supported version range.

use std::error::Error;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl ServerVersion {
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parses a version as reported by the server.
    ///
    /// Accepts `surrealdb-` prefixes, build metadata (`+...`) and pre-release
    /// tags (`-beta.1`), which are ignored.
    ///
    /// # Errors
    /// Returns `VersionParseError` if the core `major.minor.patch` triple is
    /// missing or not numeric.
    pub fn parse(raw: &str) -> Result<Self, VersionParseError> {
        let trimmed = raw.trim();
        let core = trimmed.strip_prefix("surrealdb-").unwrap_or(trimmed);
        let core = core.split('+').next().unwrap_or_default();
        let core = core.split('-').next().unwrap_or_default();

        let mut parts = core.split('.');
        let mut next = || {
            parts
                .next()
                .and_then(|part| part.parse::<u64>().ok())
                .ok_or_else(|| VersionParseError(raw.to_string()))
        };
        let version = Self::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(VersionParseError(raw.to_string()));
        }
        Ok(version)
    }
}

impl FromStr for ServerVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionParseError(pub String);

impl fmt::Display for VersionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid server version: {}", self.0)
    }
}

impl Error for VersionParseError {}

/// Half-open range `[minimum, maximum)` of server versions the client accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedVersions {
    pub minimum: ServerVersion,
    pub maximum: ServerVersion,
}

impl SupportedVersions {
    #[must_use]
    pub const fn new(minimum: ServerVersion, maximum: ServerVersion) -> Self {
        Self { minimum, maximum }
    }

    #[must_use]
    pub fn contains(&self, version: &ServerVersion) -> bool {
        *version >= self.minimum && *version < self.maximum
    }
}

impl Default for SupportedVersions {
    fn default() -> Self {
        Self::new(ServerVersion::new(2, 0, 0), ServerVersion::new(3, 0, 0))
    }
}

impl fmt::Display for SupportedVersions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ">= {}, < {}", self.minimum, self.maximum)
    }
}
