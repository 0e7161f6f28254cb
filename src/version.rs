//! ClickHouse version handling.
//!
//! Versions are compared component-wise, never as strings: `21.10` is newer
//! than `21.9`.

use std::fmt;
use std::str::FromStr;

use crate::error::CkmanError;

/// Oldest release with HDFS disk support
pub const MIN_HDFS_VERSION: ClickHouseVersion = ClickHouseVersion::new(21, 9, 0, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClickHouseVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub build: u32,
}

impl ClickHouseVersion {
    pub const fn new(major: u32, minor: u32, patch: u32, build: u32) -> Self {
        Self { major, minor, patch, build }
    }
}

impl FromStr for ClickHouseVersion {
    type Err = CkmanError;

    /// Parses `major[.minor[.patch[.build]]]`, ignoring a `-suffix` such as `-lts`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CkmanError::invalid_params(format!("invalid clickhouse version {}", s));
        let core = s.trim().split('-').next().unwrap_or_default();
        if core.is_empty() {
            return Err(invalid());
        }

        let mut parts = [0u32; 4];
        let mut count = 0;
        for (i, part) in core.split('.').enumerate() {
            if i >= parts.len() {
                return Err(invalid());
            }
            parts[i] = part.parse().map_err(|_| invalid())?;
            count += 1;
        }
        if count == 0 {
            return Err(invalid());
        }
        Ok(Self::new(parts[0], parts[1], parts[2], parts[3]))
    }
}

impl fmt::Display for ClickHouseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.patch, self.build)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> ClickHouseVersion {
        s.parse().unwrap()
    }

    #[test]
    fn test_structured_compare() {
        assert!(v("21.10") > v("21.9"));
        assert!(v("21.9.3.30") > MIN_HDFS_VERSION);
        assert!(v("21.8.15.7") < MIN_HDFS_VERSION);
        assert_eq!(v("21.9"), MIN_HDFS_VERSION);
        assert!(v("22.3.2.2-lts") > v("22.3.2.1"));
    }

    #[test]
    fn test_invalid_versions() {
        for bad in ["", "abc", "21.x", "1.2.3.4.5", "21..9"] {
            assert!(bad.parse::<ClickHouseVersion>().is_err(), "{} should not parse", bad);
        }
    }
}
