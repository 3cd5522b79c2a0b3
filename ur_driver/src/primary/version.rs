use std::fmt;

use serde::{Deserialize, Serialize};

/// Controller software version.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct VersionInformation {
    pub major: u32,
    pub minor: u32,
    pub bugfix: u32,
    pub build: u32,
}

impl VersionInformation {
    /// Parses `major.minor.bugfix[-build]`, e.g. `5.9.4-1031232`.
    pub fn parse(text: &str) -> Option<Self> {
        let (numbers, build) = match text.split_once('-') {
            Some((numbers, build)) => (numbers, build.parse().ok()?),
            None => (text, 0),
        };
        let mut parts = numbers.split('.').map(|p| p.parse::<u32>());
        let major = parts.next()?.ok()?;
        let minor = parts.next()?.ok()?;
        let bugfix = parts.next().unwrap_or(Ok(0)).ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            major,
            minor,
            bugfix,
            build,
        })
    }

    pub fn is_e_series(&self) -> bool {
        self.major >= 5
    }
}

impl fmt::Display for VersionInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}-{}", self.major, self.minor, self.bugfix, self.build)
    }
}
