use core::cmp::Ordering;
use core::fmt;
use std::str::FromStr;

/// A four-part `Major.Minor.Build.Patch` version number.
///
/// Construction never fails: input that does not split into exactly
/// four dotted non-negative integers keeps its raw text, compares
/// lexicographically against other invalid versions, and orders below
/// every valid version.
#[derive(Debug, Clone, Default)]
pub struct VersionString {
    major: u32,
    minor: u32,
    build: u32,
    patch: u32,
    raw: String,
    valid: bool,
}

impl VersionString {
    /// Major component, zero when invalid.
    pub fn major(&self) -> u32 {
        self.major
    }

    /// Minor component, zero when invalid.
    pub fn minor(&self) -> u32 {
        self.minor
    }

    /// Build component, zero when invalid.
    pub fn build(&self) -> u32 {
        self.build
    }

    /// Patch component, zero when invalid.
    pub fn patch(&self) -> u32 {
        self.patch
    }

    /// True when the input parsed as four dotted integers.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Canonical `Major.Minor.Build.Patch` text for valid versions,
    /// the raw input otherwise. This is what goes into string tables.
    pub fn for_resources(&self) -> String {
        self.to_string()
    }
}

impl FromStr for VersionString {
    type Err = core::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut version = VersionString {
            raw: value.to_string(),
            ..Default::default()
        };

        let parts: Vec<&str> = value.split('.').collect();
        if parts.len() == 4 {
            let numbers: Vec<Option<u32>> = parts.iter().map(|p| p.parse().ok()).collect();
            if numbers.iter().all(Option::is_some) {
                version.major = numbers[0].unwrap();
                version.minor = numbers[1].unwrap();
                version.build = numbers[2].unwrap();
                version.patch = numbers[3].unwrap();
                version.valid = true;
            }
        }

        Ok(version)
    }
}

impl From<&str> for VersionString {
    fn from(value: &str) -> Self {
        match value.parse() {
            Ok(version) => version,
            Err(infallible) => match infallible {},
        }
    }
}

impl fmt::Display for VersionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.valid {
            write!(f, "{}.{}.{}.{}", self.major, self.minor, self.build, self.patch)
        } else {
            write!(f, "{}", self.raw)
        }
    }
}

impl PartialEq for VersionString {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VersionString {}

impl PartialOrd for VersionString {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionString {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.valid, other.valid) {
            (false, false) => self.raw.cmp(&other.raw),
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
            (true, true) => (self.major, self.minor, self.build, self.patch).cmp(&(
                other.major,
                other.minor,
                other.build,
                other.patch,
            )),
        }
    }
}
