/// Firmware version tags
///
/// Versions are opaque. The only question ever asked of two versions is whether
/// they are equal: any difference between the manifest and the running image counts
/// as an update, there is no ordering and no downgrade protection.
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FirmwareVersion(String);

impl FirmwareVersion {
    /// Build a version tag, trimming surrounding whitespace
    pub fn new(tag: impl AsRef<str>) -> Self {
        Self(tag.as_ref().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when `self` (usually the manifest version) should replace `running`
    pub fn differs_from(&self, running: &FirmwareVersion) -> bool {
        self.0 != running.0
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FirmwareVersion {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}
