use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

/// Identifier of a single material, taken from the `/material/<slug>` path
/// segment of the listing pages. The slug doubles as the name of the
/// per-material output directory, so anything that could escape the output
/// root is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterialSlug(String);

impl MaterialSlug {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MaterialSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MaterialSlug {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && trimmed != "."
            && trimmed != ".."
            && trimmed
                .chars()
                .all(|ch| ch.is_ascii_graphic() && ch != '/' && ch != '\\');
        if !is_valid {
            return Err(HarvestError::InvalidSlug(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// The two payloads C2DB serves per material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadKind {
    Json,
    Cif,
}

impl DownloadKind {
    /// Path segment of the download endpoint; also the file extension.
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadKind::Json => "json",
            DownloadKind::Cif => "cif",
        }
    }
}

impl fmt::Display for DownloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_slug_valid() {
        let slug: MaterialSlug = " 1MoS2-1 ".parse().unwrap();
        assert_eq!(slug.as_str(), "1MoS2-1");
    }

    #[test]
    fn parse_slug_rejects_separators() {
        assert_matches!(
            "a/b".parse::<MaterialSlug>(),
            Err(HarvestError::InvalidSlug(_))
        );
        assert_matches!(
            "a b".parse::<MaterialSlug>(),
            Err(HarvestError::InvalidSlug(_))
        );
        assert_matches!(
            "..".parse::<MaterialSlug>(),
            Err(HarvestError::InvalidSlug(_))
        );
        assert_matches!(
            "".parse::<MaterialSlug>(),
            Err(HarvestError::InvalidSlug(_))
        );
    }

    #[test]
    fn download_kind_segments() {
        assert_eq!(DownloadKind::Json.to_string(), "json");
        assert_eq!(DownloadKind::Cif.as_str(), "cif");
    }
}
