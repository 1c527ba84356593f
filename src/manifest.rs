use std::collections::HashMap;
use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::MaterialSlug;
use crate::error::HarvestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Complete,
    Failed,
}

/// One downloaded (or attempted) material. Paths are relative to the output
/// root so the tree can be relocated without rewriting the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub slug: MaterialSlug,
    pub json_path: Utf8PathBuf,
    pub cif_path: Utf8PathBuf,
    pub status: EntryStatus,
    pub downloaded_at: String,
}

/// Ordered index of everything the harvester has touched. Read at startup to
/// skip completed materials, rewritten after every material so an interrupted
/// run can resume where it stopped.
#[derive(Debug, Default)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
    by_slug: HashMap<String, usize>,
}

impl Manifest {
    /// A missing file is an empty manifest; unreadable or unparsable
    /// content is fatal.
    pub fn load(path: &Utf8Path) -> Result<Self, HarvestError> {
        if !path.as_std_path().exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| HarvestError::ManifestRead(path.to_owned()))?;
        let entries: Vec<ManifestEntry> = serde_json::from_str(&content)
            .map_err(|err| HarvestError::ManifestParse(err.to_string()))?;

        let mut manifest = Self::default();
        for entry in entries {
            manifest.record(entry);
        }
        Ok(manifest)
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, slug: &MaterialSlug) -> Option<&ManifestEntry> {
        self.by_slug
            .get(slug.as_str())
            .map(|index| &self.entries[*index])
    }

    pub fn is_complete(&self, slug: &MaterialSlug) -> bool {
        self.get(slug)
            .map(|entry| entry.status == EntryStatus::Complete)
            .unwrap_or(false)
    }

    /// Appends the entry, or replaces the previous entry for the same slug
    /// in place so a retried material keeps its position in the list.
    pub fn record(&mut self, entry: ManifestEntry) {
        match self.by_slug.get(entry.slug.as_str()) {
            Some(index) => self.entries[*index] = entry,
            None => {
                self.by_slug
                    .insert(entry.slug.as_str().to_string(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    pub fn save(&self, path: &Utf8Path) -> Result<(), HarvestError> {
        let parent = path
            .parent()
            .ok_or_else(|| HarvestError::Filesystem("invalid manifest path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;

        let content = serde_json::to_vec_pretty(&self.entries)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;

        let mut temp = tempfile::Builder::new()
            .prefix("manifest")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        temp.write_all(&content)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        temp.write_all(b"\n")
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Ok(())
    }
}
