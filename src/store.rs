use std::fs;
use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::{DownloadKind, MaterialSlug};
use crate::error::HarvestError;

/// On-disk layout of a harvest: one directory per material under the output
/// root, holding `<slug>.json` and `<slug>.cif`, with the manifest at the
/// root next to them.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, HarvestError> {
        let root = Utf8PathBuf::from_path_buf(root.into())
            .map_err(|path| HarvestError::Filesystem(format!("non-UTF-8 output path: {}", path.display())))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn material_dir(&self, slug: &MaterialSlug) -> Utf8PathBuf {
        self.root.join(slug.as_str())
    }

    pub fn material_path(&self, slug: &MaterialSlug, kind: DownloadKind) -> Utf8PathBuf {
        self.material_dir(slug)
            .join(format!("{slug}.{}", kind.as_str()))
    }

    /// Manifest path relative to the root, used when no override is given.
    pub fn default_manifest_path(&self) -> Utf8PathBuf {
        self.root.join("manifest.json")
    }

    /// Path of a payload file as recorded in the manifest.
    pub fn relative_material_path(&self, slug: &MaterialSlug, kind: DownloadKind) -> Utf8PathBuf {
        Utf8PathBuf::from(slug.as_str()).join(format!("{slug}.{}", kind.as_str()))
    }

    pub fn ensure_root(&self) -> Result<(), HarvestError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))
    }

    pub fn ensure_material_dir(&self, slug: &MaterialSlug) -> Result<(), HarvestError> {
        fs::create_dir_all(self.material_dir(slug).as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))
    }

    pub fn exists(&self, path: &Utf8Path) -> bool {
        path.as_std_path().exists()
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), HarvestError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Ok(())
    }
}
