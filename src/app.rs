use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::client::TableClient;
use crate::domain::{DownloadKind, MaterialSlug};
use crate::error::HarvestError;
use crate::listing;
use crate::manifest::{EntryStatus, Manifest, ManifestEntry};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub sid: u32,
    pub delay: Duration,
    pub max_materials: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub sid: u32,
    pub pages: u32,
    pub discovered: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub manifest_path: String,
    pub items: Vec<MaterialOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaterialOutcome {
    pub slug: String,
    pub action: String,
    pub json_path: Option<String>,
    pub cif_path: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub manifest_path: String,
    pub total: usize,
    pub complete: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub checked: usize,
    pub missing: Vec<MissingFiles>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MissingFiles {
    pub slug: String,
    pub paths: Vec<String>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Clone)]
pub struct App<C: TableClient> {
    store: Store,
    client: C,
    manifest_path: Utf8PathBuf,
}

impl<C: TableClient> App<C> {
    pub fn new(store: Store, client: C, manifest_path: Option<Utf8PathBuf>) -> Self {
        let manifest_path = manifest_path.unwrap_or_else(|| store.default_manifest_path());
        Self {
            store,
            client,
            manifest_path,
        }
    }

    /// Walks the listing, then downloads JSON and CIF for every material not
    /// already completed in the manifest. One material failing is a warning,
    /// not the end of the run.
    pub fn run(
        &self,
        options: RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, HarvestError> {
        self.store.ensure_root()?;
        let mut manifest = Manifest::load(&self.manifest_path)?;
        if !manifest.is_empty() {
            info!(
                entries = manifest.len(),
                "resuming from existing manifest"
            );
        }

        let (slugs, pages) = self.collect_slugs(&options, sink)?;
        info!(count = slugs.len(), pages, "collected material slugs");

        let slugs = match options.max_materials {
            Some(limit) if slugs.len() > limit => {
                info!(limit, "limiting download to the first materials");
                slugs.into_iter().take(limit).collect()
            }
            _ => slugs,
        };

        let total = slugs.len();
        let mut items = Vec::with_capacity(total);
        let (mut downloaded, mut skipped, mut failed) = (0usize, 0usize, 0usize);

        for (index, slug) in slugs.iter().enumerate() {
            if manifest.is_complete(slug) {
                debug!(%slug, "already in manifest, skipping");
                skipped += 1;
                let entry = manifest.get(slug);
                items.push(MaterialOutcome {
                    slug: slug.as_str().to_string(),
                    action: "skipped".to_string(),
                    json_path: entry.map(|entry| entry.json_path.to_string()),
                    cif_path: entry.map(|entry| entry.cif_path.to_string()),
                    error: None,
                });
                continue;
            }

            info!("[{}/{}] downloading {}", index + 1, total, slug);
            sink.event(ProgressEvent {
                message: format!("phase=Fetch; [{}/{}] {}", index + 1, total, slug),
            });

            let json_path = self.store.relative_material_path(slug, DownloadKind::Json);
            let cif_path = self.store.relative_material_path(slug, DownloadKind::Cif);
            match self.fetch_material(slug, &options) {
                Ok(()) => {
                    downloaded += 1;
                    manifest.record(ManifestEntry {
                        slug: slug.clone(),
                        json_path: json_path.clone(),
                        cif_path: cif_path.clone(),
                        status: EntryStatus::Complete,
                        downloaded_at: now_stamp(),
                    });
                    manifest.save(&self.manifest_path)?;
                    items.push(MaterialOutcome {
                        slug: slug.as_str().to_string(),
                        action: "downloaded".to_string(),
                        json_path: Some(json_path.to_string()),
                        cif_path: Some(cif_path.to_string()),
                        error: None,
                    });
                }
                Err(err) => {
                    warn!(%slug, error = %err, "material failed, continuing");
                    failed += 1;
                    manifest.record(ManifestEntry {
                        slug: slug.clone(),
                        json_path: json_path.clone(),
                        cif_path: cif_path.clone(),
                        status: EntryStatus::Failed,
                        downloaded_at: now_stamp(),
                    });
                    manifest.save(&self.manifest_path)?;
                    items.push(MaterialOutcome {
                        slug: slug.as_str().to_string(),
                        action: "failed".to_string(),
                        json_path: None,
                        cif_path: None,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        Ok(RunReport {
            sid: options.sid,
            pages,
            discovered: total,
            downloaded,
            skipped,
            failed,
            manifest_path: self.manifest_path.to_string(),
            items,
        })
    }

    /// Counts from the manifest alone; never touches the network.
    pub fn status(&self) -> Result<StatusReport, HarvestError> {
        let manifest = Manifest::load(&self.manifest_path)?;
        let complete = manifest
            .entries()
            .iter()
            .filter(|entry| entry.status == EntryStatus::Complete)
            .count();
        Ok(StatusReport {
            manifest_path: self.manifest_path.to_string(),
            total: manifest.len(),
            complete,
            failed: manifest.len() - complete,
        })
    }

    /// Checks that every manifest entry's recorded files exist on disk.
    pub fn verify(&self) -> Result<VerifyReport, HarvestError> {
        let manifest = Manifest::load(&self.manifest_path)?;
        let mut missing = Vec::new();
        for entry in manifest.entries() {
            if entry.status != EntryStatus::Complete {
                continue;
            }
            let mut lost = Vec::new();
            for path in [&entry.json_path, &entry.cif_path] {
                let resolved = self.store.root().join(path);
                if !self.store.exists(&resolved) {
                    lost.push(path.to_string());
                }
            }
            if !lost.is_empty() {
                missing.push(MissingFiles {
                    slug: entry.slug.as_str().to_string(),
                    paths: lost,
                });
            }
        }
        Ok(VerifyReport {
            checked: manifest.len(),
            missing,
        })
    }

    /// Pagination walk: page 0 tells us how many pages exist, the rest are
    /// fetched sequentially with the politeness delay in between.
    fn collect_slugs(
        &self,
        options: &RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<(Vec<MaterialSlug>, u32), HarvestError> {
        sink.event(ProgressEvent {
            message: format!("phase=Discover; sid {}", options.sid),
        });

        let first = self.client.fetch_table_page(options.sid, 0)?;
        let last_page = match listing::last_page(&first)? {
            Some(last) => last,
            None => {
                warn!("no pagination markers found, assuming a single page");
                0
            }
        };
        info!(pages = last_page + 1, "detected listing pages");

        let mut seen = HashSet::new();
        let mut slugs = Vec::new();
        for slug in listing::extract_slugs(&first)? {
            if seen.insert(slug.as_str().to_string()) {
                slugs.push(slug);
            }
        }

        for page in 1..=last_page {
            pause(options.delay);
            debug!(page, "fetching listing page");
            sink.event(ProgressEvent {
                message: format!("phase=Discover; page {}/{}", page + 1, last_page + 1),
            });
            let html = self.client.fetch_table_page(options.sid, page)?;
            for slug in listing::extract_slugs(&html)? {
                if seen.insert(slug.as_str().to_string()) {
                    slugs.push(slug);
                }
            }
        }

        Ok((slugs, last_page + 1))
    }

    /// Downloads both payloads for one material. Files already on disk are
    /// kept; the politeness delay only applies after an actual request.
    fn fetch_material(
        &self,
        slug: &MaterialSlug,
        options: &RunOptions,
    ) -> Result<(), HarvestError> {
        self.store.ensure_material_dir(slug)?;
        for kind in [DownloadKind::Json, DownloadKind::Cif] {
            let destination = self.store.material_path(slug, kind);
            if self.store.exists(&destination) {
                debug!(%destination, "file exists, skipping download");
                continue;
            }
            self.client
                .download_material(slug, kind, destination.as_std_path())?;
            pause(options.delay);
        }
        Ok(())
    }
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}

fn now_stamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
