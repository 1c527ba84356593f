use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camino::Utf8PathBuf;

use c2db_harvest::app::{App, RunOptions};
use c2db_harvest::client::TableClient;
use c2db_harvest::domain::{DownloadKind, MaterialSlug};
use c2db_harvest::error::HarvestError;
use c2db_harvest::manifest::{EntryStatus, Manifest};
use c2db_harvest::output::JsonOutput;
use c2db_harvest::store::Store;

#[derive(Clone)]
struct MockClient {
    pages: Vec<String>,
    downloads: Arc<Mutex<usize>>,
    fail_slugs: HashSet<String>,
}

impl MockClient {
    fn new(pages: Vec<String>) -> Self {
        Self {
            pages,
            downloads: Arc::new(Mutex::new(0)),
            fail_slugs: HashSet::new(),
        }
    }

    fn failing(pages: Vec<String>, fail: &[&str]) -> Self {
        let mut client = Self::new(pages);
        client.fail_slugs = fail.iter().map(|slug| slug.to_string()).collect();
        client
    }

    fn download_count(&self) -> usize {
        *self.downloads.lock().unwrap()
    }
}

impl TableClient for MockClient {
    fn fetch_table_page(&self, _sid: u32, page: u32) -> Result<String, HarvestError> {
        self.pages
            .get(page as usize)
            .cloned()
            .ok_or_else(|| HarvestError::TableStatus {
                status: 404,
                message: "no such page".to_string(),
            })
    }

    fn download_material(
        &self,
        slug: &MaterialSlug,
        kind: DownloadKind,
        destination: &Path,
    ) -> Result<(), HarvestError> {
        if self.fail_slugs.contains(slug.as_str()) {
            return Err(HarvestError::MaterialStatus {
                status: 500,
                message: "server error".to_string(),
            });
        }
        *self.downloads.lock().unwrap() += 1;
        std::fs::write(destination, format!("{kind} payload for {slug}"))
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

fn listing_page(sid: u32, last_page: u32, slugs: &[&str]) -> String {
    let mut html = String::from("<html><body><nav>");
    for page in 0..=last_page {
        html.push_str(&format!(
            r#"<a href="/table?sid={sid}&page={page}">{}</a>"#,
            page + 1
        ));
    }
    html.push_str("</nav><table>");
    for slug in slugs {
        html.push_str(&format!(
            r#"<tr><td><a href="/material/{slug}">{slug}</a></td></tr>"#
        ));
    }
    html.push_str("</table></body></html>");
    html
}

fn test_store(temp: &tempfile::TempDir) -> Store {
    let root = Utf8PathBuf::from_path_buf(temp.path().join("out")).unwrap();
    Store::new(root.into_std_path_buf()).unwrap()
}

fn options() -> RunOptions {
    RunOptions {
        sid: 1542,
        delay: Duration::ZERO,
        max_materials: None,
    }
}

#[test]
fn full_run_creates_one_directory_per_material() {
    let temp = tempfile::tempdir().unwrap();
    let store = test_store(&temp);
    let root = store.root().to_owned();

    let pages = vec![
        listing_page(1542, 1, &["1MoS2-1", "2WS2-1"]),
        listing_page(1542, 1, &["3WSe2-2", "1MoS2-1"]),
    ];
    let app = App::new(store, MockClient::new(pages), None);

    let report = app.run(options(), &JsonOutput).unwrap();
    assert_eq!(report.pages, 2);
    assert_eq!(report.discovered, 3);
    assert_eq!(report.downloaded, 3);
    assert_eq!(report.failed, 0);

    for slug in ["1MoS2-1", "2WS2-1", "3WSe2-2"] {
        assert!(root.join(slug).join(format!("{slug}.json")).as_std_path().exists());
        assert!(root.join(slug).join(format!("{slug}.cif")).as_std_path().exists());
    }

    let material_dirs = std::fs::read_dir(root.as_std_path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .count();
    assert_eq!(material_dirs, 3);

    let manifest = Manifest::load(&root.join("manifest.json")).unwrap();
    assert_eq!(manifest.len(), 3);
    assert!(manifest.entries().iter().all(|entry| entry.status == EntryStatus::Complete));
}

#[test]
fn rerun_does_not_download_again() {
    let temp = tempfile::tempdir().unwrap();
    let store = test_store(&temp);
    let pages = vec![listing_page(1542, 0, &["1MoS2-1", "2WS2-1"])];

    let first = MockClient::new(pages.clone());
    let app = App::new(store.clone(), first, None);
    app.run(options(), &JsonOutput).unwrap();

    let second = MockClient::new(pages);
    let counter = second.downloads.clone();
    let app = App::new(store, second, None);
    let report = app.run(options(), &JsonOutput).unwrap();

    assert_eq!(*counter.lock().unwrap(), 0);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.downloaded, 0);
}

#[test]
fn failed_material_is_recorded_and_run_continues() {
    let temp = tempfile::tempdir().unwrap();
    let store = test_store(&temp);
    let root = store.root().to_owned();
    let pages = vec![listing_page(1542, 0, &["1MoS2-1", "2WS2-1", "3WSe2-2"])];

    let client = MockClient::failing(pages.clone(), &["2WS2-1"]);
    let app = App::new(store.clone(), client, None);
    let report = app.run(options(), &JsonOutput).unwrap();

    assert_eq!(report.downloaded, 2);
    assert_eq!(report.failed, 1);

    let manifest = Manifest::load(&root.join("manifest.json")).unwrap();
    let failed: MaterialSlug = "2WS2-1".parse().unwrap();
    assert_eq!(manifest.get(&failed).unwrap().status, EntryStatus::Failed);

    // A later run with a healthy server retries only the failed material.
    let retry = MockClient::new(pages);
    let counter = retry.downloads.clone();
    let app = App::new(store, retry, None);
    let report = app.run(options(), &JsonOutput).unwrap();

    assert_eq!(report.downloaded, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(*counter.lock().unwrap(), 2);

    let manifest = Manifest::load(&root.join("manifest.json")).unwrap();
    assert_eq!(manifest.get(&failed).unwrap().status, EntryStatus::Complete);
    assert_eq!(manifest.len(), 3);
}

#[test]
fn max_materials_limits_the_run() {
    let temp = tempfile::tempdir().unwrap();
    let store = test_store(&temp);
    let root = store.root().to_owned();
    let pages = vec![listing_page(1542, 0, &["1MoS2-1", "2WS2-1", "3WSe2-2"])];

    let app = App::new(store, MockClient::new(pages), None);
    let report = app
        .run(
            RunOptions {
                max_materials: Some(1),
                ..options()
            },
            &JsonOutput,
        )
        .unwrap();

    assert_eq!(report.discovered, 1);
    assert_eq!(report.downloaded, 1);
    assert!(root.join("1MoS2-1").as_std_path().exists());
    assert!(!root.join("2WS2-1").as_std_path().exists());
}

#[test]
fn status_and_verify_reflect_the_manifest() {
    let temp = tempfile::tempdir().unwrap();
    let store = test_store(&temp);
    let root = store.root().to_owned();
    let pages = vec![listing_page(1542, 0, &["1MoS2-1", "2WS2-1"])];

    let app = App::new(store.clone(), MockClient::new(pages), None);
    app.run(options(), &JsonOutput).unwrap();

    let status = app.status().unwrap();
    assert_eq!(status.total, 2);
    assert_eq!(status.complete, 2);
    assert_eq!(status.failed, 0);

    let report = app.verify().unwrap();
    assert!(report.is_clean());
    assert_eq!(report.checked, 2);

    // Losing a file on disk is exactly what verify exists to catch.
    std::fs::remove_file(root.join("2WS2-1").join("2WS2-1.cif").as_std_path()).unwrap();
    let report = app.verify().unwrap();
    assert!(!report.is_clean());
    assert_eq!(report.missing.len(), 1);
    assert_eq!(report.missing[0].slug, "2WS2-1");
    assert_eq!(report.missing[0].paths, ["2WS2-1/2WS2-1.cif"]);
}

#[test]
fn custom_manifest_path_is_honored() {
    let temp = tempfile::tempdir().unwrap();
    let store = test_store(&temp);
    let manifest_path =
        Utf8PathBuf::from_path_buf(temp.path().join("elsewhere").join("manifest.json")).unwrap();
    let pages = vec![listing_page(1542, 0, &["1MoS2-1"])];

    let app = App::new(store, MockClient::new(pages), Some(manifest_path.clone()));
    let report = app.run(options(), &JsonOutput).unwrap();

    assert_eq!(report.manifest_path, manifest_path.as_str());
    assert!(manifest_path.as_std_path().exists());
}
