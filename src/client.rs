use std::fs::File;
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::domain::{DownloadKind, MaterialSlug};
use crate::error::HarvestError;

pub const DEFAULT_BASE_URL: &str = "https://c2db.fysik.dtu.dk";

/// Network seam of the harvester. Mocked in tests; the real implementation
/// talks to the public C2DB site.
pub trait TableClient: Send + Sync {
    fn fetch_table_page(&self, sid: u32, page: u32) -> Result<String, HarvestError>;

    fn download_material(
        &self,
        slug: &MaterialSlug,
        kind: DownloadKind,
        destination: &Path,
    ) -> Result<(), HarvestError>;
}

#[derive(Clone)]
pub struct TableHttpClient {
    client: Client,
    base_url: String,
}

impl TableHttpClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("c2db-harvest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::TableHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| HarvestError::TableHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn table_url(&self, sid: u32, page: u32) -> String {
        format!("{}/table?sid={sid}&page={page}", self.base_url)
    }

    pub fn material_url(&self, slug: &MaterialSlug, kind: DownloadKind) -> String {
        format!(
            "{}/material/{}/download/{}",
            self.base_url,
            slug.as_str(),
            kind.as_str()
        )
    }

    fn handle_status(
        response: reqwest::blocking::Response,
        on_status: impl Fn(u16, String) -> HarvestError,
    ) -> Result<reqwest::blocking::Response, HarvestError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "C2DB request failed".to_string());
        Err(on_status(status, message))
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
        on_error: impl Fn(String) -> HarvestError,
    ) -> Result<reqwest::blocking::Response, HarvestError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(on_error(err.to_string()));
                }
            }
        }
    }
}

impl TableClient for TableHttpClient {
    fn fetch_table_page(&self, sid: u32, page: u32) -> Result<String, HarvestError> {
        let url = self.table_url(sid, page);
        let response = self.send_with_retries(|| self.client.get(&url), HarvestError::TableHttp)?;
        let response = Self::handle_status(response, |status, message| {
            HarvestError::TableStatus { status, message }
        })?;
        response
            .text()
            .map_err(|err| HarvestError::TableHttp(err.to_string()))
    }

    fn download_material(
        &self,
        slug: &MaterialSlug,
        kind: DownloadKind,
        destination: &Path,
    ) -> Result<(), HarvestError> {
        let url = self.material_url(slug, kind);
        let response =
            self.send_with_retries(|| self.client.get(&url), HarvestError::MaterialHttp)?;
        let mut response = Self::handle_status(response, |status, message| {
            HarvestError::MaterialStatus { status, message }
        })?;
        let mut file =
            File::create(destination).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
