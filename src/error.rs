use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("invalid material slug: {0}")]
    InvalidSlug(String),

    #[error("table request failed: {0}")]
    TableHttp(String),

    #[error("table returned status {status}: {message}")]
    TableStatus { status: u16, message: String },

    #[error("material request failed: {0}")]
    MaterialHttp(String),

    #[error("material returned status {status}: {message}")]
    MaterialStatus { status: u16, message: String },

    #[error("failed to parse listing page: {0}")]
    ListingParse(String),

    #[error("failed to read manifest at {0}")]
    ManifestRead(Utf8PathBuf),

    #[error("failed to parse manifest: {0}")]
    ManifestParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
