//! Document upload to the backend.
//!
//! Documents are posted as `multipart/form-data` (field `file`) to
//! `<base>/api/pdf-upload?deviceId=<id>`. The base URL can be fixed in the
//! configuration or read from a file on every upload, so an operator can
//! repoint the device without restarting the daemon.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::{multipart, Client};
use thiserror::Error;

/// Path of the upload endpoint below the backend base URL.
pub const UPLOAD_ENDPOINT: &str = "/api/pdf-upload";

/// Fallback device id when no hardware serial is available.
pub const UNKNOWN_DEVICE_ID: &str = "unknown";

/// Error type for uploads.
#[derive(Debug, Error)]
pub enum UploadError {
    /// No backend URL is configured.
    #[error("no backend URL configured (checked {0})")]
    MissingBackendUrl(String),

    /// A local file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The request could not be built or sent.
    #[error("upload request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("backend rejected upload with status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Delivers a finished document.
pub trait Uploader {
    /// Upload the document at `document`.
    ///
    /// # Errors
    ///
    /// Returns an [`UploadError`] if the document was not accepted.
    fn upload(&self, document: &Path) -> Result<(), UploadError>;
}

/// Where the backend base URL comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendUrl {
    /// Fixed in configuration.
    Fixed(String),
    /// First non-empty line of a file, read on every upload.
    File(PathBuf),
}

impl BackendUrl {
    /// Resolve the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::MissingBackendUrl`] if the URL is empty or the
    /// file is missing.
    pub fn resolve(&self) -> Result<String, UploadError> {
        let url = match self {
            BackendUrl::Fixed(url) => url.trim().to_string(),
            BackendUrl::File(path) => match fs::read_to_string(path) {
                Ok(content) => content
                    .lines()
                    .map(str::trim)
                    .find(|line| !line.is_empty())
                    .unwrap_or_default()
                    .to_string(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(source) => {
                    return Err(UploadError::Io {
                        path: path.clone(),
                        source,
                    })
                }
            },
        };

        if url.is_empty() {
            let checked = match self {
                BackendUrl::Fixed(_) => "configuration".to_string(),
                BackendUrl::File(path) => path.display().to_string(),
            };
            return Err(UploadError::MissingBackendUrl(checked));
        }
        Ok(url)
    }
}

/// Build the full upload endpoint from a base URL.
#[must_use]
pub fn endpoint_url(base: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), UPLOAD_ENDPOINT)
}

/// Extract the `Serial` field from `/proc/cpuinfo` content.
#[must_use]
pub fn parse_cpu_serial(cpuinfo: &str) -> Option<String> {
    cpuinfo
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim() == "Serial")
        .map(|(_, value)| value.trim().to_string())
        .filter(|serial| !serial.is_empty())
}

/// Read the board serial number from a cpuinfo file.
#[must_use]
pub fn read_device_id(cpuinfo_path: &Path) -> Option<String> {
    match fs::read_to_string(cpuinfo_path) {
        Ok(content) => parse_cpu_serial(&content),
        Err(e) => {
            log::debug!("Cannot read {}: {}", cpuinfo_path.display(), e);
            None
        }
    }
}

/// Multipart HTTP uploader.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: Client,
    backend: BackendUrl,
    device_id: String,
}

impl HttpUploader {
    /// Create an uploader.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Http`] if the HTTP client cannot be built.
    pub fn new(
        backend: BackendUrl,
        device_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, UploadError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            backend,
            device_id: device_id.into(),
        })
    }

    /// Device id sent with every upload.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

impl Uploader for HttpUploader {
    fn upload(&self, document: &Path) -> Result<(), UploadError> {
        let url = endpoint_url(&self.backend.resolve()?);
        let form = multipart::Form::new()
            .file("file", document)
            .map_err(|source| UploadError::Io {
                path: document.to_path_buf(),
                source,
            })?;

        log::info!(
            "Uploading {} to {}?deviceId={}",
            document.display(),
            url,
            self.device_id
        );
        let response = self
            .client
            .post(&url)
            .query(&[("deviceId", self.device_id.as_str())])
            .header(reqwest::header::ACCEPT, "application/json")
            .multipart(form)
            .send()?;

        let status = response.status();
        let body = response.text().unwrap_or_default();
        if !status.is_success() {
            return Err(UploadError::Status {
                status: status.as_u16(),
                body,
            });
        }

        match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(json) => log::debug!("Backend response: {}", json),
            Err(_) if body.is_empty() => {}
            Err(_) => log::debug!("Backend response (non-JSON): {}", body),
        }
        Ok(())
    }
}
