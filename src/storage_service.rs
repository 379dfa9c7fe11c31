use std::sync::LazyLock;

use regex::Regex;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};

use crate::config::StorageServiceConfig;
use crate::error::BackfillError;

static UUID_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .unwrap()
});

const CONTAINER_SUFFIX: &str = ".7z";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PackageResponse {
    #[serde(default)]
    pub current_path: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PackageLocation {
    pub package_uuid: String,
    pub relative_dir: String,
    pub name: String,
}

impl PackageLocation {
    pub fn from_response(
        requested_uuid: &str,
        response: &PackageResponse,
    ) -> Result<Self, BackfillError> {
        let malformed = |reason: &str| BackfillError::PackageFetch {
            package_uuid: requested_uuid.to_string(),
            reason: reason.to_string(),
        };

        let current_path = response
            .current_path
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .ok_or_else(|| malformed("response has no current_path"))?;

        let last_segment = current_path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default();
        let relative_dir = last_segment
            .strip_suffix(CONTAINER_SUFFIX)
            .unwrap_or(last_segment);
        if relative_dir.is_empty() {
            return Err(malformed("current_path has no package directory"));
        }

        let package_uuid = response
            .uuid
            .as_deref()
            .map(str::trim)
            .filter(|uuid| !uuid.is_empty())
            .unwrap_or(requested_uuid);

        Ok(Self::from_dir(package_uuid, relative_dir))
    }

    pub fn from_dir(package_uuid: &str, relative_dir: &str) -> Self {
        Self {
            package_uuid: package_uuid.to_string(),
            relative_dir: relative_dir.to_string(),
            name: package_name(package_uuid, relative_dir),
        }
    }

    pub fn manifest_relative_path(&self) -> String {
        format!("{}/data/METS.{}.xml", self.relative_dir, self.package_uuid)
    }
}

pub fn package_name(package_uuid: &str, relative_dir: &str) -> String {
    if UUID_SUFFIX.is_match(relative_dir) {
        return UUID_SUFFIX.replace(relative_dir, "").into_owned();
    }
    relative_dir
        .strip_suffix(package_uuid)
        .and_then(|rest| rest.strip_suffix('-'))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(relative_dir)
        .to_string()
}

pub trait StorageClient: Send + Sync {
    fn ping(&self) -> Result<(), BackfillError>;
    fn resolve_package(&self, package_uuid: &str) -> Result<PackageResponse, BackfillError>;
    fn fetch_file(&self, package_uuid: &str, relative_path: &str)
    -> Result<Vec<u8>, BackfillError>;
}

#[derive(Clone)]
pub struct StorageHttpClient {
    client: Client,
    base_url: String,
    user: String,
    api_key: String,
}

impl StorageHttpClient {
    pub fn new(config: &StorageServiceConfig) -> Result<Self, BackfillError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("aip-backfill/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| BackfillError::StorageHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|err| BackfillError::StorageHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            user: config.user.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn package_url(&self, package_uuid: &str) -> String {
        format!("{}file/{}/", self.base_url, package_uuid)
    }

    pub fn extract_file_url(&self, package_uuid: &str) -> String {
        format!("{}file/{}/extract_file/", self.base_url, package_uuid)
    }

    fn credentials(&self) -> [(&'static str, &str); 2] {
        [("username", self.user.as_str()), ("api_key", self.api_key.as_str())]
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, BackfillError> {
        if response.status() == StatusCode::OK {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "storage service request failed".to_string());
        Err(BackfillError::StorageStatus { status, message })
    }
}

impl StorageClient for StorageHttpClient {
    fn ping(&self) -> Result<(), BackfillError> {
        let url = format!("{}file/", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("limit", "1")])
            .query(&self.credentials())
            .send()
            .map_err(|err| BackfillError::ServiceUnreachable(err.to_string()))?;
        Self::handle_status(response)
            .map(|_| ())
            .map_err(|err| BackfillError::ServiceUnreachable(err.to_string()))
    }

    fn resolve_package(&self, package_uuid: &str) -> Result<PackageResponse, BackfillError> {
        let response = self
            .client
            .get(self.package_url(package_uuid))
            .query(&self.credentials())
            .send()
            .map_err(|err| BackfillError::StorageHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        response
            .json::<PackageResponse>()
            .map_err(|err| BackfillError::PackageFetch {
                package_uuid: package_uuid.to_string(),
                reason: format!("malformed package response: {err}"),
            })
    }

    fn fetch_file(
        &self,
        package_uuid: &str,
        relative_path: &str,
    ) -> Result<Vec<u8>, BackfillError> {
        let response = self
            .client
            .get(self.extract_file_url(package_uuid))
            .query(&[("relative_path_to_file", relative_path)])
            .query(&self.credentials())
            .send()
            .map_err(|err| BackfillError::StorageHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        let bytes = response
            .bytes()
            .map_err(|err| BackfillError::StorageHttp(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}
