use std::collections::HashMap;
use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;
use tracing::{debug, info};

use crate::error::BackfillError;
use crate::mets::Manifest;
use crate::storage_service::{PackageLocation, StorageClient};

#[derive(Debug, Clone)]
pub struct PackageManifest {
    pub location: PackageLocation,
    pub manifest: Manifest,
}

/// A manifest file on disk is a cache hit. Only manifests that parse are
/// written, and a miss costs at most one fetch attempt per package per run.
#[derive(Debug)]
pub struct ManifestCache {
    root: Utf8PathBuf,
    failed_fetches: HashMap<String, String>,
}

impl ManifestCache {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self {
            root,
            failed_fetches: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn manifest_path(&self, package_uuid: &str) -> Utf8PathBuf {
        self.root.join(format!("METS.{package_uuid}.xml"))
    }

    pub fn location_path(&self, package_uuid: &str) -> Utf8PathBuf {
        self.root.join(format!("METS.{package_uuid}.json"))
    }

    pub fn contains(&self, package_uuid: &str) -> bool {
        self.manifest_path(package_uuid).as_std_path().exists()
    }

    pub fn ensure_root(&self) -> Result<(), BackfillError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| BackfillError::Filesystem(err.to_string()))
    }

    pub fn clear(&self) -> Result<(), BackfillError> {
        if self.root.as_std_path().exists() {
            fs::remove_dir_all(self.root.as_std_path())
                .map_err(|err| BackfillError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }

    pub fn get_manifest<C: StorageClient + ?Sized>(
        &mut self,
        client: &C,
        package_uuid: &str,
    ) -> Result<PackageManifest, BackfillError> {
        if self.contains(package_uuid) {
            debug!(package_uuid, "manifest cache hit");
            return self.load(package_uuid);
        }

        if let Some(reason) = self.failed_fetches.get(package_uuid) {
            return Err(BackfillError::PackageFetch {
                package_uuid: package_uuid.to_string(),
                reason: format!("already attempted in this run: {reason}"),
            });
        }

        match self.fetch(client, package_uuid) {
            Ok(fetched) => Ok(fetched),
            Err(err) => {
                self.failed_fetches
                    .insert(package_uuid.to_string(), err.to_string());
                Err(err)
            }
        }
    }

    fn fetch<C: StorageClient + ?Sized>(
        &self,
        client: &C,
        package_uuid: &str,
    ) -> Result<PackageManifest, BackfillError> {
        let as_fetch_error = |err: BackfillError| match err {
            BackfillError::PackageFetch { .. } => err,
            other => BackfillError::PackageFetch {
                package_uuid: package_uuid.to_string(),
                reason: other.to_string(),
            },
        };

        let response = client.resolve_package(package_uuid).map_err(as_fetch_error)?;
        let location = PackageLocation::from_response(package_uuid, &response)?;
        let relative_path = location.manifest_relative_path();
        info!(package_uuid, path = %relative_path, "fetching manifest");

        let content = client
            .fetch_file(package_uuid, &relative_path)
            .map_err(as_fetch_error)?;
        let manifest = Manifest::parse(package_uuid, &String::from_utf8_lossy(&content))?;

        let location_json = serde_json::to_vec_pretty(&location)
            .map_err(|err| BackfillError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(&self.location_path(package_uuid), &location_json)?;
        Self::write_bytes_atomic(&self.manifest_path(package_uuid), &content)?;
        Ok(PackageManifest { location, manifest })
    }

    fn load(&self, package_uuid: &str) -> Result<PackageManifest, BackfillError> {
        let path = self.manifest_path(package_uuid);
        let content = fs::read(path.as_std_path())
            .map_err(|err| BackfillError::Filesystem(format!("read {path}: {err}")))?;
        let xml = String::from_utf8_lossy(&content);
        let manifest = Manifest::parse(package_uuid, &xml)?;

        let location = match self.read_location(package_uuid) {
            Some(location) => location,
            None => {
                let dir = manifest.root_label().unwrap_or(package_uuid);
                PackageLocation::from_dir(package_uuid, dir)
            }
        };

        Ok(PackageManifest { location, manifest })
    }

    fn read_location(&self, package_uuid: &str) -> Option<PackageLocation> {
        let content = fs::read_to_string(self.location_path(package_uuid).as_std_path()).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), BackfillError> {
        let parent = path
            .parent()
            .ok_or_else(|| BackfillError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| BackfillError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix(".aip-backfill")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| BackfillError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| BackfillError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| BackfillError::Filesystem(err.to_string()))?;
        Ok(())
    }
}
