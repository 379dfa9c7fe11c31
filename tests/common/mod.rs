#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use camino::Utf8PathBuf;

use aip_metadata_backfill::app::{App, ProgressEvent, ProgressSink};
use aip_metadata_backfill::db::DescriptiveDb;
use aip_metadata_backfill::error::BackfillError;
use aip_metadata_backfill::sql::SqlSession;
use aip_metadata_backfill::storage_service::{PackageResponse, StorageClient};
use aip_metadata_backfill::store::ManifestCache;

pub const TRANSFER_UUID: &str = "9f1e2d3c-1111-2222-3333-444455556666";

pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _event: ProgressEvent) {}
}

pub fn descriptive_db() -> DescriptiveDb {
    let db = DescriptiveDb::open_in_memory().unwrap();
    db.session()
        .execute_batch(
            r#"
            CREATE TABLE property (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                object_id INTEGER NOT NULL,
                name TEXT,
                scope TEXT,
                source_culture TEXT NOT NULL
            );
            CREATE TABLE property_i18n (
                id INTEGER NOT NULL,
                value TEXT,
                culture TEXT NOT NULL,
                PRIMARY KEY (id, culture)
            );
            "#,
        )
        .unwrap();
    db
}

pub fn add_property(
    db: &DescriptiveDb,
    object_id: i64,
    name: &str,
    scope: Option<&str>,
    value: &str,
) {
    let session = db.session();
    session
        .execute(
            "INSERT INTO property (object_id, name, scope, source_culture) VALUES (?, ?, ?, 'en')",
            &[object_id.into(), name.into(), scope.into()],
        )
        .unwrap();
    let id = session.last_insert_id();
    session
        .execute(
            "INSERT INTO property_i18n (id, value, culture) VALUES (?, ?, 'en')",
            &[id.into(), value.into()],
        )
        .unwrap();
}

pub fn add_legacy_object(db: &DescriptiveDb, object_id: i64, object_uuid: &str, package_uuid: &str) {
    add_property(db, object_id, "objectUUID", None, object_uuid);
    add_property(db, object_id, "aipUUID", None, package_uuid);
    add_property(db, object_id, "relativePathWithinAip", None, "legacy/path");
}

pub fn property_map(db: &DescriptiveDb, object_id: i64) -> HashMap<String, String> {
    db.properties(object_id)
        .unwrap()
        .into_iter()
        .map(|property| (property.name, property.value))
        .collect()
}

pub fn temp_cache() -> (tempfile::TempDir, ManifestCache) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("mets")).unwrap();
    (temp, ManifestCache::new(root))
}

pub fn app(db: DescriptiveDb, storage: MockStorage) -> (tempfile::TempDir, App<MockStorage>) {
    let (temp, cache) = temp_cache();
    cache.ensure_root().unwrap();
    (temp, App::new(db, storage, cache))
}

#[derive(Clone, Copy)]
pub struct FileFixture<'a> {
    pub uuid: &'a str,
    pub name: &'a str,
    pub group: &'a str,
    pub size: Option<&'a str>,
    /// `(name, version, registry key)`; `None` leaves out the registry block.
    pub format: Option<(&'a str, &'a str, &'a str)>,
    pub events: &'a [(&'a str, &'a str)],
    pub source_of: Option<&'a str>,
}

impl<'a> FileFixture<'a> {
    pub fn original(uuid: &'a str, name: &'a str) -> Self {
        Self {
            uuid,
            name,
            group: "original",
            size: Some("2048"),
            format: Some(("Tagged Image File Format", "()", "fmt/353")),
            events: &[("ingestion", "2019-05-01T10:00:00.000000+00:00")],
            source_of: None,
        }
    }
}

pub fn mets_document(files: &[FileFixture<'_>]) -> String {
    let mut amd = String::new();
    let mut groups: Vec<(&str, String)> = Vec::new();
    let mut items = String::new();

    for (index, file) in files.iter().enumerate() {
        let n = index + 1;
        let size = file
            .size
            .map(|size| format!("<premis:size>{size}</premis:size>"))
            .unwrap_or_default();
        let format = match file.format {
            Some((name, version, key)) => format!(
                r#"<premis:format>
                  <premis:formatDesignation>
                    <premis:formatName>{name}</premis:formatName>
                    <premis:formatVersion>{version}</premis:formatVersion>
                  </premis:formatDesignation>
                  <premis:formatRegistry>
                    <premis:formatRegistryName>PRONOM</premis:formatRegistryName>
                    <premis:formatRegistryKey>{key}</premis:formatRegistryKey>
                  </premis:formatRegistry>
                </premis:format>"#
            ),
            None => r#"<premis:format>
                  <premis:formatDesignation>
                    <premis:formatName>Unknown</premis:formatName>
                  </premis:formatDesignation>
                </premis:format>"#
                .to_string(),
        };
        let relationship = file
            .source_of
            .map(|target| {
                format!(
                    r#"<premis:relationship>
                  <premis:relationshipType>derivation</premis:relationshipType>
                  <premis:relationshipSubType>is source of</premis:relationshipSubType>
                  <premis:relatedObjectIdentifier>
                    <premis:relatedObjectIdentifierType>UUID</premis:relatedObjectIdentifierType>
                    <premis:relatedObjectIdentifierValue>{target}</premis:relatedObjectIdentifierValue>
                  </premis:relatedObjectIdentifier>
                </premis:relationship>"#
                )
            })
            .unwrap_or_default();
        let mut events = String::new();
        for (event_index, (event_type, date_time)) in file.events.iter().enumerate() {
            events.push_str(&format!(
                r#"<mets:digiprovMD ID="digiprovMD_{n}_{event_index}">
              <mets:mdWrap MDTYPE="PREMIS:EVENT">
                <mets:xmlData>
                  <premis:event>
                    <premis:eventType>{event_type}</premis:eventType>
                    <premis:eventDateTime>{date_time}</premis:eventDateTime>
                  </premis:event>
                </mets:xmlData>
              </mets:mdWrap>
            </mets:digiprovMD>"#
            ));
        }

        amd.push_str(&format!(
            r#"<mets:amdSec ID="amdSec_{n}">
            <mets:techMD ID="techMD_{n}">
              <mets:mdWrap MDTYPE="PREMIS:OBJECT">
                <mets:xmlData>
                  <premis:object>
                    <premis:objectIdentifier>
                      <premis:objectIdentifierType>UUID</premis:objectIdentifierType>
                      <premis:objectIdentifierValue>{uuid}</premis:objectIdentifierValue>
                    </premis:objectIdentifier>
                    <premis:objectCharacteristics>
                      {size}
                      {format}
                    </premis:objectCharacteristics>
                    {relationship}
                  </premis:object>
                </mets:xmlData>
              </mets:mdWrap>
            </mets:techMD>
            {events}
          </mets:amdSec>"#,
            uuid = file.uuid,
        ));

        let file_xml = format!(
            r#"<mets:file ID="file-{uuid}" ADMID="amdSec_{n}">
              <mets:FLocat xlink:href="objects/{name}" LOCTYPE="OTHER"/>
            </mets:file>"#,
            uuid = file.uuid,
            name = file.name,
        );
        match groups.iter_mut().find(|(group, _)| *group == file.group) {
            Some((_, content)) => content.push_str(&file_xml),
            None => groups.push((file.group, file_xml)),
        }

        items.push_str(&format!(
            r#"<mets:div TYPE="Item" LABEL="{name}"><mets:fptr FILEID="file-{uuid}"/></mets:div>"#,
            name = file.name,
            uuid = file.uuid,
        ));
    }

    let file_groups: String = groups
        .iter()
        .map(|(group, content)| format!(r#"<mets:fileGrp USE="{group}">{content}</mets:fileGrp>"#))
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<mets:mets xmlns:mets="http://www.loc.gov/METS/" xmlns:premis="http://www.loc.gov/premis/v3" xmlns:xlink="http://www.w3.org/1999/xlink">
  {amd}
  <mets:fileSec>{file_groups}</mets:fileSec>
  <mets:structMap TYPE="physical" LABEL="Archivematica default">
    <mets:div TYPE="Directory" LABEL="transferX-{TRANSFER_UUID}">
      <mets:div TYPE="Directory" LABEL="objects">{items}</mets:div>
    </mets:div>
  </mets:structMap>
</mets:mets>"#
    )
}

enum PackageBehavior {
    Serve { response: PackageResponse, manifest: String },
    FailFetch { response: PackageResponse, status: u16 },
}

/// In-memory storage service that records every call it receives.
#[derive(Default)]
pub struct MockStorage {
    packages: HashMap<String, PackageBehavior>,
    unreachable: bool,
    resolve_calls: Mutex<Vec<String>>,
    fetch_calls: Mutex<Vec<(String, String)>>,
}

impl MockStorage {
    pub fn with_package(mut self, package_uuid: &str, transfer_dir: &str, manifest: String) -> Self {
        self.packages.insert(
            package_uuid.to_string(),
            PackageBehavior::Serve {
                response: package_response(package_uuid, transfer_dir),
                manifest,
            },
        );
        self
    }

    pub fn with_failing_package(mut self, package_uuid: &str, status: u16) -> Self {
        self.packages.insert(
            package_uuid.to_string(),
            PackageBehavior::FailFetch {
                response: package_response(package_uuid, "broken-transfer"),
                status,
            },
        );
        self
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn resolve_count(&self, package_uuid: &str) -> usize {
        let calls = self.resolve_calls.lock().unwrap();
        calls.iter().filter(|uuid| uuid.as_str() == package_uuid).count()
    }

    pub fn fetch_count(&self, package_uuid: &str) -> usize {
        let calls = self.fetch_calls.lock().unwrap();
        calls.iter().filter(|(uuid, _)| uuid == package_uuid).count()
    }

    pub fn fetched_paths(&self) -> Vec<String> {
        let calls = self.fetch_calls.lock().unwrap();
        calls.iter().map(|(_, path)| path.clone()).collect()
    }

    pub fn total_calls(&self) -> usize {
        self.resolve_calls.lock().unwrap().len() + self.fetch_calls.lock().unwrap().len()
    }
}

fn package_response(package_uuid: &str, transfer_dir: &str) -> PackageResponse {
    PackageResponse {
        current_path: Some(format!(
            "9f1e/2d3c/1111/2222/3333/4444/5555/6666/{transfer_dir}.7z"
        )),
        uuid: Some(package_uuid.to_string()),
    }
}

impl StorageClient for MockStorage {
    fn ping(&self) -> Result<(), BackfillError> {
        if self.unreachable {
            return Err(BackfillError::ServiceUnreachable(
                "connection refused".to_string(),
            ));
        }
        Ok(())
    }

    fn resolve_package(&self, package_uuid: &str) -> Result<PackageResponse, BackfillError> {
        self.resolve_calls
            .lock()
            .unwrap()
            .push(package_uuid.to_string());
        match self.packages.get(package_uuid) {
            Some(PackageBehavior::Serve { response, .. })
            | Some(PackageBehavior::FailFetch { response, .. }) => Ok(response.clone()),
            None => Err(BackfillError::StorageStatus {
                status: 404,
                message: "package not found".to_string(),
            }),
        }
    }

    fn fetch_file(
        &self,
        package_uuid: &str,
        relative_path: &str,
    ) -> Result<Vec<u8>, BackfillError> {
        self.fetch_calls
            .lock()
            .unwrap()
            .push((package_uuid.to_string(), relative_path.to_string()));
        match self.packages.get(package_uuid) {
            Some(PackageBehavior::Serve { manifest, .. }) => Ok(manifest.as_bytes().to_vec()),
            Some(PackageBehavior::FailFetch { status, .. }) => Err(BackfillError::StorageStatus {
                status: *status,
                message: "extract_file failed".to_string(),
            }),
            None => Err(BackfillError::StorageStatus {
                status: 404,
                message: "package not found".to_string(),
            }),
        }
    }
}
