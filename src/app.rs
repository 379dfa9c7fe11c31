use std::collections::HashSet;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};

use crate::db::{DescriptiveDb, LegacyProperty, PACKAGE_PROPERTY};
use crate::domain::{LegacyObjectRecord, ObjectId, RecordStatus};
use crate::error::BackfillError;
use crate::extract;
use crate::materialize::PropertyMaterializer;
use crate::report::{ErrorLog, RunSummary};
use crate::staging::StagingStore;
use crate::store::ManifestCache;
use crate::storage_service::StorageClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Stage,
    Resume,
    Reconcile,
    Teardown,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub message: String,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Default)]
pub struct StagingOutcome {
    pub identified: usize,
    pub staged: usize,
    pub errors: ErrorLog,
}

#[derive(Debug, Default)]
struct Tally {
    materialized: usize,
    failed: usize,
    properties_written: usize,
    errors: ErrorLog,
}

pub struct App<S: StorageClient> {
    db: DescriptiveDb,
    storage: S,
    cache: ManifestCache,
}

impl<S: StorageClient> App<S> {
    pub fn new(db: DescriptiveDb, storage: S, cache: ManifestCache) -> Self {
        Self { db, storage, cache }
    }

    pub fn db(&self) -> &DescriptiveDb {
        &self.db
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn cache(&self) -> &ManifestCache {
        &self.cache
    }

    pub fn staging(&self) -> StagingStore<'_> {
        StagingStore::new(self.db.session())
    }

    pub fn preflight(&self) -> Result<(), BackfillError> {
        self.storage.ping()?;
        self.db.ping()?;
        self.cache.ensure_root()?;
        Ok(())
    }

    pub fn run(&mut self, sink: &dyn ProgressSink) -> Result<RunSummary, BackfillError> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let staging = StagingStore::new(self.db.session());
        staging.init()?;

        sink.event(ProgressEvent {
            phase: Phase::Stage,
            message: "discovering legacy digital objects".to_string(),
        });
        let outcome = stage_legacy_objects(&self.db, &staging)?;
        info!(
            identified = outcome.identified,
            staged = outcome.staged,
            "staging finished"
        );

        let mut tally = Tally::default();
        tally.errors.merge(outcome.errors);

        let materializer = PropertyMaterializer::new(&self.db);
        let leftovers = staging.parsed_records()?;
        if !leftovers.is_empty() {
            sink.event(ProgressEvent {
                phase: Phase::Resume,
                message: format!("materializing {} records from a previous run", leftovers.len()),
            });
            for record in &leftovers {
                materialize_record(&staging, &materializer, record, &mut tally);
            }
        }

        let mut visited = HashSet::new();
        while let Some(package_uuid) = staging.next_unprocessed_package(&visited)? {
            visited.insert(package_uuid.clone());
            let records = staging.staged_for_package(&package_uuid)?;
            sink.event(ProgressEvent {
                phase: Phase::Reconcile,
                message: format!("package {package_uuid}: {} objects", records.len()),
            });

            let package = match self.cache.get_manifest(&self.storage, &package_uuid) {
                Ok(package) => package,
                Err(err) => {
                    warn!(package_uuid = %package_uuid, "{err}");
                    for record in &records {
                        fail_record(&staging, record, RecordStatus::Staged, &err, &mut tally);
                    }
                    continue;
                }
            };

            for record in &records {
                let extraction = match extract::extract(&package, &record.object_uuid) {
                    Ok(extraction) => extraction,
                    Err(err) => {
                        fail_record(&staging, record, RecordStatus::Staged, &err, &mut tally);
                        continue;
                    }
                };
                tally
                    .errors
                    .record_all(Some(record.object_id), &extraction.warnings);

                if let Err(err) = staging.record_extraction(record.object_id, &extraction.fields) {
                    tally.errors.record(Some(record.object_id), &err);
                    continue;
                }
                let parsed = LegacyObjectRecord {
                    extracted_fields: Some(extraction.fields),
                    status: RecordStatus::Parsed,
                    ..record.clone()
                };
                materialize_record(&staging, &materializer, &parsed, &mut tally);
            }
        }

        let finished_at = Utc::now();
        info!(
            identified = outcome.identified,
            materialized = tally.materialized,
            failed = tally.failed,
            errors = tally.errors.len(),
            elapsed_ms = timer.elapsed().as_millis() as u64,
            "backfill finished"
        );

        Ok(RunSummary {
            started_at,
            finished_at,
            identified: outcome.identified,
            staged: outcome.staged,
            materialized: tally.materialized,
            failed: tally.failed,
            properties_written: tally.properties_written,
            error_count: tally.errors.len(),
            errors_by_kind: tally.errors.by_kind(),
            errors: tally.errors,
        })
    }

    pub fn teardown(&self, sink: &dyn ProgressSink) -> Result<bool, BackfillError> {
        let staging = self.staging();
        let pending = staging.status_counts()?.pending();
        if pending > 0 {
            warn!(pending, "keeping working tables; records are still pending");
            return Ok(false);
        }
        sink.event(ProgressEvent {
            phase: Phase::Teardown,
            message: "removing working tables and cached manifests".to_string(),
        });
        staging.teardown()?;
        self.cache.clear()?;
        Ok(true)
    }
}

pub fn stage_legacy_objects(
    db: &DescriptiveDb,
    staging: &StagingStore<'_>,
) -> Result<StagingOutcome, BackfillError> {
    let legacy = db.legacy_properties()?;
    let mut outcome = StagingOutcome {
        identified: legacy.len(),
        ..StagingOutcome::default()
    };

    for property in legacy {
        let object_id = property.object_id;
        let (object_uuid, package_uuid) = match resolve_identifiers(db, property) {
            Ok(identifiers) => identifiers,
            Err(err) => {
                outcome.errors.record(Some(object_id), &err);
                continue;
            }
        };

        if let Err(err) = staging.upsert_staged(object_id, &object_uuid, &package_uuid) {
            outcome.errors.record(Some(object_id), &err);
            continue;
        }
        if let Err(err) = db.delete_properties(object_id) {
            outcome.errors.record(Some(object_id), &err);
            continue;
        }
        outcome.staged += 1;
    }
    Ok(outcome)
}

fn resolve_identifiers(
    db: &DescriptiveDb,
    property: LegacyProperty,
) -> Result<(String, String), BackfillError> {
    let object_id = property.object_id;
    let unresolved = |identifier: &'static str, reason: String| {
        BackfillError::IdentifierResolution {
            object_id,
            identifier,
            reason,
        }
    };

    let object_uuid = db
        .property_value(property.property_id)
        .map_err(|err| unresolved("object UUID", err.to_string()))?
        .and_then(|value| non_blank(&value))
        .ok_or_else(|| unresolved("object UUID", "no value stored".to_string()))?;

    let package_property = db
        .property_id(object_id, PACKAGE_PROPERTY)
        .map_err(|err| unresolved("AIP UUID", err.to_string()))?
        .ok_or_else(|| unresolved("AIP UUID", "no aipUUID property".to_string()))?;
    let package_uuid = db
        .property_value(package_property)
        .map_err(|err| unresolved("AIP UUID", err.to_string()))?
        .and_then(|value| non_blank(&value))
        .ok_or_else(|| unresolved("AIP UUID", "no value stored".to_string()))?;

    Ok((object_uuid, package_uuid))
}

fn non_blank(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn materialize_record(
    staging: &StagingStore<'_>,
    materializer: &PropertyMaterializer<'_>,
    record: &LegacyObjectRecord,
    tally: &mut Tally,
) {
    let object_id = record.object_id;
    match materializer.materialize(record) {
        Ok(outcome) => {
            tally.properties_written += outcome.written;
            tally.errors.record_all(Some(object_id), &outcome.failures);
            match staging.advance(
                object_id,
                RecordStatus::Parsed,
                RecordStatus::Materialized,
                None,
            ) {
                Ok(()) => tally.materialized += 1,
                Err(err) => tally.errors.record(Some(object_id), &err),
            }
        }
        Err(err) => fail_record(staging, record, RecordStatus::Parsed, &err, tally),
    }
}

fn fail_record(
    staging: &StagingStore<'_>,
    record: &LegacyObjectRecord,
    from: RecordStatus,
    cause: &BackfillError,
    tally: &mut Tally,
) {
    let object_id: ObjectId = record.object_id;
    tally.errors.record(Some(object_id), cause);
    let detail = cause.to_string();
    match staging.advance(object_id, from, RecordStatus::Failed, Some(&detail)) {
        Ok(()) => tally.failed += 1,
        Err(err) => tally.errors.record(Some(object_id), &err),
    }
}
