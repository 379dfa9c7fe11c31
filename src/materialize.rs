use tracing::debug;

use crate::db::DescriptiveDb;
use crate::domain::{LegacyObjectRecord, PropertyName, PropertyRecord};
use crate::error::BackfillError;

#[derive(Debug, Default)]
pub struct MaterializeOutcome {
    pub written: usize,
    pub failures: Vec<BackfillError>,
}

pub fn property_records(record: &LegacyObjectRecord) -> Result<Vec<PropertyRecord>, BackfillError> {
    let fields = record
        .extracted_fields
        .as_ref()
        .ok_or(BackfillError::MissingExtraction(record.object_id))?;

    let values: [(PropertyName, Option<String>); 14] = [
        (PropertyName::ObjectUuid, Some(record.object_uuid.clone())),
        (PropertyName::AipUuid, Some(record.package_uuid.clone())),
        (PropertyName::AipName, fields.package_name.clone()),
        (PropertyName::RelativePathWithinAip, fields.relative_path.clone()),
        (PropertyName::OriginalFileName, fields.original_file_name.clone()),
        (
            PropertyName::OriginalFileSize,
            fields.original_file_size.map(|size| size.to_string()),
        ),
        (PropertyName::OriginalFileIngestedAt, fields.ingested_at.clone()),
        (
            PropertyName::PreservationCopyFileName,
            fields.preservation_copy_file_name.clone(),
        ),
        (
            PropertyName::PreservationCopyFileSize,
            fields.preservation_copy_file_size.map(|size| size.to_string()),
        ),
        (
            PropertyName::PreservationCopyNormalizedAt,
            fields.preservation_copy_normalized_at.clone(),
        ),
        (PropertyName::FormatName, fields.format_name.clone()),
        (PropertyName::FormatVersion, fields.format_version.clone()),
        (PropertyName::FormatRegistryName, fields.format_registry_name.clone()),
        (PropertyName::FormatRegistryKey, fields.format_registry_key.clone()),
    ];

    Ok(values
        .into_iter()
        .filter_map(|(name, value)| {
            value
                .filter(|value| !value.trim().is_empty())
                .map(|value| PropertyRecord::new(record.object_id, name, value))
        })
        .collect())
}

pub struct PropertyMaterializer<'a> {
    db: &'a DescriptiveDb,
}

impl<'a> PropertyMaterializer<'a> {
    pub fn new(db: &'a DescriptiveDb) -> Self {
        Self { db }
    }

    pub fn materialize(
        &self,
        record: &LegacyObjectRecord,
    ) -> Result<MaterializeOutcome, BackfillError> {
        let properties = property_records(record)?;
        self.db.delete_properties(record.object_id)?;

        let mut outcome = MaterializeOutcome::default();
        for property in &properties {
            match self.db.insert_property(property) {
                Ok(_) => outcome.written += 1,
                Err(err) => outcome.failures.push(BackfillError::PropertyWrite {
                    object_id: record.object_id,
                    name: property.name.clone(),
                    reason: err.to_string(),
                }),
            }
        }
        debug!(
            object_id = record.object_id,
            written = outcome.written,
            failed = outcome.failures.len(),
            "materialized properties"
        );
        Ok(outcome)
    }
}
