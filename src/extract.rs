use chrono::{DateTime, NaiveDateTime};

use crate::domain::ExtractedFields;
use crate::error::BackfillError;
use crate::mets::{Manifest, ManifestEntry, Relationship};
use crate::store::PackageManifest;

pub const FALLBACK_FORMAT_NAME: &str = "ISO Disk Image File";
pub const FALLBACK_REGISTRY_KEY: &str = "fmt/468";
pub const FALLBACK_REGISTRY_NAME: &str = "PRONOM";

const EMPTY_TUPLE: &str = "()";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const DERIVATIVE_SUBTYPE: &str = "is source of";

#[derive(Debug, Default)]
pub struct Extraction {
    pub fields: ExtractedFields,
    pub warnings: Vec<BackfillError>,
}

pub fn extract(package: &PackageManifest, file_uuid: &str) -> Result<Extraction, BackfillError> {
    let entry = package
        .manifest
        .entry(file_uuid)
        .ok_or_else(|| BackfillError::FileLookup {
            package_uuid: package.location.package_uuid.clone(),
            file_uuid: file_uuid.to_string(),
        })?;

    let mut extraction = Extraction::default();
    let fields = &mut extraction.fields;
    fields.relative_path = entry.path.as_deref().and_then(clean);
    fields.original_file_name = clean(&entry.label);
    fields.package_name = clean(&package.location.name);
    fields.original_file_size = entry.size.as_deref().and_then(parse_size);
    fields.ingested_at = event_timestamp(entry, "ingestion");

    let registry_match = entry.format.as_ref().and_then(|format| {
        format
            .registry
            .as_ref()
            .map(|registry| (format, registry))
    });
    match registry_match {
        Some((format, registry)) => {
            fields.format_name = format.name.as_deref().and_then(clean);
            fields.format_version = format.version.as_deref().and_then(clean);
            fields.format_registry_name = registry.name.as_deref().and_then(clean);
            fields.format_registry_key = registry.key.as_deref().and_then(clean);
        }
        None => {
            fields.format_name = Some(FALLBACK_FORMAT_NAME.to_string());
            fields.format_version = None;
            fields.format_registry_name = Some(FALLBACK_REGISTRY_NAME.to_string());
            fields.format_registry_key = Some(FALLBACK_REGISTRY_KEY.to_string());
            extraction
                .warnings
                .push(BackfillError::FormatIdentification {
                    file_uuid: entry.file_uuid.clone(),
                    fallback: format!("{FALLBACK_FORMAT_NAME} ({FALLBACK_REGISTRY_KEY})"),
                });
        }
    }

    if let Some(relationship) = derivative_link(entry) {
        match resolve_derivative(&package.manifest, relationship) {
            Ok(derivative) => {
                let fields = &mut extraction.fields;
                fields.preservation_copy_file_name = clean(&derivative.label);
                fields.preservation_copy_file_size =
                    derivative.size.as_deref().and_then(parse_size);
                fields.preservation_copy_normalized_at = event_timestamp(derivative, "creation");
            }
            Err(reason) => {
                extraction.fields.clear_preservation_copy();
                extraction
                    .warnings
                    .push(BackfillError::DerivativeResolution {
                        file_uuid: entry.file_uuid.clone(),
                        reason,
                    });
            }
        }
    }

    Ok(extraction)
}

fn derivative_link(entry: &ManifestEntry) -> Option<&Relationship> {
    entry.relationships.iter().find(|relationship| {
        relationship
            .sub_type
            .as_deref()
            .map(|sub_type| sub_type.trim().eq_ignore_ascii_case(DERIVATIVE_SUBTYPE))
            .unwrap_or(false)
    })
}

fn resolve_derivative<'m>(
    manifest: &'m Manifest,
    relationship: &Relationship,
) -> Result<&'m ManifestEntry, String> {
    let related_uuid = relationship
        .related_uuid
        .as_deref()
        .and_then(clean)
        .ok_or_else(|| "relationship has no related object identifier".to_string())?;
    let derivative = manifest
        .entry(&related_uuid)
        .ok_or_else(|| format!("related file {related_uuid} is not in the manifest"))?;
    if event_timestamp(derivative, "creation").is_none() {
        return Err(format!("related file {related_uuid} has no creation event"));
    }
    Ok(derivative)
}

fn event_timestamp(entry: &ManifestEntry, event_type: &str) -> Option<String> {
    entry
        .event(event_type)
        .and_then(|event| event.date_time.as_deref())
        .and_then(normalize_timestamp)
}

pub fn normalize_timestamp(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.naive_local().format(TIMESTAMP_FORMAT).to_string());
    }
    let head = raw.get(..19)?;
    let normalized = head.replacen(' ', "T", 1);
    NaiveDateTime::parse_from_str(&normalized, TIMESTAMP_FORMAT)
        .ok()
        .map(|parsed| parsed.format(TIMESTAMP_FORMAT).to_string())
}

/// Trims a manifest value; blanks and the empty-tuple sentinel become `None`.
pub fn clean(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value == EMPTY_TUPLE {
        return None;
    }
    Some(value.to_string())
}

fn parse_size(value: &str) -> Option<u64> {
    clean(value).and_then(|value| value.parse().ok())
}
