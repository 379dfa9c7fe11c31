use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::BackfillError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatRegistry {
    pub name: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatDesignation {
    pub name: Option<String>,
    pub version: Option<String>,
    pub registry: Option<FormatRegistry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PremisEvent {
    pub event_type: String,
    pub date_time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relationship {
    pub relationship_type: Option<String>,
    pub sub_type: Option<String>,
    pub related_uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub file_uuid: String,
    pub label: String,
    pub path: Option<String>,
    pub use_group: Option<String>,
    pub size: Option<String>,
    pub format: Option<FormatDesignation>,
    pub events: Vec<PremisEvent>,
    pub relationships: Vec<Relationship>,
}

impl ManifestEntry {
    pub fn event(&self, event_type: &str) -> Option<&PremisEvent> {
        self.events
            .iter()
            .find(|event| event.event_type.eq_ignore_ascii_case(event_type))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Manifest {
    root_label: Option<String>,
    entries: Vec<ManifestEntry>,
    index: HashMap<String, usize>,
}

impl Manifest {
    pub fn parse(package_uuid: &str, xml: &str) -> Result<Self, BackfillError> {
        let root = parse_tree(xml).map_err(|reason| BackfillError::ManifestParse {
            package_uuid: package_uuid.to_string(),
            reason,
        })?;
        if root.name != "mets" {
            return Err(BackfillError::ManifestParse {
                package_uuid: package_uuid.to_string(),
                reason: format!("unexpected root element <{}>", root.name),
            });
        }

        let mut amd_sections = HashMap::new();
        for section in root.descendants("amdSec") {
            if let Some(id) = section.attr("ID") {
                amd_sections.insert(id, section);
            }
        }

        let mut labels = HashMap::new();
        let mut root_label = None;
        for struct_map in root.children_named("structMap") {
            let physical = struct_map
                .attr("TYPE")
                .map(|kind| kind.eq_ignore_ascii_case("physical"))
                .unwrap_or(true);
            if root_label.is_none() && physical {
                root_label = struct_map
                    .children_named("div")
                    .next()
                    .and_then(|div| div.attr("LABEL"))
                    .map(str::to_string);
            }
            for div in struct_map.descendants("div") {
                let Some(label) = div.attr("LABEL") else {
                    continue;
                };
                for fptr in div.children_named("fptr") {
                    if let Some(file_id) = fptr.attr("FILEID") {
                        labels.entry(file_id).or_insert(label);
                    }
                }
            }
        }

        let mut files = Vec::new();
        for file_sec in root.children_named("fileSec") {
            for group in file_sec.children_named("fileGrp") {
                collect_files(group, None, &mut files);
            }
        }

        let mut manifest = Manifest {
            root_label,
            ..Manifest::default()
        };
        for (use_group, file) in files {
            let sections: Vec<&Element> = file
                .attr("ADMID")
                .unwrap_or_default()
                .split_whitespace()
                .filter_map(|id| amd_sections.get(id).copied())
                .collect();
            if let Some(entry) = build_entry(file, use_group, &sections, &labels) {
                manifest.insert(entry);
            }
        }
        Ok(manifest)
    }

    fn insert(&mut self, entry: ManifestEntry) {
        if self.index.contains_key(&entry.file_uuid) {
            return;
        }
        self.index.insert(entry.file_uuid.clone(), self.entries.len());
        self.entries.push(entry);
    }

    pub fn entry(&self, file_uuid: &str) -> Option<&ManifestEntry> {
        self.index
            .get(file_uuid.trim())
            .map(|position| &self.entries[*position])
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn root_label(&self) -> Option<&str> {
        self.root_label.as_deref()
    }
}

fn collect_files<'a>(
    group: &'a Element,
    inherited_use: Option<&'a str>,
    out: &mut Vec<(Option<&'a str>, &'a Element)>,
) {
    let use_group = group.attr("USE").or(inherited_use);
    for child in &group.children {
        match child.name.as_str() {
            "file" => out.push((use_group, child)),
            "fileGrp" => collect_files(child, use_group, out),
            _ => {}
        }
    }
}

fn build_entry(
    file: &Element,
    use_group: Option<&str>,
    sections: &[&Element],
    labels: &HashMap<&str, &str>,
) -> Option<ManifestEntry> {
    let file_id = file.attr("ID").unwrap_or_default();
    let path = file
        .children_named("FLocat")
        .find_map(|locator| locator.attr("href"))
        .map(str::to_string);

    let object = sections
        .iter()
        .flat_map(|section| section.children_named("techMD"))
        .flat_map(|tech| tech.descendants("object"))
        .next();

    let file_uuid = object
        .and_then(premis_uuid)
        .or_else(|| file_id.strip_prefix("file-").map(str::to_string))
        .filter(|uuid| !uuid.is_empty())?;

    let label = labels
        .get(file_id)
        .map(|label| label.to_string())
        .or_else(|| {
            path.as_deref()
                .and_then(|path| path.rsplit('/').next())
                .map(str::to_string)
        })
        .unwrap_or_default();

    let characteristics = object.and_then(|object| object.child("objectCharacteristics"));
    let size = characteristics.and_then(|chars| chars.text_at(&["size"]));
    let format = characteristics
        .and_then(|chars| chars.child("format"))
        .map(|format| FormatDesignation {
            name: format.text_at(&["formatDesignation", "formatName"]),
            version: format.text_at(&["formatDesignation", "formatVersion"]),
            registry: format.child("formatRegistry").map(|registry| FormatRegistry {
                name: registry.text_at(&["formatRegistryName"]),
                key: registry.text_at(&["formatRegistryKey"]),
            }),
        });

    let relationships = object
        .map(|object| {
            object
                .children_named("relationship")
                .map(|relationship| Relationship {
                    relationship_type: relationship.text_at(&["relationshipType"]),
                    sub_type: relationship.text_at(&["relationshipSubType"]),
                    related_uuid: relationship
                        .descendants("relatedObjectIdentifierValue")
                        .into_iter()
                        .find_map(|value| value.trimmed_text()),
                })
                .collect()
        })
        .unwrap_or_default();

    let events = sections
        .iter()
        .flat_map(|section| section.children_named("digiprovMD"))
        .flat_map(|provenance| provenance.descendants("event"))
        .filter_map(|event| {
            Some(PremisEvent {
                event_type: event.text_at(&["eventType"])?,
                date_time: event.text_at(&["eventDateTime"]),
            })
        })
        .collect();

    Some(ManifestEntry {
        file_uuid,
        label,
        path,
        use_group: use_group.map(str::to_string),
        size,
        format,
        events,
        relationships,
    })
}

fn premis_uuid(object: &Element) -> Option<String> {
    object
        .children_named("objectIdentifier")
        .find(|identifier| {
            identifier
                .text_at(&["objectIdentifierType"])
                .map(|kind| kind.eq_ignore_ascii_case("UUID"))
                .unwrap_or(false)
        })
        .and_then(|identifier| identifier.text_at(&["objectIdentifierValue"]))
}

/// Namespace-free element tree; names and attribute keys are local names.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }

    fn descendants<'a>(&'a self, name: &str) -> Vec<&'a Element> {
        let mut found = Vec::new();
        let mut stack: Vec<&Element> = self.children.iter().rev().collect();
        while let Some(element) = stack.pop() {
            if element.name == name {
                found.push(element);
            }
            stack.extend(element.children.iter().rev());
        }
        found
    }

    fn trimmed_text(&self) -> Option<String> {
        let text = self.text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }

    fn text_at(&self, path: &[&str]) -> Option<String> {
        let mut current = self;
        for name in path {
            current = current.child(name)?;
        }
        current.trimmed_text()
    }
}

fn parse_tree(xml: &str) -> Result<Element, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(err) => return Err(format!("{err} at byte {}", reader.buffer_position())),
        };
        match event {
            Event::Start(start) => stack.push(element_from(&start)?),
            Event::Empty(start) => {
                let element = element_from(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| "unbalanced closing tag".to_string())?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    let value = text.unescape().map_err(|err| err.to_string())?;
                    current.text.push_str(&value);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err("unexpected end of document".to_string());
    }
    root.ok_or_else(|| "document has no root element".to_string())
}

fn element_from(start: &BytesStart<'_>) -> Result<Element, String> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|err| err.to_string())?;
        let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|err| err.to_string())?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(Element {
        name,
        attributes,
        ..Element::default()
    })
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), String> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
        return Ok(());
    }
    if root.is_some() {
        return Err("document has more than one root element".to_string());
    }
    *root = Some(element);
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const METS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<mets:mets xmlns:mets="http://www.loc.gov/METS/" xmlns:premis="http://www.loc.gov/premis/v3" xmlns:xlink="http://www.w3.org/1999/xlink">
  <mets:amdSec ID="amdSec_1">
    <mets:techMD ID="techMD_1">
      <mets:mdWrap MDTYPE="PREMIS:OBJECT">
        <mets:xmlData>
          <premis:object>
            <premis:objectIdentifier>
              <premis:objectIdentifierType>UUID</premis:objectIdentifierType>
              <premis:objectIdentifierValue>abc-111</premis:objectIdentifierValue>
            </premis:objectIdentifier>
            <premis:objectCharacteristics>
              <premis:size>2048</premis:size>
              <premis:format>
                <premis:formatDesignation>
                  <premis:formatName>Tagged Image File Format</premis:formatName>
                  <premis:formatVersion>()</premis:formatVersion>
                </premis:formatDesignation>
                <premis:formatRegistry>
                  <premis:formatRegistryName>PRONOM</premis:formatRegistryName>
                  <premis:formatRegistryKey>fmt/353</premis:formatRegistryKey>
                </premis:formatRegistry>
              </premis:format>
            </premis:objectCharacteristics>
            <premis:relationship>
              <premis:relationshipType>derivation</premis:relationshipType>
              <premis:relationshipSubType>is source of</premis:relationshipSubType>
              <premis:relatedObjectIdentifier>
                <premis:relatedObjectIdentifierType>UUID</premis:relatedObjectIdentifierType>
                <premis:relatedObjectIdentifierValue>def-222</premis:relatedObjectIdentifierValue>
              </premis:relatedObjectIdentifier>
            </premis:relationship>
          </premis:object>
        </mets:xmlData>
      </mets:mdWrap>
    </mets:techMD>
    <mets:digiprovMD ID="digiprovMD_1">
      <mets:mdWrap MDTYPE="PREMIS:EVENT">
        <mets:xmlData>
          <premis:event>
            <premis:eventType>ingestion</premis:eventType>
            <premis:eventDateTime>2019-05-01T10:00:00.123456+00:00</premis:eventDateTime>
          </premis:event>
        </mets:xmlData>
      </mets:mdWrap>
    </mets:digiprovMD>
  </mets:amdSec>
  <mets:fileSec>
    <mets:fileGrp USE="original">
      <mets:file ID="file-abc-111" GROUPID="Group-abc-111" ADMID="amdSec_1">
        <mets:FLocat xlink:href="objects/image.tif" LOCTYPE="OTHER"/>
      </mets:file>
    </mets:fileGrp>
    <mets:fileGrp USE="preservation">
      <mets:file ID="file-def-222" GROUPID="Group-abc-111">
        <mets:FLocat xlink:href="objects/image-def-222.tif" LOCTYPE="OTHER"/>
      </mets:file>
    </mets:fileGrp>
  </mets:fileSec>
  <mets:structMap TYPE="physical" LABEL="Archivematica default">
    <mets:div TYPE="Directory" LABEL="transferX-9f1e2d3c-1111-2222-3333-444455556666">
      <mets:div TYPE="Directory" LABEL="objects">
        <mets:div TYPE="Item" LABEL="image.tif">
          <mets:fptr FILEID="file-abc-111"/>
        </mets:div>
      </mets:div>
    </mets:div>
  </mets:structMap>
</mets:mets>"#;

    #[test]
    fn parses_entries_with_amd_sections() {
        let manifest = Manifest::parse("pkg-9", METS).unwrap();
        assert_eq!(manifest.entries().len(), 2);

        let entry = manifest.entry("abc-111").unwrap();
        assert_eq!(entry.label, "image.tif");
        assert_eq!(entry.path.as_deref(), Some("objects/image.tif"));
        assert_eq!(entry.use_group.as_deref(), Some("original"));
        assert_eq!(entry.size.as_deref(), Some("2048"));

        let format = entry.format.as_ref().unwrap();
        assert_eq!(format.name.as_deref(), Some("Tagged Image File Format"));
        assert_eq!(format.version.as_deref(), Some("()"));
        let registry = format.registry.as_ref().unwrap();
        assert_eq!(registry.key.as_deref(), Some("fmt/353"));

        let ingestion = entry.event("ingestion").unwrap();
        assert_eq!(
            ingestion.date_time.as_deref(),
            Some("2019-05-01T10:00:00.123456+00:00")
        );
        assert_eq!(entry.relationships[0].related_uuid.as_deref(), Some("def-222"));
    }

    #[test]
    fn file_without_metadata_falls_back_to_identifier_and_path() {
        let manifest = Manifest::parse("pkg-9", METS).unwrap();
        let entry = manifest.entry("def-222").unwrap();
        assert_eq!(entry.label, "image-def-222.tif");
        assert_eq!(entry.use_group.as_deref(), Some("preservation"));
        assert!(entry.format.is_none());
        assert!(entry.events.is_empty());
    }

    #[test]
    fn root_label_comes_from_physical_struct_map() {
        let manifest = Manifest::parse("pkg-9", METS).unwrap();
        assert_eq!(
            manifest.root_label(),
            Some("transferX-9f1e2d3c-1111-2222-3333-444455556666")
        );
    }

    #[test]
    fn rejects_truncated_documents() {
        let truncated = &METS[..METS.len() / 2];
        let err = Manifest::parse("pkg-9", truncated).unwrap_err();
        assert_matches!(err, BackfillError::ManifestParse { .. });
    }

    #[test]
    fn rejects_non_mets_documents() {
        let err = Manifest::parse("pkg-9", "<html><body/></html>").unwrap_err();
        assert_matches!(err, BackfillError::ManifestParse { .. });
    }
}
