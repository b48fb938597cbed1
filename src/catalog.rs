//! Artifact catalogue loading.
//!
//! Definitions are YAML documents in the forensic-artifacts shape: a `name`,
//! a list of `sources` (each with a `type` and an `attributes` map), and
//! optional `supported_os`, `provides` and `conditions` lists. Definition
//! files may contain multiple documents separated by `---`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::definitions::{ArtifactDefinition, KeyValuePair, OsKind, Source, SourcePayload};
use crate::error::{CollectorError, Result};

/// Raw YAML shape of one artifact document.
#[derive(Debug, Deserialize)]
struct RawArtifact {
    name: String,
    #[serde(default)]
    doc: Option<String>,
    #[serde(default)]
    sources: Vec<RawSource>,
    #[serde(default)]
    supported_os: Vec<String>,
    #[serde(default)]
    provides: Vec<String>,
    #[serde(default)]
    conditions: Vec<String>,
}

/// Raw YAML shape of one source clause.
#[derive(Debug, Deserialize)]
struct RawSource {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    attributes: RawAttributes,
    #[serde(default)]
    supported_os: Vec<String>,
}

/// Union of the attribute fields used by the supported source kinds.
#[derive(Debug, Default, Deserialize)]
struct RawAttributes {
    #[serde(default)]
    paths: Vec<String>,
    #[serde(default)]
    separator: Option<String>,
    #[serde(default)]
    keys: Vec<String>,
    #[serde(default)]
    key_value_pairs: Vec<KeyValuePair>,
    #[serde(default)]
    names: Vec<String>,
}

/// Database of loaded artifact definitions, keyed by name.
#[derive(Debug, Default)]
pub struct ArtifactCatalog {
    /// All definitions, keyed by artifact name.
    pub artifacts: HashMap<String, ArtifactDefinition>,
}

impl ArtifactCatalog {
    /// Creates an empty catalogue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the definition with the given name, if present.
    pub fn get(&self, name: &str) -> Option<&ArtifactDefinition> {
        self.artifacts.get(name)
    }

    /// Number of loaded definitions.
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Returns true if no definitions are loaded.
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Loads every `.yaml` file in a folder.
    ///
    /// Returns the number of definitions added. Files that fail to parse
    /// abort the load; a folder with no definition files loads zero
    /// definitions and the caller decides whether that is acceptable.
    pub fn read_folder<P: AsRef<Path>>(&mut self, folder: P) -> Result<usize> {
        let mut added = 0;
        let mut entries: Vec<_> = fs::read_dir(folder.as_ref())?
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .map(|e| e == "yaml" || e == "yml")
                .unwrap_or(false);
            if !is_yaml {
                continue;
            }
            added += self.read_file(&path)?;
        }
        Ok(added)
    }

    /// Loads all documents of one definition file.
    pub fn read_file<P: AsRef<Path>>(&mut self, path: P) -> Result<usize> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        self.read_str(&text, &path.display().to_string())
    }

    /// Parses YAML text containing one or more artifact documents.
    ///
    /// `origin` names the file for error messages.
    pub fn read_str(&mut self, text: &str, origin: &str) -> Result<usize> {
        let mut added = 0;
        for document in serde_yaml::Deserializer::from_str(text) {
            let raw = RawArtifact::deserialize(document)
                .map_err(|e| CollectorError::invalid_definition(origin, e.to_string()))?;
            let artifact = convert_artifact(raw);
            debug!(artifact = %artifact.name, "Loaded artifact definition");
            if self
                .artifacts
                .insert(artifact.name.clone(), artifact)
                .is_some()
            {
                warn!(origin, "Duplicate artifact definition replaced an earlier one");
            }
            added += 1;
        }
        Ok(added)
    }
}

/// Converts a raw document into the typed definition, skipping source
/// kinds and OS tags the resolver does not handle.
fn convert_artifact(raw: RawArtifact) -> ArtifactDefinition {
    let mut sources = Vec::new();
    for raw_source in raw.sources {
        match convert_source(raw_source) {
            Some(source) => sources.push(source),
            None => continue,
        }
    }

    ArtifactDefinition {
        name: raw.name,
        doc: raw.doc,
        sources,
        supported_os: parse_os_tags(&raw.supported_os),
        provides: raw.provides,
        conditions: raw.conditions,
    }
}

fn convert_source(raw: RawSource) -> Option<Source> {
    let attrs = raw.attributes;
    let payload = match raw.kind.as_str() {
        "FILE" => SourcePayload::File { paths: attrs.paths },
        "DIRECTORY" => SourcePayload::Directory { paths: attrs.paths },
        "PATH" => SourcePayload::Path { paths: attrs.paths },
        "REGISTRY_KEY" => SourcePayload::RegistryKey { keys: attrs.keys },
        "REGISTRY_VALUE" => SourcePayload::RegistryValue {
            pairs: attrs.key_value_pairs,
        },
        "ARTIFACT_GROUP" => SourcePayload::ArtifactGroup { names: attrs.names },
        other => {
            debug!(kind = other, "Ignoring unsupported source kind");
            return None;
        }
    };

    Some(Source {
        payload,
        supported_os: parse_os_tags(&raw.supported_os),
        separator: attrs.separator,
    })
}

fn parse_os_tags(tags: &[String]) -> Vec<OsKind> {
    let mut out = Vec::new();
    for tag in tags {
        match OsKind::from_tag(tag) {
            Some(os) => out.push(os),
            None => debug!(%tag, "Ignoring unknown supported_os tag"),
        }
    }
    out
}
