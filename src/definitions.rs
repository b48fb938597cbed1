//! Artifact definition data model.
//!
//! An artifact is a named declarative recipe of file paths and registry
//! locations. Each definition carries a list of sources; a source has a
//! kind-specific payload and an optional OS filter. Source kinds are a
//! tagged union so dispatch in the resolver is a plain `match`.

use serde::Deserialize;

/// Operating system of a partition, as detected or as declared by an
/// artifact's `supported_os` list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsKind {
    /// Any Windows NT family system.
    Windows,
    /// Linux.
    Linux,
    /// macOS / Mac OS X.
    MacOs,
    /// Detection failed; only basic extraction is possible.
    Unknown,
}

impl OsKind {
    /// Human-readable name, as used in log output.
    pub fn name(&self) -> &'static str {
        match self {
            OsKind::Windows => "Windows",
            OsKind::Linux => "Linux",
            OsKind::MacOs => "Mac OSX",
            OsKind::Unknown => "Unknown",
        }
    }

    /// Parses an OS tag from an artifact definition.
    ///
    /// The catalogue format uses `Darwin` for macOS. Unknown tags return
    /// `None` and are skipped by the loader.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "Windows" => Some(OsKind::Windows),
            "Linux" => Some(OsKind::Linux),
            "Darwin" | "MacOS" => Some(OsKind::MacOs),
            _ => None,
        }
    }
}

/// A registry key/value-name template pair of a REGISTRY_VALUE source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeyValuePair {
    /// Registry key path template, may contain variables and wildcards.
    pub key: String,
    /// Value name template, may contain wildcards.
    pub value: String,
}

/// Kind-specific payload of a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourcePayload {
    /// Single file(s), possibly wildcarded.
    File { paths: Vec<String> },
    /// Directories, used to obtain listings.
    Directory { paths: Vec<String> },
    /// Generic path specifications.
    Path { paths: Vec<String> },
    /// Whole registry keys with all their values.
    RegistryKey { keys: Vec<String> },
    /// Individual key/value-name pairs.
    RegistryValue { pairs: Vec<KeyValuePair> },
    /// A list of other artifacts.
    ArtifactGroup { names: Vec<String> },
}

impl SourcePayload {
    /// Short kind name for log output.
    pub fn kind_name(&self) -> &'static str {
        match self {
            SourcePayload::File { .. } => "FILE",
            SourcePayload::Directory { .. } => "DIRECTORY",
            SourcePayload::Path { .. } => "PATH",
            SourcePayload::RegistryKey { .. } => "REGISTRY_KEY",
            SourcePayload::RegistryValue { .. } => "REGISTRY_VALUE",
            SourcePayload::ArtifactGroup { .. } => "ARTIFACT_GROUP",
        }
    }
}

/// One clause inside an artifact definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Kind-specific payload.
    pub payload: SourcePayload,
    /// OS filter; empty means the source applies everywhere.
    pub supported_os: Vec<OsKind>,
    /// Path separator used by the templates, usually `\` on Windows.
    pub separator: Option<String>,
}

impl Source {
    /// Creates a source with no OS filter and no separator.
    pub fn new(payload: SourcePayload) -> Self {
        Source {
            payload,
            supported_os: Vec::new(),
            separator: None,
        }
    }
}

/// A named, immutable artifact definition from the catalogue.
#[derive(Debug, Clone, Default)]
pub struct ArtifactDefinition {
    /// Unique name within the catalogue.
    pub name: String,
    /// Documentation string from the definition file.
    pub doc: Option<String>,
    /// Sources, processed in declaration order.
    pub sources: Vec<Source>,
    /// OS filter; empty means the artifact applies everywhere.
    pub supported_os: Vec<OsKind>,
    /// Variable names this artifact provides values for.
    pub provides: Vec<String>,
    /// Free-form conditions from the definition file. Loaded for
    /// completeness; the resolver does not evaluate them.
    pub conditions: Vec<String>,
}

impl ArtifactDefinition {
    /// Creates a definition with the given name and sources.
    pub fn new(name: impl Into<String>, sources: Vec<Source>) -> Self {
        ArtifactDefinition {
            name: name.into(),
            sources,
            ..Default::default()
        }
    }

    /// Returns true if this artifact applies to the given OS.
    ///
    /// An empty `supported_os` list means no restriction.
    pub fn supports_os(&self, os: OsKind) -> bool {
        self.supported_os.is_empty() || self.supported_os.contains(&os)
    }
}

/// A user account discovered on a Windows partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    /// Windows security identifier.
    pub sid: String,
    /// Account name, derived from the profile path.
    pub username: String,
    /// Profile directory, relative to the partition root.
    pub userprofile: String,
    /// Home directory; identical to the profile directory on Windows.
    pub homedir: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_tag_parsing() {
        assert_eq!(OsKind::from_tag("Windows"), Some(OsKind::Windows));
        assert_eq!(OsKind::from_tag("Linux"), Some(OsKind::Linux));
        assert_eq!(OsKind::from_tag("Darwin"), Some(OsKind::MacOs));
        assert_eq!(OsKind::from_tag("ESXi"), None);
    }

    #[test]
    fn test_supports_os() {
        let mut artifact = ArtifactDefinition::new("Test", Vec::new());
        assert!(artifact.supports_os(OsKind::Linux));

        artifact.supported_os = vec![OsKind::Windows];
        assert!(artifact.supports_os(OsKind::Windows));
        assert!(!artifact.supports_os(OsKind::Linux));
    }

    #[test]
    fn test_source_kind_names() {
        let source = SourcePayload::RegistryKey { keys: Vec::new() };
        assert_eq!(source.kind_name(), "REGISTRY_KEY");
    }
}
