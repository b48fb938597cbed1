//! Per-artifact orchestration: converts artifact definitions into actual
//! bits of information on one partition.
//!
//! The resolver filters artifacts and sources by OS applicability, expands
//! variables through the knowledge base, dispatches templates to the glob
//! engines, and recursively resolves group members. It also serves as the
//! knowledge base's provider back-edge: a provider source is wrapped into
//! a synthetic one-source artifact, resolved, and projected to strings.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::catalog::ArtifactCatalog;
use crate::definitions::{ArtifactDefinition, OsKind, Source, SourcePayload};
use crate::expand::{expand_template, VariableSource};
use crate::extract::Extractor;
use crate::glob::{self, expand_superglobs};
use crate::knowledge::{KnowledgeBase, ProviderResolver};
use crate::os::OperatingSystem;
use crate::registry::{KeyHandle, RegistryKey};
use crate::store::OutputStore;
use crate::vfs::{FileEntryType, PathSpec, VirtualFileSystem};

/// Name of the synthetic artifact used while resolving variables.
const VARIABLE_RESOLVE_NAME: &str = "tmp_resolve_variable";

/// Concrete locations an artifact resolved to on one partition.
#[derive(Default)]
pub struct ResolvedArtifact {
    /// The definition this was resolved from.
    pub definition: ArtifactDefinition,
    /// Matched file entries.
    pub files: Vec<PathSpec>,
    /// Matched directory entries.
    pub dirs: Vec<PathSpec>,
    /// Matched path entries.
    pub paths: Vec<PathSpec>,
    /// Matched registry keys.
    pub registry_keys: Vec<KeyHandle>,
    /// Matched keys with the value names selected on each.
    pub registry_vals: Vec<(KeyHandle, Vec<String>)>,
    /// Recursively resolved group members.
    pub sub_artifacts: Vec<ResolvedArtifact>,
}

impl ResolvedArtifact {
    /// Returns true if all six collections are empty. Emptiness is not an
    /// error; the extractor treats it as a no-op.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
            && self.dirs.is_empty()
            && self.paths.is_empty()
            && self.registry_keys.is_empty()
            && self.registry_vals.is_empty()
            && self.sub_artifacts.is_empty()
    }
}

/// Resolves artifact definitions against one partition.
pub struct ArtifactResolver {
    vfs: Arc<dyn VirtualFileSystem>,
    partition: PathSpec,
    partition_name: String,
    system: Box<dyn OperatingSystem>,
    /// Partition OS, `None` when detection failed.
    os: Option<OsKind>,
    /// Definitions applicable to this partition.
    artifacts: HashMap<String, ArtifactDefinition>,
    knowledge: KnowledgeBase,
}

impl ArtifactResolver {
    /// Creates a resolver for one partition.
    ///
    /// Artifacts not applicable to the partition OS are dropped up front;
    /// when the OS is unknown, everything stays and extraction is
    /// attempted optimistically. The system's bootstrap variables are
    /// seeded into the knowledge base.
    pub fn new(
        vfs: Arc<dyn VirtualFileSystem>,
        partition: PathSpec,
        partition_name: impl Into<String>,
        catalog: &ArtifactCatalog,
        system: Box<dyn OperatingSystem>,
    ) -> Self {
        let os = match system.os_kind() {
            OsKind::Unknown => None,
            kind => Some(kind),
        };
        let artifacts: HashMap<String, ArtifactDefinition> = match os {
            None => catalog.artifacts.clone(),
            Some(kind) => catalog
                .artifacts
                .iter()
                .filter(|(_, artifact)| artifact.supports_os(kind))
                .map(|(name, artifact)| (name.clone(), artifact.clone()))
                .collect(),
        };
        debug!(count = artifacts.len(), "Picked matching artifact definitions");

        let knowledge = KnowledgeBase::new(&artifacts);
        for (key, values) in system.seed_variables() {
            knowledge.seed(&key, values);
        }

        ArtifactResolver {
            vfs,
            partition,
            partition_name: partition_name.into(),
            system,
            os,
            artifacts,
            knowledge,
        }
    }

    /// Label of the partition this resolver works on.
    pub fn partition_name(&self) -> &str {
        &self.partition_name
    }

    /// Resolves an artifact by name.
    ///
    /// Returns `None` for unknown artifacts and for artifacts not
    /// supported on the partition OS. With an unknown partition OS, a
    /// restricted artifact is still attempted optimistically.
    pub fn resolve(&self, artifact_name: &str) -> Option<ResolvedArtifact> {
        let Some(artifact) = self.artifacts.get(artifact_name) else {
            warn!(artifact = artifact_name, "Unknown or non-applicable artifact");
            return None;
        };

        if let Some(os) = self.os {
            if !artifact.supports_os(os) {
                info!(
                    artifact = artifact_name,
                    os = os.name(),
                    "Artifact not supported for OS"
                );
                return None;
            }
        } else if !artifact.supported_os.is_empty() {
            warn!(
                artifact = artifact_name,
                "Trying optimistic extract, no OS known for current partition"
            );
        }

        Some(self.resolve_definition(artifact))
    }

    /// Resolves and extracts an artifact in one step.
    ///
    /// Returns true iff anything was written to the store.
    pub fn process(&self, artifact_name: &str, store: &mut dyn OutputStore) -> bool {
        debug!(artifact = artifact_name, "Attempting extract");
        let Some(resolved) = self.resolve(artifact_name) else {
            return false;
        };
        Extractor::new(self.vfs.as_ref(), &self.partition_name).extract(&resolved, store)
    }

    /// Resolves every source of a definition into the six collections.
    fn resolve_definition(&self, artifact: &ArtifactDefinition) -> ResolvedArtifact {
        if artifact.name == VARIABLE_RESOLVE_NAME {
            debug!("resolving variables..");
        } else {
            info!(artifact = %artifact.name, "Resolving artifact");
        }

        let mut resolved = ResolvedArtifact {
            definition: artifact.clone(),
            ..Default::default()
        };

        for source in &artifact.sources {
            if let Some(os) = self.os {
                if !source.supported_os.is_empty() && !source.supported_os.contains(&os) {
                    continue;
                }
            }
            let separator = source.separator.as_deref();

            match &source.payload {
                SourcePayload::File { paths } => {
                    let found = self.glob_file_paths(&self.expand_paths(paths, separator));
                    // The files collection only carries regular files;
                    // entries that cannot be stat'ed stay in and are dealt
                    // with at extraction time.
                    resolved.files.extend(found.into_iter().filter(|spec| {
                        match self.vfs.stat(spec) {
                            Ok(stat) if stat.entry_type != FileEntryType::File => {
                                debug!(
                                    path = %spec.reconstruct_full_path(),
                                    "Dropping non-file match of a file source"
                                );
                                false
                            }
                            _ => true,
                        }
                    }));
                }
                SourcePayload::Directory { paths } => {
                    resolved
                        .dirs
                        .extend(self.glob_file_paths(&self.expand_paths(paths, separator)));
                }
                SourcePayload::Path { paths } => {
                    resolved
                        .paths
                        .extend(self.glob_file_paths(&self.expand_paths(paths, separator)));
                }
                SourcePayload::RegistryKey { keys } => {
                    for key_template in keys {
                        for expanded in self.expand_path(key_template) {
                            resolved
                                .registry_keys
                                .extend(self.glob_registry_keys(&expanded));
                        }
                    }
                }
                SourcePayload::RegistryValue { pairs } => {
                    for pair in pairs {
                        for expanded in self.expand_path(&pair.key) {
                            // Key paths glob first, value names second.
                            for key in self.glob_registry_keys(&expanded) {
                                let value_names =
                                    glob::glob_registry_values(key.as_ref(), &pair.value);
                                resolved.registry_vals.push((key, value_names));
                            }
                        }
                    }
                }
                SourcePayload::ArtifactGroup { names } => {
                    for member in names {
                        match self.resolve(member) {
                            Some(sub) => resolved.sub_artifacts.push(sub),
                            None => warn!(
                                %member,
                                artifact = %artifact.name,
                                "Skipping unknown sub-artifact"
                            ),
                        }
                    }
                }
            }
        }

        resolved
    }

    /// Expands a single template; results may still contain wildcards.
    pub fn expand_path(&self, template: &str) -> Vec<String> {
        expand_template(template, self)
    }

    /// Expands a list of templates and applies the artifact-declared
    /// separator translation to the results.
    pub fn expand_paths(&self, templates: &[String], separator: Option<&str>) -> Vec<String> {
        let mut results = Vec::new();
        for template in templates {
            for mut expanded in self.expand_path(template) {
                if let Some(separator) = separator {
                    if separator != "/" {
                        expanded = expanded.replace(separator, "/");
                    }
                    if self.os == Some(OsKind::Windows) {
                        expanded = expanded.replace('\\', "/");
                    }
                }
                results.push(expanded);
            }
        }
        results
    }

    /// Globs file templates on this partition, superglobs included.
    pub fn glob_file_paths(&self, templates: &[String]) -> Vec<PathSpec> {
        let targets = expand_superglobs(templates, "/");
        if targets.is_empty() {
            return Vec::new();
        }
        self.vfs.find_paths(
            &targets,
            false,
            false,
            std::slice::from_ref(&self.partition),
        )
    }

    /// Globs a registry key template; empty on non-Windows partitions.
    pub fn glob_registry_keys(&self, template: &str) -> Vec<KeyHandle> {
        let Some(registry) = self.system.registry() else {
            debug!("Cannot glob registry path, system has no registry support");
            return Vec::new();
        };
        glob::glob_registry_keys(registry, template, false)
    }
}

impl VariableSource for ArtifactResolver {
    fn lookup(&self, name: &str) -> Vec<String> {
        self.knowledge.get(name, self)
    }
}

impl ProviderResolver for ArtifactResolver {
    /// Resolves a provider source and projects the results to strings:
    /// key paths for registry keys, value data for registry values,
    /// relative paths for path and directory entries, and full contents
    /// for files.
    fn resolve_source(&self, source: &Source) -> Vec<String> {
        debug!(kind = source.payload.kind_name(), "Resolving source");
        let synthetic = ArtifactDefinition::new(VARIABLE_RESOLVE_NAME, vec![source.clone()]);
        let resolved = self.resolve_definition(&synthetic);

        let mut results = Vec::new();
        for key in &resolved.registry_keys {
            results.push(key.path());
        }
        for (key, value_names) in &resolved.registry_vals {
            for value_name in value_names {
                let Some(value) = key.value(value_name) else {
                    continue;
                };
                if value.data.is_integer() || value.data.is_string() {
                    if let Some(data) = value.data.as_string() {
                        results.push(data);
                    }
                } else {
                    warn!(
                        key = %key.path(),
                        value = %value_name,
                        "Not adding value since it has unparseable type"
                    );
                }
            }
        }
        for spec in resolved.paths.iter().chain(resolved.dirs.iter()) {
            if let Some(path) = spec.relative_path() {
                results.push(path);
            }
        }
        for spec in &resolved.files {
            match self.read_file_text(spec) {
                Ok(text) => results.push(text),
                Err(err) => warn!(
                    path = %spec.reconstruct_full_path(),
                    %err,
                    "Could not read provider file"
                ),
            }
        }

        debug!(count = results.len(), "Resolved source");
        results
    }
}

impl ArtifactResolver {
    fn read_file_text(&self, spec: &PathSpec) -> crate::error::Result<String> {
        let mut reader = self.vfs.open_file(spec)?;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
