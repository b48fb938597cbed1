//! Partition driver.
//!
//! Loops over the partitions of one piece of evidence, detects the OS of
//! each, builds the per-partition system context and resolver, and
//! invokes extraction. Volume-shadow-snapshot partitions are filtered
//! out. A failing partition is logged and the loop continues.

use std::sync::Arc;

use tracing::{info, warn};

use crate::catalog::ArtifactCatalog;
use crate::definitions::OsKind;
use crate::os::{BasicOs, OperatingSystem, UnknownOs};
use crate::os_windows::WindowsSystem;
use crate::registry::HiveParser;
use crate::resolver::ArtifactResolver;
use crate::store::OutputStore;
use crate::vfs::{PathSpec, VirtualFileSystem, TYPE_INDICATOR_VSHADOW};

/// One partition of an image, with its label.
#[derive(Clone)]
pub struct PartitionInfo {
    /// Drive-style label: `c` for the first partition, then `d`, ...
    pub name: String,
    /// Root of the partition.
    pub path_spec: PathSpec,
}

/// Label for the partition at the given index.
pub fn partition_label(index: usize) -> String {
    char::from(b'c'.wrapping_add(index as u8)).to_string()
}

/// Determines the operating system of a partition.
///
/// Probes well-known first-level paths case-insensitively. Matching is
/// done on both separators since path-specs are backend dependent.
pub fn guess_os(vfs: &dyn VirtualFileSystem, partition: &PathSpec) -> OsKind {
    let probes = [
        "/etc".to_string(),
        "/System/Library".to_string(),
        "/Windows/System32".to_string(),
        "/WINNT/System32".to_string(),
        "/WINNT35/System32".to_string(),
        "/WTSRV/System32".to_string(),
    ];

    let mut locations = Vec::new();
    for spec in vfs.find_paths(&probes, false, false, std::slice::from_ref(partition)) {
        if let Some(path) = spec.relative_path() {
            locations.push(path.to_lowercase().trim_end_matches('/').to_string());
        }
    }

    let windows_locations = [
        "/windows/system32",
        "\\windows\\system32",
        "/winnt/system32",
        "\\winnt\\system32",
        "/winnt35/system32",
        "\\winnt35\\system32",
        "/wtsrv/system32",
        "\\wtsrv\\system32",
    ];
    if locations
        .iter()
        .any(|l| windows_locations.contains(&l.as_str()))
    {
        return OsKind::Windows;
    }
    if locations.iter().any(|l| l == "/system/library") {
        return OsKind::MacOs;
    }
    if locations.iter().any(|l| l == "/etc") {
        return OsKind::Linux;
    }
    OsKind::Unknown
}

/// Manages artifact extraction from one piece of evidence.
pub struct ArtifactExtractor {
    vfs: Arc<dyn VirtualFileSystem>,
    hive_parser: Arc<dyn HiveParser>,
}

impl ArtifactExtractor {
    /// Creates an extractor over a VFS backend and a hive parsing backend.
    pub fn new(vfs: Arc<dyn VirtualFileSystem>, hive_parser: Arc<dyn HiveParser>) -> Self {
        ArtifactExtractor { vfs, hive_parser }
    }

    /// Extracts one artifact from every real partition of the evidence.
    ///
    /// Returns true iff anything was written on any partition.
    pub fn extract_artifact(
        &self,
        catalog: &ArtifactCatalog,
        artifact_name: &str,
        store: &mut dyn OutputStore,
    ) -> bool {
        // Snapshot partitions are views of a real partition and would
        // duplicate every hit; labels still count the skipped slots.
        let partitions: Vec<PartitionInfo> = self
            .vfs
            .partitions()
            .into_iter()
            .enumerate()
            .filter(|(_, spec)| !spec.is_on_filesystem(TYPE_INDICATOR_VSHADOW))
            .map(|(index, spec)| PartitionInfo {
                name: partition_label(index),
                path_spec: spec,
            })
            .collect();
        info!(count = partitions.len(), "Found partitions");

        let mut extracted = false;
        for partinfo in &partitions {
            let Some(system) = self.system_for(partinfo) else {
                continue;
            };
            info!(partition = %partinfo.name, "=== Starting processing of partition");
            let resolver = ArtifactResolver::new(
                self.vfs.clone(),
                partinfo.path_spec.clone(),
                partinfo.name.clone(),
                catalog,
                system,
            );
            extracted |= resolver.process(artifact_name, store);
        }
        extracted
    }

    /// Builds the OS context of a partition. A failed Windows bootstrap
    /// skips the partition entirely; nothing is extracted from it.
    fn system_for(&self, partinfo: &PartitionInfo) -> Option<Box<dyn OperatingSystem>> {
        match guess_os(self.vfs.as_ref(), &partinfo.path_spec) {
            OsKind::Windows => {
                match WindowsSystem::new(
                    self.vfs.clone(),
                    partinfo.path_spec.clone(),
                    self.hive_parser.clone(),
                ) {
                    Ok(system) => Some(Box::new(system)),
                    Err(err) => {
                        warn!(
                            partition = %partinfo.path_spec.reconstruct_full_path(),
                            %err,
                            "Encountered error during processing, skipping partition"
                        );
                        None
                    }
                }
            }
            OsKind::Unknown => {
                warn!(
                    partition = %partinfo.path_spec.reconstruct_full_path(),
                    "Operating system not detected on partition, only basic extraction possible"
                );
                Some(Box::new(UnknownOs))
            }
            other => {
                info!(
                    partition = %partinfo.path_spec.reconstruct_full_path(),
                    os = other.name(),
                    "No dedicated support for operating system, using basic extraction"
                );
                Some(Box::new(BasicOs::new(other)))
            }
        }
    }
}
