//! # Forensic Artifact Collector
//!
//! Resolves declarative forensic artifact definitions against mounted
//! evidence and exports the results into an append-only record store.
//!
//! ## Features
//!
//! - **Declarative artifacts**: named bundles of file-path globs and
//!   registry key/value patterns, loaded from YAML catalogues
//! - **Recursive variables**: `%SystemRoot%`-style tokens whose values may
//!   come from provider artifacts, with cycle detection and memoisation
//! - **Two glob namespaces**: POSIX-like file paths and `\`-separated
//!   registry paths, both with bounded-depth `**` superglobs
//! - **Tolerant traversal**: corrupt or missing evidence degrades to
//!   warnings and partial results, never to an aborted run
//!
//! ## Architecture
//!
//! Resolution flows through a handful of layers:
//!
//! 1. **Catalogue**: artifact definitions, loaded once and immutable
//! 2. **Knowledge base**: lazy, memoised variable table per partition
//! 3. **Path expander**: `%var%` cross-product substitution
//! 4. **Glob engines**: filesystem search via the VFS, registry descent
//!    via the hive mapping table
//! 5. **Resolver**: per-artifact orchestration and OS filtering
//! 6. **Extractor**: streamed export into the output store
//!
//! The virtual filesystem, the binary hive parser and the output store
//! are collaborators behind traits; [`vfs::LocalVfs`] and
//! [`store::JsonlStore`] are the implementations shipped with the crate.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use artifact_collector::catalog::ArtifactCatalog;
//! use artifact_collector::collector::ArtifactExtractor;
//! use artifact_collector::registry::DisabledHiveParser;
//! use artifact_collector::store::{JsonlStore, OutputStore};
//! use artifact_collector::vfs::LocalVfs;
//!
//! # fn main() -> artifact_collector::error::Result<()> {
//! let mut catalog = ArtifactCatalog::new();
//! catalog.read_folder("artifacts")?;
//!
//! let vfs = Arc::new(LocalVfs::new("/mnt/evidence")?);
//! let mut store = JsonlStore::create("out")?;
//!
//! let extractor = ArtifactExtractor::new(vfs, Arc::new(DisabledHiveParser));
//! extractor.extract_artifact(&catalog, "LinuxPasswdFile", &mut store);
//! store.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod collector;
pub mod definitions;
pub mod error;
pub mod expand;
pub mod extract;
pub mod glob;
pub mod keys;
pub mod knowledge;
pub mod os;
pub mod os_windows;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod vfs;

// Re-export main types for convenience
pub use catalog::ArtifactCatalog;
pub use collector::{guess_os, ArtifactExtractor, PartitionInfo};
pub use definitions::{ArtifactDefinition, OsKind, Source, SourcePayload, UserAccount};
pub use error::{CollectorError, Result};
pub use extract::Extractor;
pub use knowledge::{CasePreservingSet, KnowledgeBase};
pub use os::{BasicOs, OperatingSystem, UnknownOs};
pub use os_windows::WindowsSystem;
pub use registry::{
    DisabledHiveParser, HiveParser, KeyHandle, RegistryKey, RegistryValue, ValueData,
    WindowsRegistry,
};
pub use resolver::{ArtifactResolver, ResolvedArtifact};
pub use store::{JsonlStore, OutputStore, RecordId};
pub use vfs::{FileStat, LocalVfs, PathSpec, VirtualFileSystem};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
