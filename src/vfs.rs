//! Virtual filesystem collaborator contract.
//!
//! The resolver core only sees partitions, path-specs and byte streams.
//! `PathSpec` is an opaque location handle chained to its parent, so a
//! caller can tell which containers (partition, snapshot, image format) an
//! entry came from. `LocalVfs` is the one implementation shipped with the
//! crate: it exposes a mounted evidence directory as a single partition.
//! Full image support (volume systems, decryption, snapshots) belongs to an
//! external backend implementing [`VirtualFileSystem`].

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{CollectorError, Result};
use crate::glob::{fs_segment_regex, full_path_regex, has_wildcard};

/// Type indicator of an operating-system (mounted directory) layer.
pub const TYPE_INDICATOR_OS: &str = "OS";
/// Type indicator of a filesystem layer inside an image.
pub const TYPE_INDICATOR_TSK: &str = "TSK";
/// Type indicator of a volume shadow snapshot layer.
pub const TYPE_INDICATOR_VSHADOW: &str = "VSHADOW";

#[derive(Debug)]
struct PathSpecInner {
    type_indicator: String,
    location: Option<String>,
    parent: Option<PathSpec>,
}

/// Opaque handle identifying a location within the VFS.
///
/// Cloning is cheap; the chain to the parent containers is shared.
#[derive(Debug, Clone)]
pub struct PathSpec(Arc<PathSpecInner>);

impl PathSpec {
    /// Creates a path-spec layer.
    pub fn new(
        type_indicator: impl Into<String>,
        location: Option<String>,
        parent: Option<PathSpec>,
    ) -> Self {
        PathSpec(Arc::new(PathSpecInner {
            type_indicator: type_indicator.into(),
            location,
            parent,
        }))
    }

    /// Type indicator of this layer.
    pub fn type_indicator(&self) -> &str {
        &self.0.type_indicator
    }

    /// Location within this layer, if any.
    pub fn location(&self) -> Option<&str> {
        self.0.location.as_deref()
    }

    /// Parent layer, if any.
    pub fn parent(&self) -> Option<&PathSpec> {
        self.0.parent.as_ref()
    }

    /// Path of this entry within its innermost container, without a
    /// trailing slash. The filesystem root yields an empty string.
    pub fn relative_path(&self) -> Option<String> {
        self.0
            .location
            .as_deref()
            .map(|loc| loc.trim_end_matches('/').to_string())
    }

    /// Unique string representation starting at the root of the evidence,
    /// for diagnostics. The outermost layer (the storage path of the
    /// evidence itself) is skipped.
    pub fn reconstruct_full_path(&self) -> String {
        let mut path = String::new();
        let mut current = Some(self);
        while let Some(spec) = current {
            if spec.parent().is_none() {
                break;
            }
            let segment = match spec.location() {
                Some(loc) => loc.to_string(),
                None => format!("/{}", spec.type_indicator()),
            };
            path = segment + &path;
            current = spec.parent();
        }
        path.trim_end_matches('/').to_string()
    }

    /// Returns true if the given type indicator appears anywhere in this
    /// path-spec's chain, however deeply the entry is nested.
    pub fn is_on_filesystem(&self, type_indicator: &str) -> bool {
        let mut current = Some(self);
        while let Some(spec) = current {
            if spec.type_indicator() == type_indicator {
                return true;
            }
            current = spec.parent();
        }
        false
    }
}

/// Entry type reported by [`VirtualFileSystem::stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEntryType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Link,
    /// Anything else (devices, sockets, ...).
    Other,
}

/// Stat metadata of an entry.
///
/// Missing timestamps stay `None`; the extractor defaults them to the
/// epoch when writing records. A missing size defaults to zero.
#[derive(Debug, Clone)]
pub struct FileStat {
    /// Size in bytes.
    pub size: u64,
    /// Entry name (last path component).
    pub name: String,
    /// Entry type.
    pub entry_type: FileEntryType,
    /// Last access time.
    pub accessed: Option<DateTime<Utc>>,
    /// Last modification time.
    pub modified: Option<DateTime<Utc>>,
    /// Creation time.
    pub created: Option<DateTime<Utc>>,
}

/// Access to partitions, path search and file contents over evidence.
pub trait VirtualFileSystem {
    /// All partitions of the evidence.
    fn partitions(&self) -> Vec<PathSpec>;

    /// Finds entries matching the given path templates.
    ///
    /// Templates use `/` separators and may contain `*` and `?` wildcards
    /// per segment. With `regex` set, each template is instead matched as a
    /// regular expression against full relative paths; the resolver never
    /// uses that mode, it exists for direct callers. The search is
    /// restricted to the given partitions; results preserve discovery
    /// order.
    fn find_paths(
        &self,
        templates: &[String],
        case_sensitive: bool,
        regex: bool,
        partitions: &[PathSpec],
    ) -> Vec<PathSpec>;

    /// Stat metadata for an entry.
    fn stat(&self, spec: &PathSpec) -> Result<FileStat>;

    /// Names of the entry's data streams. The unnamed default stream is
    /// the empty string and always comes first.
    fn data_streams(&self, spec: &PathSpec) -> Result<Vec<String>> {
        let _ = spec;
        Ok(vec![String::new()])
    }

    /// Opens one named data stream of an entry.
    fn open_data_stream(&self, spec: &PathSpec, stream: &str) -> Result<Box<dyn Read>>;

    /// Opens the default data stream of an entry.
    fn open_file(&self, spec: &PathSpec) -> Result<Box<dyn Read>> {
        self.open_data_stream(spec, "")
    }
}

/// A mounted evidence directory exposed as a single-partition VFS.
pub struct LocalVfs {
    root: PathBuf,
    partition: PathSpec,
}

impl LocalVfs {
    /// Creates a VFS over a directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory does not exist.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(CollectorError::PathNotFound(root.display().to_string()));
        }
        let partition = PathSpec::new(
            TYPE_INDICATOR_OS,
            Some(root.display().to_string()),
            None,
        );
        Ok(LocalVfs { root, partition })
    }

    fn spec_for(&self, relative: &str) -> PathSpec {
        let location = if relative.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", relative)
        };
        PathSpec::new(
            TYPE_INDICATOR_OS,
            Some(location),
            Some(self.partition.clone()),
        )
    }

    fn fs_path(&self, spec: &PathSpec) -> Result<PathBuf> {
        let relative = spec
            .relative_path()
            .ok_or_else(|| CollectorError::PathNotFound(spec.reconstruct_full_path()))?;
        Ok(self.root.join(relative.trim_start_matches('/')))
    }

    /// Matches one template segment-wise, descending from `dir`.
    fn glob_segments(
        &self,
        dir: &Path,
        relative: &str,
        segments: &[&str],
        case_sensitive: bool,
        out: &mut Vec<PathSpec>,
    ) {
        let Some((segment, rest)) = segments.split_first() else {
            out.push(self.spec_for(relative));
            return;
        };
        if segment.is_empty() {
            self.glob_segments(dir, relative, rest, case_sensitive, out);
            return;
        }

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(dir = %dir.display(), %err, "Cannot list directory");
                return;
            }
        };

        let pattern = if has_wildcard(segment) {
            match fs_segment_regex(segment, case_sensitive) {
                Some(regex) => Some(regex),
                None => {
                    warn!(%segment, "Cannot compile glob segment");
                    return;
                }
            }
        } else {
            None
        };

        let mut matched: Vec<(String, PathBuf, bool)> = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let hit = match &pattern {
                Some(regex) => regex.is_match(&name),
                None if case_sensitive => name == *segment,
                None => name.eq_ignore_ascii_case(segment),
            };
            if hit {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                matched.push((name, entry.path(), is_dir));
            }
        }
        matched.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, path, is_dir) in matched {
            let child_relative = if relative.is_empty() {
                name
            } else {
                format!("{}/{}", relative, name)
            };
            if rest.is_empty() {
                out.push(self.spec_for(&child_relative));
            } else if is_dir {
                self.glob_segments(&path, &child_relative, rest, case_sensitive, out);
            }
        }
    }

    /// Collects relative paths of every entry below the root.
    fn walk_all(&self, dir: &Path, relative: &str, out: &mut Vec<String>) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        let mut children: Vec<_> = entries.flatten().collect();
        children.sort_by_key(|e| e.file_name());
        for entry in children {
            let name = entry.file_name().to_string_lossy().to_string();
            let child_relative = if relative.is_empty() {
                name
            } else {
                format!("{}/{}", relative, name)
            };
            out.push(child_relative.clone());
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                self.walk_all(&entry.path(), &child_relative, out);
            }
        }
    }
}

impl VirtualFileSystem for LocalVfs {
    fn partitions(&self) -> Vec<PathSpec> {
        vec![self.partition.clone()]
    }

    fn find_paths(
        &self,
        templates: &[String],
        case_sensitive: bool,
        regex: bool,
        _partitions: &[PathSpec],
    ) -> Vec<PathSpec> {
        let mut out = Vec::new();
        if regex {
            let mut all = Vec::new();
            self.walk_all(&self.root, "", &mut all);
            for template in templates {
                let pattern = template.trim_start_matches('/');
                let Some(compiled) = full_path_regex(pattern, case_sensitive) else {
                    warn!(%template, "Cannot compile path regex");
                    continue;
                };
                for relative in &all {
                    if compiled.is_match(relative) {
                        out.push(self.spec_for(relative));
                    }
                }
            }
            return out;
        }

        for template in templates {
            let segments: Vec<&str> = template.trim_start_matches('/').split('/').collect();
            self.glob_segments(&self.root, "", &segments, case_sensitive, &mut out);
        }
        out
    }

    fn stat(&self, spec: &PathSpec) -> Result<FileStat> {
        let path = self.fs_path(spec)?;
        let metadata = fs::symlink_metadata(&path)?;
        let file_type = metadata.file_type();
        let entry_type = if file_type.is_file() {
            FileEntryType::File
        } else if file_type.is_dir() {
            FileEntryType::Directory
        } else if file_type.is_symlink() {
            FileEntryType::Link
        } else {
            FileEntryType::Other
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(FileStat {
            size: metadata.len(),
            name,
            entry_type,
            accessed: metadata.accessed().ok().map(DateTime::<Utc>::from),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            created: metadata.created().ok().map(DateTime::<Utc>::from),
        })
    }

    fn open_data_stream(&self, spec: &PathSpec, stream: &str) -> Result<Box<dyn Read>> {
        if !stream.is_empty() {
            return Err(CollectorError::PathNotFound(format!(
                "{}:{}",
                spec.reconstruct_full_path(),
                stream
            )));
        }
        let path = self.fs_path(spec)?;
        Ok(Box::new(File::open(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Windows/System32/config")).unwrap();
        fs::create_dir_all(dir.path().join("Users/Alice")).unwrap();
        let mut f = File::create(dir.path().join("Windows/System32/config/SOFTWARE")).unwrap();
        f.write_all(b"hive").unwrap();
        File::create(dir.path().join("Users/Alice/NTUSER.DAT")).unwrap();
        dir
    }

    #[test]
    fn test_find_exact_case_insensitive() {
        let dir = sample_tree();
        let vfs = LocalVfs::new(dir.path()).unwrap();
        let parts = vfs.partitions();
        let found = vfs.find_paths(
            &["/windows/system32/CONFIG/software".to_string()],
            false,
            false,
            &parts,
        );
        assert_eq!(found.len(), 1);
        // The discovered spec carries the on-disk casing.
        assert_eq!(
            found[0].relative_path().unwrap(),
            "/Windows/System32/config/SOFTWARE"
        );
    }

    #[test]
    fn test_find_wildcard_segment() {
        let dir = sample_tree();
        let vfs = LocalVfs::new(dir.path()).unwrap();
        let parts = vfs.partitions();
        let found = vfs.find_paths(&["/Users/*/NTUSER.DAT".to_string()], false, false, &parts);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].relative_path().unwrap(), "/Users/Alice/NTUSER.DAT");
    }

    #[test]
    fn test_find_regex_mode() {
        let dir = sample_tree();
        let vfs = LocalVfs::new(dir.path()).unwrap();
        let parts = vfs.partitions();
        let found = vfs.find_paths(
            &["Users/.*/NTUSER\\.DAT".to_string()],
            false,
            true,
            &parts,
        );
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_stat_and_read() {
        let dir = sample_tree();
        let vfs = LocalVfs::new(dir.path()).unwrap();
        let parts = vfs.partitions();
        let found = vfs.find_paths(
            &["/Windows/System32/config/SOFTWARE".to_string()],
            false,
            false,
            &parts,
        );
        let stat = vfs.stat(&found[0]).unwrap();
        assert_eq!(stat.entry_type, FileEntryType::File);
        assert_eq!(stat.size, 4);
        assert_eq!(stat.name, "SOFTWARE");

        let mut content = Vec::new();
        vfs.open_file(&found[0]).unwrap().read_to_end(&mut content).unwrap();
        assert_eq!(content, b"hive");
    }

    #[test]
    fn test_pathspec_chain() {
        let image = PathSpec::new("RAW", Some("/evidence/image.dd".to_string()), None);
        let shadow = PathSpec::new(TYPE_INDICATOR_VSHADOW, None, Some(image.clone()));
        let fs_layer = PathSpec::new(
            TYPE_INDICATOR_TSK,
            Some("/Windows/notepad.exe".to_string()),
            Some(shadow),
        );

        assert!(fs_layer.is_on_filesystem(TYPE_INDICATOR_VSHADOW));
        assert!(!image.is_on_filesystem(TYPE_INDICATOR_VSHADOW));
        assert_eq!(
            fs_layer.reconstruct_full_path(),
            "/VSHADOW/Windows/notepad.exe"
        );
        assert_eq!(fs_layer.relative_path().unwrap(), "/Windows/notepad.exe");
    }
}
