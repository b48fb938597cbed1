//! Shared fixtures for the integration tests: an in-memory registry tree
//! with a hive parser over it, a capturing output store, and catalogue
//! helpers.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use artifact_collector::catalog::ArtifactCatalog;
use artifact_collector::definitions::OsKind;
use artifact_collector::error::{CollectorError, Result};
use artifact_collector::os::OperatingSystem;
use artifact_collector::registry::{
    normalize_key_path, HiveParser, KeyHandle, RegistryKey, RegistryTime, RegistryValue,
    WindowsRegistry,
};
use artifact_collector::store::{Origin, OutputStore, RecordId};
use artifact_collector::vfs::FileStat;

/// In-memory registry key.
pub struct MemKey {
    name: String,
    path: String,
    children: Vec<Arc<MemKey>>,
    values: Vec<RegistryValue>,
    last_written: Option<RegistryTime>,
}

impl RegistryKey for MemKey {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> String {
        self.path.clone()
    }

    fn subkeys(&self) -> Vec<KeyHandle> {
        self.children
            .iter()
            .map(|child| child.clone() as KeyHandle)
            .collect()
    }

    fn values(&self) -> Vec<RegistryValue> {
        self.values.clone()
    }

    fn last_written_time(&self) -> Option<RegistryTime> {
        self.last_written
    }
}

/// Builder for in-memory registry trees.
pub struct KeyBuilder {
    name: String,
    children: Vec<KeyBuilder>,
    values: Vec<RegistryValue>,
    last_written: Option<RegistryTime>,
}

impl KeyBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        KeyBuilder {
            name: name.into(),
            children: Vec::new(),
            values: Vec::new(),
            last_written: None,
        }
    }

    pub fn child(mut self, child: KeyBuilder) -> Self {
        self.children.push(child);
        self
    }

    pub fn value(mut self, value: RegistryValue) -> Self {
        self.values.push(value);
        self
    }

    pub fn written(mut self, seconds: i64, hundreds_ns: u32) -> Self {
        self.last_written = Some(RegistryTime {
            seconds,
            hundreds_ns,
        });
        self
    }

    /// Builds the subtree; `parent_path` is empty for roots.
    pub fn build(self, parent_path: &str) -> Arc<MemKey> {
        let path = if parent_path.is_empty() {
            self.name.clone()
        } else {
            format!("{}\\{}", parent_path, self.name)
        };
        let children = self
            .children
            .into_iter()
            .map(|child| child.build(&path))
            .collect();
        Arc::new(MemKey {
            name: self.name,
            path,
            children,
            values: self.values,
            last_written: self.last_written,
        })
    }

    /// Builds a hive root whose children start at the given virtual path.
    /// The root itself is addressed by `prefix`.
    pub fn build_rooted(self, prefix: &str) -> Arc<MemKey> {
        let children = self
            .children
            .into_iter()
            .map(|child| child.build(prefix))
            .collect();
        Arc::new(MemKey {
            name: self.name,
            path: prefix.to_string(),
            children,
            values: self.values,
            last_written: self.last_written,
        })
    }
}

/// Registry over in-memory root keys (e.g. one named
/// `HKEY_LOCAL_MACHINE`).
pub struct MemRegistry {
    roots: Vec<Arc<MemKey>>,
}

impl MemRegistry {
    pub fn new(roots: Vec<Arc<MemKey>>) -> Self {
        MemRegistry { roots }
    }
}

impl WindowsRegistry for MemRegistry {
    fn open_key(&self, path: &str) -> Option<KeyHandle> {
        let path = normalize_key_path(path);
        let mut parts = path.split('\\');
        let first = parts.next()?;
        let root = self
            .roots
            .iter()
            .find(|root| root.name().eq_ignore_ascii_case(first))?;
        let mut current: KeyHandle = root.clone();
        for part in parts {
            current = current
                .subkeys()
                .into_iter()
                .find(|key| key.name().eq_ignore_ascii_case(part))?;
        }
        Some(current)
    }
}

/// Hive parser serving canned in-memory roots by hive file name suffix.
pub struct MemHiveParser {
    hives: HashMap<String, Arc<MemKey>>,
}

impl MemHiveParser {
    pub fn new() -> Self {
        MemHiveParser {
            hives: HashMap::new(),
        }
    }

    /// Registers a hive root under a file-name suffix such as `SOFTWARE`
    /// or `NTUSER.DAT`.
    pub fn with_hive(mut self, suffix: impl Into<String>, root: Arc<MemKey>) -> Self {
        let suffix: String = suffix.into();
        self.hives.insert(suffix.to_lowercase(), root);
        self
    }
}

impl HiveParser for MemHiveParser {
    fn open_hive(&self, path: &Path) -> Result<KeyHandle> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        for (suffix, root) in &self.hives {
            if name.ends_with(suffix) {
                return Ok(root.clone() as KeyHandle);
            }
        }
        Err(CollectorError::HiveNotFound(path.display().to_string()))
    }
}

/// OS context fixture with explicit kind, registry and seeds.
pub struct TestSystem {
    pub kind: OsKind,
    pub registry: Option<MemRegistry>,
    pub seeds: Vec<(String, Vec<String>)>,
}

impl TestSystem {
    pub fn windows(registry: MemRegistry) -> Self {
        TestSystem {
            kind: OsKind::Windows,
            registry: Some(registry),
            seeds: Vec::new(),
        }
    }

    pub fn bare(kind: OsKind) -> Self {
        TestSystem {
            kind,
            registry: None,
            seeds: Vec::new(),
        }
    }

    pub fn seed(mut self, key: &str, values: &[&str]) -> Self {
        self.seeds
            .push((key.to_string(), values.iter().map(|v| v.to_string()).collect()));
        self
    }
}

impl OperatingSystem for TestSystem {
    fn os_kind(&self) -> OsKind {
        self.kind
    }

    fn registry(&self) -> Option<&dyn WindowsRegistry> {
        self.registry.as_ref().map(|r| r as &dyn WindowsRegistry)
    }

    fn seed_variables(&self) -> Vec<(String, Vec<String>)> {
        self.seeds.clone()
    }
}

/// Captured file record.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: u64,
    pub artifact: String,
    pub name: String,
    pub size: u64,
    pub origin_path: String,
    pub partition: String,
}

/// Captured registry key record.
#[derive(Debug, Clone)]
pub struct KeyRecord {
    pub id: u64,
    pub artifact: String,
    pub key: String,
    pub modified: DateTime<Utc>,
}

/// Captured registry value record.
#[derive(Debug, Clone)]
pub struct ValueRecord {
    pub key_id: u64,
    pub value_type: String,
    pub data: Vec<u8>,
    pub name: String,
}

/// Output store that captures everything in memory for assertions.
#[derive(Default)]
pub struct MemStore {
    pub files: Vec<FileRecord>,
    pub exports: Rc<RefCell<Vec<(u64, String, Vec<u8>)>>>,
    pub hashes: Vec<(u64, String, String)>,
    pub registry_keys: Vec<KeyRecord>,
    pub registry_values: Vec<ValueRecord>,
    next_id: u64,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.files.len() + self.registry_keys.len() + self.registry_values.len()
    }

    pub fn export_bytes(&self, name: &str) -> Option<Vec<u8>> {
        self.exports
            .borrow()
            .iter()
            .find(|(_, export_name, _)| export_name == name)
            .map(|(_, _, bytes)| bytes.clone())
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

struct MemWriter {
    id: u64,
    name: String,
    buffer: Vec<u8>,
    sink: Rc<RefCell<Vec<(u64, String, Vec<u8>)>>>,
}

impl Write for MemWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Drop for MemWriter {
    fn drop(&mut self) {
        self.sink.borrow_mut().push((
            self.id,
            std::mem::take(&mut self.name),
            std::mem::take(&mut self.buffer),
        ));
    }
}

impl OutputStore for MemStore {
    fn insert_file_record(
        &mut self,
        artifact: &str,
        name: &str,
        stat: &FileStat,
        origin: Origin,
    ) -> Result<RecordId> {
        let id = self.next();
        self.files.push(FileRecord {
            id,
            artifact: artifact.to_string(),
            name: name.to_string(),
            size: stat.size,
            origin_path: origin.path,
            partition: origin.partition,
        });
        Ok(RecordId(id))
    }

    fn open_export_stream(
        &mut self,
        record: RecordId,
        export_name: &str,
    ) -> Result<Box<dyn Write>> {
        Ok(Box::new(MemWriter {
            id: record.0,
            name: export_name.to_string(),
            buffer: Vec::new(),
            sink: self.exports.clone(),
        }))
    }

    fn record_hash(&mut self, record: RecordId, algorithm: &str, digest: &str) -> Result<()> {
        self.hashes
            .push((record.0, algorithm.to_string(), digest.to_string()));
        Ok(())
    }

    fn insert_registry_key(
        &mut self,
        artifact: &str,
        modified: DateTime<Utc>,
        key_path: &str,
    ) -> Result<RecordId> {
        let id = self.next();
        self.registry_keys.push(KeyRecord {
            id,
            artifact: artifact.to_string(),
            key: key_path.to_string(),
            modified,
        });
        Ok(RecordId(id))
    }

    fn insert_registry_value(
        &mut self,
        key: RecordId,
        data_type: &str,
        data: &[u8],
        name: &str,
    ) -> Result<()> {
        self.registry_values.push(ValueRecord {
            key_id: key.0,
            value_type: data_type.to_string(),
            data: data.to_vec(),
            name: name.to_string(),
        });
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Parses a catalogue from inline YAML.
pub fn catalog_from(yaml: &str) -> ArtifactCatalog {
    let mut catalog = ArtifactCatalog::new();
    catalog.read_str(yaml, "inline.yaml").expect("test catalogue");
    catalog
}

/// A registry tree holding the standard run keys with one value.
pub fn run_keys_registry() -> MemRegistry {
    let root = KeyBuilder::new("HKEY_LOCAL_MACHINE").child(
        KeyBuilder::new("Software").child(
            KeyBuilder::new("Microsoft").child(
                KeyBuilder::new("Windows").child(
                    KeyBuilder::new("CurrentVersion")
                        .child(
                            KeyBuilder::new("Run")
                                .written(1_600_000_000, 0)
                                .value(RegistryValue::string("Foo", "cmd.exe")),
                        )
                        .child(KeyBuilder::new("RunOnce").written(1_600_000_100, 0))
                        .child(KeyBuilder::new("Explorer")),
                ),
            ),
        ),
    );
    MemRegistry::new(vec![root.build("")])
}
