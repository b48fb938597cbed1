//! Extraction scenarios: registry records, file round-trips and
//! append-only store semantics.

mod common;

use std::fs::{self, File};
use std::io::Write;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use artifact_collector::catalog::ArtifactCatalog;
use artifact_collector::definitions::OsKind;
use artifact_collector::registry::{RegistryValue, ValueData};
use artifact_collector::resolver::ArtifactResolver;
use artifact_collector::vfs::{LocalVfs, VirtualFileSystem};

use common::{catalog_from, run_keys_registry, KeyBuilder, MemRegistry, MemStore, TestSystem};

fn resolver_for(
    vfs: Arc<LocalVfs>,
    catalog: &ArtifactCatalog,
    system: TestSystem,
) -> ArtifactResolver {
    let partition = vfs.partitions().remove(0);
    ArtifactResolver::new(vfs, partition, "c", catalog, Box::new(system))
}

const RUN_KEYS_ARTIFACT: &str = r#"
name: WindowsRunKeys
sources:
- type: REGISTRY_KEY
  attributes:
    keys: ['HKEY_LOCAL_MACHINE\Software\Microsoft\Windows\CurrentVersion\Run']
supported_os: [Windows]
"#;

#[test]
fn run_keys_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = catalog_from(RUN_KEYS_ARTIFACT);
    let vfs = Arc::new(LocalVfs::new(dir.path()).unwrap());
    let resolver = resolver_for(vfs, &catalog, TestSystem::windows(run_keys_registry()));

    let mut store = MemStore::new();
    assert!(resolver.process("WindowsRunKeys", &mut store));

    assert_eq!(store.registry_keys.len(), 1);
    let key = &store.registry_keys[0];
    assert_eq!(key.artifact, "WindowsRunKeys");
    assert_eq!(
        key.key,
        "HKEY_LOCAL_MACHINE\\Software\\Microsoft\\Windows\\CurrentVersion\\Run"
    );
    assert_eq!(key.modified.timestamp(), 1_600_000_000);

    assert_eq!(store.registry_values.len(), 1);
    let value = &store.registry_values[0];
    assert_eq!(value.key_id, key.id);
    assert_eq!(value.name, "Foo");
    assert_eq!(value.value_type, "REG_SZ");
    assert_eq!(value.data, b"cmd.exe".to_vec());
}

#[test]
fn registry_value_source_filters_values() {
    let dir = tempfile::tempdir().unwrap();
    let registry = {
        let root = KeyBuilder::new("HKEY_LOCAL_MACHINE").child(
            KeyBuilder::new("System").child(
                KeyBuilder::new("Setup")
                    .value(RegistryValue::string("Keep", "yes"))
                    .value(RegistryValue::string("Drop", "no")),
            ),
        );
        MemRegistry::new(vec![root.build("")])
    };
    let catalog = catalog_from(
        r#"
name: SetupValue
sources:
- type: REGISTRY_VALUE
  attributes:
    key_value_pairs:
    - key: 'HKEY_LOCAL_MACHINE\System\Setup'
      value: Keep
supported_os: [Windows]
"#,
    );
    let vfs = Arc::new(LocalVfs::new(dir.path()).unwrap());
    let resolver = resolver_for(vfs, &catalog, TestSystem::windows(registry));

    let mut store = MemStore::new();
    assert!(resolver.process("SetupValue", &mut store));
    assert_eq!(store.registry_keys.len(), 1);
    assert_eq!(store.registry_values.len(), 1);
    assert_eq!(store.registry_values[0].name, "Keep");
}

#[test]
fn value_type_and_name_normalisation() {
    let dir = tempfile::tempdir().unwrap();
    let registry = {
        let root = KeyBuilder::new("HKEY_LOCAL_MACHINE").child(
            KeyBuilder::new("System").child(
                KeyBuilder::new("Control")
                    .value(RegistryValue::dword("Level", 2))
                    .value(RegistryValue::new(None, ValueData::String("top".into()), "REG_SZ"))
                    .value(RegistryValue::new(
                        Some(String::new()),
                        ValueData::Binary(vec![0xde, 0xad]),
                        "REG_NONE",
                    )),
            ),
        );
        MemRegistry::new(vec![root.build("")])
    };
    let catalog = catalog_from(
        r#"
name: ControlKey
sources:
- type: REGISTRY_KEY
  attributes:
    keys: ['HKEY_LOCAL_MACHINE\System\Control']
supported_os: [Windows]
"#,
    );
    let vfs = Arc::new(LocalVfs::new(dir.path()).unwrap());
    let resolver = resolver_for(vfs, &catalog, TestSystem::windows(registry));

    let mut store = MemStore::new();
    assert!(resolver.process("ControlKey", &mut store));

    // Modified time was never written; defaults to the epoch.
    assert_eq!(store.registry_keys[0].modified.timestamp(), 0);

    assert_eq!(store.registry_values.len(), 3);
    let dword = &store.registry_values[0];
    assert_eq!(dword.value_type, "REG_DWORD");
    assert_eq!(dword.data, 2u32.to_le_bytes().to_vec());

    // Unnamed and empty-named values are stored as (Default).
    assert_eq!(store.registry_values[1].name, "(Default)");
    assert_eq!(store.registry_values[2].name, "(Default)");
    // Binary data is stored verbatim under its declared type.
    assert_eq!(store.registry_values[2].value_type, "REG_NONE");
    assert_eq!(store.registry_values[2].data, vec![0xde, 0xad]);
}

#[test]
fn file_export_round_trip_with_hash() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("etc")).unwrap();
    let payload = b"127.0.0.1 localhost\n";
    File::create(dir.path().join("etc/hosts"))
        .unwrap()
        .write_all(payload)
        .unwrap();

    let catalog = catalog_from(
        r#"
name: HostsFile
sources:
- type: FILE
  attributes:
    paths: ['/etc/hosts']
"#,
    );
    let vfs = Arc::new(LocalVfs::new(dir.path()).unwrap());
    let resolver = resolver_for(vfs, &catalog, TestSystem::bare(OsKind::Linux));

    let mut store = MemStore::new();
    assert!(resolver.process("HostsFile", &mut store));

    assert_eq!(store.files.len(), 1);
    let record = &store.files[0];
    assert_eq!(record.name, "hosts");
    assert_eq!(record.size, payload.len() as u64);
    assert_eq!(record.origin_path, "/etc/hosts");
    assert_eq!(record.partition, "c");

    // The export blob carries the exact original bytes.
    let blob = store.export_bytes("c_etc_hosts").unwrap();
    assert_eq!(blob, payload.to_vec());

    // Only the first stream is hashed.
    assert_eq!(store.hashes.len(), 1);
    let expected = hex::encode(Sha256::digest(payload));
    assert_eq!(store.hashes[0].2, expected);
}

#[test]
fn directories_are_not_exported_as_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("data/sub")).unwrap();

    let catalog = catalog_from(
        r#"
name: DataEntries
sources:
- type: FILE
  attributes:
    paths: ['/data/*']
"#,
    );
    let vfs = Arc::new(LocalVfs::new(dir.path()).unwrap());
    let resolver = resolver_for(vfs, &catalog, TestSystem::bare(OsKind::Linux));

    // The glob matches the directory, but file sources only keep
    // regular files.
    let resolved = resolver.resolve("DataEntries").unwrap();
    assert!(resolved.files.is_empty());

    let mut store = MemStore::new();
    assert!(!resolver.process("DataEntries", &mut store));
    assert_eq!(store.record_count(), 0);
}

#[test]
fn repeated_processing_is_additive() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = catalog_from(RUN_KEYS_ARTIFACT);
    let vfs = Arc::new(LocalVfs::new(dir.path()).unwrap());
    let resolver = resolver_for(vfs, &catalog, TestSystem::windows(run_keys_registry()));

    let mut store = MemStore::new();
    assert!(resolver.process("WindowsRunKeys", &mut store));
    let first = store.record_count();
    assert!(resolver.process("WindowsRunKeys", &mut store));
    // No dedup: the store only ever appends.
    assert_eq!(store.record_count(), first * 2);
}

#[test]
fn directory_source_fills_dirs_not_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("var/log")).unwrap();

    let catalog = catalog_from(
        r#"
name: LogDir
sources:
- type: DIRECTORY
  attributes:
    paths: ['/var/log']
"#,
    );
    let vfs = Arc::new(LocalVfs::new(dir.path()).unwrap());
    let resolver = resolver_for(vfs, &catalog, TestSystem::bare(OsKind::Linux));

    let resolved = resolver.resolve("LogDir").unwrap();
    assert!(resolved.files.is_empty());
    assert_eq!(resolved.dirs.len(), 1);
    assert!(!resolved.is_empty());

    // Directory listings are resolver output only; nothing is exported.
    let mut store = MemStore::new();
    assert!(!resolver.process("LogDir", &mut store));
}
