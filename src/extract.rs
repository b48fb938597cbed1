//! Export of resolved artifacts into the output store.
//!
//! Files are copied stream-wise in 64 KiB chunks; registry keys and values
//! become structured records. Every per-entry failure is logged and the
//! loop continues; the overall result is true iff any record was written.

use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use tracing::{debug, info, warn};

use crate::registry::{RegistryKey, RegistryTime};
use crate::resolver::ResolvedArtifact;
use crate::store::{Origin, OutputStore};
use crate::vfs::{FileEntryType, PathSpec, VirtualFileSystem};

/// Chunk size for streamed file exports.
const EXPORT_CHUNK_SIZE: usize = 64 * 1024;

/// Writes resolved artifacts of one partition into the output store.
pub struct Extractor<'a> {
    vfs: &'a dyn VirtualFileSystem,
    partition_name: &'a str,
}

impl<'a> Extractor<'a> {
    /// Creates an extractor for one partition.
    pub fn new(vfs: &'a dyn VirtualFileSystem, partition_name: &'a str) -> Self {
        Extractor {
            vfs,
            partition_name,
        }
    }

    /// Exports an artifact and, recursively, its sub-artifacts.
    ///
    /// Returns true iff any record was written. An empty artifact is a
    /// no-op, not an error.
    pub fn extract(&self, artifact: &ResolvedArtifact, store: &mut dyn OutputStore) -> bool {
        let artifact_name = &artifact.definition.name;
        if artifact.is_empty() {
            debug!(artifact = %artifact_name, "Nothing to extract found");
            return false;
        }

        let mut extracted = self.extract_files(artifact, store);
        extracted |= self.extract_registry(artifact, store);

        for sub in &artifact.sub_artifacts {
            debug!(artifact = %sub.definition.name, "Attempting extract of sub-artifact");
            extracted |= self.extract(sub, store);
        }

        if extracted {
            info!(artifact = %artifact_name, "Extracted");
        } else {
            debug!(artifact = %artifact_name, "Nothing extracted");
        }
        extracted
    }

    fn extract_files(&self, artifact: &ResolvedArtifact, store: &mut dyn OutputStore) -> bool {
        let artifact_name = &artifact.definition.name;
        let mut success = false;
        for spec in &artifact.files {
            match self.export_file(artifact_name, spec, store) {
                Ok(true) => success = true,
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        path = %spec.reconstruct_full_path(),
                        %err,
                        "Could not export file, skipping"
                    );
                }
            }
        }
        success
    }

    /// Exports one file entry: stat metadata, a record, and every data
    /// stream as a blob. Only the first stream is hashed.
    fn export_file(
        &self,
        artifact_name: &str,
        spec: &PathSpec,
        store: &mut dyn OutputStore,
    ) -> crate::error::Result<bool> {
        let stat = self.vfs.stat(spec)?;
        if stat.entry_type != FileEntryType::File {
            debug!(
                path = %spec.reconstruct_full_path(),
                "Not exporting entry of wrong type"
            );
            return Ok(false);
        }

        let relative = spec.relative_path().unwrap_or_default();
        let record = store.insert_file_record(
            artifact_name,
            &stat.name,
            &stat,
            Origin {
                path: relative.clone(),
                partition: self.partition_name.to_string(),
            },
        )?;

        let export_name = format!(
            "{}_{}",
            self.partition_name,
            relative.replace('/', "_").trim_matches('_')
        );

        let streams = self.vfs.data_streams(spec)?;
        for (index, stream) in streams.iter().enumerate() {
            let target = if index == 0 {
                export_name.clone()
            } else {
                format!("{}-{}", export_name, index)
            };
            let mut reader = self.vfs.open_data_stream(spec, stream)?;
            let mut writer = store.open_export_stream(record, &target)?;
            if index == 0 {
                let digest = copy_hashed(&mut reader, &mut writer)?;
                writer.flush()?;
                drop(writer);
                store.record_hash(record, "SHA-256", &digest)?;
            } else {
                copy_chunked(&mut reader, &mut writer)?;
                writer.flush()?;
            }
        }
        Ok(true)
    }

    fn extract_registry(&self, artifact: &ResolvedArtifact, store: &mut dyn OutputStore) -> bool {
        if artifact.registry_keys.is_empty() && artifact.registry_vals.is_empty() {
            return false;
        }
        let artifact_name = &artifact.definition.name;

        let mut exported = false;
        for key in &artifact.registry_keys {
            match key_to_store(store, key.as_ref(), None, artifact_name) {
                Ok(()) => exported = true,
                Err(err) => warn!(key = %key.path(), %err, "Error adding registry key"),
            }
        }
        for (key, value_names) in &artifact.registry_vals {
            match key_to_store(store, key.as_ref(), Some(value_names), artifact_name) {
                Ok(()) => exported = true,
                Err(err) => warn!(key = %key.path(), %err, "Error adding registry key"),
            }
        }
        exported
    }
}

/// Exports a registry key, optionally only the named subset of its values.
fn key_to_store(
    store: &mut dyn OutputStore,
    key: &dyn RegistryKey,
    value_filter: Option<&Vec<String>>,
    artifact_name: &str,
) -> crate::error::Result<()> {
    let modified = registry_timestamp(key.last_written_time());
    let key_record = store.insert_registry_key(artifact_name, modified, &key.path())?;

    for value in key.values() {
        if let Some(filter) = value_filter {
            let Some(name) = &value.name else { continue };
            if !filter.contains(name) {
                continue;
            }
        }
        let name = match &value.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => "(Default)".to_string(),
        };
        let data_type = if value.data_type == "REG_DWORD_LE" {
            "REG_DWORD"
        } else {
            value.data_type.as_str()
        };
        if let Err(err) =
            store.insert_registry_value(key_record, data_type, &value.data.raw_bytes(), &name)
        {
            warn!(value = %name, %err, "Error adding registry value");
        }
    }
    Ok(())
}

/// Converts a key's last-write tuple to UTC, truncating the sub-second
/// part to microseconds. Absent or zero timestamps become the epoch.
fn registry_timestamp(time: Option<RegistryTime>) -> DateTime<Utc> {
    match time {
        Some(time) if time.seconds != 0 => {
            let micros = time.hundreds_ns / 10;
            Utc.timestamp_opt(time.seconds, micros * 1_000)
                .single()
                .unwrap_or_default()
        }
        _ => DateTime::<Utc>::default(),
    }
}

fn copy_chunked<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
) -> std::io::Result<u64> {
    let mut buffer = vec![0u8; EXPORT_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let count = reader.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        writer.write_all(&buffer[..count])?;
        total += count as u64;
    }
    Ok(total)
}

/// Chunked copy that also digests the copied bytes with SHA-256.
fn copy_hashed<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
) -> std::io::Result<String> {
    let mut buffer = vec![0u8; EXPORT_CHUNK_SIZE];
    let mut hasher = Sha256::new();
    loop {
        let count = reader.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
        writer.write_all(&buffer[..count])?;
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_timestamp_truncates_to_micros() {
        let ts = registry_timestamp(Some(RegistryTime {
            seconds: 1_600_000_000,
            hundreds_ns: 1_234_567,
        }));
        assert_eq!(ts.timestamp(), 1_600_000_000);
        assert_eq!(ts.timestamp_subsec_micros(), 123_456);
    }

    #[test]
    fn test_registry_timestamp_absent_is_epoch() {
        assert_eq!(registry_timestamp(None).timestamp(), 0);
        assert_eq!(
            registry_timestamp(Some(RegistryTime {
                seconds: 0,
                hundreds_ns: 99,
            }))
            .timestamp(),
            0
        );
    }

    #[test]
    fn test_copy_hashed_digest() {
        let data = b"hello world";
        let mut out = Vec::new();
        let digest = copy_hashed(&mut &data[..], &mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(
            digest,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
