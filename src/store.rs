//! Output store contract and the JSONL implementation.
//!
//! The store is append-only: records are never updated in place, and
//! re-running an extraction adds records rather than deduplicating. File
//! contents are exported as blobs next to the record database.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;

use crate::error::{CollectorError, Result};
use crate::vfs::FileStat;

/// Identifier of a record within one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId(pub u64);

/// Where an exported entry came from.
#[derive(Debug, Clone)]
pub struct Origin {
    /// Original path on the partition.
    pub path: String,
    /// Partition label (`c`, `d`, ...).
    pub partition: String,
}

/// Structured record sink for extracted artifacts.
pub trait OutputStore {
    /// Registers a file record and returns its id.
    fn insert_file_record(
        &mut self,
        artifact: &str,
        name: &str,
        stat: &FileStat,
        origin: Origin,
    ) -> Result<RecordId>;

    /// Opens a scoped writer for one export blob of a file record.
    fn open_export_stream(
        &mut self,
        record: RecordId,
        export_name: &str,
    ) -> Result<Box<dyn Write>>;

    /// Records a content digest of a file record's first data stream.
    fn record_hash(&mut self, record: RecordId, algorithm: &str, digest: &str) -> Result<()>;

    /// Registers a registry key record and returns its id.
    fn insert_registry_key(
        &mut self,
        artifact: &str,
        modified: DateTime<Utc>,
        key_path: &str,
    ) -> Result<RecordId>;

    /// Registers one value under a previously inserted key record.
    fn insert_registry_value(
        &mut self,
        key: RecordId,
        data_type: &str,
        data: &[u8],
        name: &str,
    ) -> Result<()>;

    /// Finalises indices; no records may be written afterwards.
    fn close(&mut self) -> Result<()>;
}

/// Append-only store writing `records.jsonl` plus a `blobs/` directory.
pub struct JsonlStore {
    root: PathBuf,
    writer: BufWriter<File>,
    next_id: u64,
    record_count: u64,
    blob_count: u64,
    closed: bool,
}

impl JsonlStore {
    /// Creates a store inside the given directory, which is created if
    /// missing.
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let root = dir.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        fs::create_dir_all(root.join("blobs"))?;
        let file = File::create(root.join("records.jsonl"))?;
        Ok(JsonlStore {
            root,
            writer: BufWriter::new(file),
            next_id: 1,
            record_count: 0,
            blob_count: 0,
            closed: false,
        })
    }

    fn next_id(&mut self) -> RecordId {
        let id = RecordId(self.next_id);
        self.next_id += 1;
        id
    }

    fn append(&mut self, record: serde_json::Value) -> Result<()> {
        if self.closed {
            return Err(CollectorError::store("store is closed"));
        }
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        self.record_count += 1;
        Ok(())
    }

    fn blob_path(&self, export_name: &str) -> PathBuf {
        // Export names are derived from partition paths; keep them safe as
        // plain file names.
        let safe: String = export_name
            .chars()
            .map(|c| if c == '/' || c == '\\' || c == ':' { '_' } else { c })
            .collect();
        self.root.join("blobs").join(safe)
    }
}

fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl OutputStore for JsonlStore {
    fn insert_file_record(
        &mut self,
        artifact: &str,
        name: &str,
        stat: &FileStat,
        origin: Origin,
    ) -> Result<RecordId> {
        let id = self.next_id();
        self.append(json!({
            "id": id.0,
            "type": "file",
            "artifact": artifact,
            "name": name,
            "size": stat.size,
            "accessed": format_timestamp(stat.accessed),
            "modified": format_timestamp(stat.modified),
            "created": format_timestamp(stat.created),
            "origin": {
                "path": origin.path,
                "partition": origin.partition,
            },
        }))?;
        Ok(id)
    }

    fn open_export_stream(
        &mut self,
        record: RecordId,
        export_name: &str,
    ) -> Result<Box<dyn Write>> {
        let path = self.blob_path(export_name);
        let file = File::create(&path)?;
        self.append(json!({
            "type": "export",
            "record": record.0,
            "name": export_name,
            "blob": format!("blobs/{}", path.file_name().unwrap_or_default().to_string_lossy()),
        }))?;
        self.blob_count += 1;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn record_hash(&mut self, record: RecordId, algorithm: &str, digest: &str) -> Result<()> {
        self.append(json!({
            "type": "hash",
            "record": record.0,
            "algorithm": algorithm,
            "digest": digest,
        }))
    }

    fn insert_registry_key(
        &mut self,
        artifact: &str,
        modified: DateTime<Utc>,
        key_path: &str,
    ) -> Result<RecordId> {
        let id = self.next_id();
        self.append(json!({
            "id": id.0,
            "type": "registry-key",
            "artifact": artifact,
            "modified": modified.to_rfc3339_opts(SecondsFormat::Millis, true),
            "key": key_path,
        }))?;
        Ok(id)
    }

    fn insert_registry_value(
        &mut self,
        key: RecordId,
        data_type: &str,
        data: &[u8],
        name: &str,
    ) -> Result<()> {
        self.append(json!({
            "type": "registry-value",
            "key": key.0,
            "value_type": data_type,
            "data": hex::encode(data),
            "name": name,
        }))
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.writer.flush()?;
        let index = json!({
            "records": self.record_count,
            "blobs": self.blob_count,
        });
        fs::write(
            self.root.join("index.json"),
            serde_json::to_vec_pretty(&index)?,
        )?;
        self.closed = true;
        Ok(())
    }
}

impl Drop for JsonlStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
