//! Windows registry collaborator contract.
//!
//! The binary hive format is parsed by an external backend behind
//! [`HiveParser`]. The resolver core works against [`WindowsRegistry`] and
//! [`RegistryKey`] handles and never touches hive bytes itself.

use std::path::Path;
use std::sync::Arc;

use crate::error::{CollectorError, Result};

/// Shared handle to a registry key.
pub type KeyHandle = Arc<dyn RegistryKey>;

/// Last-write timestamp of a key: UNIX seconds plus the sub-second
/// remainder in 100-nanosecond units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryTime {
    /// Seconds since the UNIX epoch.
    pub seconds: i64,
    /// Sub-second remainder in 100 ns units.
    pub hundreds_ns: u32,
}

/// A registry key with access to its subkeys and values.
pub trait RegistryKey {
    /// Key name (last path component).
    fn name(&self) -> &str;

    /// Full key path, `\`-separated.
    fn path(&self) -> String;

    /// Direct subkeys, in enumeration order.
    fn subkeys(&self) -> Vec<KeyHandle>;

    /// Values of this key, in enumeration order.
    fn values(&self) -> Vec<RegistryValue>;

    /// Looks up a value by name, case-insensitively. The default (unnamed)
    /// value is found under the empty string.
    fn value(&self, name: &str) -> Option<RegistryValue> {
        self.values()
            .into_iter()
            .find(|v| v.name.as_deref().unwrap_or("").eq_ignore_ascii_case(name))
    }

    /// Last-write time, if recorded.
    fn last_written_time(&self) -> Option<RegistryTime>;
}

/// Read access to the merged registry of one partition.
pub trait WindowsRegistry {
    /// Opens a key by path. Aliases such as `HKLM` are accepted. Missing
    /// keys and unreadable hives yield `None`; the caller treats that as
    /// "nothing found".
    fn open_key(&self, path: &str) -> Option<KeyHandle>;
}

/// Opens an extracted hive file and returns its root key.
pub trait HiveParser {
    /// Parses the hive at the given local path.
    fn open_hive(&self, path: &Path) -> Result<KeyHandle>;
}

/// Placeholder backend for builds without hive parsing support.
///
/// Every open fails with [`CollectorError::HiveUnavailable`], which the
/// registry opener memoises as "not present"; file artifacts remain fully
/// functional.
pub struct DisabledHiveParser;

impl HiveParser for DisabledHiveParser {
    fn open_hive(&self, path: &Path) -> Result<KeyHandle> {
        Err(CollectorError::HiveUnavailable(path.display().to_string()))
    }
}

/// Parsed registry value data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueData {
    /// No data.
    None,
    /// String value.
    String(String),
    /// Expandable string value.
    ExpandString(String),
    /// Binary data.
    Binary(Vec<u8>),
    /// 32-bit integer.
    Dword(u32),
    /// 64-bit integer.
    Qword(u64),
    /// Multiple strings.
    MultiString(Vec<String>),
}

impl ValueData {
    /// Returns true for integer-typed data.
    pub fn is_integer(&self) -> bool {
        matches!(self, ValueData::Dword(_) | ValueData::Qword(_))
    }

    /// Returns true for string-typed data.
    pub fn is_string(&self) -> bool {
        matches!(self, ValueData::String(_) | ValueData::ExpandString(_))
    }

    /// String form of integer and string data; `None` for other types.
    pub fn as_string(&self) -> Option<String> {
        match self {
            ValueData::String(s) | ValueData::ExpandString(s) => Some(s.clone()),
            ValueData::Dword(d) => Some(d.to_string()),
            ValueData::Qword(q) => Some(q.to_string()),
            _ => None,
        }
    }

    /// Raw bytes as stored into the output record. Strings are UTF-8
    /// encoded, integers little-endian, multi-strings NUL-joined, binary
    /// data verbatim.
    pub fn raw_bytes(&self) -> Vec<u8> {
        match self {
            ValueData::None => Vec::new(),
            ValueData::String(s) | ValueData::ExpandString(s) => s.as_bytes().to_vec(),
            ValueData::Binary(b) => b.clone(),
            ValueData::Dword(d) => d.to_le_bytes().to_vec(),
            ValueData::Qword(q) => q.to_le_bytes().to_vec(),
            ValueData::MultiString(strings) => strings.join("\0").into_bytes(),
        }
    }
}

/// A registry value with its name, typed data and type string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryValue {
    /// Value name; `None` for the default (unnamed) value.
    pub name: Option<String>,
    /// Parsed data.
    pub data: ValueData,
    /// Type string as reported by the hive parser, e.g. `REG_SZ` or
    /// `REG_DWORD_LE`.
    pub data_type: String,
}

impl RegistryValue {
    /// Creates a value with an explicit type string.
    pub fn new(name: Option<String>, data: ValueData, data_type: impl Into<String>) -> Self {
        RegistryValue {
            name,
            data,
            data_type: data_type.into(),
        }
    }

    /// Creates a `REG_SZ` value.
    pub fn string(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self::new(Some(name.into()), ValueData::String(data.into()), "REG_SZ")
    }

    /// Creates a `REG_EXPAND_SZ` value.
    pub fn expand_string(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self::new(
            Some(name.into()),
            ValueData::ExpandString(data.into()),
            "REG_EXPAND_SZ",
        )
    }

    /// Creates a `REG_DWORD_LE` value, matching the hive parsers' type
    /// naming for little-endian DWORDs.
    pub fn dword(name: impl Into<String>, data: u32) -> Self {
        Self::new(Some(name.into()), ValueData::Dword(data), "REG_DWORD_LE")
    }

    /// Creates a `REG_BINARY` value.
    pub fn binary(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self::new(Some(name.into()), ValueData::Binary(data), "REG_BINARY")
    }
}

/// Normalises a key path: trims whitespace and trailing separators and
/// expands the usual root-key aliases.
pub fn normalize_key_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('\\');
    let (head, tail) = match trimmed.split_once('\\') {
        Some((head, tail)) => (head, Some(tail)),
        None => (trimmed, None),
    };
    let expanded = match head.to_ascii_uppercase().as_str() {
        "HKLM" => "HKEY_LOCAL_MACHINE",
        "HKU" => "HKEY_USERS",
        "HKCR" => "HKEY_CLASSES_ROOT",
        "HKCU" => "HKEY_CURRENT_USER",
        _ => head,
    };
    match tail {
        Some(tail) => format!("{}\\{}", expanded, tail),
        None => expanded.to_string(),
    }
}
