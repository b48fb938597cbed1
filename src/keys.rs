//! Decryption key lists and the encryption handler contract.
//!
//! A keys file holds one credential per line as
//! `credential_type;credential_data`. VFS backends that encounter
//! encrypted volumes ask an [`EncryptionHandler`] for credentials; the
//! handler shipped here answers from the key list without interaction.

use std::collections::HashMap;
use std::io::BufRead;

use tracing::warn;

/// One decryption credential from the keys file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Credential kind, e.g. `password` or `recovery_password`.
    pub credential_type: String,
    /// Credential payload.
    pub data: String,
}

/// Parses a `;`-separated key list. Malformed rows are skipped with a
/// warning; blank lines are ignored.
pub fn read_key_list<R: BufRead>(reader: R) -> Vec<Credential> {
    let mut credentials = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(%err, "Could not read keys file line");
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match trimmed.split_once(';') {
            Some((credential_type, data)) => credentials.push(Credential {
                credential_type: credential_type.to_string(),
                data: data.to_string(),
            }),
            None => warn!(line = number + 1, "Skipping malformed keys file row"),
        }
    }
    credentials
}

/// Supplies credentials for encrypted volumes.
pub trait EncryptionHandler {
    /// Offers a credential for the volume. `credential_types` lists what
    /// the volume accepts; `None` means the volume stays locked.
    fn unlock_volume(&mut self, volume_info: &str, credential_types: &[String])
        -> Option<Credential>;
}

/// Non-interactive handler that hands out key-list entries matching the
/// volume's accepted credential types, each at most once per volume.
pub struct KeyListHandler {
    keys: Vec<Credential>,
    queued: HashMap<String, Vec<Credential>>,
}

impl KeyListHandler {
    /// Creates a handler over the parsed key list.
    pub fn new(keys: Vec<Credential>) -> Self {
        KeyListHandler {
            keys,
            queued: HashMap::new(),
        }
    }
}

impl EncryptionHandler for KeyListHandler {
    fn unlock_volume(
        &mut self,
        volume_info: &str,
        credential_types: &[String],
    ) -> Option<Credential> {
        let queue = self
            .queued
            .entry(volume_info.to_string())
            .or_insert_with(|| {
                self.keys
                    .iter()
                    .filter(|key| credential_types.contains(&key.credential_type))
                    .cloned()
                    .collect()
            });
        queue.pop()
    }
}
