//! Windows-specific partition context.
//!
//! Bootstrapping a Windows partition locates the Windows directory, wires
//! the registry file opener and mapping table, and enumerates user
//! accounts from `ProfileList`. Hive files are copied out of the evidence
//! into a scratch directory so the hive parser gets a plain file handle;
//! the scratch area lives exactly as long as the partition context.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io;
use std::path::Path;
use std::rc::Rc;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

use crate::definitions::{OsKind, UserAccount};
use crate::error::Result;
use crate::os::OperatingSystem;
use crate::registry::{
    normalize_key_path, HiveParser, KeyHandle, RegistryKey, RegistryTime, RegistryValue,
    WindowsRegistry,
};
use crate::vfs::{PathSpec, VirtualFileSystem};

/// Maps a registry key-path prefix to the hive file backing it.
#[derive(Debug, Clone)]
pub struct FileMapping {
    /// Virtual key path, e.g. `HKEY_LOCAL_MACHINE\SOFTWARE`.
    pub key_path_prefix: String,
    /// Hive location on the partition; may contain `%var%` tokens.
    pub file_path: String,
}

fn hive_var_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"%[A-Za-z0-9_]+%").expect("hive var regex"))
}

/// Standard NT hive mappings below `%SystemRoot%\System32\config`.
fn default_mappings() -> Vec<FileMapping> {
    ["SYSTEM", "SOFTWARE", "SAM", "SECURITY"]
        .iter()
        .map(|hive| FileMapping {
            key_path_prefix: format!("HKEY_LOCAL_MACHINE\\{}", hive),
            file_path: format!("%SystemRoot%/System32/config/{}", hive),
        })
        .collect()
}

/// Strips an optional drive letter from a profile path and normalises the
/// separators. `ProfileImagePath` can be `C:\Users\Someone` or
/// `%SystemRoot%\something`.
pub(crate) fn profile_relative_path(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    if path.as_bytes().get(1) == Some(&b':') {
        normalized[2..].to_string()
    } else {
        normalized
    }
}

/// Opens registry hive files from the evidence.
///
/// Hives are extracted to a scratch directory owned by the opener and
/// parsed from there; opened roots are cached, and misses are memoised so
/// each absent hive warns only once.
pub struct RegistryFileOpener {
    vfs: Arc<dyn VirtualFileSystem>,
    partition: PathSpec,
    parser: Arc<dyn HiveParser>,
    /// Single-valued bootstrap variables used to resolve hive paths.
    variables: HashMap<String, String>,
    scratch: TempDir,
    not_present: RefCell<HashSet<String>>,
    hives: RefCell<HashMap<String, KeyHandle>>,
}

impl RegistryFileOpener {
    /// Creates an opener with its scratch directory.
    pub fn new(
        vfs: Arc<dyn VirtualFileSystem>,
        partition: PathSpec,
        parser: Arc<dyn HiveParser>,
        variables: HashMap<String, String>,
    ) -> Result<Self> {
        Ok(RegistryFileOpener {
            vfs,
            partition,
            parser,
            variables,
            scratch: TempDir::new()?,
            not_present: RefCell::new(HashSet::new()),
            hives: RefCell::new(HashMap::new()),
        })
    }

    /// Opens the hive at the given partition path and returns its root
    /// key. Fails soft to `None`.
    pub fn open(&self, file_path: &str) -> Option<KeyHandle> {
        if self.not_present.borrow().contains(file_path) {
            return None;
        }
        if let Some(root) = self.hives.borrow().get(file_path) {
            return Some(root.clone());
        }

        let Some(realpath) = self.resolve_hive_path(file_path) else {
            return None;
        };
        if self.not_present.borrow().contains(&realpath) {
            return None;
        }
        info!(path = file_path, "Opening registry hive");

        let specs = self.vfs.find_paths(
            std::slice::from_ref(&realpath),
            false,
            false,
            std::slice::from_ref(&self.partition),
        );
        let Some(spec) = specs.first() else {
            warn!(path = file_path, %realpath, "Could not find requested registry hive");
            self.remember_missing(file_path, &realpath);
            return None;
        };
        if specs.len() > 1 {
            warn!(
                path = file_path,
                using = %spec.reconstruct_full_path(),
                "Found multiple registry hives for query"
            );
        }

        let filename = realpath.trim_start_matches('/').replace('/', "_");
        let local = self.scratch.path().join(&filename);
        if let Err(err) = self.export_hive(spec, &local) {
            warn!(path = file_path, %err, "Could not extract registry hive");
            self.remember_missing(file_path, &realpath);
            return None;
        }

        match self.parser.open_hive(&local) {
            Ok(root) => {
                self.hives
                    .borrow_mut()
                    .insert(file_path.to_string(), root.clone());
                Some(root)
            }
            Err(err) => {
                warn!(path = file_path, %err, "Could not parse registry hive");
                self.remember_missing(file_path, &realpath);
                None
            }
        }
    }

    /// Substitutes `%var%` tokens and normalises the hive path.
    fn resolve_hive_path(&self, file_path: &str) -> Option<String> {
        let mut realpath = file_path.replace('\\', "/");
        let tokens: Vec<String> = hive_var_regex()
            .find_iter(&realpath)
            .map(|m| m.as_str().to_string())
            .collect();
        for token in tokens {
            let key = token.trim_matches('%').to_lowercase();
            match self.variables.get(&key) {
                Some(value) => realpath = realpath.replace(&token, value),
                None => {
                    warn!(variable = %token, "Could not resolve variable in hive path");
                    return None;
                }
            }
        }
        if realpath.len() >= 3 && realpath[..3].eq_ignore_ascii_case("c:/") {
            realpath = format!("/{}", &realpath[3..]);
        }
        if !realpath.starts_with('/') {
            realpath = format!("/{}", realpath);
        }
        Some(realpath)
    }

    fn remember_missing(&self, file_path: &str, realpath: &str) {
        let mut missing = self.not_present.borrow_mut();
        missing.insert(file_path.to_string());
        missing.insert(realpath.to_string());
    }

    fn export_hive(&self, spec: &PathSpec, local: &Path) -> Result<()> {
        let mut reader = self.vfs.open_file(spec)?;
        let mut file = File::create(local)?;
        io::copy(&mut reader, &mut file)?;
        Ok(())
    }
}

/// A key handle carrying its virtual registry path on top of a hive key.
struct MappedKey {
    path: String,
    inner: KeyHandle,
}

impl RegistryKey for MappedKey {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn path(&self) -> String {
        self.path.clone()
    }

    fn subkeys(&self) -> Vec<KeyHandle> {
        self.inner
            .subkeys()
            .into_iter()
            .map(|key| {
                let path = format!("{}\\{}", self.path, key.name());
                Arc::new(MappedKey { path, inner: key }) as KeyHandle
            })
            .collect()
    }

    fn values(&self) -> Vec<RegistryValue> {
        self.inner.values()
    }

    fn value(&self, name: &str) -> Option<RegistryValue> {
        self.inner.value(name)
    }

    fn last_written_time(&self) -> Option<RegistryTime> {
        self.inner.last_written_time()
    }
}

/// Registry view assembled from a mapping table.
///
/// The table is owned by value; nothing process-wide is mutated when
/// per-user mappings are added for a partition.
pub struct MappedRegistry {
    mappings: Vec<FileMapping>,
    opener: Rc<RegistryFileOpener>,
}

impl MappedRegistry {
    /// Creates a registry over the given mapping table.
    pub fn new(mappings: Vec<FileMapping>, opener: Rc<RegistryFileOpener>) -> Self {
        MappedRegistry { mappings, opener }
    }

    fn best_mapping(&self, path: &str) -> Option<&FileMapping> {
        let mut best: Option<&FileMapping> = None;
        for mapping in &self.mappings {
            let prefix = &mapping.key_path_prefix;
            let Some(head) = path.get(..prefix.len()) else {
                continue;
            };
            if !head.eq_ignore_ascii_case(prefix) {
                continue;
            }
            if path.len() > prefix.len() && path.as_bytes()[prefix.len()] != b'\\' {
                continue;
            }
            if best.map_or(true, |b| prefix.len() > b.key_path_prefix.len()) {
                best = Some(mapping);
            }
        }
        best
    }
}

impl WindowsRegistry for MappedRegistry {
    fn open_key(&self, path: &str) -> Option<KeyHandle> {
        let path = normalize_key_path(path);
        if path.is_empty() {
            return None;
        }
        let Some(mapping) = self.best_mapping(&path) else {
            debug!(%path, "No hive mapping for key path");
            return None;
        };
        let root = self.opener.open(&mapping.file_path)?;
        let mut current: KeyHandle = Arc::new(MappedKey {
            path: mapping.key_path_prefix.clone(),
            inner: root,
        });

        let remainder = path[mapping.key_path_prefix.len()..].trim_start_matches('\\');
        if remainder.is_empty() {
            return Some(current);
        }
        for part in remainder.split('\\') {
            let next = current
                .subkeys()
                .into_iter()
                .find(|key| key.name().eq_ignore_ascii_case(part))?;
            current = next;
        }
        Some(current)
    }
}

/// Context of one Windows installation: bootstrap variables, user
/// accounts and merged registry access.
pub struct WindowsSystem {
    users: Vec<UserAccount>,
    seeds: Vec<(String, Vec<String>)>,
    registry: MappedRegistry,
}

impl WindowsSystem {
    /// Bootstraps a Windows partition.
    ///
    /// # Errors
    ///
    /// Returns an error if no Windows directory is found on the partition
    /// or the scratch area cannot be created. Registry access needs
    /// `%SystemRoot%`, so this runs before anything else.
    pub fn new(
        vfs: Arc<dyn VirtualFileSystem>,
        partition: PathSpec,
        parser: Arc<dyn HiveParser>,
    ) -> Result<Self> {
        info!(
            partition = %partition.reconstruct_full_path(),
            "Creating new WindowsSystem"
        );

        let roots = vfs.find_paths(
            &["/Windows".to_string(), "/WINNT".to_string()],
            false,
            false,
            std::slice::from_ref(&partition),
        );
        let Some(systemroot_spec) = roots.first() else {
            return Err(crate::error::CollectorError::NoWindowsDirectory(
                partition.reconstruct_full_path(),
            ));
        };
        if roots.len() > 1 {
            warn!(
                using = %systemroot_spec.reconstruct_full_path(),
                "More than one installation of Windows detected?"
            );
        }
        let systemroot = systemroot_spec.relative_path().unwrap_or_default();

        let mut bootstrap = HashMap::new();
        bootstrap.insert("systemroot".to_string(), systemroot.clone());
        bootstrap.insert("systemdrive".to_string(), "/".to_string());

        let opener = Rc::new(RegistryFileOpener::new(
            vfs.clone(),
            partition.clone(),
            parser,
            bootstrap,
        )?);

        // User accounts come from the registry, so a first registry view
        // with the standard mappings is needed before the per-user hive
        // mappings can be added.
        let mut mappings = default_mappings();
        let bootstrap_registry = MappedRegistry::new(mappings.clone(), opener.clone());
        let users = read_users(&bootstrap_registry);

        for user in &users {
            let candidates = [
                (
                    format!("HKEY_USERS\\{}", user.sid),
                    format!("{}/NTUSER.DAT", user.userprofile),
                ),
                (
                    format!("HKEY_USERS\\{}\\Software\\Classes", user.sid),
                    format!(
                        "{}/AppData/Local/Microsoft/Windows/UsrClass.dat",
                        user.userprofile
                    ),
                ),
            ];
            for (prefix, file) in candidates {
                let exists = !vfs
                    .find_paths(
                        std::slice::from_ref(&file),
                        false,
                        false,
                        std::slice::from_ref(&partition),
                    )
                    .is_empty();
                if exists {
                    mappings.push(FileMapping {
                        key_path_prefix: prefix,
                        file_path: file,
                    });
                }
            }
        }
        let registry = MappedRegistry::new(mappings, opener);

        let mut seeds = vec![
            ("systemroot".to_string(), vec![systemroot]),
            ("systemdrive".to_string(), vec!["/".to_string()]),
        ];
        if !users.is_empty() {
            let collect = |f: fn(&UserAccount) -> String| -> Vec<String> {
                users.iter().map(f).collect()
            };
            seeds.push(("users.sid".to_string(), collect(|u| u.sid.clone())));
            seeds.push(("users.username".to_string(), collect(|u| u.username.clone())));
            seeds.push((
                "users.userprofile".to_string(),
                collect(|u| u.userprofile.clone()),
            ));
            seeds.push(("users.homedir".to_string(), collect(|u| u.homedir.clone())));
        }

        Ok(WindowsSystem {
            users,
            seeds,
            registry,
        })
    }
}

impl OperatingSystem for WindowsSystem {
    fn os_kind(&self) -> OsKind {
        OsKind::Windows
    }

    fn registry(&self) -> Option<&dyn WindowsRegistry> {
        Some(&self.registry)
    }

    fn seed_variables(&self) -> Vec<(String, Vec<String>)> {
        self.seeds.clone()
    }

    fn users(&self) -> &[UserAccount] {
        &self.users
    }
}

/// Reads user SIDs and profile directories from `ProfileList`.
fn read_users(registry: &dyn WindowsRegistry) -> Vec<UserAccount> {
    let profile_list =
        registry.open_key("HKLM\\SOFTWARE\\Microsoft\\Windows NT\\CurrentVersion\\ProfileList");
    let Some(profile_list) = profile_list else {
        error!("Could not get SOFTWARE key for ProfileList");
        return Vec::new();
    };

    let mut users = Vec::new();
    for subkey in profile_list.subkeys() {
        let sid = subkey.name().to_string();
        let Some(image_path) = subkey
            .value("ProfileImagePath")
            .and_then(|v| v.data.as_string())
        else {
            debug!(%sid, "Profile entry without ProfileImagePath");
            continue;
        };
        let username = image_path
            .split('\\')
            .last()
            .unwrap_or_default()
            .to_string();
        let profile = profile_relative_path(&image_path);
        info!(user = %username, sid = %sid, "Found user");
        users.push(UserAccount {
            sid,
            username,
            userprofile: profile.clone(),
            homedir: profile,
        });
    }
    users
}
