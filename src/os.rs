//! Operating-system context of a partition.
//!
//! The resolver only needs three things from the detected system: its OS
//! kind, a registry handle (Windows only) and the bootstrap variable
//! seeds. Partitions where detection fails get [`UnknownOs`] and basic
//! file extraction.

use crate::definitions::{OsKind, UserAccount};
use crate::registry::WindowsRegistry;

/// Per-partition OS context handed to the resolver.
pub trait OperatingSystem {
    /// Detected OS kind.
    fn os_kind(&self) -> OsKind;

    /// Registry access, present on Windows systems only.
    fn registry(&self) -> Option<&dyn WindowsRegistry> {
        None
    }

    /// Variables written into the knowledge base at bootstrap.
    fn seed_variables(&self) -> Vec<(String, Vec<String>)> {
        Vec::new()
    }

    /// User accounts discovered on the partition.
    fn users(&self) -> &[UserAccount] {
        &[]
    }
}

/// Fallback context when OS detection fails; only basic extraction is
/// possible.
pub struct UnknownOs;

impl OperatingSystem for UnknownOs {
    fn os_kind(&self) -> OsKind {
        OsKind::Unknown
    }
}

/// Context for detected systems without dedicated support (Linux, macOS):
/// the OS kind participates in artifact filtering, but there is no
/// registry and nothing is seeded beyond what artifacts provide.
pub struct BasicOs {
    kind: OsKind,
}

impl BasicOs {
    /// Creates a context for the given OS kind.
    pub fn new(kind: OsKind) -> Self {
        BasicOs { kind }
    }
}

impl OperatingSystem for BasicOs {
    fn os_kind(&self) -> OsKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_os_defaults() {
        let os = UnknownOs;
        assert_eq!(os.os_kind(), OsKind::Unknown);
        assert!(os.registry().is_none());
        assert!(os.seed_variables().is_empty());
        assert!(os.users().is_empty());
    }

    #[test]
    fn test_basic_os_kind() {
        let os = BasicOs::new(OsKind::Linux);
        assert_eq!(os.os_kind(), OsKind::Linux);
        assert!(os.registry().is_none());
    }
}
