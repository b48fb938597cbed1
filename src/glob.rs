//! Wildcard matching over the two namespaces.
//!
//! Filesystem globbing is delegated to the VFS after superglob rewriting;
//! registry globbing is implemented here as a recursive descent over the
//! registry collaborator. The "superglob" operator `**` (optionally `**N`)
//! means "any depth up to N", default 3, and is rewritten into a finite
//! list of plain wildcard templates before dispatch in both namespaces.

use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::registry::{KeyHandle, RegistryKey, WindowsRegistry};

/// Default depth bound for `**` without an explicit depth suffix.
const DEFAULT_SUPERGLOB_DEPTH: usize = 3;

fn superglob_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*(\d+)?").expect("superglob regex"))
}

/// Returns true if a template segment contains glob characters.
pub fn has_wildcard(segment: &str) -> bool {
    segment.contains('*') || segment.contains('?')
}

/// Compiles one filesystem path segment (`*` and `?` wildcards) into an
/// anchored regex. Literal characters are escaped.
pub fn fs_segment_regex(segment: &str, case_sensitive: bool) -> Option<Regex> {
    let mut pattern = String::new();
    if !case_sensitive {
        pattern.push_str("(?i)");
    }
    pattern.push('^');
    for ch in segment.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).ok()
}

/// Compiles a caller-supplied path regex, anchored over the full relative
/// path.
pub fn full_path_regex(pattern: &str, case_sensitive: bool) -> Option<Regex> {
    let anchored = if case_sensitive {
        format!("^(?:{})$", pattern)
    } else {
        format!("(?i)^(?:{})$", pattern)
    };
    Regex::new(&anchored).ok()
}

/// Compiles a registry name pattern (`*` wildcards only) into an anchored,
/// case-insensitive regex.
pub fn registry_pattern_regex(pattern: &str) -> Option<Regex> {
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    let body = escaped.join(".*");
    Regex::new(&format!("(?i)^{}$", body)).ok()
}

/// Rewrites superglob templates into bounded-depth wildcard templates.
///
/// Templates without `**` pass through unchanged and come first, in input
/// order. A `**N` occurrence is replaced by `*`, `*<sep>*`, ... up to N
/// levels, yielding one template per level.
pub fn expand_superglobs(templates: &[String], separator: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut supers = Vec::new();
    for template in templates {
        if template.contains("**") {
            supers.push(template);
        } else {
            out.push(template.clone());
        }
    }

    for template in supers {
        let Some(caps) = superglob_regex().captures(template) else {
            continue;
        };
        let token = caps.get(0).expect("match").as_str().to_string();
        let depth = caps
            .get(1)
            .and_then(|m| m.as_str().parse::<usize>().ok())
            .unwrap_or(DEFAULT_SUPERGLOB_DEPTH);

        let mut substitute = String::from("*");
        for _ in 0..depth {
            out.push(template.replace(&token, &substitute));
            substitute = format!("{}{}{}", substitute, separator, "*");
        }
    }
    out
}

/// Globs a registry key path to all matching keys.
///
/// The path above the first wildcard segment is opened directly; from
/// there the tree is walked level by level, matching wildcard segments as
/// regexes and plain segments by case-insensitive equality. With
/// `ignore_trailing_wildcard` set, a final `*` segment is dropped before
/// matching, for templates that target a key container rather than its
/// leaves. Missing prefixes fail soft to an empty result.
pub fn glob_registry_keys(
    registry: &dyn WindowsRegistry,
    template: &str,
    ignore_trailing_wildcard: bool,
) -> Vec<KeyHandle> {
    let mut out = Vec::new();
    for rewritten in expand_superglobs(&[template.to_string()], "\\") {
        let mut parts: Vec<&str> = rewritten.split('\\').collect();
        if ignore_trailing_wildcard && parts.last() == Some(&"*") {
            parts.pop();
        }
        if parts.is_empty() {
            continue;
        }

        let wildcard_index = parts.iter().position(|p| p.contains('*'));
        let prefix_len = wildcard_index.unwrap_or(parts.len());
        let prefix = parts[..prefix_len].join("\\");

        let Some(prefix_key) = registry.open_key(&prefix) else {
            debug!(%prefix, "Registry prefix not present");
            continue;
        };
        if prefix_len >= parts.len() {
            // No wildcard at all: the prefix is the result.
            out.push(prefix_key);
            continue;
        }
        descend(&parts, prefix_len, prefix_key, &mut out);
    }
    out
}

fn descend(parts: &[&str], level: usize, key: KeyHandle, out: &mut Vec<KeyHandle>) {
    let segment = parts[level];
    let matches: Vec<KeyHandle> = if segment.contains('*') {
        let Some(pattern) = registry_pattern_regex(segment) else {
            warn!(segment, "Cannot compile registry glob segment");
            return;
        };
        key.subkeys()
            .into_iter()
            .filter(|k| pattern.is_match(k.name()))
            .collect()
    } else {
        key.subkeys()
            .into_iter()
            .filter(|k| k.name().eq_ignore_ascii_case(segment))
            .collect()
    };

    if level == parts.len() - 1 {
        out.extend(matches);
    } else {
        for matched in matches {
            descend(parts, level + 1, matched, out);
        }
    }
}

/// Globs value names of a key against a `*` wildcard template.
///
/// Unnamed (default) values are skipped; matching is case-insensitive.
pub fn glob_registry_values(key: &dyn RegistryKey, template: &str) -> Vec<String> {
    if template.is_empty() {
        return Vec::new();
    }
    let Some(pattern) = registry_pattern_regex(template) else {
        warn!(template, "Cannot compile value name pattern");
        return Vec::new();
    };
    key.values()
        .into_iter()
        .filter_map(|v| v.name)
        .filter(|name| pattern.is_match(name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_superglob_default_depth() {
        let out = expand_superglobs(&["/tmp/**/x.txt".to_string()], "/");
        assert_eq!(
            out,
            vec![
                "/tmp/*/x.txt".to_string(),
                "/tmp/*/*/x.txt".to_string(),
                "/tmp/*/*/*/x.txt".to_string(),
            ]
        );
    }

    #[test]
    fn test_superglob_explicit_depth() {
        let out = expand_superglobs(&["/tmp/**5".to_string()], "/");
        assert_eq!(out.len(), 5);
        assert_eq!(out[0], "/tmp/*");
        assert_eq!(out[4], "/tmp/*/*/*/*/*");
    }

    #[test]
    fn test_superglob_passthrough_and_order() {
        let templates = vec!["/a/**2/b".to_string(), "/plain/*".to_string()];
        let out = expand_superglobs(&templates, "/");
        // Plain templates come first, superglob expansions after.
        assert_eq!(
            out,
            vec![
                "/plain/*".to_string(),
                "/a/*/b".to_string(),
                "/a/*/*/b".to_string(),
            ]
        );
    }

    #[test]
    fn test_registry_superglob_separator() {
        let out = expand_superglobs(&["HKLM\\A\\**2\\Run".to_string()], "\\");
        assert_eq!(
            out,
            vec!["HKLM\\A\\*\\Run".to_string(), "HKLM\\A\\*\\*\\Run".to_string()]
        );
    }

    #[test]
    fn test_registry_pattern_matching() {
        let pattern = registry_pattern_regex("Run*").unwrap();
        assert!(pattern.is_match("Run"));
        assert!(pattern.is_match("RunOnce"));
        assert!(pattern.is_match("runonce"));
        assert!(!pattern.is_match("NoRun"));

        // Regex metacharacters in names are literals.
        let pattern = registry_pattern_regex("Uninstall (x86)").unwrap();
        assert!(pattern.is_match("uninstall (X86)"));
        assert!(!pattern.is_match("Uninstall xx86y"));
    }

    #[test]
    fn test_fs_segment_regex() {
        let pattern = fs_segment_regex("NTUSER.DAT", false).unwrap();
        assert!(pattern.is_match("ntuser.dat"));
        assert!(!pattern.is_match("ntuserxdat"));

        let pattern = fs_segment_regex("*.pf", false).unwrap();
        assert!(pattern.is_match("CMD.EXE-1234.pf"));
        assert!(!pattern.is_match("CMD.EXE-1234.pfx"));

        let pattern = fs_segment_regex("??.log", true).unwrap();
        assert!(pattern.is_match("ab.log"));
        assert!(!pattern.is_match("abc.log"));
    }
}
