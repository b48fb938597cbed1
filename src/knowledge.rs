//! Lazy, memoised variable table.
//!
//! A variable's value is a seeded constant, a cached prior resolution, or
//! the projection of a provider artifact resolved through the back-edge
//! into the artifact resolver. Each variable is resolved at most once per
//! partition; re-entrant resolution of a variable (a provider depending on
//! itself) is broken by an in-flight guard.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::definitions::{ArtifactDefinition, Source};
use crate::expand::{contains_token, expand_template, VariableSource};

/// Case-insensitive string set that keeps the first-seen original form
/// and preserves insertion order.
#[derive(Debug, Clone, Default)]
pub struct CasePreservingSet {
    items: Vec<String>,
}

impl CasePreservingSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a casefolded equal value is present.
    pub fn contains(&self, value: &str) -> bool {
        let folded = value.to_lowercase();
        self.items.iter().any(|item| item.to_lowercase() == folded)
    }

    /// Adds a value unless a casefolded equal one is already present.
    pub fn add(&mut self, value: impl Into<String>) {
        let value = value.into();
        if !self.contains(&value) {
            self.items.push(value);
        }
    }

    /// Adds multiple values.
    pub fn extend<I: IntoIterator<Item = String>>(&mut self, values: I) {
        for value in values {
            self.add(value);
        }
    }

    /// Iterates the retained original forms in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.items.iter()
    }

    /// Number of distinct values.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Copies the values out, in insertion order.
    pub fn to_vec(&self) -> Vec<String> {
        self.items.clone()
    }
}

/// Back-edge into the artifact resolver: resolves a single source to the
/// strings it projects (key paths, value data, relative paths, file
/// contents).
pub trait ProviderResolver {
    /// Resolves one provider source.
    fn resolve_source(&self, source: &Source) -> Vec<String>;
}

/// Canonical form of a variable key: markers stripped, lowercased, and
/// without a leading `environ_`.
pub fn canonical_key(key: &str) -> String {
    let stripped = key.replace('%', "").to_lowercase();
    match stripped.strip_prefix("environ_") {
        Some(rest) => rest.to_string(),
        None => stripped,
    }
}

/// Rewrites an absolute Windows path to the partition-relative form:
/// a leading `C:\` (or `C:/`) becomes `/` and backslashes become slashes.
pub fn normalize_drive_path(path: &str) -> String {
    let bytes = path.as_bytes();
    let has_drive = bytes.len() >= 3
        && bytes[0].eq_ignore_ascii_case(&b'c')
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/');
    if has_drive {
        format!("/{}", &path[3..]).replace('\\', "/")
    } else {
        path.to_string()
    }
}

/// Memoised variable table of one partition.
pub struct KnowledgeBase {
    /// Provider sources keyed by the lowercased `provides` name as
    /// declared in the catalogue.
    providers: HashMap<String, Vec<Source>>,
    /// Resolved value sets, keyed by canonical variable name.
    cache: RefCell<HashMap<String, CasePreservingSet>>,
    /// Canonical names currently being resolved (cycle guard).
    in_flight: RefCell<HashSet<String>>,
}

impl KnowledgeBase {
    /// Builds the provider index from the applicable artifact definitions.
    pub fn new(artifacts: &HashMap<String, ArtifactDefinition>) -> Self {
        let mut providers: HashMap<String, Vec<Source>> = HashMap::new();
        for artifact in artifacts.values() {
            for provided in &artifact.provides {
                providers
                    .entry(provided.to_lowercase())
                    .or_default()
                    .extend(artifact.sources.iter().cloned());
            }
        }
        KnowledgeBase {
            providers,
            cache: RefCell::new(HashMap::new()),
            in_flight: RefCell::new(HashSet::new()),
        }
    }

    /// Writes a variable directly, bypassing provider resolution. Used for
    /// the OS bootstrap seeds (`systemroot`, `systemdrive`, the user list).
    pub fn seed<I: IntoIterator<Item = String>>(&self, key: &str, values: I) {
        let mut set = CasePreservingSet::new();
        set.extend(values);
        self.cache.borrow_mut().insert(canonical_key(key), set);
    }

    /// Returns the value set of a variable, resolving it on first access.
    ///
    /// Unresolvable variables return empty (and are memoised as such);
    /// this never fails across the component boundary.
    pub fn get(&self, key: &str, resolver: &dyn ProviderResolver) -> Vec<String> {
        if key.is_empty() {
            return Vec::new();
        }
        let canon = canonical_key(key);

        if let Some(cached) = self.cache.borrow().get(&canon) {
            return cached.to_vec();
        }
        if !self.in_flight.borrow_mut().insert(canon.clone()) {
            warn!(variable = %canon, "Cyclic variable resolution, returning empty");
            return Vec::new();
        }

        let candidates = self.provider_values(&canon, resolver);

        let mut set = CasePreservingSet::new();
        for candidate in candidates {
            let candidate = normalize_drive_path(&candidate);
            if contains_token(&candidate) {
                let nested = KbVariableSource { kb: self, resolver };
                set.extend(expand_template(&candidate, &nested));
            } else {
                set.add(candidate);
            }
        }

        self.in_flight.borrow_mut().remove(&canon);

        if set.is_empty() {
            warn!(variable = %key, "Could not resolve variable");
        }
        let values = set.to_vec();
        self.cache.borrow_mut().insert(canon, set);
        values
    }

    /// Runs every provider source of a variable through the resolver,
    /// trying the canonical name first and the `environ_`-prefixed
    /// Windows form second.
    fn provider_values(&self, canon: &str, resolver: &dyn ProviderResolver) -> Vec<String> {
        let sources = self
            .providers
            .get(canon)
            .or_else(|| self.providers.get(&format!("environ_{}", canon)));
        let Some(sources) = sources else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for source in sources {
            out.extend(resolver.resolve_source(source));
        }
        out
    }
}

/// Variable lookups made from inside a resolution, e.g. while expanding a
/// provider value that itself contains tokens.
struct KbVariableSource<'a> {
    kb: &'a KnowledgeBase,
    resolver: &'a dyn ProviderResolver,
}

impl VariableSource for KbVariableSource<'_> {
    fn lookup(&self, name: &str) -> Vec<String> {
        self.kb.get(name, self.resolver)
    }
}
