//! Variable expansion in path templates.
//!
//! Templates contain `%TOKEN%` occurrences which expand to every value of
//! the token, building a cross-product over all tokens. Values may
//! themselves contain variables and are expanded recursively; a nested
//! expansion must yield exactly one result. Expansion fails soft: an
//! unresolvable token empties the whole template with a warning.

use std::sync::OnceLock;

use regex::Regex;
use tracing::{error, warn};

/// Lookup interface the expander resolves tokens against.
pub trait VariableSource {
    /// Values of a variable; empty means unresolvable.
    fn lookup(&self, name: &str) -> Vec<String>;
}

// Accepts both %TOKEN% and the malformed %%TOKEN% / %TOKEN%% forms found
// in some catalogues; the surrounding markers are part of the match and
// stripped on substitution.
fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"%?%([A-Za-z0-9_.-]+)%?%").expect("token regex"))
}

/// Returns true if the string still contains a variable token.
pub fn contains_token(text: &str) -> bool {
    token_regex().is_match(text)
}

/// Expands every `%TOKEN%` in the template against the variable source.
///
/// Returns all concrete strings obtainable by substituting each token with
/// each of its values. Tokens are substituted in order of first occurrence;
/// all occurrences of a token are replaced at once. Returns an empty list
/// when any token is unresolvable or a nested expansion is ambiguous.
pub fn expand_template(template: &str, vars: &dyn VariableSource) -> Vec<String> {
    let mut tokens: Vec<(String, String)> = Vec::new();
    for caps in token_regex().captures_iter(template) {
        let token = caps.get(0).expect("match").as_str().to_string();
        let name = caps.get(1).expect("group").as_str().to_string();
        if !tokens.iter().any(|(t, _)| *t == token) {
            tokens.push((token, name));
        }
    }

    let mut results = vec![template.to_string()];
    for (token, name) in tokens {
        let substitutions = vars.lookup(&name);
        if substitutions.is_empty() {
            warn!(template, %token, "Cannot resolve path, variable is unknown");
            return Vec::new();
        }

        let mut next = Vec::new();
        for result in &results {
            for value in &substitutions {
                // Some variables contain variables themselves; those must
                // resolve to exactly one value.
                let replacement = if contains_token(value) {
                    let nested = expand_template(value, vars);
                    if nested.len() != 1 {
                        error!(%value, "Nested variable replacement is ambiguous, aborting");
                        return Vec::new();
                    }
                    nested.into_iter().next().expect("one result")
                } else {
                    value.clone()
                };
                next.push(result.replace(&token, &replacement));
            }
        }
        results = next;
    }

    results
}
