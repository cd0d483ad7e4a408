//! Provides map and clears-provides pattern matching
//!
//! "Provides" are key-value facts asserted by the installed artifact
//! about the device ("rootfs-image.version": "v2", ...). An artifact can
//! also carry "clears provides" patterns which invalidate existing keys
//! before its own provides are applied.

use std::collections::BTreeMap;

/// Facts about the currently installed software, keyed by name.
///
/// A `BTreeMap` keeps serialization deterministic (sorted keys).
pub type ProvidesMap = BTreeMap<String, String>;

/// Ordered list of glob patterns applied against provides keys.
pub type ClearsProvides = Vec<String>;

/// Match `key` against an anchored glob `pattern`.
///
/// Only `*` is supported; it matches any (possibly empty) sequence of
/// characters. The pattern must cover the whole key.
pub fn matches_glob(pattern: &str, key: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = key.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pat.len() && pat[p] == '*' {
            // Tentatively match zero characters; remember where to resume
            // if the literal tail fails.
            backtrack = Some((p, t));
            p += 1;
        } else if p < pat.len() && pat[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star_p, star_t)) = backtrack {
            // Extend the last `*` by one more character.
            p = star_p + 1;
            t = star_t + 1;
            backtrack = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    while p < pat.len() && pat[p] == '*' {
        p += 1;
    }
    p == pat.len()
}

/// Remove every entry of `provides` whose key matches any of `patterns`.
pub fn apply_clears(provides: &mut ProvidesMap, patterns: &[String]) {
    provides.retain(|key, _| !patterns.iter().any(|pattern| matches_glob(pattern, key)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_patterns_match_exactly() {
        assert!(matches_glob("artifact_group", "artifact_group"));
        assert!(!matches_glob("artifact_group", "artifact_group2"));
        assert!(!matches_glob("artifact_group2", "artifact_group"));
    }

    #[test]
    fn star_matches_any_run() {
        assert!(matches_glob("rootfs-image.*", "rootfs-image.version"));
        assert!(matches_glob("rootfs-image.*", "rootfs-image."));
        assert!(!matches_glob("rootfs-image.*", "rootfs-image"));
        assert!(matches_glob("*", "anything"));
        assert!(matches_glob("*", ""));
        assert!(matches_glob("a*c", "abc"));
        assert!(matches_glob("a*c", "ac"));
        assert!(matches_glob("a*b*c", "a-x-b-y-c"));
        assert!(!matches_glob("a*b*c", "a-x-b-y"));
    }

    #[test]
    fn clears_drop_matching_keys() {
        let mut provides: ProvidesMap = [
            ("something_extra", "1"),
            ("something_extra2", "2"),
            ("something_different", "3"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        apply_clears(&mut provides, &["something_extra*".to_string()]);

        assert_eq!(provides.len(), 1);
        assert!(provides.contains_key("something_different"));
    }
}
