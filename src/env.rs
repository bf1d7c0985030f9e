//! Environment snapshots with per-key sensitivity.
//!
//! Keys are kept in sorted order so command lines built from a snapshot are deterministic.
//! Sensitivity only decides masking; it never drops a variable.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::util::expand_vars;

/// Host/agent specific variable that is never forwarded into a container.
pub const HOSTNAME: &str = "HOSTNAME";

#[cfg(unix)]
const PATH_LIST_SEPARATOR: char = ':';
#[cfg(not(unix))]
const PATH_LIST_SEPARATOR: char = ';';

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    sensitive: BTreeSet<String>,
}

impl EnvSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut env = Self::new();
        for (k, v) in pairs {
            env.insert(k, v);
        }
        env
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn insert_sensitive(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        let key = key.into();
        self.sensitive.insert(key.clone());
        self.vars.insert(key, value.into());
        self
    }

    pub fn mark_sensitive<I, S>(&mut self, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sensitive.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.vars.remove(key)
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        self.sensitive.contains(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Apply one override. `KEY+SUFFIX=value` prepends `value` to `KEY` as a path list entry.
    pub fn override_one(&mut self, key: &str, value: &str) {
        match key.split_once('+') {
            Some((real, _)) if !real.is_empty() => {
                if value.is_empty() {
                    return;
                }
                let merged = match self.vars.get(real) {
                    Some(existing) if !existing.is_empty() => {
                        format!("{value}{PATH_LIST_SEPARATOR}{existing}")
                    }
                    _ => value.to_string(),
                };
                self.vars.insert(real.to_string(), merged);
            }
            _ => {
                self.vars.insert(key.to_string(), value.to_string());
            }
        }
    }

    /// Layer every entry of `other` on top of this snapshot, keeping sensitivity flags.
    pub fn override_all(&mut self, other: &EnvSnapshot) {
        for (k, v) in other.iter() {
            self.override_one(k, v);
        }
        self.sensitive.extend(other.sensitive.iter().cloned());
    }

    /// Expand `$VAR` references in `s` against this snapshot.
    pub fn expand(&self, s: &str) -> String {
        expand_vars(s, |k| self.vars.get(k).cloned())
    }

    /// Resolve cross-references between values until nothing changes.
    ///
    /// A value never expands a reference to its own key, so `PATH=$PATH:/x` stays bounded.
    pub fn resolve(&mut self) {
        for _ in 0..=self.vars.len() {
            let mut changed = false;
            let snapshot = self.vars.clone();
            for (key, value) in self.vars.iter_mut() {
                let resolved = expand_vars(value, |k| {
                    if k == key {
                        None
                    } else {
                        snapshot.get(k).cloned()
                    }
                });
                if &resolved != value {
                    *value = resolved;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Drop every entry whose value is identical to the same key in `baseline`.
    pub fn without_unchanged(mut self, baseline: &EnvSnapshot) -> Self {
        self.vars
            .retain(|k, v| baseline.vars.get(k).map(|b| b != v).unwrap_or(true));
        self
    }

    /// Parse `env` output (`KEY=VALUE` per line). Lines without `=` continue the previous value.
    pub fn parse_env_output(text: &str) -> Self {
        let mut env = Self::new();
        let mut last: Option<String> = None;
        for raw in text.lines() {
            let line = raw.trim_end_matches('\r');
            match line.split_once('=') {
                Some((k, v)) if !k.is_empty() && !k.contains(char::is_whitespace) => {
                    env.vars.insert(k.to_string(), v.to_string());
                    last = Some(k.to_string());
                }
                _ => {
                    if let Some(prev) = last.as_ref().and_then(|k| env.vars.get_mut(k)) {
                        prev.push('\n');
                        prev.push_str(line);
                    }
                }
            }
        }
        env
    }
}

/// Build-setup collaborators that adjust the environment seen by redirected commands.
pub trait EnvContributor: Send + Sync {
    fn build_env_vars(&self, env: &mut EnvSnapshot);
}

/// Fixed overrides, applied with [`EnvSnapshot::override_one`] semantics.
#[derive(Debug, Clone, Default)]
pub struct StaticEnv(pub Vec<(String, String)>);

impl EnvContributor for StaticEnv {
    fn build_env_vars(&self, env: &mut EnvSnapshot) {
        for (k, v) in &self.0 {
            env.override_one(k, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_output_handles_crlf_and_continuations() {
        let env = EnvSnapshot::parse_env_output(
            "PATH=/usr/bin:/bin\r\nHOME=/root\r\nMULTI=first\nsecond\nEMPTY=\n",
        );
        assert_eq!(env.get("PATH"), Some("/usr/bin:/bin"));
        assert_eq!(env.get("HOME"), Some("/root"));
        assert_eq!(env.get("MULTI"), Some("first\nsecond"));
        assert_eq!(env.get("EMPTY"), Some(""));
        assert_eq!(env.len(), 4);
    }

    #[test]
    fn test_path_style_override_prepends() {
        let mut env = EnvSnapshot::from_pairs([("PATH", "/usr/bin")]);
        env.override_one("PATH+MAVEN", "/opt/maven/bin");
        assert_eq!(env.get("PATH"), Some("/opt/maven/bin:/usr/bin"));
        assert!(!env.contains_key("PATH+MAVEN"));

        let mut empty = EnvSnapshot::new();
        empty.override_one("PATH+JDK", "/opt/jdk/bin");
        assert_eq!(empty.get("PATH"), Some("/opt/jdk/bin"));
    }

    #[test]
    fn test_resolve_follows_chains_and_keeps_self_refs() {
        let mut env = EnvSnapshot::from_pairs([
            ("A", "${B}/a"),
            ("B", "$C/b"),
            ("C", "/c"),
            ("PATH", "$PATH:/x"),
        ]);
        env.resolve();
        assert_eq!(env.get("A"), Some("/c/b/a"));
        assert_eq!(env.get("B"), Some("/c/b"));
        assert_eq!(env.get("PATH"), Some("$PATH:/x"));
    }

    #[test]
    fn test_without_unchanged_drops_baseline_values() {
        let baseline = EnvSnapshot::from_pairs([("PATH", "/bin"), ("HOME", "/root")]);
        let effective = EnvSnapshot::from_pairs([
            ("PATH", "/opt/bin:/bin"),
            ("HOME", "/root"),
            ("NEW", "1"),
        ]);
        let delta = effective.without_unchanged(&baseline);
        assert_eq!(delta.get("PATH"), Some("/opt/bin:/bin"));
        assert_eq!(delta.get("NEW"), Some("1"));
        assert!(!delta.contains_key("HOME"));
    }

    #[test]
    fn test_sensitivity_survives_override_all() {
        let mut base = EnvSnapshot::new();
        let mut other = EnvSnapshot::new();
        other.insert_sensitive("TOKEN", "t0p");
        base.override_all(&other);
        assert!(base.is_sensitive("TOKEN"));
        assert_eq!(base.get("TOKEN"), Some("t0p"));
    }
}
