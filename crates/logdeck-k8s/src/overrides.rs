use std::fmt;
use std::str::FromStr;

use regex::Regex;

#[derive(Debug, thiserror::Error)]
pub enum OverrideError {
    #[error("malformed key:value pair {0:?} in container overrides")]
    Malformed(String),

    #[error("empty key in key:value pair {0:?} in container overrides")]
    EmptyKey(String),

    #[error("invalid pattern {key:?}: {source}")]
    Pattern {
        key: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Clone, Debug)]
struct Override {
    key: String,
    pattern: Regex,
    container: String,
}

/// Container names keyed by `pod/<glob>` or `deploy/<glob>`.
///
/// Keys support `*`, `?` and `[...]` as in shell globs; neither wildcard
/// crosses a `/`. Exact keys win over patterns, then patterns are tried in
/// the order they were added.
#[derive(Clone, Debug, Default)]
pub struct ContainerOverrides {
    entries: Vec<Override>,
}

impl ContainerOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a `key:container;key:container` list. An empty container
    /// removes the key.
    pub fn apply(&mut self, spec: &str) -> Result<(), OverrideError> {
        for pair in spec.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, container) = pair
                .split_once(':')
                .ok_or_else(|| OverrideError::Malformed(pair.to_string()))?;
            let (key, container) = (key.trim(), container.trim());

            if key.is_empty() {
                return Err(OverrideError::EmptyKey(pair.to_string()));
            }
            if container.is_empty() {
                self.remove(key);
                continue;
            }
            self.insert(key, container)?;
        }
        Ok(())
    }

    /// Set the container for `key`, replacing any previous value
    pub fn insert(&mut self, key: &str, container: &str) -> Result<(), OverrideError> {
        let pattern = glob_to_regex(key).map_err(|source| OverrideError::Pattern {
            key: key.to_string(),
            source,
        })?;

        match self.entries.iter_mut().find(|o| o.key == key) {
            Some(existing) => existing.container = container.to_string(),
            None => self.entries.push(Override {
                key: key.to_string(),
                pattern,
                container: container.to_string(),
            }),
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|o| o.key != key);
    }

    /// Set `key` only if it has no container yet; returns the container in effect
    pub fn try_add(&mut self, key: &str, container: &str) -> Result<String, OverrideError> {
        if let Some(existing) = self.entries.iter().find(|o| o.key == key) {
            return Ok(existing.container.clone());
        }
        self.insert(key, container)?;
        Ok(container.to_string())
    }

    /// Container for `name` (e.g. `pod/api-123`)
    pub fn matches(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|o| o.key == name)
            .or_else(|| self.entries.iter().find(|o| o.pattern.is_match(name)))
            .map(|o| o.container.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl FromStr for ContainerOverrides {
    type Err = OverrideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut overrides = Self::new();
        overrides.apply(s)?;
        Ok(overrides)
    }
}

impl fmt::Display for ContainerOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pairs: Vec<_> = self
            .entries
            .iter()
            .map(|o| format!("{}:{}", o.key, o.container))
            .collect();
        pairs.sort();
        write!(f, "{}", pairs.join(";"))
    }
}

/// Translate a shell glob into an anchored regex
fn glob_to_regex(glob: &str) -> Result<Regex, regex::Error> {
    let mut pattern = String::from("^");
    let mut chars = glob.chars();

    while let Some(c) = chars.next() {
        match c {
            '*' => pattern.push_str("[^/]*"),
            '?' => pattern.push_str("[^/]"),
            '\\' => {
                if let Some(next) = chars.next() {
                    pattern.push_str(&regex::escape(&next.to_string()));
                }
            }
            '[' => {
                pattern.push('[');
                let mut class = chars.by_ref().take_while(|&c| c != ']').peekable();
                if class.peek() == Some(&'^') {
                    class.next();
                    pattern.push('^');
                }
                for c in class {
                    if matches!(c, '[' | '&' | '~' | '\\') {
                        pattern.push('\\');
                    }
                    pattern.push(c);
                }
                pattern.push(']');
            }
            _ => pattern.push_str(&regex::escape(&c.to_string())),
        }
    }

    pattern.push('$');
    Regex::new(&pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_and_remove() {
        let mut overrides: ContainerOverrides = "deploy/api:server; pod/worker-*:app".parse().unwrap();
        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides.to_string(), "deploy/api:server;pod/worker-*:app");

        overrides.apply("deploy/api:").unwrap();
        assert_eq!(overrides.to_string(), "pod/worker-*:app");

        // removing an unknown key is not an error
        overrides.apply("deploy/nope:").unwrap();
        assert_eq!(overrides.len(), 1);
    }

    #[test]
    fn test_malformed_pairs() {
        assert!(matches!(
            "deploy/api".parse::<ContainerOverrides>(),
            Err(OverrideError::Malformed(_))
        ));
        assert!(matches!(
            " :server".parse::<ContainerOverrides>(),
            Err(OverrideError::EmptyKey(_))
        ));
    }

    #[test]
    fn test_glob_matching() {
        let overrides: ContainerOverrides = "pod/api-?-*:server;pod/db-[0-9]:postgres".parse().unwrap();

        assert_eq!(overrides.matches("pod/api-a-123"), Some("server"));
        assert_eq!(overrides.matches("pod/api-ab-123"), None);
        assert_eq!(overrides.matches("pod/db-1"), Some("postgres"));
        assert_eq!(overrides.matches("pod/db-x"), None);
        assert_eq!(overrides.matches("deploy/api-a-1"), None);
    }

    #[test]
    fn test_star_does_not_cross_slash() {
        let overrides: ContainerOverrides = "*:sidecar".parse().unwrap();
        assert_eq!(overrides.matches("pod/x"), None);

        let overrides: ContainerOverrides = "*/x:sidecar".parse().unwrap();
        assert_eq!(overrides.matches("pod/x"), Some("sidecar"));
    }

    #[test]
    fn test_exact_key_wins() {
        let overrides: ContainerOverrides = "pod/*:generic;pod/api:specific".parse().unwrap();
        assert_eq!(overrides.matches("pod/api"), Some("specific"));
        assert_eq!(overrides.matches("pod/web"), Some("generic"));
    }

    #[test]
    fn test_try_add_does_not_override() {
        let mut overrides: ContainerOverrides = "pod/api-1:explicit".parse().unwrap();
        assert_eq!(overrides.try_add("pod/api-1", "from-deploy").unwrap(), "explicit");
        assert_eq!(overrides.try_add("pod/api-2", "from-deploy").unwrap(), "from-deploy");
        assert_eq!(overrides.matches("pod/api-2"), Some("from-deploy"));
    }
}
