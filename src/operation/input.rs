//! Accumulated provisioning input that steps append to.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single configuration override for a component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub secret: bool,
}

impl ConfigEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            secret: false,
        }
    }
}

/// Per-component override lists, append-only for the life of an operation.
///
/// Appending an entry that is already present for the component is a no-op,
/// so a replayed step does not duplicate its overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputCreator {
    #[serde(default)]
    overrides: BTreeMap<String, Vec<ConfigEntry>>,
}

impl InputCreator {
    pub fn append_overrides(&mut self, component: &str, entries: Vec<ConfigEntry>) {
        let existing = self.overrides.entry(component.to_string()).or_default();
        for entry in entries {
            if !existing.contains(&entry) {
                existing.push(entry);
            }
        }
    }

    pub fn overrides(&self, component: &str) -> &[ConfigEntry] {
        self.overrides
            .get(component)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.overrides.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_overrides() {
        let mut input = InputCreator::default();
        input.append_overrides("nats-streaming", vec![ConfigEntry::new("a", "1")]);
        input.append_overrides("nats-streaming", vec![ConfigEntry::new("b", "2")]);

        let keys: Vec<_> = input
            .overrides("nats-streaming")
            .iter()
            .map(|e| e.key.as_str())
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert!(input.overrides("other").is_empty());
    }

    #[test]
    fn test_replayed_append_does_not_duplicate() {
        let mut input = InputCreator::default();
        input.append_overrides("c", vec![ConfigEntry::new("a", "1")]);
        input.append_overrides("c", vec![ConfigEntry::new("a", "1")]);
        assert_eq!(input.overrides("c").len(), 1);
        assert_eq!(input.components().collect::<Vec<_>>(), vec!["c"]);
    }
}
