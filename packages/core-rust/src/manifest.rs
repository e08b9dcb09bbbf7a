//! Presets manifest record stored under [`PRESETS_KEY`](crate::key::PRESETS_KEY).
//!
//! Lists the known presets and which one is active. The cache engine only
//! remaps keys; keeping this manifest consistent with the engine's active
//! preset is the caller's job.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::key::DEFAULT_PRESET;
use crate::schema::{to_record, ItemSchema, Validation};
use crate::types::Record;

/// One preset: unique key plus user-facing name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetEntry {
    /// Preset segment used in option keys.
    pub key: String,
    /// Display name. Never empty.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
}

/// The presets manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetsManifest {
    /// Key of the active preset; always one of `items`.
    pub active: String,
    /// Known presets. Never empty.
    pub items: Vec<PresetEntry>,
}

impl Default for PresetsManifest {
    fn default() -> Self {
        Self {
            active: DEFAULT_PRESET.to_string(),
            items: vec![PresetEntry {
                key: DEFAULT_PRESET.to_string(),
                name: "Default".to_string(),
                description: String::new(),
            }],
        }
    }
}

fn non_empty_str<'a>(item: &'a Record, field: &str) -> Option<&'a str> {
    item.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

impl PresetsManifest {
    /// Parses and repairs a raw manifest record.
    ///
    /// Returns the usable manifest plus a list of problems found. An empty
    /// list means the raw record was already consistent.
    #[must_use]
    pub fn validate(raw: &Record) -> (Self, Vec<String>) {
        let (Some(active), Some(raw_items)) = (
            raw.get("active").and_then(Value::as_str),
            raw.get("items").and_then(Value::as_array),
        ) else {
            return (
                Self::default(),
                vec!["the presets record must have a string `active` and an `items` list".to_string()],
            );
        };

        let mut errors: Vec<String> = Vec::new();
        let mut push_error = |msg: String| {
            if !errors.contains(&msg) {
                errors.push(msg);
            }
        };
        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(raw_items.len());

        for item in raw_items {
            let entry = item.as_object().and_then(|obj| {
                Some((non_empty_str(obj, "key")?, non_empty_str(obj, "name")?, obj))
            });
            let Some((key, name, obj)) = entry else {
                push_error("an item in `items` is not a valid preset entry".to_string());
                continue;
            };
            if !seen.insert(key.to_string()) {
                push_error(format!("duplicate preset key `{key}` in `items`"));
                continue;
            }
            let description = obj
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default();
            items.push(PresetEntry {
                key: key.to_string(),
                name: name.to_string(),
                description: description.to_string(),
            });
        }

        let mut active = active.to_string();
        if !seen.contains(&active) {
            push_error(format!("active preset `{active}` is not listed in `items`"));
            match items.first() {
                Some(first) => active.clone_from(&first.key),
                None => {
                    push_error("the list of presets cannot be empty".to_string());
                    return (Self::default(), errors);
                }
            }
        }

        (Self { active, items }, errors)
    }

    /// Serializes the manifest into a record.
    #[must_use]
    pub fn to_record(&self) -> Record {
        to_record(self)
    }

    /// Whether a preset with `key` is listed.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.items.iter().any(|item| item.key == key)
    }

    /// Keys of every listed preset, in order.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.key.as_str()).collect()
    }

    /// Appends a new preset with a fresh uuid key, makes it active, and
    /// returns the key.
    pub fn add(&mut self, name: impl Into<String>, description: impl Into<String>) -> String {
        let key = Uuid::new_v4().to_string();
        self.items.push(PresetEntry {
            key: key.clone(),
            name: name.into(),
            description: description.into(),
        });
        self.active.clone_from(&key);
        key
    }

    /// Renames a preset. Returns `false` if the key is unknown or the name is
    /// empty.
    pub fn rename(&mut self, key: &str, name: &str, description: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        match self.items.iter_mut().find(|item| item.key == key) {
            Some(item) => {
                item.name = name.to_string();
                item.description = description.to_string();
                true
            }
            None => false,
        }
    }

    /// Removes a preset and returns the key that becomes active.
    ///
    /// Removing the last preset keeps it listed, so the manifest never
    /// becomes empty. Returns `None` if `key` is unknown.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.items.iter().position(|item| item.key == key)?;
        if self.items.len() == 1 {
            self.active = key.to_string();
            return Some(self.active.clone());
        }
        self.items.remove(index);
        self.active.clone_from(&self.items[0].key);
        Some(self.active.clone())
    }
}

/// [`ItemSchema`] for the presets manifest.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestSchema;

impl ItemSchema for ManifestSchema {
    fn validate(&self, key: &str, raw: &Record) -> Validation {
        let (manifest, errors) = PresetsManifest::validate(raw);
        if errors.is_empty() {
            Validation::Valid(manifest.to_record())
        } else {
            for error in &errors {
                tracing::warn!(key, "{error}");
            }
            Validation::Invalid(manifest.to_record())
        }
    }

    fn create_default(&self, _key: &str) -> Record {
        PresetsManifest::default().to_record()
    }
}
