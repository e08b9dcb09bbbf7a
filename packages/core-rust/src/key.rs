//! Physical key grammar.
//!
//! The backing store holds two disjoint key namespaces:
//!
//! - **Option keys**: `<prefix>.<preset>.<name>`, exactly three non-empty
//!   dot-separated segments. The preset segment is remapped when the active
//!   preset changes.
//! - **Plain keys**: any other key containing at least one dot, used for
//!   singleton records such as global settings or the presets manifest.
//!
//! Keys without a dot are reserved and always rejected.

use thiserror::Error;

/// Default prefix of the option namespace.
pub const DEFAULT_OPTION_PREFIX: &str = "compilerOption";

/// Name of the preset that is active before any switch.
pub const DEFAULT_PRESET: &str = "default";

/// Plain key holding the global settings record.
pub const SETTINGS_KEY: &str = "root.settings";

/// Plain key holding the presets manifest.
pub const PRESETS_KEY: &str = "root.presets";

/// Reason a key was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// The key contains no dot; such keys are reserved.
    #[error("key `{0}` has no dot-separated segments")]
    MissingDot(String),
    /// The key is in the option namespace but is not `prefix.preset.name`.
    #[error("option key `{0}` must have exactly three non-empty segments")]
    MalformedOption(String),
    /// A plain item was requested for a key inside the option namespace.
    #[error("key `{0}` belongs to the option namespace")]
    ReservedNamespace(String),
    /// An option name was empty or contained a dot.
    #[error("option name `{0}` must be non-empty and contain no dots")]
    InvalidOptionName(String),
    /// A preset name was empty or contained a dot.
    #[error("preset name `{0}` must be non-empty and contain no dots")]
    InvalidPresetName(String),
}

/// Classification of a well-formed physical key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind<'a> {
    /// `prefix.preset.name`.
    Option {
        /// Preset segment.
        preset: &'a str,
        /// Logical option name.
        name: &'a str,
    },
    /// Any other dotted key.
    Plain,
}

/// Key grammar bound to one option prefix.
#[derive(Debug, Clone)]
pub struct KeySpace {
    prefix: String,
    /// `prefix` followed by a dot, precomputed for namespace checks.
    dotted: String,
}

impl KeySpace {
    /// Creates a key space for the given option prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let dotted = format!("{prefix}.");
        Self { prefix, dotted }
    }

    /// The option prefix, without the trailing dot.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether `key` lies in the option namespace, well-formed or not.
    #[must_use]
    pub fn is_option_key(&self, key: &str) -> bool {
        key.starts_with(&self.dotted)
    }

    /// Classifies a physical key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::MissingDot`] for undotted keys and
    /// [`KeyError::MalformedOption`] for option keys that are not exactly
    /// three non-empty segments.
    pub fn classify<'a>(&self, key: &'a str) -> Result<KeyKind<'a>, KeyError> {
        if self.is_option_key(key) {
            let mut segments = key.split('.');
            let (Some(_), Some(preset), Some(name), None) = (
                segments.next(),
                segments.next(),
                segments.next(),
                segments.next(),
            ) else {
                return Err(KeyError::MalformedOption(key.to_string()));
            };
            if preset.is_empty() || name.is_empty() {
                return Err(KeyError::MalformedOption(key.to_string()));
            }
            return Ok(KeyKind::Option { preset, name });
        }
        if key.contains('.') {
            Ok(KeyKind::Plain)
        } else {
            Err(KeyError::MissingDot(key.to_string()))
        }
    }

    /// Builds the physical key `prefix.preset.name`.
    #[must_use]
    pub fn option_key(&self, preset: &str, name: &str) -> String {
        format!("{}{preset}.{name}", self.dotted)
    }

    /// The prefix shared by every option key of `preset`, including the
    /// trailing dot.
    #[must_use]
    pub fn preset_prefix(&self, preset: &str) -> String {
        format!("{}{preset}.", self.dotted)
    }

    /// Validates a key requested for a plain item.
    ///
    /// # Errors
    ///
    /// Undotted keys and keys in the option namespace are refused.
    pub fn check_plain(&self, key: &str) -> Result<(), KeyError> {
        if !key.contains('.') {
            return Err(KeyError::MissingDot(key.to_string()));
        }
        if self.is_option_key(key) {
            return Err(KeyError::ReservedNamespace(key.to_string()));
        }
        Ok(())
    }

    /// Validates a logical option name.
    ///
    /// # Errors
    ///
    /// Empty names and names containing a dot are refused.
    pub fn check_option_name(&self, name: &str) -> Result<(), KeyError> {
        if name.is_empty() || name.contains('.') {
            return Err(KeyError::InvalidOptionName(name.to_string()));
        }
        Ok(())
    }

    /// Validates a preset name, which becomes the middle key segment.
    ///
    /// # Errors
    ///
    /// Empty names and names containing a dot are refused.
    pub fn check_preset_name(&self, preset: &str) -> Result<(), KeyError> {
        if preset.is_empty() || preset.contains('.') {
            return Err(KeyError::InvalidPresetName(preset.to_string()));
        }
        Ok(())
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(DEFAULT_OPTION_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn classifies_option_keys() {
        let keys = KeySpace::default();
        assert_eq!(
            keys.classify("compilerOption.default.strict"),
            Ok(KeyKind::Option {
                preset: "default",
                name: "strict"
            })
        );
        assert_eq!(keys.classify("root.settings"), Ok(KeyKind::Plain));
        assert_eq!(keys.classify("a.b.c.d"), Ok(KeyKind::Plain));
    }

    #[test]
    fn rejects_malformed_option_keys() {
        let keys = KeySpace::default();
        for bad in [
            "compilerOption.",
            "compilerOption.default",
            "compilerOption..strict",
            "compilerOption.default.",
            "compilerOption.a.b.c",
        ] {
            assert_eq!(
                keys.classify(bad),
                Err(KeyError::MalformedOption(bad.to_string())),
                "{bad}"
            );
        }
    }

    #[test]
    fn rejects_undotted_keys() {
        let keys = KeySpace::default();
        assert_eq!(
            keys.classify("settings"),
            Err(KeyError::MissingDot("settings".to_string()))
        );
        // The bare prefix without a dot is not in the option namespace.
        assert!(matches!(
            keys.classify("compilerOption"),
            Err(KeyError::MissingDot(_))
        ));
    }

    #[test]
    fn plain_and_option_name_checks() {
        let keys = KeySpace::default();
        assert!(keys.check_plain("root.presets").is_ok());
        assert!(keys.check_plain("root").is_err());
        assert_eq!(
            keys.check_plain("compilerOption.default.strict"),
            Err(KeyError::ReservedNamespace(
                "compilerOption.default.strict".to_string()
            ))
        );
        assert!(keys.check_option_name("strict").is_ok());
        assert!(keys.check_option_name("").is_err());
        assert!(keys.check_option_name("a.b").is_err());
        assert!(keys.check_preset_name("p2").is_ok());
        assert_eq!(
            keys.check_preset_name("p.2"),
            Err(KeyError::InvalidPresetName("p.2".to_string()))
        );
    }

    #[test]
    fn custom_prefix() {
        let keys = KeySpace::new("opt");
        assert_eq!(keys.option_key("p1", "target"), "opt.p1.target");
        assert_eq!(keys.preset_prefix("p1"), "opt.p1.");
        assert!(keys.is_option_key("opt.p1.target"));
        assert!(!keys.is_option_key("compilerOption.p1.target"));
    }

    proptest! {
        #[test]
        fn built_option_keys_round_trip(preset in "[a-z0-9-]{1,12}", name in "[A-Za-z]{1,16}") {
            let keys = KeySpace::default();
            let full = keys.option_key(&preset, &name);
            prop_assert_eq!(
                keys.classify(&full),
                Ok(KeyKind::Option { preset: preset.as_str(), name: name.as_str() })
            );
            prop_assert!(full.starts_with(&keys.preset_prefix(&preset)));
        }

        #[test]
        fn undotted_keys_never_classify(key in "[A-Za-z0-9_-]{0,24}") {
            let keys = KeySpace::default();
            prop_assert!(keys.classify(&key).is_err());
        }
    }
}
