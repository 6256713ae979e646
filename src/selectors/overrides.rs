//! Selector override files
//!
//! An override file maps logical element names to extra locators that are
//! tried before the built-in defaults:
//!
//! ```toml
//! [[email]]
//! by = "css_selector"
//! value = "input#new-email"
//! ```
//!
//! The same shape is accepted as JSON (`{"email": [{"by": "ID", "value": "x"}]}`),
//! chosen by file extension.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use super::{ElementKey, Selector, Strategy};
use crate::error::ConfigError;

#[derive(Debug, Deserialize)]
struct RawSelector {
    by: String,
    value: String,
}

/// Parsed overrides, keyed by logical element
#[derive(Debug, Clone, Default)]
pub struct SelectorOverrides {
    entries: Vec<(ElementKey, Vec<Selector>)>,
}

impl SelectorOverrides {
    pub fn iter(&self) -> impl Iterator<Item = (&ElementKey, &Vec<Selector>)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: ElementKey) -> Option<&[Selector]> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_slice())
    }

    /// Parse override content; `json` selects JSON instead of TOML
    pub fn parse(content: &str, json: bool) -> Result<Self, String> {
        let raw: HashMap<String, Vec<RawSelector>> = if json {
            serde_json::from_str(content).map_err(|e| e.to_string())?
        } else {
            toml::from_str(content).map_err(|e| e.to_string())?
        };

        let mut names: Vec<&String> = raw.keys().collect();
        names.sort();

        let mut problems = Vec::new();
        let mut entries = Vec::new();
        for name in names {
            let Some(key) = ElementKey::parse(name) else {
                tracing::warn!(element = %name, "Unknown element in selector overrides; ignored");
                continue;
            };
            let mut selectors = Vec::new();
            for item in &raw[name] {
                let by = item.by.trim();
                let by = by
                    .strip_prefix("By.")
                    .or_else(|| by.strip_prefix("by."))
                    .unwrap_or(by);
                match Strategy::parse(by) {
                    Some(strategy) if !item.value.trim().is_empty() => {
                        selectors.push(Selector::new(strategy, item.value.trim()));
                    }
                    Some(_) => problems.push(format!("{name}: empty selector value")),
                    None => problems.push(format!("{name}: unknown strategy '{}'", item.by)),
                }
            }
            if !selectors.is_empty() {
                entries.push((key, selectors));
            }
        }

        if problems.is_empty() {
            Ok(Self { entries })
        } else {
            Err(problems.join("; "))
        }
    }
}

/// Read and parse an override file (TOML, or JSON for `.json`)
pub fn load_overrides(path: &Path) -> Result<SelectorOverrides, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    SelectorOverrides::parse(&content, json).map_err(|message| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selectors::SelectorRegistry;
    use std::io::Write;

    #[test]
    fn test_parse_toml_overrides() {
        let content = r#"
            [[email]]
            by = "css_selector"
            value = "input#new-email"

            [[location]]
            by = "ID"
            value = "facility"
        "#;
        let overrides = SelectorOverrides::parse(content, false).unwrap();
        assert_eq!(
            overrides.get(ElementKey::Email),
            Some(&[Selector::css("input#new-email")][..])
        );
        assert_eq!(
            overrides.get(ElementKey::Location),
            Some(&[Selector::id("facility")][..])
        );
    }

    #[test]
    fn test_parse_json_overrides() {
        let content = r#"{"PASSWORD_SELECTORS": [{"by": "By.NAME", "value": "pw"}], "mystery": []}"#;
        let overrides = SelectorOverrides::parse(content, true).unwrap();
        assert_eq!(
            overrides.get(ElementKey::Password),
            Some(&[Selector::name("pw")][..])
        );
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let content = r#"{"email": [{"by": "telepathy", "value": "x"}]}"#;
        let err = SelectorOverrides::parse(content, true).unwrap_err();
        assert!(err.contains("unknown strategy"));
    }

    #[test]
    fn test_load_overrides_file_into_registry() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"sign_in": [{{"by": "xpath", "value": "//button[@id='go']"}}]}}"#).unwrap();

        let registry = SelectorRegistry::load(Some(file.path())).unwrap();
        let sign_in = registry.get(ElementKey::SignIn);
        assert_eq!(sign_in.first(), &Selector::xpath("//button[@id='go']"));
        assert!(sign_in.contains(&Selector::name("commit")));
    }

    #[test]
    fn test_missing_override_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SelectorRegistry::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(registry.get(ElementKey::SignIn).first(), &Selector::name("commit"));
    }
}
