use crate::error::RegistryError;
use formtree_types::LocalizedText;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Describes one field: how it is edited, what type its value has and the
/// rules its value must satisfy. Owned by the field registry; read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldEntry {
    pub id: String,
    /// Widget name requested by the registry (`text`, `textarea`, `select`...).
    #[serde(default)]
    pub widget: String,
    #[serde(default)]
    pub datatype: Datatype,
    #[serde(default)]
    pub rules: FieldRules,
    /// Opaque presentation hints passed through to the widget.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub ui: Value,
    #[serde(default, alias = "defaultValue", skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

impl FieldEntry {
    fn simple(id: &str, widget: &str, datatype: Datatype) -> Self {
        Self {
            id: id.into(),
            widget: widget.into(),
            datatype,
            rules: FieldRules::default(),
            ui: Value::Null,
            default_value: None,
        }
    }

    /// Shorthand for a single-line text field.
    pub fn text(id: &str) -> Self {
        Self::simple(id, "text", Datatype::Text)
    }

    /// Shorthand for a multi-line text field.
    pub fn long_text(id: &str) -> Self {
        Self::simple(id, "textarea", Datatype::LongText)
    }

    /// Shorthand for a numeric field.
    pub fn number(id: &str) -> Self {
        Self::simple(id, "number", Datatype::Number)
    }

    /// Shorthand for a boolean toggle.
    pub fn toggle(id: &str) -> Self {
        Self::simple(id, "toggle", Datatype::Boolean)
    }

    /// Shorthand for a single choice among fixed options.
    pub fn select(id: &str, options: Vec<String>) -> Self {
        let mut entry = Self::simple(id, "select", Datatype::Choice);
        entry.rules.options = Some(options);
        entry
    }

    /// Shorthand for a free-form tag list.
    pub fn tags(id: &str) -> Self {
        Self::simple(id, "tags", Datatype::List)
    }

    /// Shorthand for an uploaded media reference.
    pub fn media(id: &str) -> Self {
        Self::simple(id, "media", Datatype::Media)
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.rules.required = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    #[must_use]
    pub fn with_rules(mut self, rules: FieldRules) -> Self {
        self.rules = rules;
        self
    }
}

/// The value type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Datatype {
    #[default]
    Text,
    LongText,
    Number,
    Boolean,
    /// One value out of `rules.options`.
    Choice,
    /// An array of strings.
    List,
    Media,
    /// Anything else; edited as raw JSON.
    #[serde(other)]
    Json,
}

/// Constraints checked locally before any remote validator runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldRules {
    pub required: bool,
    #[serde(alias = "minLength", skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(alias = "maxLength", skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(alias = "maxItems", skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
}

impl FieldRules {
    /// Checks a value, returning one reason per violated rule.
    ///
    /// A missing or blank value only violates `required`; the other rules
    /// apply to present values.
    pub fn check(&self, label: &str, value: Option<&Value>) -> Vec<LocalizedText> {
        let mut reasons = Vec::new();
        let value = value.filter(|v| !crate::traverse::is_blank(v));
        let Some(value) = value else {
            if self.required {
                reasons.push(
                    LocalizedText::plain(format!("{label} is required"))
                        .with("zh", format!("{label} 为必填项")),
                );
            }
            return reasons;
        };

        if let Some(text) = value.as_str() {
            let len = text.chars().count();
            if let Some(min) = self.min_length.filter(|m| len < *m) {
                reasons.push(LocalizedText::plain(format!(
                    "{label} must be at least {min} characters"
                )));
            }
            if let Some(max) = self.max_length.filter(|m| len > *m) {
                reasons.push(LocalizedText::plain(format!(
                    "{label} must be at most {max} characters"
                )));
            }
            if let Some(options) = &self.options {
                if !options.iter().any(|o| o == text) {
                    reasons.push(LocalizedText::plain(format!(
                        "{label} must be one of: {}",
                        options.join(", ")
                    )));
                }
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = self.min.filter(|m| n < *m) {
                reasons.push(LocalizedText::plain(format!("{label} must be at least {min}")));
            }
            if let Some(max) = self.max.filter(|m| n > *m) {
                reasons.push(LocalizedText::plain(format!("{label} must be at most {max}")));
            }
        }

        if let Some(items) = value.as_array() {
            if let Some(max) = self.max_items.filter(|m| items.len() > *m) {
                reasons.push(LocalizedText::plain(format!(
                    "{label} accepts at most {max} items"
                )));
            }
        }

        reasons
    }
}

/// Read-only lookup of field entries by ref.
///
/// Lookups may fail per ref; callers render a "field not found"
/// placeholder rather than aborting.
pub trait FieldRegistry: Send + Sync {
    fn entry(&self, field_ref: &str) -> Result<&FieldEntry, RegistryError>;

    /// Loads the entries for a batch of refs, reporting misses separately.
    fn entries<'a>(&'a self, refs: &[String]) -> (Vec<&'a FieldEntry>, Vec<RegistryError>) {
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for r in refs {
            match self.entry(r) {
                Ok(entry) => found.push(entry),
                Err(e) => missing.push(e),
            }
        }
        (found, missing)
    }
}

/// A registry held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    entries: HashMap<String, FieldEntry>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an entry.
    pub fn insert(&mut self, entry: FieldEntry) {
        self.entries.insert(entry.id.clone(), entry);
    }

    #[must_use]
    pub fn with(mut self, entry: FieldEntry) -> Self {
        self.insert(entry);
        self
    }

    /// Builds a registry from a JSON array of entries.
    pub fn from_json_str(source: &str) -> Result<Self, RegistryError> {
        let raw: Vec<FieldEntry> =
            serde_json::from_str(source).map_err(|e| RegistryError::InvalidEntry {
                id: "<document>".to_string(),
                reason: e.to_string(),
            })?;
        let mut registry = Self::new();
        for entry in raw {
            if entry.id.trim().is_empty() {
                return Err(RegistryError::InvalidEntry {
                    id: entry.id,
                    reason: "blank id".to_string(),
                });
            }
            registry.insert(entry);
        }
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FieldRegistry for MemoryRegistry {
    fn entry(&self, field_ref: &str) -> Result<&FieldEntry, RegistryError> {
        self.entries
            .get(field_ref)
            .ok_or_else(|| RegistryError::NotFound(field_ref.to_string()))
    }
}
