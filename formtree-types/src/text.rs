//! User-facing text with per-locale variants.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Locale used when a text is built from a plain string.
pub const DEFAULT_LOCALE: &str = "en";

/// A message with one variant per locale (e.g. `{"en": "...", "zh": "..."}`).
///
/// Deserializes from either a plain string (stored under [`DEFAULT_LOCALE`])
/// or a locale map.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "TextRepr", into = "BTreeMap<String, String>")]
pub struct LocalizedText {
    variants: BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TextRepr {
    Plain(String),
    Localized(BTreeMap<String, String>),
}

impl From<TextRepr> for LocalizedText {
    fn from(repr: TextRepr) -> Self {
        match repr {
            TextRepr::Plain(text) => Self::plain(text),
            TextRepr::Localized(variants) => Self { variants },
        }
    }
}

impl From<LocalizedText> for BTreeMap<String, String> {
    fn from(text: LocalizedText) -> Self {
        text.variants
    }
}

impl LocalizedText {
    /// Text in the default locale only.
    pub fn plain(text: impl Into<String>) -> Self {
        let mut variants = BTreeMap::new();
        variants.insert(DEFAULT_LOCALE.to_string(), text.into());
        Self { variants }
    }

    /// Adds or replaces the variant for `locale`.
    #[must_use]
    pub fn with(mut self, locale: impl Into<String>, text: impl Into<String>) -> Self {
        self.variants.insert(locale.into(), text.into());
        self
    }

    /// Text for `locale`, falling back to the default locale and then to any
    /// variant at all.
    pub fn get(&self, locale: &str) -> Option<&str> {
        self.variants
            .get(locale)
            .or_else(|| self.variants.get(DEFAULT_LOCALE))
            .or_else(|| self.variants.values().next())
            .map(String::as_str)
    }

    /// Returns true if no variant is present.
    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    /// Iterates over `(locale, text)` pairs in locale order.
    pub fn variants(&self) -> impl Iterator<Item = (&str, &str)> {
        self.variants.iter().map(|(l, t)| (l.as_str(), t.as_str()))
    }
}

impl fmt::Display for LocalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.get(DEFAULT_LOCALE).unwrap_or_default())
    }
}
