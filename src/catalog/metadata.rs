use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Descriptive record attached to an audio item. Stored as JSON.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub title: String,
    /// Language code, e.g. "en" or "dga".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl Metadata {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Lowercased words of the title and every field value.
    pub fn search_tokens(&self) -> Vec<String> {
        std::iter::once(self.title.as_str())
            .chain(self.fields.values().map(String::as_str))
            .flat_map(str::split_whitespace)
            .map(str::to_lowercase)
            .collect()
    }
}
