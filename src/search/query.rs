use crate::catalog::AudioItem;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Filter over audio items.
///
/// Every text term must prefix-match a word of the item's title or metadata
/// values. Categories and languages are each OR-ed; the three groups are
/// AND-ed together, and with the playlist restriction when set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub categories: BTreeSet<String>,
    #[serde(default)]
    pub languages: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist: Option<String>,
}

impl SearchQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_category(mut self, category_id: impl Into<String>) -> Self {
        self.categories.insert(category_id.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.languages.insert(language.into().to_lowercase());
        self
    }

    pub fn in_playlist(mut self, playlist_id: impl Into<String>) -> Self {
        self.playlist = Some(playlist_id.into());
        self
    }

    fn terms(&self) -> Vec<String> {
        self.text
            .as_deref()
            .map(|t| t.split_whitespace().map(str::to_lowercase).collect())
            .unwrap_or_default()
    }

    pub fn matches(&self, item: &AudioItem) -> bool {
        if let Some(playlist) = &self.playlist {
            if !item.has_playlist(playlist) {
                return false;
            }
        }
        if !self.categories.is_empty()
            && !self.categories.iter().any(|c| item.has_category(c))
        {
            return false;
        }
        if !self.languages.is_empty() {
            let language = item.language().map(str::to_lowercase);
            if !language.is_some_and(|l| self.languages.contains(&l)) {
                return false;
            }
        }
        let terms = self.terms();
        if terms.is_empty() {
            return true;
        }
        let tokens = item.metadata().search_tokens();
        terms
            .iter()
            .all(|term| tokens.iter().any(|token| token.starts_with(term.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Metadata;
    use crate::taxonomy::{Category, Taxonomy, ROOT_CATEGORY_ID};

    fn item(id: &str, title: &str, language: &str, category: Option<&str>) -> AudioItem {
        let mut taxonomy = Taxonomy::new(ROOT_CATEGORY_ID, 1);
        taxonomy
            .add_child(ROOT_CATEGORY_ID, Category::new("2", "Health"))
            .unwrap();
        taxonomy
            .add_child("2", Category::new("2-2", "Malaria"))
            .unwrap();
        let mut item = AudioItem::new(id);
        item.set_metadata(Metadata::new(title).with_language(language));
        if let Some(category) = category {
            item.add_category(&taxonomy, category).unwrap();
        }
        item
    }

    #[test]
    fn text_terms_are_anded_prefixes() {
        let a = item("a", "Malaria bed nets", "en", None);
        assert!(SearchQuery::text("mal NETS").matches(&a));
        assert!(!SearchQuery::text("malaria cows").matches(&a));
        assert!(SearchQuery::all().matches(&a));
    }

    #[test]
    fn categories_match_through_ancestors() {
        let a = item("a", "Nets", "en", Some("2-2"));
        let b = item("b", "Song", "en", None);
        let query = SearchQuery::all().with_category("2").with_category("9");
        assert!(query.matches(&a));
        assert!(!query.matches(&b));
    }

    #[test]
    fn languages_are_case_insensitive_and_ored() {
        let a = item("a", "Nets", "DGA", None);
        assert!(SearchQuery::all()
            .with_language("en")
            .with_language("dga")
            .matches(&a));
        assert!(!SearchQuery::all().with_language("en").matches(&a));
    }

    #[test]
    fn playlist_restricts_membership() {
        let mut a = item("a", "Nets", "en", None);
        let query = SearchQuery::all().in_playlist("p1");
        assert!(!query.matches(&a));
        a.add_playlist("p1");
        assert!(query.matches(&a));
    }
}
