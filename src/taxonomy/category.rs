use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A node of the category tree.
///
/// Parent and children are stored as ids; the owning [`super::Taxonomy`]
/// keeps both directions consistent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub localized_titles: BTreeMap<String, String>,
    #[serde(default)]
    pub description: String,
    pub order: i64,
    pub revision: u32,
    pub visible: bool,
    pub non_assignable: bool,
    #[serde(default)]
    pub autogenerated: bool,
    pub(crate) parent: Option<String>,
    pub(crate) children: Vec<String>,
    /// Taxonomy generation this copy was loaded at.
    #[serde(skip)]
    pub(crate) generation: u64,
}

impl Category {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            localized_titles: BTreeMap::new(),
            description: String::new(),
            order: 0,
            revision: 0,
            visible: true,
            non_assignable: false,
            autogenerated: false,
            parent: None,
            children: Vec::new(),
            generation: 0,
        }
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    pub fn non_assignable(mut self) -> Self {
        self.non_assignable = true;
        self
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn child_ids(&self) -> &[String] {
        &self.children
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Title in `locale`, or the default title when no translation exists.
    pub fn title_for(&self, locale: &str) -> &str {
        self.localized_titles
            .get(locale)
            .map(String::as_str)
            .unwrap_or(&self.title)
    }

    pub fn set_localized_title(&mut self, locale: impl Into<String>, title: impl Into<String>) {
        self.localized_titles.insert(locale.into(), title.into());
    }
}
