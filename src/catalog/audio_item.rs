use super::metadata::Metadata;
use crate::error::{CatalogError, Result};
use crate::taxonomy::Taxonomy;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::warn;

/// A unit of audio content and its classification.
///
/// `categories` is always closed under the ancestor relation: whenever a
/// category is held, so is its parent, up to the root. Only leaves are ever
/// assigned directly; inner categories are present because of a leaf below.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AudioItem {
    pub id: String,
    metadata: Metadata,
    categories: BTreeSet<String>,
    /// Derived from playlist membership rows when loaded from a store.
    playlists: BTreeSet<String>,
    pub import_order: i64,
    /// Persisted row version, 0 until first saved.
    pub row_version: u64,
}

impl AudioItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            metadata: Metadata::default(),
            categories: BTreeSet::new(),
            playlists: BTreeSet::new(),
            import_order: 0,
            row_version: 0,
        }
    }

    pub(crate) fn from_parts(
        id: String,
        metadata: Metadata,
        categories: BTreeSet<String>,
        playlists: BTreeSet<String>,
        import_order: i64,
        row_version: u64,
    ) -> Self {
        Self {
            id,
            metadata,
            categories,
            playlists,
            import_order,
            row_version,
        }
    }

    pub fn is_new(&self) -> bool {
        self.row_version == 0
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    pub fn set_metadata(&mut self, metadata: Metadata) {
        self.metadata = metadata;
    }

    pub fn title(&self) -> &str {
        &self.metadata.title
    }

    pub fn language(&self) -> Option<&str> {
        self.metadata.language.as_deref()
    }

    /// Full ancestor-closed category set.
    pub fn categories(&self) -> &BTreeSet<String> {
        &self.categories
    }

    pub fn has_category(&self, id: &str) -> bool {
        self.categories.contains(id)
    }

    /// Assigns `id`. A category with children resolves to its first leaf
    /// (lowest order at every level); the leaf and all its ancestors are
    /// recorded.
    pub fn add_category(&mut self, taxonomy: &Taxonomy, id: &str) -> Result<()> {
        if self.categories.contains(id) {
            return Ok(());
        }
        let leaf = taxonomy.first_leaf(id)?;
        let ancestors = taxonomy.ancestors(leaf)?;
        self.categories.insert(leaf.to_string());
        self.categories.extend(ancestors);
        Ok(())
    }

    /// Bulk variant used during import: unknown ids are logged and skipped.
    pub fn add_categories_lenient<'a>(
        &mut self,
        taxonomy: &Taxonomy,
        ids: impl IntoIterator<Item = &'a str>,
    ) -> usize {
        let mut added = 0;
        for id in ids {
            match self.add_category(taxonomy, id) {
                Ok(()) => added += 1,
                Err(CatalogError::NotFound { .. }) => {
                    warn!("Audio item {}: skipping unknown category {}", self.id, id)
                }
                Err(err) => warn!(
                    "Audio item {}: skipping category {}: {}",
                    self.id, id, err
                ),
            }
        }
        added
    }

    /// Removes a direct assignment, then drops every inner category left
    /// without an assigned child. Pruning runs even when `id` was not held,
    /// so orphans loaded from older data are cleaned up too.
    pub fn remove_category(&mut self, taxonomy: &Taxonomy, id: &str) {
        self.categories.remove(id);
        self.categories = prune_orphaned_ancestors(taxonomy, &self.categories);
    }

    pub fn remove_all_categories(&mut self) {
        self.categories.clear();
    }

    /// Assigned categories without children, recomputed on every call.
    /// Ids the taxonomy does not know are reported as leaves.
    pub fn category_leaves(&self, taxonomy: &Taxonomy) -> Vec<String> {
        self.categories
            .iter()
            .filter(|id| !taxonomy.has_children(id))
            .cloned()
            .collect()
    }

    pub fn playlists(&self) -> &BTreeSet<String> {
        &self.playlists
    }

    pub fn has_playlist(&self, playlist_id: &str) -> bool {
        self.playlists.contains(playlist_id)
    }

    pub fn add_playlist(&mut self, playlist_id: impl Into<String>) {
        self.playlists.insert(playlist_id.into());
    }

    pub fn remove_playlist(&mut self, playlist_id: &str) -> bool {
        self.playlists.remove(playlist_id)
    }
}

/// Repeatedly removes categories that have children in the taxonomy but
/// none of those children in `assigned`, until nothing changes.
pub fn prune_orphaned_ancestors(
    taxonomy: &Taxonomy,
    assigned: &BTreeSet<String>,
) -> BTreeSet<String> {
    let mut current = assigned.clone();
    loop {
        let orphaned: Vec<String> = current
            .iter()
            .filter(|id| {
                let children = taxonomy.children(id);
                !children.is_empty() && !children.iter().any(|c| current.contains(&c.id))
            })
            .cloned()
            .collect();
        if orphaned.is_empty() {
            return current;
        }
        for id in orphaned {
            current.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::{Category, ROOT_CATEGORY_ID};

    /// root -> Health(2) -> {General(2-0), Malaria(2-2)}
    ///      -> Agriculture(1) -> Crops(1-1) -> {Maize(1-1-1), Rice(1-1-5)}
    fn taxonomy() -> Taxonomy {
        let mut t = Taxonomy::new(ROOT_CATEGORY_ID, 1);
        t.add_child(ROOT_CATEGORY_ID, Category::new("1", "Agriculture").with_order(1))
            .unwrap();
        t.add_child("1", Category::new("1-1", "Crops")).unwrap();
        t.add_child("1-1", Category::new("1-1-1", "Maize").with_order(1))
            .unwrap();
        t.add_child("1-1", Category::new("1-1-5", "Rice").with_order(5))
            .unwrap();
        t.add_child(ROOT_CATEGORY_ID, Category::new("2", "Health").with_order(2))
            .unwrap();
        t.add_child("2", Category::new("2-0", "General").with_order(0))
            .unwrap();
        t.add_child("2", Category::new("2-2", "Malaria").with_order(2))
            .unwrap();
        t
    }

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn assigning_inner_category_descends_to_first_leaf() {
        let t = taxonomy();
        let mut item = AudioItem::new("a1");
        item.add_category(&t, "2").unwrap();

        assert_eq!(item.category_leaves(&t), vec!["2-0".to_string()]);
        assert!(item.has_category("2"));
        assert!(item.has_category(ROOT_CATEGORY_ID));
    }

    #[test]
    fn categories_stay_ancestor_closed() {
        let t = taxonomy();
        let mut item = AudioItem::new("a1");
        item.add_category(&t, "1-1-5").unwrap();
        item.add_category(&t, "2-2").unwrap();
        for id in item.categories() {
            for ancestor in t.ancestors(id).unwrap() {
                assert!(item.has_category(&ancestor), "{} missing {}", id, ancestor);
            }
        }
        assert_eq!(
            item.category_leaves(&t),
            vec!["1-1-5".to_string(), "2-2".to_string()]
        );
    }

    #[test]
    fn adding_held_category_is_a_noop() {
        let t = taxonomy();
        let mut item = AudioItem::new("a1");
        item.add_category(&t, "2-2").unwrap();
        let before = item.categories().clone();
        // Already held as an ancestor, so no descent to 2-0 happens.
        item.add_category(&t, "2").unwrap();
        assert_eq!(item.categories(), &before);
    }

    #[test]
    fn unknown_category_is_not_found() {
        let t = taxonomy();
        let mut item = AudioItem::new("a1");
        assert!(matches!(
            item.add_category(&t, "nope"),
            Err(CatalogError::NotFound { .. })
        ));
        assert_eq!(item.add_categories_lenient(&t, ["nope", "2-2"]), 1);
        assert!(item.has_category("2-2"));
    }

    #[test]
    fn removing_last_leaf_prunes_whole_chain() {
        let t = taxonomy();
        let mut item = AudioItem::new("a1");
        item.add_category(&t, "1-1-1").unwrap();
        item.add_category(&t, "2-2").unwrap();

        item.remove_category(&t, "1-1-1");
        assert_eq!(
            item.categories(),
            &set(&[ROOT_CATEGORY_ID, "2", "2-2"])
        );

        item.remove_category(&t, "2-2");
        assert!(item.categories().is_empty());
    }

    #[test]
    fn removing_unheld_category_still_prunes_orphans() {
        let t = taxonomy();
        let mut item = AudioItem::from_parts(
            "a1".to_string(),
            Metadata::default(),
            set(&[ROOT_CATEGORY_ID, "1", "1-1", "2", "2-0"]),
            BTreeSet::new(),
            1,
            1,
        );

        item.remove_category(&t, "2-2");
        assert_eq!(item.categories(), &set(&[ROOT_CATEGORY_ID, "2", "2-0"]));
    }

    #[test]
    fn prune_reaches_fixpoint_in_one_call() {
        let t = taxonomy();
        let pruned = prune_orphaned_ancestors(&t, &set(&[ROOT_CATEGORY_ID, "1", "1-1", "2", "2-0"]));
        assert_eq!(pruned, set(&[ROOT_CATEGORY_ID, "2", "2-0"]));

        let again = prune_orphaned_ancestors(&t, &pruned);
        assert_eq!(again, pruned);
    }

    #[test]
    fn playlist_membership() {
        let mut item = AudioItem::new("a1");
        item.add_playlist("p1");
        assert!(item.has_playlist("p1"));
        assert!(item.remove_playlist("p1"));
        assert!(!item.remove_playlist("p1"));
    }
}
