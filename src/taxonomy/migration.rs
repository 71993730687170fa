use super::category::Category;
use super::reference::{ReferenceCategory, ReferenceTaxonomy};
use super::tree::Taxonomy;
use super::visibility::VisibilityOverlay;
use crate::error::{CatalogError, Result};
use crate::metadata_store::{retry_once_on_stale, Edit, MetadataStore};
use tracing::{debug, error, info};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MigrationStatus {
    /// The stored tree was already at (or past) the reference revision.
    UpToDate { revision: u32 },
    /// No tree was stored; one was built from the reference.
    Created { revision: u32 },
    Migrated { from: u32, to: u32 },
    /// The migration was not applied; the previous tree stays in use.
    Failed { from: u32, to: u32, reason: String },
}

/// Rebuilds `existing` to the structure of `reference`.
///
/// Categories keep their identity, visibility and translations when their
/// id is still in the reference, or when an earlier migration detached them
/// and `retired` still holds their row; title, description and flags come
/// from the reference. New categories take their new parent's visibility.
/// Every rebuilt category is stamped with the reference revision. Categories
/// the reference no longer names are left out.
pub fn reconcile(
    existing: &Taxonomy,
    retired: &[Category],
    reference: &ReferenceTaxonomy,
) -> Result<Taxonomy> {
    if existing.root_id() != reference.root_id {
        return Err(CatalogError::Migration {
            from: existing.revision(),
            to: reference.revision,
            reason: format!(
                "root {} does not match reference root {}",
                existing.root_id(),
                reference.root_id
            ),
        });
    }

    let mut rebuilt = Taxonomy::new(existing.root_id(), reference.revision);
    rebuilt.set_generation(existing.generation());
    if let Some(root) = rebuilt.get_mut(existing.root_id()) {
        let old_root = existing.root();
        root.title = old_root.title.clone();
        root.localized_titles = old_root.localized_titles.clone();
        root.visible = old_root.visible;
    }

    let mut pending: Vec<(String, &ReferenceCategory)> = reference
        .categories
        .iter()
        .rev()
        .map(|c| (reference.root_id.clone(), c))
        .collect();
    while let Some((parent_id, wanted)) = pending.pop() {
        let previous = existing
            .get(&wanted.id)
            .or_else(|| retired.iter().find(|c| c.id == wanted.id));
        let mut category = match previous {
            Some(old) => old.clone(),
            None => {
                let mut fresh = Category::new(wanted.id.clone(), wanted.title.clone());
                fresh.visible = rebuilt.get(&parent_id).map(|p| p.visible).unwrap_or(true);
                fresh
            }
        };
        category.title = wanted.title.clone();
        category.description = wanted.description.clone();
        category.order = wanted.order;
        category.non_assignable = wanted.non_assignable;
        category.autogenerated = wanted.autogenerated;
        category.revision = reference.revision;
        rebuilt.add_child(&parent_id, category)?;

        pending.extend(wanted.children.iter().rev().map(|c| (wanted.id.clone(), c)));
    }

    rebuilt.validate()?;
    Ok(rebuilt)
}

/// Owner of the taxonomy the application currently works with.
#[derive(Clone, Debug)]
pub struct TaxonomyHandle {
    taxonomy: Taxonomy,
}

impl TaxonomyHandle {
    /// Loads the stored taxonomy, creating or migrating it from `reference`
    /// when needed. A failed migration is logged and the stored tree kept.
    pub fn load_or_migrate<S: MetadataStore>(
        store: &S,
        reference: &ReferenceTaxonomy,
    ) -> Result<(Self, MigrationStatus)> {
        let Some(existing) = store.get_taxonomy()? else {
            let mut created = reference.to_taxonomy()?;
            store.commit(vec![Edit::from(&mut created)])?;
            info!("Created taxonomy at revision {}", reference.revision);
            return Ok((
                Self { taxonomy: created },
                MigrationStatus::Created {
                    revision: reference.revision,
                },
            ));
        };

        let from = existing.revision();
        let to = reference.revision;
        if from >= to {
            return Ok((
                Self { taxonomy: existing },
                MigrationStatus::UpToDate { revision: from },
            ));
        }

        let mut retired = Vec::new();
        for id in reference.ids() {
            if existing.contains(id) {
                continue;
            }
            if let Some(row) = store.get_category(id)? {
                debug!("Reattaching category {} dropped by an earlier revision", id);
                retired.push(row);
            }
        }

        let outcome = reconcile(&existing, &retired, reference).and_then(|mut rebuilt| {
            store.commit(vec![Edit::from(&mut rebuilt)])?;
            Ok(rebuilt)
        });
        match outcome {
            Ok(rebuilt) => {
                info!("Migrated taxonomy from revision {} to {}", from, to);
                Ok((Self { taxonomy: rebuilt }, MigrationStatus::Migrated { from, to }))
            }
            Err(err) => {
                error!(
                    "Taxonomy migration from revision {} to {} failed, keeping revision {}: {}",
                    from, to, from, err
                );
                Ok((
                    Self { taxonomy: existing },
                    MigrationStatus::Failed {
                        from,
                        to,
                        reason: err.to_string(),
                    },
                ))
            }
        }
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    /// Independent copy to preview changes on. Pass it to
    /// [`TaxonomyHandle::commit_edit`] to keep them.
    pub fn edit(&self) -> Taxonomy {
        self.taxonomy.clone()
    }

    pub fn commit_edit<S: MetadataStore>(&mut self, store: &S, mut edited: Taxonomy) -> Result<()> {
        store.commit(vec![Edit::from(&mut edited)])?;
        self.taxonomy = edited;
        Ok(())
    }

    /// Applies `change` to a copy of the tree and commits it. When another
    /// writer committed first, reloads and applies `change` once more.
    pub fn update<S: MetadataStore>(
        &mut self,
        store: &S,
        mut change: impl FnMut(&mut Taxonomy) -> Result<()>,
    ) -> Result<()> {
        let mut attempts = 0;
        retry_once_on_stale(|| {
            attempts += 1;
            if attempts > 1 {
                self.refresh(store)?;
            }
            let mut edited = self.edit();
            change(&mut edited)?;
            self.commit_edit(store, edited)
        })
    }

    /// True when someone committed a taxonomy change since this copy was
    /// loaded.
    pub fn is_stale<S: MetadataStore>(&self, store: &S) -> Result<bool> {
        Ok(store.taxonomy_generation()? != self.taxonomy.generation())
    }

    /// Reloads from the store if stale. Returns whether a reload happened.
    pub fn refresh<S: MetadataStore>(&mut self, store: &S) -> Result<bool> {
        if !self.is_stale(store)? {
            return Ok(false);
        }
        let taxonomy = store
            .get_taxonomy()?
            .ok_or_else(|| CatalogError::not_found("Taxonomy", self.taxonomy.root_id()))?;
        self.taxonomy = taxonomy;
        Ok(true)
    }

    /// Applies a persisted visibility overlay to the in-memory tree. With
    /// `all_categories` every category is shown and the overlay ignored.
    pub fn apply_visibility(
        &mut self,
        overlay: &dyn VisibilityOverlay,
        all_categories: bool,
    ) -> Result<()> {
        if all_categories {
            let root_id = self.taxonomy.root_id().to_string();
            self.taxonomy.set_visible(&root_id, true)?;
            return Ok(());
        }
        let entries = overlay.load()?;
        if !entries.is_empty() {
            self.taxonomy.apply_visibility_overlay(&entries);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::ROOT_CATEGORY_ID;

    fn reference(revision: u32, a_children: &[&str]) -> ReferenceTaxonomy {
        let mut yaml = format!(
            "taxonomy:\n  revision: {}\n  categories:\n    'A':\n      name: Alpha\n      children:\n",
            revision
        );
        for child in a_children {
            yaml.push_str(&format!("        '{}': {{ name: Child {} }}\n", child, child));
        }
        ReferenceTaxonomy::parse(&yaml).unwrap()
    }

    #[test]
    fn reconcile_keeps_identity_and_adds_new_nodes() {
        let mut existing = reference(1, &["A1", "A2"]).to_taxonomy().unwrap();
        existing.set_visible("A2", false).unwrap();
        existing.set_localized_title("A1", "fr", "Premier").unwrap();

        let rebuilt = reconcile(&existing, &[], &reference(2, &["A1", "A2", "A3"])).unwrap();
        assert_eq!(rebuilt.revision(), 2);
        assert!(rebuilt.iter().all(|c| c.revision == 2));
        assert_eq!(rebuilt.get("A1").unwrap().title_for("fr"), "Premier");
        assert!(!rebuilt.get("A2").unwrap().visible);
        assert!(rebuilt.get("A3").unwrap().visible);
        assert_eq!(rebuilt.parent("A3").unwrap().id, "A");
        assert_eq!(rebuilt.children("A").len(), 3);
    }

    #[test]
    fn retired_rows_are_reattached() {
        let existing = reference(2, &["A1"]).to_taxonomy().unwrap();
        let mut old = Category::new("A2", "Old title");
        old.visible = false;
        old.set_localized_title("fr", "Deuxième");

        let rebuilt = reconcile(&existing, &[old], &reference(3, &["A1", "A2"])).unwrap();
        let a2 = rebuilt.get("A2").unwrap();
        assert!(!a2.visible);
        assert_eq!(a2.title, "Child A2");
        assert_eq!(a2.title_for("fr"), "Deuxième");
        assert_eq!(a2.parent_id(), Some("A"));
    }

    #[test]
    fn new_nodes_inherit_parent_visibility() {
        let mut existing = reference(1, &["A1"]).to_taxonomy().unwrap();
        existing.get_mut("A").unwrap().visible = false;
        let rebuilt = reconcile(&existing, &[], &reference(2, &["A1", "A9"])).unwrap();
        assert!(!rebuilt.get("A9").unwrap().visible);
    }

    #[test]
    fn dropped_categories_are_left_out() {
        let existing = reference(1, &["A1", "A2"]).to_taxonomy().unwrap();
        let rebuilt = reconcile(&existing, &[], &reference(2, &["A1"])).unwrap();
        assert!(!rebuilt.contains("A2"));
        assert_eq!(
            rebuilt.ancestors("A1").unwrap(),
            vec!["A".to_string(), ROOT_CATEGORY_ID.to_string()]
        );
    }
}
