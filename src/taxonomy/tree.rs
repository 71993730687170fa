use super::category::Category;
use crate::error::{CatalogError, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Id of the root of the built-in taxonomy.
pub const ROOT_CATEGORY_ID: &str = "LB_TAX_1.0";

/// Rooted category tree stored as an arena keyed by category id.
///
/// A `Taxonomy` is a plain value: cloning it gives an independent copy that
/// can be edited and then committed or discarded.
#[derive(Clone, Debug, PartialEq)]
pub struct Taxonomy {
    root_id: String,
    generation: u64,
    categories: HashMap<String, Category>,
}

impl Taxonomy {
    pub fn new(root_id: impl Into<String>, revision: u32) -> Self {
        let root_id = root_id.into();
        let mut root = Category::new(root_id.clone(), "root");
        root.revision = revision;
        let mut categories = HashMap::new();
        categories.insert(root_id.clone(), root);
        Self {
            root_id,
            generation: 0,
            categories,
        }
    }

    /// Rebuilds a tree from persisted rows whose `parent` is set and whose
    /// `children` are empty. Rows not reachable from the root are dropped.
    pub(crate) fn from_rows(
        root_id: &str,
        generation: u64,
        rows: Vec<Category>,
    ) -> Result<Self> {
        let mut categories: HashMap<String, Category> = rows
            .into_iter()
            .map(|mut c| {
                c.children.clear();
                c.generation = generation;
                (c.id.clone(), c)
            })
            .collect();
        if !categories.contains_key(root_id) {
            return Err(CatalogError::Structural(format!(
                "root category {} is missing",
                root_id
            )));
        }

        let mut links: Vec<(String, i64, String)> = categories
            .values()
            .filter_map(|c| c.parent.clone().map(|p| (p, c.order, c.id.clone())))
            .collect();
        links.sort_by(|a, b| (a.1, &a.2).cmp(&(b.1, &b.2)));
        for (parent_id, _, child_id) in links {
            if let Some(parent) = categories.get_mut(&parent_id) {
                parent.children.push(child_id);
            }
        }

        let mut reachable = HashSet::new();
        let mut stack = vec![root_id.to_string()];
        while let Some(id) = stack.pop() {
            if !reachable.insert(id.clone()) {
                return Err(CatalogError::Structural(format!(
                    "category {} is reachable twice",
                    id
                )));
            }
            if let Some(category) = categories.get(&id) {
                stack.extend(category.children.iter().cloned());
            }
        }
        let total = categories.len();
        categories.retain(|id, _| reachable.contains(id));
        if categories.len() < total {
            debug!(
                "Ignoring {} detached categories",
                total - categories.len()
            );
        }

        let taxonomy = Self {
            root_id: root_id.to_string(),
            generation,
            categories,
        };
        #[cfg(not(feature = "no_checks"))]
        taxonomy.validate()?;
        Ok(taxonomy)
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn root(&self) -> &Category {
        &self.categories[&self.root_id]
    }

    /// Revision of the reference definition this tree was built from.
    pub fn revision(&self) -> u32 {
        self.root().revision
    }

    /// Store generation this copy was loaded at or last committed as.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
        for category in self.categories.values_mut() {
            category.generation = generation;
        }
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.categories.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Category> {
        self.categories.get(id)
    }

    /// Mutable access to the attributes of a category. Structure is only
    /// changed through [`Taxonomy::add_child`].
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Category> {
        self.categories.get_mut(id)
    }

    pub fn require(&self, id: &str) -> Result<&Category> {
        self.categories
            .get(id)
            .ok_or_else(|| CatalogError::not_found("Category", id))
    }

    pub fn add_child(&mut self, parent_id: &str, mut category: Category) -> Result<()> {
        if self.categories.contains_key(&category.id) {
            return Err(CatalogError::Structural(format!(
                "duplicate category id {}",
                category.id
            )));
        }
        let siblings = &self
            .categories
            .get(parent_id)
            .ok_or_else(|| {
                CatalogError::Structural(format!(
                    "parent {} of category {} does not exist",
                    parent_id, category.id
                ))
            })?
            .children;
        let index = siblings
            .iter()
            .position(|s| {
                self.categories
                    .get(s)
                    .map(|c| (c.order, &c.id) > (category.order, &category.id))
                    .unwrap_or(false)
            })
            .unwrap_or(siblings.len());
        if let Some(parent) = self.categories.get_mut(parent_id) {
            parent.children.insert(index, category.id.clone());
        }
        category.parent = Some(parent_id.to_string());
        category.children.clear();
        category.generation = self.generation;
        self.categories.insert(category.id.clone(), category);
        Ok(())
    }

    /// Children of `id` sorted by `order`, ties broken by id.
    pub fn children(&self, id: &str) -> Vec<&Category> {
        let mut children: Vec<&Category> = self
            .categories
            .get(id)
            .map(|c| {
                c.children
                    .iter()
                    .filter_map(|child| self.categories.get(child))
                    .collect()
            })
            .unwrap_or_default();
        children.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        children
    }

    pub fn parent(&self, id: &str) -> Option<&Category> {
        self.categories
            .get(id)
            .and_then(|c| c.parent.as_deref())
            .and_then(|p| self.categories.get(p))
    }

    pub fn has_children(&self, id: &str) -> bool {
        self.categories
            .get(id)
            .map(|c| !c.children.is_empty())
            .unwrap_or(false)
    }

    pub fn is_leaf(&self, id: &str) -> bool {
        self.categories.get(id).map(Category::is_leaf).unwrap_or(false)
    }

    /// Parent chain of `id`, nearest first, ending with the root.
    pub fn ancestors(&self, id: &str) -> Result<Vec<String>> {
        let mut current = self.require(id)?;
        let mut chain = Vec::new();
        while let Some(parent_id) = current.parent.as_deref() {
            if parent_id == id || chain.iter().any(|seen| seen == parent_id) {
                return Err(CatalogError::Structural(format!(
                    "cycle through category {}",
                    parent_id
                )));
            }
            current = self.categories.get(parent_id).ok_or_else(|| {
                CatalogError::Structural(format!(
                    "category {} has missing parent {}",
                    current.id, parent_id
                ))
            })?;
            chain.push(parent_id.to_string());
        }
        if current.id != self.root_id {
            return Err(CatalogError::Structural(format!(
                "category {} is not connected to the root",
                id
            )));
        }
        Ok(chain)
    }

    /// All categories below `id`, in pre-order.
    pub fn descendants(&self, id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack: Vec<&Category> = self.children(id).into_iter().rev().collect();
        while let Some(category) = stack.pop() {
            out.push(category.id.clone());
            stack.extend(self.children(&category.id).into_iter().rev());
        }
        out
    }

    /// Every category in pre-order, root first.
    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        std::iter::once(self.root_id.clone())
            .chain(self.descendants(&self.root_id))
            .filter_map(move |id| self.categories.get(&id))
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// Follows the lowest-order child until a leaf is reached.
    pub fn first_leaf(&self, id: &str) -> Result<&str> {
        let mut current = self.require(id)?;
        let mut steps = 0;
        while let Some(first) = self.children(&current.id).into_iter().next() {
            current = first;
            steps += 1;
            if steps > self.categories.len() {
                return Err(CatalogError::Structural(format!(
                    "cycle below category {}",
                    id
                )));
            }
        }
        Ok(&current.id)
    }

    pub fn validate(&self) -> Result<()> {
        let root = self.root();
        if root.parent.is_some() {
            return Err(CatalogError::Structural("root has a parent".to_string()));
        }
        for category in self.categories.values() {
            for child in &category.children {
                let linked_back = self
                    .categories
                    .get(child)
                    .map(|c| c.parent.as_deref() == Some(category.id.as_str()))
                    .unwrap_or(false);
                if !linked_back {
                    return Err(CatalogError::Structural(format!(
                        "child {} of {} does not point back to its parent",
                        child, category.id
                    )));
                }
            }
            if category.id != self.root_id {
                self.ancestors(&category.id)?;
            }
        }
        Ok(())
    }

    /// Sets `visible` on `id` and every descendant.
    pub fn set_visible(&mut self, id: &str, visible: bool) -> Result<()> {
        self.require(id)?;
        let mut ids = self.descendants(id);
        ids.push(id.to_string());
        for id in ids {
            if let Some(category) = self.categories.get_mut(&id) {
                category.visible = visible;
            }
        }
        Ok(())
    }

    pub fn is_displayable(&self, id: &str) -> bool {
        match self.categories.get(id) {
            Some(category) if !category.non_assignable => {
                category.visible
                    || self
                        .descendants(id)
                        .iter()
                        .any(|d| self.categories.get(d).map(|c| c.visible).unwrap_or(false))
            }
            _ => false,
        }
    }

    /// False when `id` or any ancestor is flagged non-assignable.
    pub fn is_assignable(&self, id: &str) -> bool {
        let Some(category) = self.categories.get(id) else {
            return false;
        };
        if category.non_assignable {
            return false;
        }
        match self.ancestors(id) {
            Ok(chain) => chain
                .iter()
                .all(|a| self.categories.get(a).map(|c| !c.non_assignable).unwrap_or(false)),
            Err(_) => false,
        }
    }

    /// Leaves a user may pick: assignable and displayable.
    pub fn selectable_leaves(&self) -> Vec<&Category> {
        self.iter()
            .filter(|c| c.is_leaf() && c.id != self.root_id)
            .filter(|c| self.is_assignable(&c.id) && self.is_displayable(&c.id))
            .collect()
    }

    pub fn set_localized_title(&mut self, id: &str, locale: &str, title: &str) -> Result<()> {
        let category = self
            .categories
            .get_mut(id)
            .ok_or_else(|| CatalogError::not_found("Category", id))?;
        category.set_localized_title(locale, title);
        Ok(())
    }

    /// Visibility entries needed to reproduce the current state: assignable
    /// categories whose visibility differs from their parent's.
    pub fn visibility_overlay(&self) -> BTreeMap<String, bool> {
        self.iter()
            .filter(|c| c.id != self.root_id && self.is_assignable(&c.id))
            .filter_map(|c| {
                let parent_visible = self.parent(&c.id).map(|p| p.visible).unwrap_or(true);
                (c.visible != parent_visible).then(|| (c.id.clone(), c.visible))
            })
            .collect()
    }

    /// Recomputes every `visible` flag top-down: non-assignable categories
    /// are hidden, listed ids take the listed value, the rest inherit.
    pub fn apply_visibility_overlay(&mut self, overlay: &BTreeMap<String, bool>) {
        let order: Vec<String> = self.iter().map(|c| c.id.clone()).collect();
        for id in order {
            let parent_visible = self.parent(&id).map(|p| p.visible);
            let Some(category) = self.categories.get_mut(&id) else {
                continue;
            };
            category.visible = if category.non_assignable {
                false
            } else if let Some(visible) = overlay.get(&id) {
                *visible
            } else {
                parent_visible.unwrap_or(true)
            };
        }
    }
}
