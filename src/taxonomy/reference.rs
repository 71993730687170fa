//! Versioned reference definition of the taxonomy, read from YAML.
//!
//! ```yaml
//! taxonomy:
//!   revision: 2
//!   categories:
//!     '2':
//!       name: Health
//!       order: 2
//!       children:
//!         '2-0': { name: General Health, order: 0 }
//! ```
//!
//! Categories without `order` take the next value after their previous
//! sibling; a duplicate `order` is bumped until unused. `nonassignable`
//! defaults to the parent's value.

use super::category::Category;
use super::tree::{Taxonomy, ROOT_CATEGORY_ID};
use crate::error::{CatalogError, Result};
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

pub const TAXONOMY_FILE_NAME: &str = "lb_taxonomy.yaml";

const BUILTIN_TAXONOMY: &str = include_str!("../../resources/lb_taxonomy.yaml");

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferenceCategory {
    pub id: String,
    pub title: String,
    pub description: String,
    pub order: i64,
    pub non_assignable: bool,
    pub autogenerated: bool,
    pub children: Vec<ReferenceCategory>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferenceTaxonomy {
    pub revision: u32,
    pub root_id: String,
    pub categories: Vec<ReferenceCategory>,
}

impl ReferenceTaxonomy {
    pub fn parse(yaml: &str) -> Result<Self> {
        let doc: Value = serde_yaml::from_str(yaml)?;
        let taxonomy = doc
            .get("taxonomy")
            .ok_or_else(|| CatalogError::InvalidReference("missing 'taxonomy' key".into()))?;
        let revision = taxonomy
            .get("revision")
            .and_then(Value::as_u64)
            .and_then(|r| u32::try_from(r).ok())
            .ok_or_else(|| {
                CatalogError::InvalidReference("missing or invalid 'revision'".into())
            })?;

        let mut seen = HashSet::new();
        seen.insert(ROOT_CATEGORY_ID.to_string());
        let categories = match taxonomy.get("categories") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Mapping(map)) => parse_level(map, false, &mut seen)?,
            Some(_) => {
                return Err(CatalogError::InvalidReference(
                    "'categories' must be a mapping".into(),
                ))
            }
        };

        Ok(Self {
            revision,
            root_id: ROOT_CATEGORY_ID.to_string(),
            categories,
        })
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::parse(&yaml)
    }

    /// The taxonomy compiled into the binary.
    pub fn builtin() -> Result<Self> {
        Self::parse(BUILTIN_TAXONOMY)
    }

    /// Higher revision of the built-in taxonomy and `lb_taxonomy.yaml` in
    /// `project_dir`. An unreadable project file is ignored.
    pub fn load_latest(project_dir: Option<&Path>) -> Result<Self> {
        let builtin = Self::builtin()?;
        let Some(path) = project_dir.map(|dir| dir.join(TAXONOMY_FILE_NAME)) else {
            return Ok(builtin);
        };
        if !path.exists() {
            return Ok(builtin);
        }
        match Self::load_file(&path) {
            Ok(local) if local.revision > builtin.revision => {
                info!(
                    "Using taxonomy revision {} from {:?} (built-in is {})",
                    local.revision, path, builtin.revision
                );
                Ok(local)
            }
            Ok(_) => Ok(builtin),
            Err(err) => {
                warn!("Ignoring unreadable taxonomy file {:?}: {}", path, err);
                Ok(builtin)
            }
        }
    }

    pub fn find(&self, id: &str) -> Option<&ReferenceCategory> {
        let mut stack: Vec<&ReferenceCategory> = self.categories.iter().collect();
        while let Some(category) = stack.pop() {
            if category.id == id {
                return Some(category);
            }
            stack.extend(category.children.iter());
        }
        None
    }

    /// Every category id below the root, parents before children.
    pub fn ids(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut stack: Vec<&ReferenceCategory> = self.categories.iter().rev().collect();
        while let Some(category) = stack.pop() {
            out.push(category.id.as_str());
            stack.extend(category.children.iter().rev());
        }
        out
    }

    /// Builds a fresh tree with every category visible.
    pub fn to_taxonomy(&self) -> Result<Taxonomy> {
        let mut taxonomy = Taxonomy::new(self.root_id.clone(), self.revision);
        let mut stack: Vec<(&str, &ReferenceCategory)> = self
            .categories
            .iter()
            .map(|c| (self.root_id.as_str(), c))
            .collect();
        while let Some((parent_id, reference)) = stack.pop() {
            let mut category = Category::new(reference.id.clone(), reference.title.clone());
            category.description = reference.description.clone();
            category.order = reference.order;
            category.revision = self.revision;
            category.non_assignable = reference.non_assignable;
            category.autogenerated = reference.autogenerated;
            taxonomy.add_child(parent_id, category)?;
            stack.extend(reference.children.iter().map(|c| (reference.id.as_str(), c)));
        }
        Ok(taxonomy)
    }
}

fn key_to_id(key: &Value) -> Result<String> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(CatalogError::InvalidReference(format!(
            "category id must be a string, got {:?}",
            other
        ))),
    }
}

fn parse_level(
    map: &Mapping,
    parent_non_assignable: bool,
    seen: &mut HashSet<String>,
) -> Result<Vec<ReferenceCategory>> {
    let mut next_order = 0i64;
    let mut used_orders = HashSet::new();
    let mut out = Vec::with_capacity(map.len());

    for (key, data) in map {
        let id = key_to_id(key)?;
        if !seen.insert(id.clone()) {
            return Err(CatalogError::InvalidReference(format!(
                "duplicate category id {}",
                id
            )));
        }
        let title = data
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| CatalogError::InvalidReference(format!("category {} has no name", id)))?
            .to_string();

        let mut order = data.get("order").and_then(Value::as_i64).unwrap_or(next_order);
        while used_orders.contains(&order) {
            order += 1;
        }
        used_orders.insert(order);
        next_order = order + 1;

        let non_assignable = data
            .get("nonassignable")
            .and_then(Value::as_bool)
            .unwrap_or(parent_non_assignable);

        let children = match data.get("children") {
            Some(Value::Mapping(children)) => parse_level(children, non_assignable, seen)?,
            _ => Vec::new(),
        };

        out.push(ReferenceCategory {
            id,
            title,
            description: data
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            order,
            non_assignable,
            autogenerated: data
                .get("autogenerated")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            children,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SMALL: &str = r#"
taxonomy:
  revision: 3
  categories:
    'A':
      name: Alpha
      children:
        'A1': { name: First, order: 4 }
        'A2': { name: Second }
        'A3': { name: Third, order: 4 }
    'F':
      name: Feedback
      nonassignable: true
      children:
        'F1': { name: Inbox }
        'F2': { name: Open, nonassignable: false }
"#;

    #[test]
    fn orders_are_sequential_and_deduplicated() {
        let reference = ReferenceTaxonomy::parse(SMALL).unwrap();
        assert_eq!(reference.revision, 3);
        let a = reference.find("A").unwrap();
        let orders: Vec<(&str, i64)> = a
            .children
            .iter()
            .map(|c| (c.id.as_str(), c.order))
            .collect();
        assert_eq!(orders, vec![("A1", 4), ("A2", 5), ("A3", 6)]);
        assert_eq!(reference.find("F").unwrap().order, 1);
    }

    #[test]
    fn non_assignable_is_inherited_unless_overridden() {
        let reference = ReferenceTaxonomy::parse(SMALL).unwrap();
        assert!(reference.find("F1").unwrap().non_assignable);
        assert!(!reference.find("F2").unwrap().non_assignable);
        assert!(!reference.find("A1").unwrap().non_assignable);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let yaml = "taxonomy:\n  revision: 1\n  categories:\n    'A':\n      name: A\n      children:\n        'A': { name: again }\n";
        assert!(matches!(
            ReferenceTaxonomy::parse(yaml),
            Err(CatalogError::InvalidReference(_))
        ));
    }

    #[test]
    fn builtin_taxonomy_builds_a_valid_tree() {
        let reference = ReferenceTaxonomy::builtin().unwrap();
        let taxonomy = reference.to_taxonomy().unwrap();
        taxonomy.validate().unwrap();
        assert_eq!(taxonomy.root_id(), ROOT_CATEGORY_ID);
        assert_eq!(taxonomy.first_leaf("2").unwrap(), "2-0");
        assert!(!taxonomy.is_assignable("9-0"));
    }

    #[test]
    fn load_latest_prefers_higher_revision() {
        let dir = TempDir::new().unwrap();
        let builtin = ReferenceTaxonomy::builtin().unwrap();
        assert_eq!(
            ReferenceTaxonomy::load_latest(Some(dir.path())).unwrap(),
            builtin
        );

        let newer = format!(
            "taxonomy:\n  revision: {}\n  categories:\n    'x': {{ name: X }}\n",
            builtin.revision + 1
        );
        std::fs::write(dir.path().join(TAXONOMY_FILE_NAME), newer).unwrap();
        let latest = ReferenceTaxonomy::load_latest(Some(dir.path())).unwrap();
        assert_eq!(latest.revision, builtin.revision + 1);
        assert!(latest.find("x").is_some());
    }

    #[test]
    fn load_latest_ignores_broken_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(TAXONOMY_FILE_NAME), "taxonomy: [").unwrap();
        let latest = ReferenceTaxonomy::load_latest(Some(dir.path())).unwrap();
        assert_eq!(latest, ReferenceTaxonomy::builtin().unwrap());
    }
}
