//! Category taxonomy: the tree itself, its versioned reference definition,
//! migration between revisions, and the visibility overlay.

mod category;
mod migration;
mod reference;
mod tree;
mod visibility;

pub use category::Category;
pub use migration::{reconcile as reconcile_taxonomy, MigrationStatus, TaxonomyHandle};
pub use reference::{ReferenceCategory, ReferenceTaxonomy, TAXONOMY_FILE_NAME};
pub use tree::{Taxonomy, ROOT_CATEGORY_ID};
pub use visibility::{parse_includelist, IncludelistFile, VisibilityOverlay, INCLUDELIST_FILE_NAME};
