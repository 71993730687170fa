//! Stores, reference taxonomies and audio items shared by the integration
//! tests.

#![allow(dead_code)]

use talkingbook_catalog::catalog::{AudioItem, Metadata, Playlist};
use talkingbook_catalog::metadata_store::{Edit, MetadataStore, SqliteMetadataStore};
use talkingbook_catalog::taxonomy::{ReferenceTaxonomy, Taxonomy, TaxonomyHandle};
use tempfile::TempDir;

/// root -> A -> A1, A2 and root -> B -> B1
pub const REV1_YAML: &str = r#"
taxonomy:
  revision: 1
  categories:
    'A':
      name: Alpha
      order: 1
      children:
        'A1': { name: Alpha One, order: 0 }
        'A2': { name: Alpha Two, order: 1 }
    'B':
      name: Beta
      order: 2
      children:
        'B1': { name: Beta One }
"#;

/// REV1 plus A3 under A.
pub const REV2_YAML: &str = r#"
taxonomy:
  revision: 2
  categories:
    'A':
      name: Alpha
      order: 1
      children:
        'A1': { name: Alpha One, order: 0 }
        'A2': { name: Alpha Two, order: 1 }
        'A3': { name: Alpha Three, order: 2 }
    'B':
      name: Beta
      order: 2
      children:
        'B1': { name: Beta One }
"#;

pub fn create_tmp_store() -> (SqliteMetadataStore, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = SqliteMetadataStore::new(temp_dir.path().join("catalog.db"), 2).unwrap();
    (store, temp_dir)
}

pub fn reference(yaml: &str) -> ReferenceTaxonomy {
    ReferenceTaxonomy::parse(yaml).unwrap()
}

pub fn init_taxonomy(store: &SqliteMetadataStore, yaml: &str) -> TaxonomyHandle {
    let (handle, _) = TaxonomyHandle::load_or_migrate(store, &reference(yaml)).unwrap();
    handle
}

/// Builds an unsaved audio item assigned to `categories`.
pub fn audio_item(
    taxonomy: &Taxonomy,
    id: &str,
    title: &str,
    language: &str,
    categories: &[&str],
) -> AudioItem {
    let mut item = AudioItem::new(id);
    item.set_metadata(Metadata::new(title).with_language(language));
    for category in categories {
        item.add_category(taxonomy, category).unwrap();
    }
    item
}

/// Saves a new audio item and returns it with its stored row version.
pub fn import_item(
    store: &SqliteMetadataStore,
    taxonomy: &Taxonomy,
    id: &str,
    title: &str,
    language: &str,
    categories: &[&str],
) -> AudioItem {
    let mut item = audio_item(taxonomy, id, title, language, categories);
    store.commit(vec![Edit::from(&mut item)]).unwrap();
    item
}

/// Saves a new playlist holding `items` in order.
pub fn create_playlist(
    store: &SqliteMetadataStore,
    id: &str,
    name: &str,
    items: &[&str],
) -> Playlist {
    let mut playlist = Playlist::new(id, name);
    for item in items {
        playlist.add_audio_item(*item);
    }
    store.commit(vec![Edit::from(&mut playlist)]).unwrap();
    playlist
}

pub fn ids(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
