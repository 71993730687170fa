//! Talking Book content catalog.
//!
//! Category taxonomy, audio item classification, playlists, faceted search,
//! and the transactional SQLite store behind them.

pub mod catalog;
pub mod config;
pub mod error;
pub mod metadata_store;
pub mod search;
pub mod sqlite_persistence;
pub mod taxonomy;

pub use catalog::{AudioItem, Metadata, Playlist};
pub use error::{CatalogError, Result};
pub use metadata_store::{
    MetadataStore, SqliteMetadataStore, StoreSession, Transaction, TransactionState,
};
pub use search::{FacetIndex, SearchQuery, SearchResult};
pub use taxonomy::{Category, Taxonomy, TaxonomyHandle};
