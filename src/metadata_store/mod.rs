//! Persistence façade for taxonomy, audio items and playlists, and the
//! transaction coordinator that writes to it.

mod schema;
mod store;
mod trait_def;
mod transaction;

pub use schema::METADATA_VERSIONED_SCHEMAS;
pub use store::{SqliteMetadataStore, SqliteSession};
pub use trait_def::{MetadataStore, StoreSession};
pub use transaction::{retry_once_on_stale, Edit, Transaction, TransactionState};
