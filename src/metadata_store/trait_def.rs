//! MetadataStore and StoreSession trait definitions.
//!
//! `MetadataStore` is the read side plus the entry point for transactions;
//! `StoreSession` is the write capability a backend hands to the
//! transaction coordinator for the duration of one commit.

use super::transaction::{Edit, Transaction};
use crate::catalog::{AudioItem, Playlist};
use crate::error::Result;
use crate::search::{SearchQuery, SearchResult};
use crate::taxonomy::{Category, Taxonomy};
use tracing::error;

pub trait MetadataStore: Send + Sync {
    type Session<'s>: StoreSession
    where
        Self: 's;

    /// Opens an exclusive write session. It holds the backend's write lock
    /// until committed, rolled back or dropped.
    fn begin_session(&self) -> Result<Self::Session<'_>>;

    // =========================================================================
    // Counters
    // =========================================================================

    /// Store-wide counter bumped by every successful commit, including
    /// commits made by other processes sharing the store.
    fn change_count(&self) -> Result<u64>;

    /// Counter bumped whenever the category tree is written.
    fn taxonomy_generation(&self) -> Result<u64>;

    // =========================================================================
    // Taxonomy
    // =========================================================================

    /// The stored category tree, or None for a store never initialized.
    fn get_taxonomy(&self) -> Result<Option<Taxonomy>>;

    fn get_category(&self, id: &str) -> Result<Option<Category>>;

    // =========================================================================
    // Audio items
    // =========================================================================

    /// A new, unsaved audio item.
    fn new_audio_item(&self, id: &str) -> AudioItem {
        AudioItem::new(id)
    }

    fn get_audio_item(&self, id: &str) -> Result<Option<AudioItem>>;

    /// Every audio item, in import order.
    fn get_audio_items(&self) -> Result<Vec<AudioItem>>;

    // =========================================================================
    // Playlists
    // =========================================================================

    /// A new, unsaved, empty playlist with a fresh id.
    fn new_playlist(&self, name: &str) -> Playlist {
        Playlist::new(uuid::Uuid::new_v4().to_string(), name)
    }

    fn get_playlist(&self, id: &str) -> Result<Option<Playlist>>;

    fn get_playlists(&self) -> Result<Vec<Playlist>>;

    fn find_playlist_by_name(&self, name: &str) -> Result<Option<Playlist>> {
        Ok(self.get_playlists()?.into_iter().find(|p| p.name == name))
    }

    // =========================================================================
    // Search
    // =========================================================================

    fn search(&self, query: &SearchQuery) -> Result<SearchResult> {
        let taxonomy = self.get_taxonomy()?;
        let items = self.get_audio_items()?;
        Ok(crate::search::run_query(query, taxonomy.as_ref(), &items))
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    fn new_transaction<'e>(&self) -> Transaction<'_, 'e, Self>
    where
        Self: Sized,
    {
        Transaction::new(self)
    }

    /// Commits `edits` as one transaction. On failure the transaction is
    /// rolled back before the error is returned.
    fn commit<'e>(&self, edits: Vec<Edit<'e>>) -> Result<()>
    where
        Self: Sized,
    {
        let mut transaction = self.new_transaction();
        transaction.add_all(edits);
        if let Err(err) = transaction.commit() {
            if let Err(rollback_err) = transaction.rollback() {
                error!("Rollback after failed commit also failed: {}", rollback_err);
            }
            return Err(err);
        }
        Ok(())
    }
}

pub trait StoreSession {
    /// Writes one category's attributes. Fails with a stale reference when
    /// the taxonomy generation moved since `category` was loaded. Returns the
    /// new generation.
    fn save_category(&mut self, category: &Category) -> Result<u64>;

    /// Writes the whole tree. Fails with a stale reference when the stored
    /// generation moved since `taxonomy` was loaded. Returns the new
    /// generation.
    fn save_taxonomy(&mut self, taxonomy: &Taxonomy) -> Result<u64>;

    /// Inserts or updates an item. Returns its new row version.
    fn save_audio_item(&mut self, item: &AudioItem) -> Result<u64>;

    /// Deletes an item, dropping it from every playlist it belonged to.
    fn delete_audio_item(&mut self, id: &str) -> Result<()>;

    /// Inserts or updates a playlist with its full membership. Returns its
    /// new row version.
    fn save_playlist(&mut self, playlist: &Playlist) -> Result<u64>;

    fn delete_playlist(&mut self, id: &str) -> Result<()>;

    /// Bumps the change counter and makes every write visible. Returns the
    /// new change count. A session whose commit fails is rolled back.
    fn commit(self) -> Result<u64>;

    fn rollback(self) -> Result<()>;
}
