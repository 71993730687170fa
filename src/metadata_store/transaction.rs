use super::trait_def::{MetadataStore, StoreSession};
use crate::catalog::{AudioItem, Playlist};
use crate::error::{CatalogError, Result};
use crate::taxonomy::{Category, Taxonomy};
use tracing::{debug, error, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    /// Commit failed; a write session still held is released by `rollback()`.
    Failed,
    RolledBack,
}

/// One pending change. Entity edits borrow the caller's instance so it can
/// receive its new row version on commit, or be reloaded on rollback.
#[derive(Debug)]
pub enum Edit<'e> {
    Category(&'e mut Category),
    Taxonomy(&'e mut Taxonomy),
    AudioItem(&'e mut AudioItem),
    Playlist(&'e mut Playlist),
    DeleteAudioItem(String),
    DeletePlaylist(String),
}

impl Edit<'_> {
    /// Apply order: the tree first, then items, then playlists that may
    /// reference them, then deletions of playlists before items.
    fn rank(&self) -> u8 {
        match self {
            Edit::Category(_) | Edit::Taxonomy(_) => 0,
            Edit::AudioItem(_) => 1,
            Edit::Playlist(_) => 2,
            Edit::DeletePlaylist(_) => 3,
            Edit::DeleteAudioItem(_) => 4,
        }
    }

    fn describe(&self) -> String {
        match self {
            Edit::Category(c) => format!("category {}", c.id),
            Edit::Taxonomy(t) => format!("taxonomy {}", t.root_id()),
            Edit::AudioItem(a) => format!("audio item {}", a.id),
            Edit::Playlist(p) => format!("playlist {}", p.id),
            Edit::DeleteAudioItem(id) => format!("delete audio item {}", id),
            Edit::DeletePlaylist(id) => format!("delete playlist {}", id),
        }
    }
}

impl<'e> From<&'e mut Category> for Edit<'e> {
    fn from(value: &'e mut Category) -> Self {
        Edit::Category(value)
    }
}

impl<'e> From<&'e mut Taxonomy> for Edit<'e> {
    fn from(value: &'e mut Taxonomy) -> Self {
        Edit::Taxonomy(value)
    }
}

impl<'e> From<&'e mut AudioItem> for Edit<'e> {
    fn from(value: &'e mut AudioItem) -> Self {
        Edit::AudioItem(value)
    }
}

impl<'e> From<&'e mut Playlist> for Edit<'e> {
    fn from(value: &'e mut Playlist) -> Self {
        Edit::Playlist(value)
    }
}

fn apply<S: StoreSession>(session: &mut S, edit: &Edit<'_>) -> Result<Option<u64>> {
    match edit {
        Edit::Category(category) => session.save_category(category).map(Some),
        Edit::Taxonomy(taxonomy) => session.save_taxonomy(taxonomy).map(Some),
        Edit::AudioItem(item) => session.save_audio_item(item).map(Some),
        Edit::Playlist(playlist) => session.save_playlist(playlist).map(Some),
        Edit::DeleteAudioItem(id) => session.delete_audio_item(id).map(|_| None),
        Edit::DeletePlaylist(id) => session.delete_playlist(id).map(|_| None),
    }
}

/// Batches edits and applies them all-or-nothing.
///
/// After a failed `commit()` the caller must call `rollback()`, which
/// releases the write session and reloads the enqueued instances from the
/// store. Instances that were never saved are left as they are.
pub struct Transaction<'s, 'e, S: MetadataStore + 's> {
    store: &'s S,
    edits: Vec<Edit<'e>>,
    state: TransactionState,
    failed_session: Option<S::Session<'s>>,
}

impl<'s, 'e, S: MetadataStore + 's> Transaction<'s, 'e, S> {
    pub fn new(store: &'s S) -> Self {
        Self {
            store,
            edits: Vec::new(),
            state: TransactionState::Open,
            failed_session: None,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn add(&mut self, edit: impl Into<Edit<'e>>) {
        self.edits.push(edit.into());
    }

    pub fn add_all(&mut self, edits: impl IntoIterator<Item = Edit<'e>>) {
        self.edits.extend(edits);
    }

    pub fn delete_audio_item(&mut self, id: impl Into<String>) {
        self.edits.push(Edit::DeleteAudioItem(id.into()));
    }

    pub fn delete_playlist(&mut self, id: impl Into<String>) {
        self.edits.push(Edit::DeletePlaylist(id.into()));
    }

    pub fn commit(&mut self) -> Result<()> {
        if self.state != TransactionState::Open {
            return Err(CatalogError::TransactionClosed(self.state));
        }
        self.edits.sort_by_key(Edit::rank);
        let total = self.edits.len();

        let mut session = match self.store.begin_session() {
            Ok(session) => session,
            Err(err) => {
                self.state = TransactionState::Failed;
                return Err(CatalogError::TransactionFailed {
                    staged: 0,
                    total,
                    source: Box::new(err),
                });
            }
        };

        let mut versions = Vec::with_capacity(total);
        for (staged, edit) in self.edits.iter().enumerate() {
            match apply(&mut session, edit) {
                Ok(version) => versions.push(version),
                Err(err) => {
                    warn!("Transaction failed on {}: {}", edit.describe(), err);
                    self.state = TransactionState::Failed;
                    self.failed_session = Some(session);
                    return Err(CatalogError::TransactionFailed {
                        staged,
                        total,
                        source: Box::new(err),
                    });
                }
            }
        }

        let change_count = match session.commit() {
            Ok(change_count) => change_count,
            Err(err) => {
                self.state = TransactionState::Failed;
                return Err(CatalogError::TransactionFailed {
                    staged: total,
                    total,
                    source: Box::new(err),
                });
            }
        };

        for (edit, version) in self.edits.iter_mut().zip(versions) {
            let Some(version) = version else { continue };
            match edit {
                Edit::Category(category) => category.generation = version,
                Edit::Taxonomy(taxonomy) => taxonomy.set_generation(version),
                Edit::AudioItem(item) => item.row_version = version,
                Edit::Playlist(playlist) => playlist.row_version = version,
                _ => {}
            }
        }
        self.state = TransactionState::Committed;
        debug!("Committed {} edits, change count {}", total, change_count);
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        match self.state {
            TransactionState::Open => {
                self.state = TransactionState::RolledBack;
                Ok(())
            }
            TransactionState::Failed => {
                self.state = TransactionState::RolledBack;
                let released = match self.failed_session.take() {
                    Some(session) => session.rollback(),
                    None => Ok(()),
                };
                self.revert_instances()?;
                released
            }
            state => Err(CatalogError::TransactionClosed(state)),
        }
    }

    fn revert_instances(&mut self) -> Result<()> {
        for edit in self.edits.iter_mut() {
            match edit {
                Edit::Category(category) => {
                    if let Some(stored) = self.store.get_category(&category.id)? {
                        **category = stored;
                    }
                }
                Edit::Taxonomy(taxonomy) => {
                    if let Some(stored) = self.store.get_taxonomy()? {
                        **taxonomy = stored;
                    }
                }
                Edit::AudioItem(item) => {
                    if let Some(stored) = self.store.get_audio_item(&item.id)? {
                        **item = stored;
                    }
                }
                Edit::Playlist(playlist) => {
                    if let Some(stored) = self.store.get_playlist(&playlist.id)? {
                        **playlist = stored;
                    }
                }
                Edit::DeleteAudioItem(_) | Edit::DeletePlaylist(_) => {}
            }
        }
        Ok(())
    }
}

impl<'s, 'e, S: MetadataStore + 's> Drop for Transaction<'s, 'e, S> {
    fn drop(&mut self) {
        if let Some(session) = self.failed_session.take() {
            error!("Failed transaction dropped without rollback(), rolling back now");
            if let Err(err) = session.rollback() {
                error!("Rollback of dropped transaction failed: {}", err);
            }
        }
    }
}

/// Runs `op`; if it fails because of a concurrent modification, runs it
/// once more. `op` is expected to reload whatever it edits.
pub fn retry_once_on_stale<T>(mut op: impl FnMut() -> Result<T>) -> Result<T> {
    match op() {
        Err(err) if err.is_stale() => {
            warn!("Retrying after stale reference: {}", err);
            op()
        }
        other => other,
    }
}
