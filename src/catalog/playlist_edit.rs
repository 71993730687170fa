//! Applying a bulk edit (deletions plus reordering) made on a detached copy
//! of a playlist's item list.

use super::audio_item::AudioItem;
use super::playlist::Playlist;
use crate::error::{CatalogError, Result};
use crate::metadata_store::{retry_once_on_stale, Edit, MetadataStore};
use std::collections::HashSet;
use tracing::{debug, info};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaylistReconciliation {
    /// Ids present in the original list but not in the edited one.
    pub deleted: Vec<String>,
    /// True when the surviving ids changed relative order.
    pub reordered: bool,
}

impl PlaylistReconciliation {
    pub fn is_changed(&self) -> bool {
        self.reordered || !self.deleted.is_empty()
    }
}

/// Brings `playlist` in line with `modified`, an edited copy of `original`.
///
/// Deleted ids are removed. If the surviving ids were reordered at all,
/// every one of them is removed and appended again in the new order.
pub fn reconcile(
    playlist: &mut Playlist,
    original: &[String],
    modified: &[String],
) -> Result<PlaylistReconciliation> {
    let mut seen = HashSet::new();
    let mut original_indices = Vec::with_capacity(modified.len());
    for id in modified {
        if !seen.insert(id.as_str()) {
            return Err(CatalogError::InvalidPlaylistEdit(format!(
                "item {} listed twice",
                id
            )));
        }
        let index = original.iter().position(|o| o == id).ok_or_else(|| {
            CatalogError::InvalidPlaylistEdit(format!(
                "item {} was not in playlist {}",
                id, playlist.id
            ))
        })?;
        original_indices.push(index);
    }

    let deleted: Vec<String> = original
        .iter()
        .filter(|id| !seen.contains(id.as_str()))
        .cloned()
        .collect();
    for id in &deleted {
        playlist.remove_audio_item(id);
    }

    let reordered = original_indices.windows(2).any(|w| w[1] < w[0]);
    if reordered {
        for id in modified {
            playlist.remove_audio_item(id);
        }
        for id in modified {
            playlist.add_audio_item(id.clone());
        }
    }

    Ok(PlaylistReconciliation { deleted, reordered })
}

/// Loads playlist `playlist_id`, reconciles it against the edit and commits
/// the playlist together with the audio items that left it. Nothing is
/// written when the edit changed nothing. If another writer got there first
/// the whole load and commit is done once more on fresh copies.
pub fn apply_playlist_edit<S: MetadataStore>(
    store: &S,
    playlist_id: &str,
    original: &[String],
    modified: &[String],
) -> Result<PlaylistReconciliation> {
    let reconciliation =
        retry_once_on_stale(|| commit_playlist_edit(store, playlist_id, original, modified))?;
    if reconciliation.is_changed() {
        info!(
            "Playlist {}: {} removed, reordered: {}",
            playlist_id,
            reconciliation.deleted.len(),
            reconciliation.reordered
        );
    }
    Ok(reconciliation)
}

fn commit_playlist_edit<S: MetadataStore>(
    store: &S,
    playlist_id: &str,
    original: &[String],
    modified: &[String],
) -> Result<PlaylistReconciliation> {
    let mut playlist = store
        .get_playlist(playlist_id)?
        .ok_or_else(|| CatalogError::not_found("Playlist", playlist_id))?;

    let reconciliation = reconcile(&mut playlist, original, modified)?;
    if !reconciliation.is_changed() {
        debug!("Playlist {} edit changed nothing", playlist_id);
        return Ok(reconciliation);
    }

    let mut removed_items: Vec<AudioItem> = Vec::new();
    for id in &reconciliation.deleted {
        if let Some(mut item) = store.get_audio_item(id)? {
            item.remove_playlist(&playlist.id);
            removed_items.push(item);
        }
    }

    let mut edits = vec![Edit::from(&mut playlist)];
    edits.extend(removed_items.iter_mut().map(Edit::from));
    store.commit(edits)?;
    Ok(reconciliation)
}
