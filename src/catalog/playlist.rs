use crate::error::{CatalogError, Result};
use serde::Serialize;

/// Named ordered list of audio item ids. The index of an entry is its
/// position, so positions are always `0..len` with no gaps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    entries: Vec<String>,
    pub row_version: u64,
}

impl Playlist {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            entries: Vec::new(),
            row_version: 0,
        }
    }

    /// Rebuilds a playlist from stored `(audio_item_id, position)` rows.
    pub fn from_positions(
        id: impl Into<String>,
        name: impl Into<String>,
        row_version: u64,
        mut rows: Vec<(String, i64)>,
    ) -> Result<Self> {
        let id = id.into();
        rows.sort_by_key(|(_, position)| *position);
        for (expected, (item, position)) in rows.iter().enumerate() {
            if *position != expected as i64 {
                return Err(CatalogError::CorruptPlaylist {
                    id,
                    reason: format!(
                        "item {} at position {}, expected position {}",
                        item, position, expected
                    ),
                });
            }
        }
        let entries: Vec<String> = rows.into_iter().map(|(item, _)| item).collect();
        for (index, item) in entries.iter().enumerate() {
            if entries[..index].contains(item) {
                return Err(CatalogError::CorruptPlaylist {
                    id,
                    reason: format!("item {} appears twice", item),
                });
            }
        }
        Ok(Self {
            id,
            name: name.into(),
            entries,
            row_version,
        })
    }

    pub fn is_new(&self) -> bool {
        self.row_version == 0
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, audio_item_id: &str) -> bool {
        self.entries.iter().any(|e| e == audio_item_id)
    }

    /// Item ids ordered by position.
    pub fn audio_items(&self) -> &[String] {
        &self.entries
    }

    pub fn position(&self, audio_item_id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e == audio_item_id)
    }

    pub fn positions(&self) -> impl Iterator<Item = (&str, usize)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(position, id)| (id.as_str(), position))
    }

    /// Appends at the end. Adding an item already present changes nothing.
    pub fn add_audio_item(&mut self, audio_item_id: impl Into<String>) {
        let audio_item_id = audio_item_id.into();
        if !self.contains(&audio_item_id) {
            self.entries.push(audio_item_id);
        }
    }

    /// Removes the item; later entries move up one position.
    pub fn remove_audio_item(&mut self, audio_item_id: &str) -> bool {
        match self.position(audio_item_id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Moves an item, clamping `new_position` to `[0, len)`.
    pub fn set_position(&mut self, audio_item_id: &str, new_position: usize) -> Result<usize> {
        let index = self
            .position(audio_item_id)
            .ok_or_else(|| CatalogError::not_found("AudioItem", audio_item_id))?;
        let item = self.entries.remove(index);
        let target = new_position.min(self.entries.len());
        self.entries.insert(target, item);
        Ok(target)
    }
}
