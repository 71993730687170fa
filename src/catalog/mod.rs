//! Audio items, their metadata, and playlists.

mod audio_item;
mod metadata;
mod playlist;
mod playlist_edit;

pub use audio_item::{prune_orphaned_ancestors, AudioItem};
pub use metadata::Metadata;
pub use playlist::Playlist;
pub use playlist_edit::{apply_playlist_edit, reconcile as reconcile_playlist_edit, PlaylistReconciliation};
