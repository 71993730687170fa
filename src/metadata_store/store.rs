//! SQLite-backed metadata store.
//!
//! One write connection and a small pool of read connections on the same
//! WAL-mode database file. Writes only happen through a [`SqliteSession`],
//! which holds the write connection inside `BEGIN IMMEDIATE` so another
//! process sharing the file waits instead of interleaving.

use super::schema::{
    META_CHANGE_COUNT, META_TAXONOMY_GENERATION, META_TAXONOMY_ROOT, METADATA_VERSIONED_SCHEMAS,
};
use super::trait_def::{MetadataStore, StoreSession};
use crate::catalog::{AudioItem, Metadata, Playlist};
use crate::error::{CatalogError, Result};
use crate::sqlite_persistence::migrate_to_latest;
use crate::taxonomy::{Category, Taxonomy};
use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct SqliteMetadataStore {
    read_pool: Vec<Arc<Mutex<Connection>>>,
    write_conn: Arc<Mutex<Connection>>,
    read_index: Arc<AtomicUsize>,
    db_path: PathBuf,
}

fn open_connection(path: &Path) -> anyhow::Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
            | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
            | rusqlite::OpenFlags::SQLITE_OPEN_URI
            | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("Failed to open metadata database {:?}", path))?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read_meta(conn: &Connection, key: &str) -> Result<u64> {
    let value: Option<i64> = conn
        .query_row(
            "SELECT CAST(value AS INTEGER) FROM store_meta WHERE key = ?1",
            params![key],
            |r| r.get(0),
        )
        .optional()?;
    Ok(value.unwrap_or(0).max(0) as u64)
}

fn bump_meta(conn: &Connection, key: &str) -> Result<u64> {
    conn.execute(
        "INSERT INTO store_meta (key, value) VALUES (?1, '1') \
         ON CONFLICT(key) DO UPDATE SET value = CAST(value AS INTEGER) + 1",
        params![key],
    )?;
    read_meta(conn, key)
}

fn category_from_row(row: &Row) -> rusqlite::Result<Category> {
    let mut category = Category::new(row.get::<_, String>(0)?, row.get::<_, String>(2)?);
    category.parent = row.get(1)?;
    category.description = row.get(3)?;
    category.order = row.get(4)?;
    category.revision = row.get(5)?;
    category.visible = row.get(6)?;
    category.non_assignable = row.get(7)?;
    category.autogenerated = row.get(8)?;
    Ok(category)
}

const CATEGORY_COLUMNS: &str =
    "id, parent_id, title, description, sort_order, revision, visible, non_assignable, autogenerated";

fn load_localized_titles(conn: &Connection) -> Result<HashMap<String, Vec<(String, String)>>> {
    let mut stmt = conn.prepare("SELECT category_id, locale, title FROM category_titles")?;
    let mut titles: HashMap<String, Vec<(String, String)>> = HashMap::new();
    let rows = stmt.query_map([], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
    })?;
    for row in rows {
        let (category_id, locale, title) = row?;
        titles.entry(category_id).or_default().push((locale, title));
    }
    Ok(titles)
}

fn load_taxonomy(conn: &Connection) -> Result<Option<Taxonomy>> {
    let root: Option<String> = conn
        .query_row(
            "SELECT value FROM store_meta WHERE key = ?1",
            params![META_TAXONOMY_ROOT],
            |r| r.get(0),
        )
        .optional()?;
    let Some(root) = root else {
        return Ok(None);
    };
    let generation = read_meta(conn, META_TAXONOMY_GENERATION)?;

    let mut stmt = conn.prepare(&format!("SELECT {} FROM categories", CATEGORY_COLUMNS))?;
    let mut rows = stmt
        .query_map([], category_from_row)?
        .collect::<rusqlite::Result<Vec<Category>>>()?;
    let mut titles = load_localized_titles(conn)?;
    for category in rows.iter_mut() {
        for (locale, title) in titles.remove(&category.id).unwrap_or_default() {
            category.set_localized_title(locale, title);
        }
    }
    Taxonomy::from_rows(&root, generation, rows).map(Some)
}

fn load_item_categories(
    conn: &Connection,
    audio_item_id: Option<&str>,
) -> Result<HashMap<String, BTreeSet<String>>> {
    let mut out: HashMap<String, BTreeSet<String>> = HashMap::new();
    let mut stmt = conn.prepare(
        "SELECT audio_item_id, category_id FROM audio_item_categories \
         WHERE ?1 IS NULL OR audio_item_id = ?1",
    )?;
    let rows = stmt.query_map(params![audio_item_id], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (item, category) = row?;
        out.entry(item).or_default().insert(category);
    }
    Ok(out)
}

fn load_item_playlists(
    conn: &Connection,
    audio_item_id: Option<&str>,
) -> Result<HashMap<String, BTreeSet<String>>> {
    let mut out: HashMap<String, BTreeSet<String>> = HashMap::new();
    let mut stmt = conn.prepare(
        "SELECT audio_item_id, playlist_id FROM playlist_items \
         WHERE ?1 IS NULL OR audio_item_id = ?1",
    )?;
    let rows = stmt.query_map(params![audio_item_id], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (item, playlist) = row?;
        out.entry(item).or_default().insert(playlist);
    }
    Ok(out)
}

fn load_audio_items(conn: &Connection, id: Option<&str>) -> Result<Vec<AudioItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, metadata, import_order, row_version FROM audio_items \
         WHERE ?1 IS NULL OR id = ?1 ORDER BY import_order, id",
    )?;
    let rows = stmt
        .query_map(params![id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, i64>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut categories = load_item_categories(conn, id)?;
    let mut playlists = load_item_playlists(conn, id)?;
    rows.into_iter()
        .map(|(id, metadata, import_order, row_version)| -> Result<AudioItem> {
            let metadata: Metadata = serde_json::from_str(&metadata)?;
            Ok(AudioItem::from_parts(
                id.clone(),
                metadata,
                categories.remove(&id).unwrap_or_default(),
                playlists.remove(&id).unwrap_or_default(),
                import_order,
                row_version as u64,
            ))
        })
        .collect()
}

fn load_playlists(conn: &Connection, id: Option<&str>) -> Result<Vec<Playlist>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, row_version FROM playlists WHERE ?1 IS NULL OR id = ?1 ORDER BY name, id",
    )?;
    let headers = stmt
        .query_map(params![id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut entries: HashMap<String, Vec<(String, i64)>> = HashMap::new();
    let mut stmt = conn.prepare(
        "SELECT playlist_id, audio_item_id, position FROM playlist_items \
         WHERE ?1 IS NULL OR playlist_id = ?1",
    )?;
    let rows = stmt.query_map(params![id], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, i64>(2)?,
        ))
    })?;
    for row in rows {
        let (playlist_id, item, position) = row?;
        entries.entry(playlist_id).or_default().push((item, position));
    }

    headers
        .into_iter()
        .map(|(id, name, row_version)| {
            let rows = entries.remove(&id).unwrap_or_default();
            Playlist::from_positions(id, name, row_version as u64, rows)
        })
        .collect()
}

impl SqliteMetadataStore {
    /// Opens (creating or migrating as needed) the store at `db_path`.
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite database file
    /// * `read_pool_size` - Number of read connections, at least 1
    pub fn new<P: AsRef<Path>>(db_path: P, read_pool_size: usize) -> anyhow::Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let mut write_conn = open_connection(&db_path)?;

        let version = migrate_to_latest(&mut write_conn, METADATA_VERSIONED_SCHEMAS, "metadata")?;
        #[cfg(not(feature = "no_checks"))]
        METADATA_VERSIONED_SCHEMAS
            .iter()
            .find(|s| s.version == version)
            .context("Unknown metadata schema version")?
            .validate(&write_conn)?;

        write_conn.pragma_update(None, "journal_mode", "WAL")?;
        for key in [META_CHANGE_COUNT, META_TAXONOMY_GENERATION] {
            write_conn.execute(
                "INSERT OR IGNORE INTO store_meta (key, value) VALUES (?1, '0')",
                params![key],
            )?;
        }

        let item_count: i64 = write_conn
            .query_row("SELECT COUNT(*) FROM audio_items", [], |r| r.get(0))
            .unwrap_or(0);
        let playlist_count: i64 = write_conn
            .query_row("SELECT COUNT(*) FROM playlists", [], |r| r.get(0))
            .unwrap_or(0);
        info!(
            "Opened metadata store {:?} (schema v{}): {} audio items, {} playlists",
            db_path, version, item_count, playlist_count
        );

        let mut read_pool = Vec::with_capacity(read_pool_size.max(1));
        for _ in 0..read_pool_size.max(1) {
            read_pool.push(Arc::new(Mutex::new(open_connection(&db_path)?)));
        }

        Ok(Self {
            read_pool,
            write_conn: Arc::new(Mutex::new(write_conn)),
            read_index: Arc::new(AtomicUsize::new(0)),
            db_path,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn with_read_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let index = self.read_index.fetch_add(1, Ordering::Relaxed) % self.read_pool.len();
        let conn = lock(&self.read_pool[index]);
        f(&conn)
    }
}

impl MetadataStore for SqliteMetadataStore {
    type Session<'s> = SqliteSession<'s>;

    fn begin_session(&self) -> Result<SqliteSession<'_>> {
        let conn = lock(&self.write_conn);
        conn.execute_batch("BEGIN IMMEDIATE")?;
        let mut session = SqliteSession {
            conn,
            open: true,
            start_generation: 0,
        };
        session.start_generation = read_meta(&session.conn, META_TAXONOMY_GENERATION)?;
        Ok(session)
    }

    fn change_count(&self) -> Result<u64> {
        self.with_read_conn(|conn| read_meta(conn, META_CHANGE_COUNT))
    }

    fn taxonomy_generation(&self) -> Result<u64> {
        self.with_read_conn(|conn| read_meta(conn, META_TAXONOMY_GENERATION))
    }

    fn get_taxonomy(&self) -> Result<Option<Taxonomy>> {
        self.with_read_conn(load_taxonomy)
    }

    fn get_category(&self, id: &str) -> Result<Option<Category>> {
        self.with_read_conn(|conn| {
            // Read before the row so a concurrent commit can only make the
            // copy look older than it is.
            let generation = read_meta(conn, META_TAXONOMY_GENERATION)?;
            let category = conn
                .query_row(
                    &format!("SELECT {} FROM categories WHERE id = ?1", CATEGORY_COLUMNS),
                    params![id],
                    category_from_row,
                )
                .optional()?;
            let Some(mut category) = category else {
                return Ok(None);
            };
            category.generation = generation;
            let mut stmt = conn.prepare(
                "SELECT id FROM categories WHERE parent_id = ?1 ORDER BY sort_order, id",
            )?;
            category.children = stmt
                .query_map(params![id], |r| r.get::<_, String>(0))?
                .collect::<rusqlite::Result<_>>()?;
            let mut stmt =
                conn.prepare("SELECT locale, title FROM category_titles WHERE category_id = ?1")?;
            let titles = stmt
                .query_map(params![id], |r| {
                    Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for (locale, title) in titles {
                category.set_localized_title(locale, title);
            }
            Ok(Some(category))
        })
    }

    fn get_audio_item(&self, id: &str) -> Result<Option<AudioItem>> {
        self.with_read_conn(|conn| Ok(load_audio_items(conn, Some(id))?.pop()))
    }

    fn get_audio_items(&self) -> Result<Vec<AudioItem>> {
        self.with_read_conn(|conn| load_audio_items(conn, None))
    }

    fn get_playlist(&self, id: &str) -> Result<Option<Playlist>> {
        self.with_read_conn(|conn| Ok(load_playlists(conn, Some(id))?.pop()))
    }

    fn get_playlists(&self) -> Result<Vec<Playlist>> {
        self.with_read_conn(|conn| load_playlists(conn, None))
    }

    fn find_playlist_by_name(&self, name: &str) -> Result<Option<Playlist>> {
        let id: Option<String> = self.with_read_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id FROM playlists WHERE name = ?1 ORDER BY id LIMIT 1",
                    params![name],
                    |r| r.get(0),
                )
                .optional()?)
        })?;
        match id {
            Some(id) => self.get_playlist(&id),
            None => Ok(None),
        }
    }
}

/// Write session on the store's write connection. Dropping an unfinished
/// session rolls it back.
pub struct SqliteSession<'a> {
    conn: MutexGuard<'a, Connection>,
    open: bool,
    /// Taxonomy generation when the write lock was taken. Tree edits loaded
    /// at any other generation are stale.
    start_generation: u64,
}

impl SqliteSession<'_> {
    fn write_category_row(&self, category: &Category) -> Result<()> {
        self.conn.execute(
            "INSERT INTO categories \
             (id, parent_id, title, description, sort_order, revision, visible, non_assignable, autogenerated) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
             ON CONFLICT(id) DO UPDATE SET parent_id = excluded.parent_id, title = excluded.title, \
             description = excluded.description, sort_order = excluded.sort_order, \
             revision = excluded.revision, visible = excluded.visible, \
             non_assignable = excluded.non_assignable, autogenerated = excluded.autogenerated",
            params![
                category.id,
                category.parent,
                category.title,
                category.description,
                category.order,
                category.revision,
                category.visible,
                category.non_assignable,
                category.autogenerated,
            ],
        )?;
        self.write_localized_titles(category)
    }

    fn write_localized_titles(&self, category: &Category) -> Result<()> {
        self.conn.execute(
            "DELETE FROM category_titles WHERE category_id = ?1",
            params![category.id],
        )?;
        for (locale, title) in &category.localized_titles {
            self.conn.execute(
                "INSERT INTO category_titles (category_id, locale, title) VALUES (?1, ?2, ?3)",
                params![category.id, locale, title],
            )?;
        }
        Ok(())
    }

    fn exists(&self, table: &str, id: &str) -> Result<bool> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE id = ?1", table),
                params![id],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    fn renumber_playlist(&self, playlist_id: &str) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "SELECT audio_item_id FROM playlist_items WHERE playlist_id = ?1 ORDER BY position",
        )?;
        let items = stmt
            .query_map(params![playlist_id], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (position, item) in items.iter().enumerate() {
            self.conn.execute(
                "UPDATE playlist_items SET position = ?1 WHERE playlist_id = ?2 AND audio_item_id = ?3",
                params![position as i64, playlist_id, item],
            )?;
        }
        self.conn.execute(
            "UPDATE playlists SET row_version = row_version + 1 WHERE id = ?1",
            params![playlist_id],
        )?;
        Ok(())
    }
}

impl StoreSession for SqliteSession<'_> {
    fn save_category(&mut self, category: &Category) -> Result<u64> {
        if category.generation() != self.start_generation {
            return Err(CatalogError::stale("Category", &category.id));
        }
        let updated = self.conn.execute(
            "UPDATE categories SET title = ?2, description = ?3, sort_order = ?4, revision = ?5, \
             visible = ?6, non_assignable = ?7, autogenerated = ?8 WHERE id = ?1",
            params![
                category.id,
                category.title,
                category.description,
                category.order,
                category.revision,
                category.visible,
                category.non_assignable,
                category.autogenerated,
            ],
        )?;
        if updated == 0 {
            return Err(CatalogError::not_found("Category", &category.id));
        }
        self.write_localized_titles(category)?;
        bump_meta(&self.conn, META_TAXONOMY_GENERATION)
    }

    fn save_taxonomy(&mut self, taxonomy: &Taxonomy) -> Result<u64> {
        if taxonomy.generation() != self.start_generation {
            return Err(CatalogError::stale("Taxonomy", taxonomy.root_id()));
        }
        // Categories missing from this tree stay as detached rows.
        self.conn
            .execute("UPDATE categories SET parent_id = NULL", [])?;
        for category in taxonomy.iter() {
            self.write_category_row(category)?;
        }
        self.conn.execute(
            "INSERT INTO store_meta (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![META_TAXONOMY_ROOT, taxonomy.root_id()],
        )?;
        let generation = bump_meta(&self.conn, META_TAXONOMY_GENERATION)?;
        debug!(
            "Saved taxonomy revision {} ({} categories), generation {}",
            taxonomy.revision(),
            taxonomy.len(),
            generation
        );
        Ok(generation)
    }

    fn save_audio_item(&mut self, item: &AudioItem) -> Result<u64> {
        let metadata = serde_json::to_string(item.metadata())?;
        let version = if item.is_new() {
            if self.exists("audio_items", &item.id)? {
                return Err(CatalogError::stale("AudioItem", &item.id));
            }
            let import_order: i64 = if item.import_order > 0 {
                item.import_order
            } else {
                self.conn.query_row(
                    "SELECT COALESCE(MAX(import_order), 0) + 1 FROM audio_items",
                    [],
                    |r| r.get(0),
                )?
            };
            self.conn.execute(
                "INSERT INTO audio_items (id, metadata, import_order, row_version) VALUES (?1, ?2, ?3, 1)",
                params![item.id, metadata, import_order],
            )?;
            1
        } else {
            let updated = self.conn.execute(
                "UPDATE audio_items SET metadata = ?2, row_version = row_version + 1 \
                 WHERE id = ?1 AND row_version = ?3",
                params![item.id, metadata, item.row_version as i64],
            )?;
            if updated == 0 {
                return Err(CatalogError::stale("AudioItem", &item.id));
            }
            item.row_version + 1
        };

        self.conn.execute(
            "DELETE FROM audio_item_categories WHERE audio_item_id = ?1",
            params![item.id],
        )?;
        for category in item.categories() {
            self.conn.execute(
                "INSERT INTO audio_item_categories (audio_item_id, category_id) VALUES (?1, ?2)",
                params![item.id, category],
            )?;
        }
        Ok(version)
    }

    fn delete_audio_item(&mut self, id: &str) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT playlist_id FROM playlist_items WHERE audio_item_id = ?1")?;
        let playlists = stmt
            .query_map(params![id], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        let deleted = self
            .conn
            .execute("DELETE FROM audio_items WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(CatalogError::not_found("AudioItem", id));
        }
        for playlist_id in &playlists {
            self.renumber_playlist(playlist_id)?;
        }
        Ok(())
    }

    fn save_playlist(&mut self, playlist: &Playlist) -> Result<u64> {
        let version = if playlist.is_new() {
            if self.exists("playlists", &playlist.id)? {
                return Err(CatalogError::stale("Playlist", &playlist.id));
            }
            self.conn.execute(
                "INSERT INTO playlists (id, name, row_version) VALUES (?1, ?2, 1)",
                params![playlist.id, playlist.name],
            )?;
            1
        } else {
            let updated = self.conn.execute(
                "UPDATE playlists SET name = ?2, row_version = row_version + 1 \
                 WHERE id = ?1 AND row_version = ?3",
                params![playlist.id, playlist.name, playlist.row_version as i64],
            )?;
            if updated == 0 {
                return Err(CatalogError::stale("Playlist", &playlist.id));
            }
            playlist.row_version + 1
        };

        self.conn.execute(
            "DELETE FROM playlist_items WHERE playlist_id = ?1",
            params![playlist.id],
        )?;
        for (item, position) in playlist.positions() {
            self.conn.execute(
                "INSERT INTO playlist_items (playlist_id, audio_item_id, position) VALUES (?1, ?2, ?3)",
                params![playlist.id, item, position as i64],
            )?;
        }
        Ok(version)
    }

    fn delete_playlist(&mut self, id: &str) -> Result<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM playlists WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(CatalogError::not_found("Playlist", id));
        }
        Ok(())
    }

    fn commit(mut self) -> Result<u64> {
        let change_count = bump_meta(&self.conn, META_CHANGE_COUNT)?;
        self.conn.execute_batch("COMMIT")?;
        self.open = false;
        Ok(change_count)
    }

    fn rollback(mut self) -> Result<()> {
        self.open = false;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Drop for SqliteSession<'_> {
    fn drop(&mut self) {
        if self.open {
            warn!("Write session dropped while open, rolling back");
            if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                warn!("Rollback of dropped session failed: {}", err);
            }
        }
    }
}
