//! SQLite schema for the metadata store.
//!
//! Version 1 added translated category titles and the `autogenerated` flag.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};
use anyhow::Result;
use rusqlite::Connection;

pub const META_CHANGE_COUNT: &str = "change_count";
pub const META_TAXONOMY_GENERATION: &str = "taxonomy_generation";
pub const META_TAXONOMY_ROOT: &str = "taxonomy_root";

const AUDIO_ITEM_FK: ForeignKey = ForeignKey {
    foreign_table: "audio_items",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const CATEGORY_FK: ForeignKey = ForeignKey {
    foreign_table: "categories",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Restrict,
};

const TITLED_CATEGORY_FK: ForeignKey = ForeignKey {
    foreign_table: "categories",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const PLAYLIST_FK: ForeignKey = ForeignKey {
    foreign_table: "playlists",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

/// Categories, including detached ones (NULL parent) dropped by a
/// taxonomy migration but kept so old assignments stay valid.
const CATEGORIES_TABLE_V0: Table = Table {
    name: "categories",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("parent_id", &SqlType::Text),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!(
            "description",
            &SqlType::Text,
            non_null = true,
            default_value = Some("''")
        ),
        sqlite_column!("sort_order", &SqlType::Integer, non_null = true),
        sqlite_column!("revision", &SqlType::Integer, non_null = true),
        sqlite_column!("visible", &SqlType::Integer, non_null = true),
        sqlite_column!("non_assignable", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_categories_parent", "parent_id")],
    unique_constraints: &[],
};

const CATEGORIES_TABLE_V1: Table = Table {
    name: "categories",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("parent_id", &SqlType::Text),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!(
            "description",
            &SqlType::Text,
            non_null = true,
            default_value = Some("''")
        ),
        sqlite_column!("sort_order", &SqlType::Integer, non_null = true),
        sqlite_column!("revision", &SqlType::Integer, non_null = true),
        sqlite_column!("visible", &SqlType::Integer, non_null = true),
        sqlite_column!("non_assignable", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "autogenerated",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    indices: &[("idx_categories_parent", "parent_id")],
    unique_constraints: &[],
};

const CATEGORY_TITLES_TABLE: Table = Table {
    name: "category_titles",
    columns: &[
        sqlite_column!(
            "category_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&TITLED_CATEGORY_FK)
        ),
        sqlite_column!("locale", &SqlType::Text, non_null = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[&["category_id", "locale"]],
};

const AUDIO_ITEMS_TABLE: Table = Table {
    name: "audio_items",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("metadata", &SqlType::Text, non_null = true), // JSON
        sqlite_column!("import_order", &SqlType::Integer, non_null = true),
        sqlite_column!("row_version", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_audio_items_import_order", "import_order")],
    unique_constraints: &[],
};

/// Ancestor-closed category set of each item.
const AUDIO_ITEM_CATEGORIES_TABLE: Table = Table {
    name: "audio_item_categories",
    columns: &[
        sqlite_column!(
            "audio_item_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&AUDIO_ITEM_FK)
        ),
        sqlite_column!(
            "category_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&CATEGORY_FK)
        ),
    ],
    indices: &[("idx_item_categories_category", "category_id")],
    unique_constraints: &[&["audio_item_id", "category_id"]],
};

const PLAYLISTS_TABLE: Table = Table {
    name: "playlists",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("row_version", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_playlists_name", "name")],
    unique_constraints: &[],
};

/// Positions are not declared unique so corrupt rows can be loaded and
/// reported instead of failing at write time.
const PLAYLIST_ITEMS_TABLE: Table = Table {
    name: "playlist_items",
    columns: &[
        sqlite_column!(
            "playlist_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&PLAYLIST_FK)
        ),
        sqlite_column!(
            "audio_item_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&AUDIO_ITEM_FK)
        ),
        sqlite_column!("position", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_playlist_items_playlist", "playlist_id"),
        ("idx_playlist_items_item", "audio_item_id"),
    ],
    unique_constraints: &[&["playlist_id", "audio_item_id"]],
};

const STORE_META_TABLE: Table = Table {
    name: "store_meta",
    columns: &[
        sqlite_column!("key", &SqlType::Text, is_primary_key = true),
        sqlite_column!("value", &SqlType::Text, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

fn migrate_v0_to_v1(conn: &Connection) -> Result<()> {
    if let Some(column) = CATEGORIES_TABLE_V1.column("autogenerated") {
        conn.execute(
            &format!("ALTER TABLE categories ADD COLUMN {}", column.definition()),
            [],
        )?;
    }
    CATEGORY_TITLES_TABLE.create(conn)?;
    Ok(())
}

pub const METADATA_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 0,
        tables: &[
            CATEGORIES_TABLE_V0,
            AUDIO_ITEMS_TABLE,
            AUDIO_ITEM_CATEGORIES_TABLE,
            PLAYLISTS_TABLE,
            PLAYLIST_ITEMS_TABLE,
            STORE_META_TABLE,
        ],
        migration: None,
    },
    VersionedSchema {
        version: 1,
        tables: &[
            CATEGORIES_TABLE_V1,
            CATEGORY_TITLES_TABLE,
            AUDIO_ITEMS_TABLE,
            AUDIO_ITEM_CATEGORIES_TABLE,
            PLAYLISTS_TABLE,
            PLAYLIST_ITEMS_TABLE,
            STORE_META_TABLE,
        ],
        migration: Some(migrate_v0_to_v1),
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite_persistence::migrate_to_latest;

    #[test]
    fn fresh_db_validates_against_latest() {
        let mut conn = Connection::open_in_memory().unwrap();
        let version = migrate_to_latest(&mut conn, METADATA_VERSIONED_SCHEMAS, "metadata").unwrap();
        assert_eq!(version, 1);
        METADATA_VERSIONED_SCHEMAS[1].validate(&conn).unwrap();
    }

    #[test]
    fn v0_db_migrates_and_keeps_rows() {
        let mut conn = Connection::open_in_memory().unwrap();
        METADATA_VERSIONED_SCHEMAS[0].create(&conn).unwrap();
        conn.execute(
            "INSERT INTO categories (id, parent_id, title, sort_order, revision, visible, non_assignable) \
             VALUES ('LB_TAX_1.0', NULL, 'root', 0, 1, 1, 0)",
            [],
        )
        .unwrap();

        migrate_to_latest(&mut conn, METADATA_VERSIONED_SCHEMAS, "metadata").unwrap();
        METADATA_VERSIONED_SCHEMAS[1].validate(&conn).unwrap();
        let autogenerated: i64 = conn
            .query_row("SELECT autogenerated FROM categories", [], |r| r.get(0))
            .unwrap();
        assert_eq!(autogenerated, 0);
    }
}
