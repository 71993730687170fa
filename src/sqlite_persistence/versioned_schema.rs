use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection};
use tracing::info;

/// Offset added to schema versions stored in `PRAGMA user_version`, so a
/// database created by something else is never mistaken for one of ours.
pub const BASE_DB_VERSION: usize = 99999;

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            #[allow(unused_mut)]
            let mut column = Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                non_null: false,
                is_unique: false,
                default_value: None,
                foreign_key: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Real,
    Blob,
}

impl SqlType {
    fn sql_name(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Blob => "BLOB",
        }
    }

    fn from_sql_name(name: &str) -> Option<&'static SqlType> {
        match name {
            "TEXT" => Some(&SqlType::Text),
            "INTEGER" => Some(&SqlType::Integer),
            "REAL" => Some(&SqlType::Real),
            "BLOB" => Some(&SqlType::Blob),
            _ => None,
        }
    }
}

#[allow(unused)]
pub enum ForeignKeyOnChange {
    NoAction,
    Restrict,
    SetNull,
    Cascade,
}

impl ForeignKeyOnChange {
    fn sql_name(&self) -> &'static str {
        match self {
            ForeignKeyOnChange::NoAction => "NO ACTION",
            ForeignKeyOnChange::Restrict => "RESTRICT",
            ForeignKeyOnChange::SetNull => "SET NULL",
            ForeignKeyOnChange::Cascade => "CASCADE",
        }
    }
}

pub struct ForeignKey {
    pub foreign_table: &'static str,
    pub foreign_column: &'static str,
    pub on_delete: ForeignKeyOnChange,
}

pub struct Column<'a> {
    pub name: &'a str,
    pub sql_type: &'a SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
    pub is_unique: bool,
    pub default_value: Option<&'a str>,
    pub foreign_key: Option<&'a ForeignKey>,
}

impl Column<'_> {
    /// Column definition as it appears inside CREATE TABLE / ALTER TABLE.
    pub fn definition(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.sql_type.sql_name());
        if self.is_primary_key {
            sql.push_str(" PRIMARY KEY");
        }
        if self.non_null {
            sql.push_str(" NOT NULL");
        }
        if self.is_unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(default_value) = self.default_value {
            sql.push_str(&format!(" DEFAULT {}", default_value));
        }
        if let Some(fk) = self.foreign_key {
            sql.push_str(&format!(
                " REFERENCES {}({}) ON DELETE {}",
                fk.foreign_table,
                fk.foreign_column,
                fk.on_delete.sql_name()
            ));
        }
        sql
    }
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column<'static>],
    pub indices: &'static [(&'static str, &'static str)],
    pub unique_constraints: &'static [&'static [&'static str]],
}

impl Table {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        let mut parts: Vec<String> = self.columns.iter().map(Column::definition).collect();
        for unique_constraint in self.unique_constraints {
            parts.push(format!("UNIQUE ({})", unique_constraint.join(", ")));
        }
        conn.execute(
            &format!("CREATE TABLE {} ({});", self.name, parts.join(", ")),
            params![],
        )?;
        self.create_indices(conn)
    }

    pub fn create_indices(&self, conn: &Connection) -> Result<()> {
        for (index_name, column_name) in self.indices {
            conn.execute(
                &format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {}({});",
                    index_name, self.name, column_name
                ),
                params![],
            )?;
        }
        Ok(())
    }

    pub fn column(&self, name: &str) -> Option<&Column<'static>> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn validate(&self, conn: &Connection) -> Result<()> {
        struct ActualColumn {
            name: String,
            sql_type: Option<&'static SqlType>,
            non_null: bool,
            is_primary_key: bool,
        }

        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", self.name))?;
        let actual: Vec<ActualColumn> = stmt
            .query_map([], |row| {
                Ok(ActualColumn {
                    name: row.get(1)?,
                    sql_type: SqlType::from_sql_name(&row.get::<_, String>(2)?),
                    non_null: row.get::<_, i32>(3)? == 1,
                    is_primary_key: row.get::<_, i32>(5)? == 1,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        if actual.len() != self.columns.len() {
            bail!(
                "Table {} has columns [{}], expected [{}]",
                self.name,
                actual
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                self.columns
                    .iter()
                    .map(|c| c.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        for (actual, expected) in actual.iter().zip(self.columns.iter()) {
            if actual.name != expected.name {
                bail!(
                    "Table {} column name mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    actual.name
                );
            }
            if actual.sql_type != Some(expected.sql_type) {
                bail!(
                    "Table {} column {} type mismatch: expected {:?}, got {:?}",
                    self.name,
                    expected.name,
                    expected.sql_type,
                    actual.sql_type
                );
            }
            if actual.non_null != expected.non_null
                || actual.is_primary_key != expected.is_primary_key
            {
                bail!(
                    "Table {} column {} constraint mismatch (non-null {}, primary key {})",
                    self.name,
                    expected.name,
                    actual.non_null,
                    actual.is_primary_key
                );
            }
        }

        for (index_name, _) in self.indices {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type='index' AND name=?1 AND tbl_name=?2",
                    params![index_name, self.name],
                    |_| Ok(()),
                )
                .is_ok();
            if !exists {
                bail!("Table {} is missing index '{}'", self.name, index_name);
            }
        }

        let mut fk_stmt = conn.prepare(&format!("PRAGMA foreign_key_list({})", self.name))?;
        let actual_fks: Vec<(String, String, String, String)> = fk_stmt
            .query_map([], |row| {
                Ok((row.get(3)?, row.get(2)?, row.get(4)?, row.get(6)?))
            })?
            .collect::<rusqlite::Result<_>>()?;

        for column in self.columns {
            let Some(expected) = column.foreign_key else {
                continue;
            };
            let found = actual_fks.iter().any(|(from, table, to, on_delete)| {
                from == column.name
                    && table == expected.foreign_table
                    && to == expected.foreign_column
                    && on_delete == expected.on_delete.sql_name()
            });
            if !found {
                bail!(
                    "Table {} column {} is missing foreign key REFERENCES {}({}) ON DELETE {}",
                    self.name,
                    column.name,
                    expected.foreign_table,
                    expected.foreign_column,
                    expected.on_delete.sql_name()
                );
            }
        }
        Ok(())
    }
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    /// Brings a database at `version - 1` up to this version.
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute("PRAGMA foreign_keys = ON;", params![])?;
        for table in self.tables {
            table.create(conn)?;
        }
        conn.pragma_update(None, "user_version", BASE_DB_VERSION + self.version)?;
        Ok(())
    }

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.validate(conn)?;
        }
        Ok(())
    }
}

/// Creates the latest schema on an empty database, or runs every pending
/// migration in one transaction. Returns the version the database ends at.
pub fn migrate_to_latest(
    conn: &mut Connection,
    schemas: &[VersionedSchema],
    db_name: &str,
) -> Result<usize> {
    let latest = schemas
        .last()
        .with_context(|| format!("No schema declared for {} db", db_name))?;

    let table_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |r| r.get(0),
    )?;
    if table_count == 0 {
        info!("Creating {} db schema at version {}", db_name, latest.version);
        latest.create(conn)?;
        return Ok(latest.version);
    }

    let db_version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    if db_version < BASE_DB_VERSION as i64 {
        bail!(
            "{} db has user_version {}, it was not created by this application",
            db_name,
            db_version
        );
    }
    let mut current_version = (db_version - BASE_DB_VERSION as i64) as usize;
    if current_version > latest.version {
        bail!(
            "{} db is at version {}, newer than the supported {}",
            db_name,
            current_version,
            latest.version
        );
    }
    if current_version == latest.version {
        return Ok(current_version);
    }

    let start_version = current_version;
    let tx = conn.transaction()?;
    for schema in schemas.iter().filter(|s| s.version > start_version) {
        if let Some(migration_fn) = schema.migration {
            info!(
                "Migrating {} db from version {} to {}",
                db_name, current_version, schema.version
            );
            migration_fn(&tx)?;
        }
        current_version = schema.version;
    }
    tx.pragma_update(None, "user_version", BASE_DB_VERSION + current_version)?;
    tx.commit()?;
    Ok(current_version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite_column;

    const PARENT_FK: ForeignKey = ForeignKey {
        foreign_table: "shelves",
        foreign_column: "id",
        on_delete: ForeignKeyOnChange::Cascade,
    };

    const SHELVES: Table = Table {
        name: "shelves",
        columns: &[
            sqlite_column!("id", &SqlType::Text, is_primary_key = true),
            sqlite_column!("label", &SqlType::Text, non_null = true),
        ],
        indices: &[],
        unique_constraints: &[],
    };

    const BOOKS: Table = Table {
        name: "books",
        columns: &[
            sqlite_column!("id", &SqlType::Text, is_primary_key = true),
            sqlite_column!(
                "shelf_id",
                &SqlType::Text,
                non_null = true,
                foreign_key = Some(&PARENT_FK)
            ),
            sqlite_column!("position", &SqlType::Integer, non_null = true),
        ],
        indices: &[("idx_books_shelf", "shelf_id")],
        unique_constraints: &[&["shelf_id", "position"]],
    };

    const BOOKS_V1: Table = Table {
        name: "books",
        columns: &[
            sqlite_column!("id", &SqlType::Text, is_primary_key = true),
            sqlite_column!(
                "shelf_id",
                &SqlType::Text,
                non_null = true,
                foreign_key = Some(&PARENT_FK)
            ),
            sqlite_column!("position", &SqlType::Integer, non_null = true),
            sqlite_column!(
                "language",
                &SqlType::Text,
                non_null = true,
                default_value = Some("'en'")
            ),
        ],
        indices: &[("idx_books_shelf", "shelf_id")],
        unique_constraints: &[&["shelf_id", "position"]],
    };

    fn add_language(conn: &Connection) -> Result<()> {
        let column = BOOKS_V1.column("language").unwrap();
        conn.execute(
            &format!("ALTER TABLE books ADD COLUMN {}", column.definition()),
            [],
        )?;
        Ok(())
    }

    const SCHEMAS: &[VersionedSchema] = &[
        VersionedSchema {
            version: 0,
            tables: &[SHELVES, BOOKS],
            migration: None,
        },
        VersionedSchema {
            version: 1,
            tables: &[SHELVES, BOOKS_V1],
            migration: Some(add_language),
        },
    ];

    #[test]
    fn test_create_then_validate() {
        let conn = Connection::open_in_memory().unwrap();
        SCHEMAS[0].create(&conn).unwrap();
        SCHEMAS[0].validate(&conn).unwrap();
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, BASE_DB_VERSION as i64);
    }

    #[test]
    fn test_validate_detects_missing_index() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE shelves (id TEXT PRIMARY KEY, label TEXT NOT NULL)", [])
            .unwrap();
        conn.execute(
            "CREATE TABLE books (id TEXT PRIMARY KEY, \
             shelf_id TEXT NOT NULL REFERENCES shelves(id) ON DELETE CASCADE, \
             position INTEGER NOT NULL)",
            [],
        )
        .unwrap();

        let err = SCHEMAS[0].validate(&conn).unwrap_err().to_string();
        assert!(err.contains("missing index"));
        assert!(err.contains("idx_books_shelf"));
    }

    #[test]
    fn test_validate_detects_wrong_on_delete() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE shelves (id TEXT PRIMARY KEY, label TEXT NOT NULL)", [])
            .unwrap();
        conn.execute(
            "CREATE TABLE books (id TEXT PRIMARY KEY, \
             shelf_id TEXT NOT NULL REFERENCES shelves(id) ON DELETE SET NULL, \
             position INTEGER NOT NULL)",
            [],
        )
        .unwrap();
        conn.execute("CREATE INDEX idx_books_shelf ON books(shelf_id)", [])
            .unwrap();

        let err = SCHEMAS[0].validate(&conn).unwrap_err().to_string();
        assert!(err.contains("missing foreign key"));
        assert!(err.contains("CASCADE"));
    }

    #[test]
    fn test_migrate_fresh_db_creates_latest() {
        let mut conn = Connection::open_in_memory().unwrap();
        let version = migrate_to_latest(&mut conn, SCHEMAS, "test").unwrap();
        assert_eq!(version, 1);
        SCHEMAS[1].validate(&conn).unwrap();
    }

    #[test]
    fn test_migrate_runs_pending_migrations() {
        let mut conn = Connection::open_in_memory().unwrap();
        SCHEMAS[0].create(&conn).unwrap();
        conn.execute("INSERT INTO shelves (id, label) VALUES ('s', 'Shelf')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO books (id, shelf_id, position) VALUES ('b', 's', 0)",
            [],
        )
        .unwrap();

        assert_eq!(migrate_to_latest(&mut conn, SCHEMAS, "test").unwrap(), 1);
        SCHEMAS[1].validate(&conn).unwrap();
        let language: String = conn
            .query_row("SELECT language FROM books WHERE id = 'b'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(language, "en");

        // Second run is a no-op.
        assert_eq!(migrate_to_latest(&mut conn, SCHEMAS, "test").unwrap(), 1);
    }

    #[test]
    fn test_migrate_rejects_foreign_db() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE other (id INTEGER)", []).unwrap();
        let err = migrate_to_latest(&mut conn, SCHEMAS, "test")
            .unwrap_err()
            .to_string();
        assert!(err.contains("not created by this application"));
    }
}
