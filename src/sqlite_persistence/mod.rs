mod versioned_schema;

pub use versioned_schema::{
    migrate_to_latest, Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
    BASE_DB_VERSION,
};
