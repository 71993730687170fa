//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{create_tmp_store, init_taxonomy, REV1_YAML};
//!
//! #[test]
//! fn test_taxonomy_is_created() {
//!     let (store, _dir) = create_tmp_store();
//!     let handle = init_taxonomy(&store, REV1_YAML);
//!     assert!(handle.taxonomy().contains("A1"));
//! }
//! ```

mod fixtures;

#[allow(unused_imports)]
pub use fixtures::*;
