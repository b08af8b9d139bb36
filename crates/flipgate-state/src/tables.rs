//! redb table definitions for the Flipgate state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// In-flight release records keyed by `{release_id}`.
pub const RELEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("releases");

/// Finished releases keyed by `{service}:{release_id}`.
pub const ARCHIVE: TableDefinition<&str, &[u8]> = TableDefinition::new("archive");

/// Provisioned resource handles keyed by `{logical_name}`.
pub const RESOURCES: TableDefinition<&str, &[u8]> = TableDefinition::new("resources");
