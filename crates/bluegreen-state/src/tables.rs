//! redb table definitions for the deployment record store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Latest deployment snapshot keyed by `{deployment_id}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// State changes keyed by `{deployment_id}:{seq:010}`.
pub const HISTORY: TableDefinition<&str, &[u8]> = TableDefinition::new("history");
