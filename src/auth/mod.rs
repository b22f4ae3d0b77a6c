//! Groups
//!
//! Stacks are owned by groups. The daemon only looks groups up; they are
//! managed outside Crane, either built in or in a SQLite database.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryAuthenticator;
pub use sqlite::SqliteAuthenticator;

use crate::config::{AuthenticatorKind, CraneConfig};
use crate::error::{CraneError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A group of accounts that can own stacks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Group {
    #[serde(rename = "ID")]
    pub id: u64,
    pub name: String,
}

/// Group lookups
pub trait Authenticator: Send + Sync {
    /// Group by ID, `GroupNotFound` if absent
    fn group(&self, id: u64) -> Result<Group>;

    /// All groups, ordered by ID
    fn groups(&self) -> Result<Vec<Group>>;
}

/// Build the authenticator selected in the configuration
pub fn from_config(config: &CraneConfig) -> Result<Arc<dyn Authenticator>> {
    match config.account_authenticator {
        AuthenticatorKind::Default => Ok(Arc::new(InMemoryAuthenticator::new())),
        AuthenticatorKind::Db => {
            let dsn = config.db_dsn.as_deref().ok_or_else(|| {
                CraneError::InvalidConfig("CRANE_DB_DSN is required for the db authenticator".to_string())
            })?;
            Ok(Arc::new(SqliteAuthenticator::open(dsn)?))
        }
    }
}
