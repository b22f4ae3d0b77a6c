//! SQLite group store

use super::{Authenticator, Group};
use crate::error::{CraneError, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS crane_group (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);
";

/// Authenticator backed by a SQLite database
pub struct SqliteAuthenticator {
    conn: Mutex<Connection>,
}

impl SqliteAuthenticator {
    /// Open (or create) the database at `path` and apply the schema
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        tracing::debug!("Group schema ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CraneError::Lock("Failed to acquire database lock".to_string()))
    }
}

fn group_row(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get::<_, i64>(0)? as u64,
        name: row.get(1)?,
    })
}

impl Authenticator for SqliteAuthenticator {
    fn group(&self, id: u64) -> Result<Group> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name FROM crane_group WHERE id = ?1",
            params![id as i64],
            group_row,
        )
        .optional()?
        .ok_or(CraneError::GroupNotFound(id))
    }

    fn groups(&self) -> Result<Vec<Group>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name FROM crane_group ORDER BY id")?;
        let groups = stmt
            .query_map([], group_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn insert_group(auth: &SqliteAuthenticator, name: &str) -> u64 {
        let conn = auth.conn().unwrap();
        conn.execute("INSERT INTO crane_group (name) VALUES (?1)", params![name])
            .unwrap();
        conn.last_insert_rowid() as u64
    }

    #[test]
    fn test_group_lookup() {
        let auth = SqliteAuthenticator::open_in_memory().unwrap();
        let dev = insert_group(&auth, "developers");
        let ops = insert_group(&auth, "operation");

        assert_eq!(auth.group(ops).unwrap().name, "operation");
        let names: Vec<String> = auth.groups().unwrap().into_iter().map(|g| g.name).collect();
        assert_eq!(names, vec!["developers", "operation"]);
        assert!(dev < ops);
    }

    #[test]
    fn test_missing_group() {
        let auth = SqliteAuthenticator::open_in_memory().unwrap();
        assert_eq!(auth.group(4).unwrap_err().kind(), ErrorKind::GroupNotFound);
        assert!(auth.groups().unwrap().is_empty());
    }

    #[test]
    fn test_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groups.db");

        let id = {
            let auth = SqliteAuthenticator::open(&path).unwrap();
            insert_group(&auth, "developers")
        };

        let auth = SqliteAuthenticator::open(&path).unwrap();
        assert_eq!(auth.group(id).unwrap().name, "developers");
    }
}
