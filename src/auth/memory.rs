//! Built-in groups
//!
//! A fixed set of groups for clusters without an account database.

use super::{Authenticator, Group};
use crate::error::{CraneError, Result};
use std::collections::BTreeMap;

/// Read-only authenticator seeded with the default groups
#[derive(Debug, Clone)]
pub struct InMemoryAuthenticator {
    groups: BTreeMap<u64, Group>,
}

impl InMemoryAuthenticator {
    pub fn new() -> Self {
        Self::with_groups([
            Group {
                id: 1,
                name: "developers".to_string(),
            },
            Group {
                id: 2,
                name: "operation".to_string(),
            },
        ])
    }

    /// Authenticator over an explicit set of groups
    pub fn with_groups(groups: impl IntoIterator<Item = Group>) -> Self {
        Self {
            groups: groups.into_iter().map(|g| (g.id, g)).collect(),
        }
    }
}

impl Default for InMemoryAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl Authenticator for InMemoryAuthenticator {
    fn group(&self, id: u64) -> Result<Group> {
        self.groups
            .get(&id)
            .cloned()
            .ok_or(CraneError::GroupNotFound(id))
    }

    fn groups(&self) -> Result<Vec<Group>> {
        Ok(self.groups.values().cloned().collect())
    }
}
