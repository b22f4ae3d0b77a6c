//! Permission labels
//!
//! In account mode every service of a stack is tagged with a label that
//! grants a group access to it. The label key and value come from a
//! [`PermissionEncoder`]; the deployment core treats the value as opaque.

use super::bundle::StackBundle;
use crate::error::{CraneError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Prefix shared by all permission label keys
pub const PERMISSION_LABEL_PREFIX: &str = "crane.reserved.permissions.";

/// Access level granted to a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PermissionLevel {
    #[serde(rename = "ro")]
    ReadOnly,
    #[serde(rename = "rw")]
    ReadWrite,
    #[serde(rename = "admin")]
    Admin,
}

impl PermissionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionLevel::ReadOnly => "ro",
            PermissionLevel::ReadWrite => "rw",
            PermissionLevel::Admin => "admin",
        }
    }
}

impl std::fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PermissionLevel {
    type Err = CraneError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ro" => Ok(PermissionLevel::ReadOnly),
            "rw" => Ok(PermissionLevel::ReadWrite),
            "admin" => Ok(PermissionLevel::Admin),
            other => Err(CraneError::InvalidConfig(format!(
                "unknown permission level: {}",
                other
            ))),
        }
    }
}

/// A group and the level it is granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub group_id: u64,
    pub level: PermissionLevel,
}

impl PermissionGrant {
    /// Grant given to the group that creates a stack
    pub fn admin(group_id: u64) -> Self {
        Self {
            group_id,
            level: PermissionLevel::Admin,
        }
    }
}

/// Encodes a grant into a label
pub trait PermissionEncoder: Send + Sync {
    /// Label key for a group
    fn label_key(&self, group_id: u64) -> String;

    /// Label value for a group and level
    fn encode(&self, group_id: u64, level: PermissionLevel) -> String;

    /// Group named by a label, if the label is one of ours
    fn decode(&self, key: &str, value: &str) -> Option<u64>;
}

/// `crane.reserved.permissions.<gid>` = `<gid>:<level>`
#[derive(Debug, Clone, Copy, Default)]
pub struct ReservedLabelEncoder;

impl PermissionEncoder for ReservedLabelEncoder {
    fn label_key(&self, group_id: u64) -> String {
        format!("{}{}", PERMISSION_LABEL_PREFIX, group_id)
    }

    fn encode(&self, group_id: u64, level: PermissionLevel) -> String {
        format!("{}:{}", group_id, level)
    }

    fn decode(&self, key: &str, value: &str) -> Option<u64> {
        let from_key: u64 = key.strip_prefix(PERMISSION_LABEL_PREFIX)?.parse().ok()?;
        let (from_value, level) = value.split_once(':')?;
        level.parse::<PermissionLevel>().ok()?;
        (from_value.parse::<u64>().ok()? == from_key).then_some(from_key)
    }
}

/// Label map for one grant
pub fn permission_labels(
    encoder: &dyn PermissionEncoder,
    grant: PermissionGrant,
) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    labels.insert(
        encoder.label_key(grant.group_id),
        encoder.encode(grant.group_id, grant.level),
    );
    labels
}

/// Merge permission labels into every service of a bundle
///
/// Labels under [`PERMISSION_LABEL_PREFIX`] that came with the bundle are
/// dropped so only the grant names a group. Other labels are kept.
pub fn inject_permission_labels(
    bundle: &mut StackBundle,
    encoder: &dyn PermissionEncoder,
    grant: PermissionGrant,
) {
    let perms = permission_labels(encoder, grant);
    for spec in bundle.services.values_mut() {
        spec.labels
            .retain(|k, _| !k.starts_with(PERMISSION_LABEL_PREFIX));
        for (k, v) in &perms {
            spec.labels.insert(k.clone(), v.clone());
        }
    }
}

/// Group granted on a service, taken from the first permission label found
///
/// Labels are checked in key order so the answer is stable.
pub fn group_id_from_labels(
    encoder: &dyn PermissionEncoder,
    labels: &HashMap<String, String>,
) -> Option<u64> {
    let mut keys: Vec<&String> = labels.keys().collect();
    keys.sort();
    keys.into_iter()
        .find_map(|k| encoder.decode(k, &labels[k]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::service::ServiceSpec;

    fn bundle() -> StackBundle {
        let mut labelled = ServiceSpec::default();
        labelled
            .labels
            .insert("owner".to_string(), "team-a".to_string());
        labelled.labels.insert(
            "crane.reserved.permissions.7".to_string(),
            "forged".to_string(),
        );

        StackBundle::new("demo")
            .with_service("web", ServiceSpec::default())
            .with_service("api", labelled)
    }

    #[test]
    fn test_encoder_format() {
        let enc = ReservedLabelEncoder;
        assert_eq!(enc.label_key(7), "crane.reserved.permissions.7");
        assert_eq!(enc.encode(7, PermissionLevel::Admin), "7:admin");
        assert_eq!(enc.decode("crane.reserved.permissions.7", "7:rw"), Some(7));
        assert_eq!(enc.decode("crane.reserved.permissions.7", "8:rw"), None);
        assert_eq!(enc.decode("crane.reserved.permissions.7", "7:root"), None);
        assert_eq!(enc.decode("owner", "7:rw"), None);
    }

    #[test]
    fn test_inject_overrides_only_permission_keys() {
        let mut b = bundle();
        inject_permission_labels(&mut b, &ReservedLabelEncoder, PermissionGrant::admin(7));

        let api = &b.services["api"];
        assert_eq!(api.labels["owner"], "team-a");
        assert_eq!(api.labels["crane.reserved.permissions.7"], "7:admin");

        let web = &b.services["web"];
        assert_eq!(web.labels.len(), 1);
        assert_eq!(web.labels["crane.reserved.permissions.7"], "7:admin");
    }

    #[test]
    fn test_inject_drops_foreign_grants() {
        let mut b = bundle();
        b.services.get_mut("api").unwrap().labels.insert(
            "crane.reserved.permissions.1".to_string(),
            "1:admin".to_string(),
        );

        inject_permission_labels(&mut b, &ReservedLabelEncoder, PermissionGrant::admin(3));

        let api = &b.services["api"];
        assert!(!api.labels.contains_key("crane.reserved.permissions.1"));
        assert!(!api.labels.contains_key("crane.reserved.permissions.7"));
        assert_eq!(api.labels["crane.reserved.permissions.3"], "3:admin");
        assert_eq!(api.labels["owner"], "team-a");
        assert_eq!(
            group_id_from_labels(&ReservedLabelEncoder, &api.labels),
            Some(3)
        );
    }

    #[test]
    fn test_group_id_from_labels() {
        let mut b = bundle();
        assert_eq!(
            group_id_from_labels(&ReservedLabelEncoder, &b.services["api"].labels),
            None
        );

        inject_permission_labels(&mut b, &ReservedLabelEncoder, PermissionGrant::admin(7));
        assert_eq!(
            group_id_from_labels(&ReservedLabelEncoder, &b.services["api"].labels),
            Some(7)
        );
    }

    #[test]
    fn test_level_round_trip() {
        for level in [
            PermissionLevel::ReadOnly,
            PermissionLevel::ReadWrite,
            PermissionLevel::Admin,
        ] {
            assert_eq!(level.as_str().parse::<PermissionLevel>().unwrap(), level);
        }
        assert!("owner".parse::<PermissionLevel>().is_err());
    }
}
