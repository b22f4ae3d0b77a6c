//! Swarm manager access
//!
//! [`ClusterClient`] is everything the stack layer needs from a manager.
//! [`DockerCluster`] speaks the Docker Engine API over HTTP;
//! [`MemoryCluster`] keeps a swarm in process for tests and dry runs.

pub mod docker;
pub mod memory;

pub use docker::DockerCluster;
pub use memory::{ClusterNode, MemoryCluster, NodeRole};

use crate::error::{CraneError, ErrorKind, Result};
use crate::swarm::service::{Service, ServiceSpec, ServiceVersion};
use crate::swarm::task::Task;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Operations on a swarm manager
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Check that the manager answers
    async fn ping(&self) -> Result<()>;

    /// List services matching a filter
    async fn list_services(&self, filter: &ServiceFilter) -> Result<Vec<Service>>;

    /// Inspect a service by ID or name
    async fn inspect_service(&self, id: &str) -> Result<Service>;

    /// Create a service, returning its ID
    async fn create_service(
        &self,
        spec: &ServiceSpec,
        registry_auth: Option<&RegistryAuth>,
    ) -> Result<String>;

    /// Replace a service spec; `version` must be the current version
    async fn update_service(
        &self,
        id: &str,
        version: ServiceVersion,
        spec: &ServiceSpec,
        registry_auth: Option<&RegistryAuth>,
    ) -> Result<()>;

    /// Remove a service
    async fn remove_service(&self, id: &str) -> Result<()>;

    /// List tasks matching a filter
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>>;
}

/// Service list filter
///
/// Labels are `key` or `key=value`; names match by prefix as the Engine does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceFilter {
    pub labels: Vec<String>,
    pub names: Vec<String>,
    pub ids: Vec<String>,
}

impl ServiceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a label, optionally with a value
    pub fn label(mut self, key: &str, value: Option<&str>) -> Self {
        self.labels.push(match value {
            Some(v) => format!("{}={}", key, v),
            None => key.to_string(),
        });
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.names.push(name.to_string());
        self
    }

    pub fn id(mut self, id: &str) -> Self {
        self.ids.push(id.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.names.is_empty() && self.ids.is_empty()
    }

    /// Engine API `filters` query value
    pub fn to_query(&self) -> String {
        let mut filters = FilterArgs::default();
        filters.add("label", &self.labels);
        filters.add("name", &self.names);
        filters.add("id", &self.ids);
        filters.encode()
    }

    /// Evaluate the filter locally
    pub fn matches(&self, service: &Service) -> bool {
        let labels = &service.spec.labels;
        let label_ok = self.labels.iter().all(|l| match l.split_once('=') {
            Some((k, v)) => labels.get(k).is_some_and(|actual| actual == v),
            None => labels.contains_key(l.as_str()),
        });
        let name_ok = self.names.is_empty()
            || self.names.iter().any(|n| service.spec.name.starts_with(n.as_str()));
        let id_ok = self.ids.is_empty() || self.ids.iter().any(|i| service.id.starts_with(i.as_str()));

        label_ok && name_ok && id_ok
    }
}

/// Task list filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub service_ids: Vec<String>,
}

impl TaskFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service(mut self, id: &str) -> Self {
        self.service_ids.push(id.to_string());
        self
    }

    /// Engine API `filters` query value
    pub fn to_query(&self) -> String {
        let mut filters = FilterArgs::default();
        filters.add("service", &self.service_ids);
        filters.encode()
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.service_ids.is_empty() || self.service_ids.iter().any(|s| s == &task.service_id)
    }
}

/// `{"field": {"value": true}}` form understood by every Engine API version
#[derive(Default)]
struct FilterArgs(BTreeMap<String, BTreeMap<String, bool>>);

impl FilterArgs {
    fn add<S: AsRef<str>>(&mut self, field: &str, values: &[S]) {
        if values.is_empty() {
            return;
        }
        let entry = self.0.entry(field.to_string()).or_default();
        for v in values {
            entry.insert(v.as_ref().to_string(), true);
        }
    }

    fn encode(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Registry credentials forwarded to the manager for image pulls
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryAuth {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, rename = "serveraddress")]
    pub server_address: String,
}

impl RegistryAuth {
    /// Value of the `X-Registry-Auth` header
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self).map_err(CraneError::Json)?;
        Ok(base64::engine::general_purpose::URL_SAFE.encode(json))
    }

    /// Parse an `X-Registry-Auth` header value
    pub fn decode(header: &str) -> Result<Self> {
        let invalid = |e: String| CraneError::invalid(ErrorKind::InvalidSpec, "X-Registry-Auth", e);
        let raw = base64::engine::general_purpose::URL_SAFE
            .decode(header.trim())
            .map_err(|e| invalid(e.to_string()))?;
        serde_json::from_slice(&raw).map_err(|e| invalid(e.to_string()))
    }
}

/// Services grouped by a label value
pub fn group_by_label<'a>(
    services: &'a [Service],
    label: &str,
) -> BTreeMap<String, Vec<&'a Service>> {
    let mut groups: BTreeMap<String, Vec<&Service>> = BTreeMap::new();
    for service in services {
        if let Some(value) = service.spec.labels.get(label) {
            groups.entry(value.clone()).or_default().push(service);
        }
    }
    groups
}

/// Count tasks per service ID
pub fn tasks_per_service(tasks: &[Task]) -> HashMap<String, (usize, usize)> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for task in tasks {
        let entry = counts.entry(task.service_id.clone()).or_default();
        entry.0 += 1;
        if task.is_running() {
            entry.1 += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(id: &str, name: &str, labels: &[(&str, &str)]) -> Service {
        let mut s = Service::new(ServiceSpec {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        });
        s.id = id.to_string();
        s
    }

    #[test]
    fn test_service_filter_query() {
        let filter = ServiceFilter::new()
            .label("com.docker.stack.namespace", Some("demo"))
            .name("demo_");
        let value: serde_json::Value = serde_json::from_str(&filter.to_query()).unwrap();
        assert_eq!(value["label"]["com.docker.stack.namespace=demo"], true);
        assert_eq!(value["name"]["demo_"], true);
        assert!(value.get("id").is_none());

        assert_eq!(ServiceFilter::new().to_query(), "{}");
    }

    #[test]
    fn test_service_filter_matches() {
        let s = service("abc123", "demo_web", &[("com.docker.stack.namespace", "demo")]);

        assert!(ServiceFilter::new().matches(&s));
        assert!(ServiceFilter::new()
            .label("com.docker.stack.namespace", None)
            .matches(&s));
        assert!(ServiceFilter::new()
            .label("com.docker.stack.namespace", Some("demo"))
            .matches(&s));
        assert!(!ServiceFilter::new()
            .label("com.docker.stack.namespace", Some("other"))
            .matches(&s));
        assert!(ServiceFilter::new().name("demo_").matches(&s));
        assert!(!ServiceFilter::new().name("web").matches(&s));
        assert!(ServiceFilter::new().id("abc").matches(&s));
    }

    #[test]
    fn test_task_filter_query() {
        let filter = TaskFilter::new().service("s1").service("s2");
        let value: serde_json::Value = serde_json::from_str(&filter.to_query()).unwrap();
        assert_eq!(value["service"]["s1"], true);
        assert_eq!(value["service"]["s2"], true);
    }

    #[test]
    fn test_registry_auth_encoding() {
        let auth = RegistryAuth {
            username: "Username".to_string(),
            password: "Password".to_string(),
            ..Default::default()
        };
        let encoded = auth.encode().unwrap();
        let decoded = base64::engine::general_purpose::URL_SAFE
            .decode(encoded)
            .unwrap();
        let back: RegistryAuth = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(back, auth);
    }

    #[test]
    fn test_group_by_label() {
        let services = vec![
            service("1", "a_web", &[("ns", "a")]),
            service("2", "a_db", &[("ns", "a")]),
            service("3", "b_web", &[("ns", "b")]),
            service("4", "loose", &[]),
        ];
        let groups = group_by_label(&services, "ns");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["a"].len(), 2);
        assert_eq!(groups["b"].len(), 1);
    }
}
