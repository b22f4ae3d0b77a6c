//! In-process swarm
//!
//! Keeps nodes, services and tasks in memory and behaves like a manager
//! for the calls Crane makes: versions are checked on update, names are
//! unique, and tasks are placed on nodes that satisfy the placement
//! constraints. Failures can be injected per operation and service.

use super::{ClusterClient, RegistryAuth, ServiceFilter, TaskFilter};
use crate::error::{classify_manager_response, CraneError, Result};
use crate::swarm::constraint;
use crate::swarm::service::{Service, ServiceSpec, ServiceVersion};
use crate::swarm::task::{Task, TaskState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Node role in the swarm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Worker node
    #[default]
    Worker,
    /// Manager node
    Manager,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Worker => write!(f, "worker"),
            NodeRole::Manager => write!(f, "manager"),
        }
    }
}

/// Swarm node as seen by the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterNode {
    /// Node ID
    pub id: String,
    /// Node hostname
    pub hostname: String,
    /// Node role
    pub role: NodeRole,
    /// Node labels
    pub labels: HashMap<String, String>,
    /// Engine labels
    pub engine_labels: HashMap<String, String>,
}

impl ClusterNode {
    /// Create a node with a generated ID
    pub fn new(hostname: &str, role: NodeRole) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            hostname: hostname.to_string(),
            role,
            labels: HashMap::new(),
            engine_labels: HashMap::new(),
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Attributes addressable from placement constraints
    pub fn attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();
        attrs.insert("node.id".to_string(), self.id.clone());
        attrs.insert("node.hostname".to_string(), self.hostname.clone());
        attrs.insert("node.role".to_string(), self.role.to_string());
        for (k, v) in &self.labels {
            attrs.insert(format!("node.labels.{}", k), v.clone());
        }
        for (k, v) in &self.engine_labels {
            attrs.insert(format!("engine.labels.{}", k), v.clone());
        }
        attrs
    }
}

/// Operation a failure can be injected into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Remove,
    Inspect,
}

/// Failure returned instead of performing an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedFailure {
    /// Manager cannot be reached
    Unavailable,
    /// Manager answers with a status and message
    Response { status: u16, message: String },
}

#[derive(Default)]
struct State {
    nodes: HashMap<String, ClusterNode>,
    services: HashMap<String, Service>,
    tasks: HashMap<String, Task>,
    failures: HashMap<(Operation, String), InjectedFailure>,
    down: bool,
}

/// In-memory swarm manager
#[derive(Clone, Default)]
pub struct MemoryCluster {
    state: Arc<RwLock<State>>,
}

impl MemoryCluster {
    /// Empty cluster with no nodes
    pub fn new() -> Self {
        Self::default()
    }

    /// Cluster with one manager node
    pub fn single_node() -> Self {
        let cluster = Self::new();
        // A fresh lock cannot be poisoned
        let _ = cluster.add_node(ClusterNode::new("manager-1", NodeRole::Manager));
        cluster
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| CraneError::Lock("Failed to acquire read lock".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| CraneError::Lock("Failed to acquire write lock".to_string()))
    }

    /// Add a node to the cluster
    pub fn add_node(&self, node: ClusterNode) -> Result<()> {
        let mut state = self.write()?;
        state.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// List nodes
    pub fn nodes(&self) -> Result<Vec<ClusterNode>> {
        Ok(self.read()?.nodes.values().cloned().collect())
    }

    /// Make every call fail as if the manager were unreachable
    pub fn set_down(&self, down: bool) -> Result<()> {
        self.write()?.down = down;
        Ok(())
    }

    /// Fail the next `operation` addressed at `service` (full name or ID)
    pub fn inject_failure(
        &self,
        operation: Operation,
        service: &str,
        failure: InjectedFailure,
    ) -> Result<()> {
        self.write()?
            .failures
            .insert((operation, service.to_string()), failure);
        Ok(())
    }

    /// Bump a service's version as a concurrent writer would
    pub fn touch_service(&self, id_or_name: &str) -> Result<ServiceVersion> {
        let mut state = self.write()?;
        let id = find_service_id(&state, id_or_name)
            .ok_or_else(|| CraneError::ServiceNotFound(id_or_name.to_string()))?;
        let service = state
            .services
            .get_mut(&id)
            .ok_or_else(|| CraneError::ServiceNotFound(id_or_name.to_string()))?;
        let spec = service.spec.clone();
        service.update(spec);
        Ok(service.version)
    }

    /// Number of services currently stored
    pub fn service_count(&self) -> Result<usize> {
        Ok(self.read()?.services.len())
    }
}

fn find_service_id(state: &State, id_or_name: &str) -> Option<String> {
    if state.services.contains_key(id_or_name) {
        return Some(id_or_name.to_string());
    }
    state
        .services
        .values()
        .find(|s| s.spec.name == id_or_name)
        .map(|s| s.id.clone())
}

fn take_failure(state: &mut State, operation: Operation, keys: &[&str]) -> Result<()> {
    if state.down {
        return Err(CraneError::ClusterUnavailable(
            "Cannot connect to the Docker daemon".to_string(),
        ));
    }

    for key in keys {
        if let Some(failure) = state.failures.remove(&(operation, key.to_string())) {
            return Err(match failure {
                InjectedFailure::Unavailable => {
                    CraneError::ClusterUnavailable("connection refused".to_string())
                }
                InjectedFailure::Response { status, message } => {
                    let service = match operation {
                        Operation::Create => None,
                        _ => Some(*key),
                    };
                    classify_manager_response(status, &message, service)
                }
            });
        }
    }
    Ok(())
}

/// Replace the tasks of a service with a fresh set placed on eligible nodes
fn schedule(state: &mut State, service_id: &str) {
    for task in state.tasks.values_mut() {
        if task.service_id == service_id && !task.is_terminal() {
            task.shutdown();
        }
    }
    state.tasks.retain(|_, t| t.service_id != service_id || !t.is_terminal());

    let Some(service) = state.services.get(service_id) else {
        return;
    };

    let constraints = service
        .spec
        .task_template
        .placement
        .as_ref()
        .map(|p| constraint::parse_exprs(&p.constraints).unwrap_or_default())
        .unwrap_or_default();

    let mut eligible: Vec<&ClusterNode> = state
        .nodes
        .values()
        .filter(|n| constraint::all_match(&constraints, &n.attributes()))
        .collect();
    eligible.sort_by(|a, b| a.hostname.cmp(&b.hostname));

    let mut tasks = Vec::new();
    if service.spec.is_global() {
        for node in &eligible {
            let mut task = Task::new(service_id, None);
            task.assign(&node.id);
            task.set_running();
            tasks.push(task);
        }
    } else {
        let replicas = service.spec.replicas().unwrap_or(1);
        for slot in 1..=replicas {
            let mut task = Task::new(service_id, Some(slot));
            if eligible.is_empty() {
                task.set_pending("no suitable node");
            } else {
                let node = eligible[(slot as usize - 1) % eligible.len()];
                task.assign(&node.id);
                task.set_running();
            }
            tasks.push(task);
        }
    }

    debug!(service = %service.spec.name, tasks = tasks.len(), "Scheduled tasks");
    for task in tasks {
        state.tasks.insert(task.id.clone(), task);
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn ping(&self) -> Result<()> {
        let mut state = self.write()?;
        take_failure(&mut state, Operation::Inspect, &[])
    }

    async fn list_services(&self, filter: &ServiceFilter) -> Result<Vec<Service>> {
        let mut state = self.write()?;
        take_failure(&mut state, Operation::Inspect, &[])?;

        let mut services: Vec<Service> = state
            .services
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        services.sort_by(|a, b| a.spec.name.cmp(&b.spec.name));
        Ok(services)
    }

    async fn inspect_service(&self, id: &str) -> Result<Service> {
        let mut state = self.write()?;
        take_failure(&mut state, Operation::Inspect, &[id])?;

        find_service_id(&state, id)
            .and_then(|sid| state.services.get(&sid).cloned())
            .ok_or_else(|| classify_manager_response(404, &format!("service {} not found", id), Some(id)))
    }

    async fn create_service(
        &self,
        spec: &ServiceSpec,
        _registry_auth: Option<&RegistryAuth>,
    ) -> Result<String> {
        let mut state = self.write()?;
        take_failure(&mut state, Operation::Create, &[spec.name.as_str()])?;

        if state.services.values().any(|s| s.spec.name == spec.name) {
            return Err(classify_manager_response(
                409,
                &format!(
                    "rpc error: code = AlreadyExists desc = name conflicts with an existing object: service {} already exists",
                    spec.name
                ),
                None,
            ));
        }

        let service = Service::new(spec.clone());
        let id = service.id.clone();
        state.services.insert(id.clone(), service);
        schedule(&mut state, &id);

        info!(service = %spec.name, id = %id, "Service created");
        Ok(id)
    }

    async fn update_service(
        &self,
        id: &str,
        version: ServiceVersion,
        spec: &ServiceSpec,
        _registry_auth: Option<&RegistryAuth>,
    ) -> Result<()> {
        let mut state = self.write()?;
        let sid = find_service_id(&state, id)
            .ok_or_else(|| classify_manager_response(404, &format!("service {} not found", id), Some(id)))?;
        take_failure(&mut state, Operation::Update, &[sid.as_str(), spec.name.as_str()])?;

        let service = state
            .services
            .get_mut(&sid)
            .ok_or_else(|| CraneError::ServiceNotFound(id.to_string()))?;

        if service.version != version {
            return Err(classify_manager_response(
                500,
                "rpc error: code = Unknown desc = update out of sequence",
                Some(&service.spec.name),
            ));
        }

        service.update(spec.clone());
        let new_version = service.version.index;
        schedule(&mut state, &sid);

        info!(service = %spec.name, version = new_version, "Service updated");
        Ok(())
    }

    async fn remove_service(&self, id: &str) -> Result<()> {
        let mut state = self.write()?;
        let sid = find_service_id(&state, id)
            .ok_or_else(|| classify_manager_response(404, &format!("service {} not found", id), Some(id)))?;
        let name = state
            .services
            .get(&sid)
            .map(|s| s.spec.name.clone())
            .unwrap_or_default();
        take_failure(&mut state, Operation::Remove, &[sid.as_str(), name.as_str()])?;

        state.services.remove(&sid);
        state.tasks.retain(|_, t| t.service_id != sid);

        info!(service = %name, "Service removed");
        Ok(())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut state = self.write()?;
        take_failure(&mut state, Operation::Inspect, &[])?;

        Ok(state
            .tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }
}
