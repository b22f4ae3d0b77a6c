//! Stack orchestrator
//!
//! Drives a swarm manager towards the state described by a stack bundle.
//! Calls are made one service at a time. Nothing is cached between
//! operations: each one re-reads the cluster, and concurrent writers are
//! detected through service versions rather than locks.

use super::bundle::{full_name, namespace_of, short_name, StackBundle, LABEL_NAMESPACE};
use super::labels::{
    group_id_from_labels, inject_permission_labels, PermissionEncoder, PermissionGrant,
    ReservedLabelEncoder,
};
use crate::cluster::{group_by_label, tasks_per_service, ClusterClient, RegistryAuth, ServiceFilter, TaskFilter};
use crate::context::RequestContext;
use crate::error::{CraneError, ErrorKind, RemoveFailure, Result};
use crate::swarm::service::{Service, ServiceSpec};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-request deploy options
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Group granted access to the stack's services
    pub grant: Option<PermissionGrant>,
    /// Credentials for pulling private images
    pub registry_auth: Option<RegistryAuth>,
}

/// Outcome of a successful deploy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeployReport {
    pub namespace: String,
    /// Full names of services that were created
    pub created: Vec<String>,
    /// Full names of services that were updated
    pub updated: Vec<String>,
}

/// Outcome of a successful remove
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoveReport {
    pub namespace: String,
    pub removed: Vec<String>,
}

/// One line of the stack listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StackSummary {
    pub namespace: String,
    pub service_count: usize,
    pub task_count: usize,
    pub running_task_count: usize,
    pub group_id: Option<u64>,
}

/// A member service and its tasks
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceStatus {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub short_name: String,
    pub namespace: String,
    pub image: Option<String>,
    /// Desired replicas, `None` for global services
    pub replicas: Option<u64>,
    pub task_count: usize,
    pub running_tasks: usize,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Stack operations against one cluster
pub struct StackOrchestrator<C: ClusterClient> {
    client: Arc<C>,
    encoder: Arc<dyn PermissionEncoder>,
    account_mode: bool,
}

impl<C: ClusterClient> StackOrchestrator<C> {
    /// Orchestrator with the default label encoder and account mode off
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            encoder: Arc::new(ReservedLabelEncoder),
            account_mode: false,
        }
    }

    /// Require a permission grant on every deploy
    pub fn with_account_mode(mut self, enabled: bool) -> Self {
        self.account_mode = enabled;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn account_mode(&self) -> bool {
        self.account_mode
    }

    /// Create or update every service of a bundle
    ///
    /// The whole bundle is validated before anything is sent. Services are
    /// then handled in short-name order; the first failure stops the deploy
    /// and is returned as is. Services already created stay in place, and
    /// deploying again updates them instead of creating them twice.
    pub async fn deploy(
        &self,
        ctx: &RequestContext,
        bundle: &StackBundle,
        options: &DeployOptions,
    ) -> Result<DeployReport> {
        bundle.validate()?;

        let mut bundle = bundle.clone();
        match options.grant {
            Some(grant) if self.account_mode => {
                inject_permission_labels(&mut bundle, self.encoder.as_ref(), grant)
            }
            None if self.account_mode => {
                return Err(CraneError::PermissionDenied(
                    "a group is required to deploy a stack in account mode".to_string(),
                ))
            }
            _ => {}
        }

        let namespace = bundle.namespace.clone();
        let existing = self.services_by_short_name(ctx, &namespace).await?;
        let auth = options.registry_auth.as_ref();

        tracing::info!(
            "Deploying stack {} ({} services, {} existing)",
            namespace,
            bundle.services.len(),
            existing.len()
        );

        let mut report = DeployReport {
            namespace: namespace.clone(),
            ..Default::default()
        };

        for (short, mut spec) in bundle.stamped() {
            spec.normalize_durations().map_err(|e| {
                CraneError::invalid(ErrorKind::InvalidSpec, format!("Services.{}", short), e.to_string())
            })?;

            let result = match existing.get(&short) {
                Some(current) => {
                    tracing::debug!(service = %spec.name, version = current.version.index, "Updating service");
                    ctx.run(self.client.update_service(&current.id, current.version, &spec, auth))
                        .await
                        .map(|_| report.updated.push(spec.name.clone()))
                }
                None => {
                    tracing::debug!(service = %spec.name, "Creating service");
                    ctx.run(self.client.create_service(&spec, auth))
                        .await
                        .map(|_| report.created.push(spec.name.clone()))
                }
            };

            if let Err(e) = result {
                tracing::warn!(
                    "Deploy of stack {} stopped at {}: {} (created {:?}, updated {:?})",
                    namespace,
                    spec.name,
                    e,
                    report.created,
                    report.updated
                );
                return Err(e);
            }
        }

        tracing::info!(
            "Stack {} deployed: {} created, {} updated",
            namespace,
            report.created.len(),
            report.updated.len()
        );
        Ok(report)
    }

    /// Rebuild a bundle from the services carrying the namespace label
    ///
    /// Durations come back in nanoseconds, since deploy normalizes them
    /// before submission. A bundle written with `"10s"` style durations
    /// equals the inspected one once normalized.
    pub async fn inspect(&self, ctx: &RequestContext, namespace: &str) -> Result<StackBundle> {
        let services = self.stack_services(ctx, namespace).await?;

        let mut bundle = StackBundle::new(namespace);
        for service in services {
            let short = short_name(namespace, &service.spec.name).to_string();
            bundle.services.insert(short, unstamp(service.spec, namespace));
        }
        Ok(bundle)
    }

    /// Summaries of every stack on the cluster, sorted by namespace
    pub async fn list(&self, ctx: &RequestContext) -> Result<Vec<StackSummary>> {
        let filter = ServiceFilter::new().label(LABEL_NAMESPACE, None);
        let services = ctx.run(self.client.list_services(&filter)).await?;
        let tasks = ctx.run(self.client.list_tasks(&TaskFilter::new())).await?;
        let counts = tasks_per_service(&tasks);

        let summaries = group_by_label(&services, LABEL_NAMESPACE)
            .into_iter()
            .map(|(namespace, members)| {
                let (task_count, running_task_count) = members
                    .iter()
                    .filter_map(|s| counts.get(&s.id))
                    .fold((0, 0), |acc, c| (acc.0 + c.0, acc.1 + c.1));
                let group_id = members
                    .iter()
                    .find_map(|s| group_id_from_labels(self.encoder.as_ref(), &s.spec.labels));

                StackSummary {
                    namespace,
                    service_count: members.len(),
                    task_count,
                    running_task_count,
                    group_id,
                }
            })
            .collect();

        Ok(summaries)
    }

    /// Member services of a stack with their task counts
    pub async fn list_stack_services(
        &self,
        ctx: &RequestContext,
        namespace: &str,
    ) -> Result<Vec<ServiceStatus>> {
        let services = self.stack_services(ctx, namespace).await?;

        let mut filter = TaskFilter::new();
        for service in &services {
            filter = filter.service(&service.id);
        }
        let tasks = ctx.run(self.client.list_tasks(&filter)).await?;
        let counts = tasks_per_service(&tasks);

        Ok(services
            .into_iter()
            .map(|s| {
                let (task_count, running_tasks) = counts.get(&s.id).copied().unwrap_or_default();
                ServiceStatus {
                    short_name: short_name(namespace, &s.spec.name).to_string(),
                    namespace: namespace.to_string(),
                    image: s.spec.image().map(|i| i.to_string()),
                    replicas: s.spec.replicas(),
                    task_count,
                    running_tasks,
                    created_at: s.created_at,
                    updated_at: s.updated_at,
                    name: s.spec.name,
                    id: s.id,
                }
            })
            .collect())
    }

    /// Remove every service of a stack
    ///
    /// Failures do not stop the removal of the remaining services; they
    /// are collected into a single `PartialRemoveFailure`. Cancellation
    /// and timeouts stop the loop.
    pub async fn remove(&self, ctx: &RequestContext, namespace: &str) -> Result<RemoveReport> {
        let services = self.stack_services(ctx, namespace).await?;

        let mut removed = Vec::new();
        let mut failures = Vec::new();
        for service in services {
            match ctx.run(self.client.remove_service(&service.id)).await {
                Ok(()) => removed.push(service.spec.name),
                Err(e) if matches!(e.kind(), ErrorKind::Cancelled | ErrorKind::Timeout) => {
                    tracing::warn!(
                        "Removal of stack {} interrupted after {:?}: {}",
                        namespace,
                        removed,
                        e
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!("Failed to remove service {}: {}", service.spec.name, e);
                    failures.push(RemoveFailure {
                        service: service.spec.name,
                        reason: e.message(),
                    });
                }
            }
        }

        if !failures.is_empty() {
            return Err(CraneError::PartialRemoveFailure {
                namespace: namespace.to_string(),
                removed,
                failures,
            });
        }

        tracing::info!("Stack {} removed ({} services)", namespace, removed.len());
        Ok(RemoveReport {
            namespace: namespace.to_string(),
            removed,
        })
    }

    /// Change the replica count of one member service
    ///
    /// `service` may be the service ID, its full name or its short name.
    pub async fn scale_service(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        service: &str,
        replicas: u64,
    ) -> Result<()> {
        let members = self.stack_services(ctx, namespace).await?;
        let full = full_name(namespace, service);
        let target = members
            .iter()
            .find(|s| s.id == service || s.spec.name == service || s.spec.name == full)
            .ok_or_else(|| CraneError::ServiceNotFound(format!("{} in stack {}", service, namespace)))?;

        let current = ctx.run(self.client.inspect_service(&target.id)).await?;
        if namespace_of(&current.spec) != Some(namespace) {
            return Err(CraneError::ServiceNotFound(format!(
                "{} in stack {}",
                service, namespace
            )));
        }

        let mut spec = current.spec.clone();
        if !spec.set_replicas(replicas) {
            return Err(CraneError::invalid(
                ErrorKind::InvalidSpec,
                "Mode",
                "cannot scale a global service",
            ));
        }

        ctx.run(self.client.update_service(&current.id, current.version, &spec, None))
            .await?;

        tracing::info!(
            "Scaled {} to {} replicas (version {})",
            spec.name,
            replicas,
            current.version.index
        );
        Ok(())
    }

    /// Group that owns a stack, if it carries permission labels
    pub async fn group_of(&self, ctx: &RequestContext, namespace: &str) -> Result<Option<u64>> {
        let services = self.stack_services(ctx, namespace).await?;
        Ok(services
            .iter()
            .find_map(|s| group_id_from_labels(self.encoder.as_ref(), &s.spec.labels)))
    }

    /// Services labelled with the namespace; empty is `StackNotFound`
    async fn stack_services(&self, ctx: &RequestContext, namespace: &str) -> Result<Vec<Service>> {
        let filter = ServiceFilter::new().label(LABEL_NAMESPACE, Some(namespace));
        let mut services = ctx.run(self.client.list_services(&filter)).await?;
        services.retain(|s| namespace_of(&s.spec) == Some(namespace));

        if services.is_empty() {
            return Err(CraneError::StackNotFound(namespace.to_string()));
        }
        services.sort_by(|a, b| a.spec.name.cmp(&b.spec.name));
        Ok(services)
    }

    /// Existing members keyed by short name; an absent stack is empty
    async fn services_by_short_name(
        &self,
        ctx: &RequestContext,
        namespace: &str,
    ) -> Result<HashMap<String, Service>> {
        let filter = ServiceFilter::new().label(LABEL_NAMESPACE, Some(namespace));
        let services = ctx.run(self.client.list_services(&filter)).await?;

        Ok(services
            .into_iter()
            .filter(|s| namespace_of(&s.spec) == Some(namespace))
            .filter(|s| s.spec.name.starts_with(&format!("{}_", namespace)))
            .map(|s| (short_name(namespace, &s.spec.name).to_string(), s))
            .collect())
    }
}

/// Undo the stamping done at deploy time
fn unstamp(mut spec: ServiceSpec, namespace: &str) -> ServiceSpec {
    spec.labels.remove(LABEL_NAMESPACE);
    if let Some(container) = spec.task_template.container_spec.as_mut() {
        container.labels.remove(LABEL_NAMESPACE);
    }
    if short_name(namespace, &spec.name) != spec.name {
        spec.name.clear();
    }
    spec
}
