//! Swarm service model
//!
//! Field names follow the Docker Engine API so specs can be passed to the
//! manager as-is.

use super::duration::{DurationError, SpecDuration};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Swarm service as stored by the manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Service {
    /// Service ID
    #[serde(rename = "ID")]
    pub id: String,
    /// Service version
    #[serde(default)]
    pub version: ServiceVersion,
    /// Created timestamp
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Updated timestamp
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Service specification
    #[serde(default)]
    pub spec: ServiceSpec,
}

impl Service {
    /// Create a new service record at version 1
    pub fn new(spec: ServiceSpec) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4().simple().to_string(),
            version: ServiceVersion { index: 1 },
            created_at: Some(now),
            updated_at: Some(now),
            spec,
        }
    }

    /// Replace the service spec and bump the version
    pub fn update(&mut self, new_spec: ServiceSpec) {
        self.spec = new_spec;
        self.version.index += 1;
        self.updated_at = Some(Utc::now());
    }
}

/// Optimistic concurrency token
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceVersion {
    /// Index
    pub index: u64,
}

/// Service specification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceSpec {
    /// Service name
    #[serde(default)]
    pub name: String,
    /// Labels
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Task template
    #[serde(default)]
    pub task_template: TaskSpec,
    /// Service mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ServiceMode>,
    /// Update config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_config: Option<UpdateConfig>,
    /// Rollback config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_config: Option<UpdateConfig>,
    /// Networks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<NetworkAttachmentConfig>,
    /// Endpoint specification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_spec: Option<EndpointSpec>,
}

impl ServiceSpec {
    /// Container image, if a container spec is present
    pub fn image(&self) -> Option<&str> {
        self.task_template
            .container_spec
            .as_ref()
            .map(|c| c.image.as_str())
    }

    /// Replica count for replicated services
    ///
    /// A spec without a mode is replicated with one replica.
    pub fn replicas(&self) -> Option<u64> {
        match &self.mode {
            None => Some(1),
            Some(mode) if mode.global.is_some() => None,
            Some(mode) => Some(
                mode.replicated
                    .as_ref()
                    .and_then(|r| r.replicas)
                    .unwrap_or(1),
            ),
        }
    }

    /// Whether the service runs one task per node
    pub fn is_global(&self) -> bool {
        self.mode.as_ref().is_some_and(|m| m.global.is_some())
    }

    /// Set the replica count, returning false for global services
    pub fn set_replicas(&mut self, replicas: u64) -> bool {
        if self.is_global() {
            return false;
        }

        self.mode = Some(ServiceMode {
            replicated: Some(ReplicatedService {
                replicas: Some(replicas),
            }),
            global: None,
        });
        true
    }

    /// Rewrite every duration field to integer nanoseconds
    pub fn normalize_durations(&mut self) -> std::result::Result<(), DurationError> {
        fn normalize(d: &mut Option<SpecDuration>) -> std::result::Result<(), DurationError> {
            if let Some(value) = d.as_mut() {
                *value = value.normalized()?;
            }
            Ok(())
        }

        if let Some(rp) = self.task_template.restart_policy.as_mut() {
            normalize(&mut rp.delay)?;
            normalize(&mut rp.window)?;
        }
        if let Some(cs) = self.task_template.container_spec.as_mut() {
            normalize(&mut cs.stop_grace_period)?;
        }
        for uc in [self.update_config.as_mut(), self.rollback_config.as_mut()]
            .into_iter()
            .flatten()
        {
            normalize(&mut uc.delay)?;
            normalize(&mut uc.monitor)?;
        }
        Ok(())
    }
}

/// Task specification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskSpec {
    /// Container spec
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_spec: Option<ContainerSpec>,
    /// Resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// Restart policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicy>,
    /// Placement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
    /// Networks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<NetworkAttachmentConfig>,
    /// Log driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_driver: Option<LogDriver>,
    /// Force update counter
    #[serde(default)]
    pub force_update: u64,
}

/// Container specification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSpec {
    /// Image
    #[serde(default)]
    pub image: String,
    /// Labels
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Command
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Args
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Hostname
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Environment variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    /// Working directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    /// User
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Mounts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<Mount>,
    /// Stop grace period
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_grace_period: Option<SpecDuration>,
}

/// Mount configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Mount {
    /// Type (bind, volume, tmpfs)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    /// Source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Target
    #[serde(default)]
    pub target: String,
    /// Read only
    #[serde(default)]
    pub read_only: bool,
}

/// Resource requirements
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceRequirements {
    /// Limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<Resources>,
    /// Reservations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservations: Option<Resources>,
}

/// CPU and memory amounts; zero means unset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// CPU in units of 1e-9 CPUs
    #[serde(rename = "NanoCPUs", default)]
    pub nano_cpus: i64,
    /// Memory in bytes
    #[serde(rename = "MemoryBytes", default)]
    pub memory_bytes: i64,
}

/// Restart condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartCondition {
    None,
    OnFailure,
    Any,
}

/// Restart policy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RestartPolicy {
    /// Condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<RestartCondition>,
    /// Delay between restart attempts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<SpecDuration>,
    /// Max attempts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u64>,
    /// Window used to evaluate the restart policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<SpecDuration>,
}

/// Placement configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Placement {
    /// Constraints
    #[serde(default)]
    pub constraints: Vec<String>,
}

/// Log driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogDriver {
    /// Name
    pub name: String,
    /// Options
    #[serde(default)]
    pub options: HashMap<String, String>,
}

/// Service mode, exactly one of the two is set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceMode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicated: Option<ReplicatedService>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<GlobalService>,
}

impl ServiceMode {
    /// Replicated mode with the given count
    pub fn replicated(replicas: u64) -> Self {
        Self {
            replicated: Some(ReplicatedService {
                replicas: Some(replicas),
            }),
            global: None,
        }
    }

    /// Global mode
    pub fn global() -> Self {
        Self {
            replicated: None,
            global: Some(GlobalService {}),
        }
    }
}

/// Replicated service options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReplicatedService {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u64>,
}

/// Global service options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalService {}

/// Update configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateConfig {
    /// Parallelism
    #[serde(default)]
    pub parallelism: u64,
    /// Delay between updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<SpecDuration>,
    /// Failure action (pause, continue, rollback)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_action: Option<String>,
    /// Monitor period
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<SpecDuration>,
    /// Max failure ratio
    #[serde(default)]
    pub max_failure_ratio: f64,
}

/// Network attachment configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkAttachmentConfig {
    /// Target
    pub target: String,
    /// Aliases
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

/// Endpoint resolution mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionMode {
    /// Virtual IP
    #[default]
    Vip,
    /// DNS round-robin
    Dnsrr,
}

/// Endpoint specification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointSpec {
    /// Mode (vip, dnsrr)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ResolutionMode>,
    /// Ports
    #[serde(default)]
    pub ports: Vec<PortConfig>,
}

/// Port configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortConfig {
    /// Name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Protocol (tcp, udp, sctp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Target port
    #[serde(default)]
    pub target_port: u32,
    /// Published port, zero lets the manager pick one
    #[serde(default)]
    pub published_port: u32,
    /// Publish mode (ingress, host)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_mode: Option<String>,
}

impl PortConfig {
    /// Protocol with the engine default applied
    pub fn protocol(&self) -> &str {
        self.protocol.as_deref().unwrap_or("tcp")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn web_spec() -> ServiceSpec {
        ServiceSpec {
            name: "web".to_string(),
            task_template: TaskSpec {
                container_spec: Some(ContainerSpec {
                    image: "nginx:latest".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_create_service() {
        let service = Service::new(web_spec());
        assert_eq!(service.spec.name, "web");
        assert_eq!(service.version.index, 1);
        assert_eq!(service.spec.replicas(), Some(1));
    }

    #[test]
    fn test_update_bumps_version() {
        let mut service = Service::new(web_spec());
        let mut spec = web_spec();
        spec.task_template.container_spec.as_mut().unwrap().image = "nginx:1.25".to_string();

        service.update(spec);
        assert_eq!(service.version.index, 2);
        assert_eq!(service.spec.image(), Some("nginx:1.25"));
    }

    #[test]
    fn test_scale_replicated_and_global() {
        let mut spec = web_spec();
        assert!(spec.set_replicas(5));
        assert_eq!(spec.replicas(), Some(5));

        spec.mode = Some(ServiceMode::global());
        assert!(!spec.set_replicas(3));
        assert_eq!(spec.replicas(), None);
    }

    #[test]
    fn test_engine_wire_shape() {
        let json = r#"{
            "Name": "api",
            "Labels": {"tier": "backend"},
            "TaskTemplate": {
                "ContainerSpec": {"Image": "example/api:1.0"},
                "Resources": {"Limits": {"NanoCPUs": 500000000, "MemoryBytes": 67108864}},
                "RestartPolicy": {"Condition": "on-failure", "Delay": "5s"}
            },
            "Mode": {"Replicated": {"Replicas": 3}},
            "EndpointSpec": {"Mode": "vip", "Ports": [{"Protocol": "tcp", "TargetPort": 80, "PublishedPort": 8080}]}
        }"#;

        let spec: ServiceSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.replicas(), Some(3));
        let limits = spec.task_template.resources.as_ref().unwrap().limits.unwrap();
        assert_eq!(limits.nano_cpus, 500_000_000);
        let rp = spec.task_template.restart_policy.as_ref().unwrap();
        assert_eq!(rp.condition, Some(RestartCondition::OnFailure));

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["TaskTemplate"]["Resources"]["Limits"]["NanoCPUs"], 500000000);
        assert_eq!(value["Mode"]["Replicated"]["Replicas"], 3);
    }

    #[test]
    fn test_normalize_durations() {
        let mut spec = web_spec();
        spec.task_template.restart_policy = Some(RestartPolicy {
            delay: Some(SpecDuration::Text("2s".to_string())),
            ..Default::default()
        });
        spec.update_config = Some(UpdateConfig {
            delay: Some(SpecDuration::Text("1m".to_string())),
            ..Default::default()
        });

        spec.normalize_durations().unwrap();
        assert_eq!(
            spec.task_template.restart_policy.unwrap().delay,
            Some(SpecDuration::Nanos(2_000_000_000))
        );
        assert_eq!(
            spec.update_config.unwrap().delay,
            Some(SpecDuration::Nanos(60_000_000_000))
        );
    }
}
