//! Service spec validation
//!
//! Checks run in a fixed order and the first failing check is returned:
//! name, resources, restart policy, placement, update config, endpoint,
//! image. Validation is pure and never touches the cluster.

use super::constraint;
use super::duration::SpecDuration;
use super::reference::Reference;
use super::service::{
    EndpointSpec, PortConfig, ResolutionMode, ResourceRequirements, Resources, RestartPolicy,
    ServiceSpec, TaskSpec, UpdateConfig,
};
use crate::error::{CraneError, ErrorKind, Result};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9](?:[-_]*[A-Za-z0-9]+)*$").unwrap());

/// Smallest accepted CPU value, in nano CPUs
pub const MIN_NANO_CPUS: i64 = 1_000_000;

/// Smallest accepted memory value, in bytes
pub const MIN_MEMORY_BYTES: i64 = 4 * 1024 * 1024;

/// Validate a service spec, returning the first failure
pub fn validate_service_spec(spec: Option<&ServiceSpec>) -> Result<()> {
    let Some(spec) = spec else {
        return Err(CraneError::invalid(
            ErrorKind::InvalidSpec,
            "Spec",
            "service spec must not be null",
        ));
    };

    validate_name("Name", &spec.name)?;
    validate_task(&spec.task_template)?;
    validate_update(spec.update_config.as_ref())?;
    validate_endpoint(spec.endpoint_spec.as_ref())?;
    validate_image(&spec.task_template)?;
    Ok(())
}

/// Check a service or stack name against the naming rules
pub fn validate_name(field: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CraneError::invalid(
            ErrorKind::InvalidName,
            field,
            "name must be provided",
        ));
    }
    if !NAME_RE.is_match(name) {
        return Err(CraneError::invalid(
            ErrorKind::InvalidName,
            field,
            format!(
                "invalid name {:?}, only [a-zA-Z0-9][a-zA-Z0-9-_]*[a-zA-Z0-9] is allowed",
                name
            ),
        ));
    }
    Ok(())
}

fn validate_task(task: &TaskSpec) -> Result<()> {
    validate_resource_requirements(task.resources.as_ref())?;
    validate_restart_policy(task.restart_policy.as_ref())?;
    validate_placement(task)?;
    Ok(())
}

fn validate_resource_requirements(r: Option<&ResourceRequirements>) -> Result<()> {
    let Some(r) = r else {
        return Ok(());
    };

    if let Some(limits) = &r.limits {
        validate_resources("TaskTemplate.Resources.Limits", limits)?;
    }
    if let Some(reservations) = &r.reservations {
        validate_resources("TaskTemplate.Resources.Reservations", reservations)?;
    }
    Ok(())
}

fn validate_resources(path: &str, r: &Resources) -> Result<()> {
    if r.nano_cpus != 0 && r.nano_cpus < MIN_NANO_CPUS {
        return Err(CraneError::invalid(
            ErrorKind::InvalidCpu,
            format!("{}.NanoCPUs", path),
            format!(
                "invalid cpu value {}: Must be at least {}",
                format_cpus(r.nano_cpus),
                format_cpus(MIN_NANO_CPUS)
            ),
        ));
    }

    if r.memory_bytes != 0 && r.memory_bytes < MIN_MEMORY_BYTES {
        return Err(CraneError::invalid(
            ErrorKind::InvalidMemory,
            format!("{}.MemoryBytes", path),
            format!(
                "invalid memory value {}: Must be at least 4MiB",
                r.memory_bytes
            ),
        ));
    }
    Ok(())
}

/// CPU count in the manager's `%g` style: `0.0005`, `1e-09`
fn format_cpus(nano_cpus: i64) -> String {
    let cpus = nano_cpus as f64 / 1e9;
    let sci = format!("{:e}", cpus);
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return cpus.to_string();
    };
    let exp: i32 = exp.parse().unwrap_or(0);
    if cpus == 0.0 || (-4..21).contains(&exp) {
        return cpus.to_string();
    }
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{}e{}{:02}", mantissa, sign, exp.abs())
}

fn validate_restart_policy(rp: Option<&RestartPolicy>) -> Result<()> {
    let Some(rp) = rp else {
        return Ok(());
    };

    check_duration(
        rp.delay.as_ref(),
        ErrorKind::InvalidRestartDelay,
        "TaskTemplate.RestartPolicy.Delay",
        "restart-delay cannot be negative",
    )?;
    check_duration(
        rp.window.as_ref(),
        ErrorKind::InvalidRestartWindow,
        "TaskTemplate.RestartPolicy.Window",
        "restart-window cannot be negative",
    )
}

fn validate_placement(task: &TaskSpec) -> Result<()> {
    let Some(placement) = &task.placement else {
        return Ok(());
    };
    if placement.constraints.is_empty() {
        return Ok(());
    }

    constraint::parse_exprs(&placement.constraints)
        .map(|_| ())
        .map_err(|e| {
            CraneError::invalid(
                ErrorKind::InvalidPlacement,
                "TaskTemplate.Placement.Constraints",
                e.to_string(),
            )
        })
}

fn validate_update(uc: Option<&UpdateConfig>) -> Result<()> {
    let Some(uc) = uc else {
        return Ok(());
    };

    check_duration(
        uc.delay.as_ref(),
        ErrorKind::InvalidUpdateDelay,
        "UpdateConfig.Delay",
        "update-delay cannot be negative",
    )
}

fn validate_endpoint(ep: Option<&EndpointSpec>) -> Result<()> {
    let Some(ep) = ep else {
        return Ok(());
    };

    if !ep.ports.is_empty() && ep.mode == Some(ResolutionMode::Dnsrr) {
        return Err(CraneError::invalid(
            ErrorKind::InvalidEndpoint,
            "EndpointSpec.Ports",
            "ports can't be used with dnsrr mode",
        ));
    }

    let mut seen: HashSet<&PortConfig> = HashSet::new();
    let mut published: HashSet<(&str, u32)> = HashSet::new();
    for port in &ep.ports {
        let duplicate_tuple = !seen.insert(port);
        let duplicate_published =
            port.published_port != 0 && !published.insert((port.protocol(), port.published_port));

        if duplicate_tuple || duplicate_published {
            return Err(CraneError::invalid(
                ErrorKind::InvalidEndpoint,
                "EndpointSpec.Ports",
                format!(
                    "duplicate ports provided: {}/{}",
                    port.published_port,
                    port.protocol()
                ),
            ));
        }
    }
    Ok(())
}

fn validate_image(task: &TaskSpec) -> Result<()> {
    let field = "TaskTemplate.ContainerSpec.Image";
    let image = task
        .container_spec
        .as_ref()
        .map(|c| c.image.as_str())
        .unwrap_or_default();

    if image.is_empty() {
        return Err(CraneError::invalid(
            ErrorKind::InvalidImageName,
            field,
            "image reference must be provided",
        ));
    }

    Reference::parse(image)
        .map(|_| ())
        .map_err(|e| CraneError::invalid(ErrorKind::InvalidImageName, field, e.to_string()))
}

fn check_duration(
    value: Option<&SpecDuration>,
    kind: ErrorKind,
    field: &str,
    negative_message: &str,
) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };

    match value.is_negative() {
        Ok(false) => Ok(()),
        Ok(true) => Err(CraneError::invalid(kind, field, negative_message)),
        Err(e) => Err(CraneError::invalid(kind, field, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::service::{ContainerSpec, Placement};

    fn spec(name: &str) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            task_template: TaskSpec {
                container_spec: Some(ContainerSpec {
                    image: "nginx:1.25".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn with_reservation(nano_cpus: i64, memory_bytes: i64) -> ServiceSpec {
        let mut s = spec("web");
        s.task_template.resources = Some(ResourceRequirements {
            limits: None,
            reservations: Some(Resources {
                nano_cpus,
                memory_bytes,
            }),
        });
        s
    }

    fn kind_of(s: &ServiceSpec) -> Option<ErrorKind> {
        validate_service_spec(Some(s)).err().map(|e| e.kind())
    }

    fn with_ports(mode: Option<ResolutionMode>, ports: Vec<PortConfig>) -> ServiceSpec {
        let mut s = spec("web");
        s.endpoint_spec = Some(EndpointSpec { mode, ports });
        s
    }

    fn port(protocol: &str, target: u32, published: u32) -> PortConfig {
        PortConfig {
            protocol: Some(protocol.to_string()),
            target_port: target,
            published_port: published,
            ..Default::default()
        }
    }

    #[test]
    fn test_null_spec() {
        let err = validate_service_spec(None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSpec);
    }

    #[test]
    fn test_names() {
        assert!(validate_service_spec(Some(&spec("abc-123"))).is_ok());
        assert!(validate_service_spec(Some(&spec("a_b__c"))).is_ok());
        assert_eq!(kind_of(&spec("-abc")), Some(ErrorKind::InvalidName));
        assert_eq!(kind_of(&spec("abc-")), Some(ErrorKind::InvalidName));
        assert_eq!(kind_of(&spec("a.b")), Some(ErrorKind::InvalidName));

        let err = validate_service_spec(Some(&spec(""))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidName);
        assert_eq!(err.field(), Some("Name"));
        assert_eq!(err.message(), "name must be provided");
    }

    #[test]
    fn test_cpu_bounds() {
        for cpu in [1, 500_000, 999_999] {
            assert_eq!(kind_of(&with_reservation(cpu, 0)), Some(ErrorKind::InvalidCpu));
        }
        for cpu in [0, 1_000_000, 2_000_000_000] {
            assert_eq!(kind_of(&with_reservation(cpu, 0)), None);
        }

        let err = validate_service_spec(Some(&with_reservation(500_000, 0))).unwrap_err();
        assert_eq!(err.message(), "invalid cpu value 0.0005: Must be at least 0.001");
        assert_eq!(err.field(), Some("TaskTemplate.Resources.Reservations.NanoCPUs"));

        let err = validate_service_spec(Some(&with_reservation(1, 0))).unwrap_err();
        assert_eq!(err.message(), "invalid cpu value 1e-09: Must be at least 0.001");
    }

    #[test]
    fn test_cpu_message_format() {
        assert_eq!(format_cpus(999_999), "0.000999999");
        assert_eq!(format_cpus(100_000), "0.0001");
        assert_eq!(format_cpus(50_000), "5e-05");
        assert_eq!(format_cpus(12_345), "1.2345e-05");
        assert_eq!(format_cpus(2_000_000_000), "2");
    }

    #[test]
    fn test_memory_bounds() {
        for mem in [1, 1024, MIN_MEMORY_BYTES - 1] {
            assert_eq!(kind_of(&with_reservation(0, mem)), Some(ErrorKind::InvalidMemory));
        }
        for mem in [0, MIN_MEMORY_BYTES, 1 << 30] {
            assert_eq!(kind_of(&with_reservation(0, mem)), None);
        }
    }

    #[test]
    fn test_limits_checked_before_reservations() {
        let mut s = spec("web");
        s.task_template.resources = Some(ResourceRequirements {
            limits: Some(Resources {
                nano_cpus: 0,
                memory_bytes: 10,
            }),
            reservations: Some(Resources {
                nano_cpus: 10,
                memory_bytes: 0,
            }),
        });
        assert_eq!(kind_of(&s), Some(ErrorKind::InvalidMemory));
    }

    #[test]
    fn test_restart_policy_durations() {
        let mut s = spec("web");
        s.task_template.restart_policy = Some(RestartPolicy {
            delay: Some(SpecDuration::Nanos(-1)),
            ..Default::default()
        });
        assert_eq!(kind_of(&s), Some(ErrorKind::InvalidRestartDelay));

        s.task_template.restart_policy = Some(RestartPolicy {
            delay: Some(SpecDuration::Text("5s".to_string())),
            window: Some(SpecDuration::Text("forever".to_string())),
            ..Default::default()
        });
        assert_eq!(kind_of(&s), Some(ErrorKind::InvalidRestartWindow));

        s.task_template.restart_policy = Some(RestartPolicy {
            delay: Some(SpecDuration::Text("5s".to_string())),
            window: Some(SpecDuration::Text("2m".to_string())),
            ..Default::default()
        });
        assert_eq!(kind_of(&s), None);
    }

    #[test]
    fn test_placement() {
        let mut s = spec("web");
        s.task_template.placement = Some(Placement {
            constraints: Vec::new(),
        });
        assert_eq!(kind_of(&s), None);

        s.task_template.placement = Some(Placement {
            constraints: vec!["node.role==manager".to_string()],
        });
        assert_eq!(kind_of(&s), None);

        s.task_template.placement = Some(Placement {
            constraints: vec!["node.role=manager".to_string()],
        });
        let err = validate_service_spec(Some(&s)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPlacement);
        assert_eq!(err.message(), "invalid constraint: node.role=manager");
    }

    #[test]
    fn test_update_delay() {
        let mut s = spec("web");
        s.update_config = Some(UpdateConfig {
            delay: Some(SpecDuration::Text("-10s".to_string())),
            ..Default::default()
        });
        assert_eq!(kind_of(&s), Some(ErrorKind::InvalidUpdateDelay));

        s.update_config = Some(UpdateConfig {
            delay: Some(SpecDuration::Nanos(0)),
            ..Default::default()
        });
        assert_eq!(kind_of(&s), None);
    }

    #[test]
    fn test_endpoint_ports() {
        let dup = with_ports(None, vec![port("tcp", 80, 8080), port("tcp", 81, 8080)]);
        assert_eq!(kind_of(&dup), Some(ErrorKind::InvalidEndpoint));

        let same_tuple = with_ports(None, vec![port("tcp", 80, 0), port("tcp", 80, 0)]);
        assert_eq!(kind_of(&same_tuple), Some(ErrorKind::InvalidEndpoint));

        let other_protocol = with_ports(None, vec![port("tcp", 53, 53), port("udp", 53, 53)]);
        assert_eq!(kind_of(&other_protocol), None);

        let dnsrr = with_ports(Some(ResolutionMode::Dnsrr), vec![port("tcp", 80, 8080)]);
        let err = validate_service_spec(Some(&dnsrr)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidEndpoint);
        assert_eq!(err.message(), "ports can't be used with dnsrr mode");

        let dnsrr_empty = with_ports(Some(ResolutionMode::Dnsrr), Vec::new());
        assert_eq!(kind_of(&dnsrr_empty), None);
    }

    #[test]
    fn test_image() {
        let mut s = spec("web");
        s.task_template.container_spec = None;
        assert_eq!(kind_of(&s), Some(ErrorKind::InvalidImageName));

        let mut s = spec("web");
        s.task_template.container_spec.as_mut().unwrap().image = "Nginx".to_string();
        assert_eq!(kind_of(&s), Some(ErrorKind::InvalidImageName));

        for image in ["nginx:täg", "nginx:版本"] {
            let mut s = spec("web");
            s.task_template.container_spec.as_mut().unwrap().image = image.to_string();
            assert_eq!(kind_of(&s), Some(ErrorKind::InvalidImageName), "{}", image);
        }

        let mut s = spec("web");
        s.task_template.container_spec.as_mut().unwrap().image =
            "registry.local:5000/team/web:v2".to_string();
        assert_eq!(kind_of(&s), None);
    }

    #[test]
    fn test_first_failure_wins() {
        let mut s = with_reservation(1, 1);
        s.name = "-bad".to_string();
        s.task_template.container_spec = None;
        assert_eq!(kind_of(&s), Some(ErrorKind::InvalidName));

        s.name = "good".to_string();
        assert_eq!(kind_of(&s), Some(ErrorKind::InvalidCpu));
    }
}
