//! Stack bundles
//!
//! A bundle is a namespace plus the services that belong to it, keyed by
//! short name. On the cluster each service is named `<namespace>_<short>`
//! and carries the namespace label so membership can be recovered later.

use crate::error::{CraneError, Result};
use crate::swarm::service::ServiceSpec;
use crate::swarm::validate::{validate_name, validate_service_spec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Label carrying the stack name on services and containers
pub const LABEL_NAMESPACE: &str = "com.docker.stack.namespace";

/// Desired state of one stack
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StackBundle {
    /// Stack name
    #[serde(alias = "Name")]
    pub namespace: String,
    /// Member services by short name
    #[serde(default)]
    pub services: BTreeMap<String, ServiceSpec>,
}

impl StackBundle {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            services: BTreeMap::new(),
        }
    }

    pub fn with_service(mut self, short_name: &str, spec: ServiceSpec) -> Self {
        self.services.insert(short_name.to_string(), spec);
        self
    }

    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(data)?)
    }

    /// Load a bundle file, choosing the format by extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => Self::from_yaml(&data),
            _ => Self::from_json(&data),
        }
    }

    /// Cluster-side name of a member service
    pub fn full_name(&self, short_name: &str) -> String {
        full_name(&self.namespace, short_name)
    }

    /// Member specs as they will be submitted, in short-name order
    ///
    /// Names are set to `<namespace>_<short>` and the namespace label is
    /// stamped on the service and its containers.
    pub fn stamped(&self) -> Vec<(String, ServiceSpec)> {
        self.services
            .iter()
            .map(|(short, spec)| {
                let mut spec = spec.clone();
                spec.name = self.full_name(short);
                spec.labels
                    .insert(LABEL_NAMESPACE.to_string(), self.namespace.clone());
                if let Some(container) = spec.task_template.container_spec.as_mut() {
                    container
                        .labels
                        .insert(LABEL_NAMESPACE.to_string(), self.namespace.clone());
                }
                (short.clone(), spec)
            })
            .collect()
    }

    /// Validate the namespace and then every member, first failure wins
    pub fn validate(&self) -> Result<()> {
        validate_name("Namespace", &self.namespace)?;

        if self.services.is_empty() {
            return Err(CraneError::invalid(
                crate::error::ErrorKind::InvalidSpec,
                "Services",
                "stack must contain at least one service",
            ));
        }

        for (short, spec) in self.stamped() {
            validate_service_spec(Some(&spec))
                .map_err(|e| e.with_field_prefix(&format!("Services.{}", short)))?;
        }
        Ok(())
    }
}

/// Cluster-side name of a stack member
pub fn full_name(namespace: &str, short_name: &str) -> String {
    format!("{}_{}", namespace, short_name)
}

/// Recover the short name from a cluster-side service name
pub fn short_name<'a>(namespace: &str, name: &'a str) -> &'a str {
    name.strip_prefix(namespace)
        .and_then(|rest| rest.strip_prefix('_'))
        .unwrap_or(name)
}

/// Namespace label of a service, if any
pub fn namespace_of(spec: &ServiceSpec) -> Option<&str> {
    spec.labels.get(LABEL_NAMESPACE).map(|s| s.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;

    const BUNDLE_JSON: &str = r#"{
        "Name": "demo",
        "Services": {
            "web": {"TaskTemplate": {"ContainerSpec": {"Image": "nginx:1.25"}}},
            "db": {"TaskTemplate": {"ContainerSpec": {"Image": "postgres:16"}}, "Labels": {"tier": "data"}}
        }
    }"#;

    #[test]
    fn test_name_alias() {
        let bundle = StackBundle::from_json(BUNDLE_JSON).unwrap();
        assert_eq!(bundle.namespace, "demo");
        assert_eq!(bundle.services.len(), 2);

        let json = serde_json::to_value(&bundle).unwrap();
        assert_eq!(json["Namespace"], "demo");
    }

    #[test]
    fn test_stamped_names_and_labels() {
        let bundle = StackBundle::from_json(BUNDLE_JSON).unwrap();
        let stamped = bundle.stamped();

        let shorts: Vec<&str> = stamped.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(shorts, vec!["db", "web"]);

        let (_, db) = &stamped[0];
        assert_eq!(db.name, "demo_db");
        assert_eq!(namespace_of(db), Some("demo"));
        assert_eq!(db.labels.get("tier").map(String::as_str), Some("data"));
        let container = db.task_template.container_spec.as_ref().unwrap();
        assert_eq!(container.labels.get(LABEL_NAMESPACE).map(String::as_str), Some("demo"));
    }

    #[test]
    fn test_short_name() {
        assert_eq!(short_name("demo", "demo_web"), "web");
        assert_eq!(short_name("demo", "demo_web_api"), "web_api");
        assert_eq!(short_name("demo", "other_web"), "other_web");
        assert_eq!(short_name("demo", "demoweb"), "demoweb");
    }

    #[test]
    fn test_validate_reports_member() {
        let mut bundle = StackBundle::from_json(BUNDLE_JSON).unwrap();
        bundle
            .services
            .get_mut("web")
            .unwrap()
            .task_template
            .container_spec
            .as_mut()
            .unwrap()
            .image = "NGINX".to_string();

        let err = bundle.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidImageName);
        assert_eq!(err.field(), Some("Services.web.TaskTemplate.ContainerSpec.Image"));
    }

    #[test]
    fn test_validate_namespace() {
        let mut bundle = StackBundle::from_json(BUNDLE_JSON).unwrap();
        bundle.namespace = "-demo".to_string();
        let err = bundle.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidName);
        assert_eq!(err.field(), Some("Namespace"));

        assert_eq!(
            StackBundle::new("demo").validate().unwrap_err().kind(),
            ErrorKind::InvalidSpec
        );
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(
            file,
            "Namespace: shop\nServices:\n  api:\n    TaskTemplate:\n      ContainerSpec:\n        Image: example/api:2\n      RestartPolicy:\n        Delay: 5s\n"
        )
        .unwrap();

        let bundle = StackBundle::from_file(file.path()).unwrap();
        assert_eq!(bundle.namespace, "shop");
        let delay = bundle.services["api"]
            .task_template
            .restart_policy
            .as_ref()
            .unwrap()
            .delay
            .as_ref()
            .unwrap()
            .to_nanos()
            .unwrap();
        assert_eq!(delay, 5_000_000_000);
        assert!(bundle.validate().is_ok());
    }
}
