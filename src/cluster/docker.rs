//! Docker Engine API client for a swarm manager

use super::{ClusterClient, RegistryAuth, ServiceFilter, TaskFilter};
use crate::config::{CraneConfig, Endpoint};
use crate::error::{classify_manager_response, CraneError, Result};
use crate::swarm::service::{Service, ServiceSpec, ServiceVersion};
use crate::swarm::task::Task;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

/// Engine API version requested on every call
pub const API_VERSION: &str = "v1.41";

const REGISTRY_AUTH_HEADER: &str = "X-Registry-Auth";

/// Swarm manager reached over HTTP
#[derive(Debug, Clone)]
pub struct DockerCluster {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct CreateResponse {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    message: String,
}

impl DockerCluster {
    /// Client for the given endpoint without TLS
    pub fn new(endpoint: &Endpoint) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("crane/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: endpoint.base_url(),
        })
    }

    /// Client built from configuration, trusting `ca.pem` when a cert path is set
    pub fn from_config(config: &CraneConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("crane/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout);

        let mut endpoint = config.swarm_manager.clone();
        if let Some(dir) = &config.docker_cert_path {
            builder = builder.add_root_certificate(load_ca(dir)?);
            endpoint.scheme = "https".to_string();
        }

        info!(manager = %endpoint, "Using swarm manager");
        Ok(Self {
            client: builder.build()?,
            base_url: endpoint.base_url(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}{}", self.base_url, API_VERSION, path);
        debug!(%method, %url, "Engine API request");
        self.client.request(method, url)
    }

    fn with_auth(builder: RequestBuilder, auth: Option<&RegistryAuth>) -> Result<RequestBuilder> {
        match auth {
            Some(auth) => Ok(builder.header(REGISTRY_AUTH_HEADER, auth.encode()?)),
            None => Ok(builder),
        }
    }

    /// Turn a non-success response into a classified error
    async fn check(response: Response, service: Option<&str>) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.message)
            .unwrap_or(body);

        Err(classify_manager_response(status.as_u16(), &message, service))
    }
}

fn load_ca(dir: &Path) -> Result<reqwest::Certificate> {
    let pem = std::fs::read(dir.join("ca.pem"))?;
    reqwest::Certificate::from_pem(&pem)
        .map_err(|e| CraneError::InvalidConfig(format!("invalid CA certificate: {}", e)))
}

#[async_trait]
impl ClusterClient for DockerCluster {
    async fn ping(&self) -> Result<()> {
        let response = self.request(Method::GET, "/_ping").send().await?;
        Self::check(response, None).await?;
        Ok(())
    }

    async fn list_services(&self, filter: &ServiceFilter) -> Result<Vec<Service>> {
        let mut builder = self.request(Method::GET, "/services");
        if !filter.is_empty() {
            builder = builder.query(&[("filters", filter.to_query())]);
        }

        let response = Self::check(builder.send().await?, None).await?;
        Ok(response.json().await?)
    }

    async fn inspect_service(&self, id: &str) -> Result<Service> {
        let response = self
            .request(Method::GET, &format!("/services/{}", id))
            .send()
            .await?;
        let response = Self::check(response, Some(id)).await?;
        Ok(response.json().await?)
    }

    async fn create_service(
        &self,
        spec: &ServiceSpec,
        registry_auth: Option<&RegistryAuth>,
    ) -> Result<String> {
        let builder = self.request(Method::POST, "/services/create").json(spec);
        let response = Self::with_auth(builder, registry_auth)?.send().await?;

        // A name clash answers 409 too; it is not a version conflict
        let response = Self::check(response, None).await?;
        let created: CreateResponse = response.json().await?;

        info!(service = %spec.name, id = %created.id, "Service created");
        Ok(created.id)
    }

    async fn update_service(
        &self,
        id: &str,
        version: ServiceVersion,
        spec: &ServiceSpec,
        registry_auth: Option<&RegistryAuth>,
    ) -> Result<()> {
        let builder = self
            .request(Method::POST, &format!("/services/{}/update", id))
            .query(&[("version", version.index)])
            .json(spec);
        let response = Self::with_auth(builder, registry_auth)?.send().await?;
        Self::check(response, Some(&spec.name)).await?;

        info!(service = %spec.name, version = version.index, "Service updated");
        Ok(())
    }

    async fn remove_service(&self, id: &str) -> Result<()> {
        let response = self
            .request(Method::DELETE, &format!("/services/{}", id))
            .send()
            .await?;

        Self::check(response, Some(id)).await?;
        info!(service = %id, "Service removed");
        Ok(())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let response = self
            .request(Method::GET, "/tasks")
            .query(&[("filters", filter.to_query())])
            .send()
            .await?;
        let response = Self::check(response, None).await?;
        Ok(response.json().await?)
    }
}
