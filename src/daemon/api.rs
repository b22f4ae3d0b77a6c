//! REST API Handler for the Crane daemon
//!
//! Routes stack requests to the orchestrator and turns the error taxonomy
//! into HTTP statuses. Bodies are JSON: `{"code": 0, "data": ...}` on
//! success and `{"code", "kind", "field", "message"}` on failure.

use crate::auth::Authenticator;
use crate::cluster::{ClusterClient, RegistryAuth};
use crate::context::RequestContext;
use crate::error::{CraneError, ErrorKind, Result};
use crate::stack::{DeployOptions, PermissionGrant, StackBundle, StackOrchestrator};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A parsed HTTP request
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: String,
    /// Path without the query string
    pub path: String,
    pub query: HashMap<String, String>,
    /// Header names are lowercased
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl Request {
    /// Build a request from a method and a request target (`/path?query`)
    pub fn new(method: &str, target: &str) -> Self {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        let query = query
            .split('&')
            .filter(|p| !p.is_empty())
            .map(|p| match p.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (p.to_string(), String::new()),
            })
            .collect();

        Self {
            method: method.to_uppercase(),
            path: path.to_string(),
            query,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_lowercase(), value.trim().to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|s| s.as_str())
    }
}

/// Status code and JSON body
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            status: 200,
            body: json!({ "code": 0, "data": data }),
        }
    }

    pub fn error(err: &CraneError) -> Self {
        let kind = err.kind();
        let mut body = json!({
            "code": kind.code(),
            "kind": kind,
            "field": err.field(),
            "message": err.message(),
        });
        if let CraneError::PartialRemoveFailure {
            removed, failures, ..
        } = err
        {
            body["data"] = json!({ "Removed": removed, "Failures": failures });
        }

        Self {
            status: status_for(kind),
            body,
        }
    }

    fn route_not_found(method: &str, path: &str) -> Self {
        Self {
            status: 404,
            body: json!({
                "code": ErrorKind::NotFound.code(),
                "kind": ErrorKind::NotFound,
                "field": null,
                "message": format!("Unknown endpoint: {} {}", method, path),
            }),
        }
    }
}

/// HTTP status for an error kind
pub fn status_for(kind: ErrorKind) -> u16 {
    match kind {
        k if k.is_validation() => 400,
        ErrorKind::NotFound | ErrorKind::ServiceNotFound | ErrorKind::GroupNotFound => 404,
        ErrorKind::VersionConflict => 409,
        ErrorKind::PermissionDenied => 403,
        ErrorKind::ClusterUnavailable => 503,
        ErrorKind::Timeout => 504,
        _ => 500,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ScaleRequest {
    scale: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GroupResponse {
    namespace: String,
    #[serde(rename = "GroupID")]
    group_id: Option<u64>,
}

/// API handler for processing requests
pub struct ApiHandler<C: ClusterClient> {
    orchestrator: Arc<StackOrchestrator<C>>,
    authenticator: Arc<dyn Authenticator>,
    request_timeout: Duration,
}

impl<C: ClusterClient> Clone for ApiHandler<C> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
            authenticator: self.authenticator.clone(),
            request_timeout: self.request_timeout,
        }
    }
}

impl<C: ClusterClient> ApiHandler<C> {
    pub fn new(
        orchestrator: Arc<StackOrchestrator<C>>,
        authenticator: Arc<dyn Authenticator>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            orchestrator,
            authenticator,
            request_timeout,
        }
    }

    /// Handle an incoming API request
    pub async fn handle_request(&self, request: &Request) -> ApiResponse {
        debug!(
            "API request: {} {} body={}",
            request.method,
            request.path,
            request.body.len()
        );

        let ctx = RequestContext::with_timeout(self.request_timeout);
        match self.route(&ctx, request).await {
            Some(Ok(data)) => ApiResponse::ok(data),
            Some(Err(e)) => {
                warn!("{} {} failed: {}", request.method, request.path, e);
                ApiResponse::error(&e)
            }
            None => ApiResponse::route_not_found(&request.method, &request.path),
        }
    }

    async fn route(&self, ctx: &RequestContext, request: &Request) -> Option<Result<Value>> {
        let parts: Vec<&str> = request
            .path
            .trim_matches('/')
            .split('/')
            .filter(|p| !p.is_empty())
            .collect();

        let rest = match parts.as_slice() {
            ["_ping"] if request.method == "GET" || request.method == "HEAD" => {
                return Some(self.ping(ctx).await)
            }
            ["api", "v1", rest @ ..] => rest,
            _ => return None,
        };

        let result = match (request.method.as_str(), rest) {
            ("POST", ["stacks"]) => self.deploy(ctx, request).await,
            ("GET", ["stacks"]) => to_value(self.orchestrator.list(ctx).await),
            ("GET", ["stacks", ns]) => to_value(self.orchestrator.inspect(ctx, ns).await),
            ("GET", ["stacks", ns, "services"]) => {
                to_value(self.orchestrator.list_stack_services(ctx, ns).await)
            }
            ("GET", ["stacks", ns, "group"]) => self.group(ctx, ns).await,
            ("PATCH", ["stacks", ns, "services", service, "scale"]) => {
                self.scale(ctx, ns, service, &request.body).await
            }
            ("DELETE", ["stacks", ns]) => to_value(self.orchestrator.remove(ctx, ns).await),
            _ => return None,
        };
        Some(result)
    }

    async fn ping(&self, ctx: &RequestContext) -> Result<Value> {
        ctx.run(self.orchestrator.client().ping()).await?;
        Ok(Value::String("OK".to_string()))
    }

    async fn deploy(&self, ctx: &RequestContext, request: &Request) -> Result<Value> {
        let bundle: StackBundle = parse_body(&request.body)?;

        let grant = match request.query.get("group_id") {
            Some(raw) => {
                let id: u64 = raw.parse().map_err(|_| {
                    CraneError::invalid(
                        ErrorKind::InvalidSpec,
                        "group_id",
                        format!("invalid group id: {}", raw),
                    )
                })?;
                Some(PermissionGrant::admin(id))
            }
            None => None,
        };

        if self.orchestrator.account_mode() {
            let grant = grant.ok_or_else(|| {
                CraneError::invalid(ErrorKind::InvalidSpec, "group_id", "group_id is required")
            })?;
            self.authenticator.group(grant.group_id)?;
        }

        let registry_auth = request
            .header("X-Registry-Auth")
            .map(RegistryAuth::decode)
            .transpose()?;

        let options = DeployOptions {
            grant,
            registry_auth,
        };
        to_value(self.orchestrator.deploy(ctx, &bundle, &options).await)
    }

    async fn scale(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        service: &str,
        body: &str,
    ) -> Result<Value> {
        let request: ScaleRequest = parse_body(body)?;
        self.orchestrator
            .scale_service(ctx, namespace, service, request.scale)
            .await?;
        Ok(Value::Null)
    }

    async fn group(&self, ctx: &RequestContext, namespace: &str) -> Result<Value> {
        let group_id = self.orchestrator.group_of(ctx, namespace).await?;
        to_value(Ok(GroupResponse {
            namespace: namespace.to_string(),
            group_id,
        }))
    }
}

fn to_value<T: Serialize>(result: Result<T>) -> Result<Value> {
    Ok(serde_json::to_value(result?)?)
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body)
        .map_err(|e| CraneError::invalid(ErrorKind::InvalidSpec, "body", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::InMemoryAuthenticator;
    use crate::cluster::MemoryCluster;

    const BUNDLE: &str = r#"{
        "Namespace": "demo",
        "Services": {
            "web": {
                "TaskTemplate": {"ContainerSpec": {"Image": "nginx:1.25"}},
                "Mode": {"Replicated": {"Replicas": 2}}
            }
        }
    }"#;

    fn handler(cluster: &MemoryCluster, account_mode: bool) -> ApiHandler<MemoryCluster> {
        let orchestrator =
            StackOrchestrator::new(Arc::new(cluster.clone())).with_account_mode(account_mode);
        ApiHandler::new(
            Arc::new(orchestrator),
            Arc::new(InMemoryAuthenticator::new()),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_request_parsing() {
        let req = Request::new("post", "/api/v1/stacks?group_id=2&dry")
            .with_header("Content-Type", "application/json");
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/api/v1/stacks");
        assert_eq!(req.query["group_id"], "2");
        assert_eq!(req.query["dry"], "");
        assert_eq!(req.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::InvalidCpu), 400);
        assert_eq!(status_for(ErrorKind::InvalidSpec), 400);
        assert_eq!(status_for(ErrorKind::NotFound), 404);
        assert_eq!(status_for(ErrorKind::GroupNotFound), 404);
        assert_eq!(status_for(ErrorKind::VersionConflict), 409);
        assert_eq!(status_for(ErrorKind::PermissionDenied), 403);
        assert_eq!(status_for(ErrorKind::ClusterUnavailable), 503);
        assert_eq!(status_for(ErrorKind::Timeout), 504);
        assert_eq!(status_for(ErrorKind::PartialRemoveFailure), 500);
        assert_eq!(status_for(ErrorKind::Cluster), 500);
    }

    #[test]
    fn test_error_body() {
        let err = CraneError::invalid(
            ErrorKind::InvalidMemory,
            "TaskTemplate.Resources.Limits.MemoryBytes",
            "invalid memory value 10: Must be at least 4MiB",
        );
        let resp = ApiResponse::error(&err);
        assert_eq!(resp.status, 400);
        assert_eq!(resp.body["code"], 11003);
        assert_eq!(resp.body["kind"], "InvalidMemory");
        assert_eq!(
            resp.body["field"],
            "TaskTemplate.Resources.Limits.MemoryBytes"
        );
    }

    #[tokio::test]
    async fn test_ping() {
        let cluster = MemoryCluster::single_node();
        let resp = handler(&cluster, false)
            .handle_request(&Request::new("GET", "/_ping"))
            .await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body["data"], "OK");

        cluster.set_down(true).unwrap();
        let resp = handler(&cluster, false)
            .handle_request(&Request::new("GET", "/_ping"))
            .await;
        assert_eq!(resp.status, 503);
    }

    #[tokio::test]
    async fn test_stack_lifecycle() {
        let cluster = MemoryCluster::single_node();
        let api = handler(&cluster, false);

        let resp = api
            .handle_request(&Request::new("POST", "/api/v1/stacks").with_body(BUNDLE))
            .await;
        assert_eq!(resp.status, 200, "{}", resp.body);
        assert_eq!(resp.body["data"]["Created"][0], "demo_web");

        let resp = api.handle_request(&Request::new("GET", "/api/v1/stacks")).await;
        assert_eq!(resp.body["data"][0]["Namespace"], "demo");
        assert_eq!(resp.body["data"][0]["RunningTaskCount"], 2);

        let resp = api
            .handle_request(&Request::new("GET", "/api/v1/stacks/demo"))
            .await;
        assert_eq!(
            resp.body["data"]["Services"]["web"]["TaskTemplate"]["ContainerSpec"]["Image"],
            "nginx:1.25"
        );

        let resp = api
            .handle_request(
                &Request::new("PATCH", "/api/v1/stacks/demo/services/web/scale")
                    .with_body(r#"{"Scale": 5}"#),
            )
            .await;
        assert_eq!(resp.status, 200, "{}", resp.body);

        let resp = api
            .handle_request(&Request::new("GET", "/api/v1/stacks/demo/services"))
            .await;
        assert_eq!(resp.body["data"][0]["Replicas"], 5);

        let resp = api
            .handle_request(&Request::new("DELETE", "/api/v1/stacks/demo"))
            .await;
        assert_eq!(resp.body["data"]["Removed"][0], "demo_web");

        let resp = api
            .handle_request(&Request::new("GET", "/api/v1/stacks/demo"))
            .await;
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body["kind"], "NotFound");
    }

    #[tokio::test]
    async fn test_invalid_bundle() {
        let cluster = MemoryCluster::single_node();
        let api = handler(&cluster, false);

        let bad = BUNDLE.replace("nginx:1.25", "");
        let resp = api
            .handle_request(&Request::new("POST", "/api/v1/stacks").with_body(bad))
            .await;
        assert_eq!(resp.status, 400);
        assert_eq!(resp.body["kind"], "InvalidImageName");
        assert_eq!(
            resp.body["field"],
            "Services.web.TaskTemplate.ContainerSpec.Image"
        );

        let resp = api
            .handle_request(&Request::new("POST", "/api/v1/stacks").with_body("{not json"))
            .await;
        assert_eq!(resp.status, 400);
        assert_eq!(resp.body["field"], "body");
    }

    #[tokio::test]
    async fn test_account_mode_group_checks() {
        let cluster = MemoryCluster::single_node();
        let api = handler(&cluster, true);

        let resp = api
            .handle_request(&Request::new("POST", "/api/v1/stacks").with_body(BUNDLE))
            .await;
        assert_eq!(resp.status, 400);
        assert_eq!(resp.body["field"], "group_id");

        let resp = api
            .handle_request(&Request::new("POST", "/api/v1/stacks?group_id=9").with_body(BUNDLE))
            .await;
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body["kind"], "GroupNotFound");

        let resp = api
            .handle_request(&Request::new("POST", "/api/v1/stacks?group_id=2").with_body(BUNDLE))
            .await;
        assert_eq!(resp.status, 200, "{}", resp.body);

        let resp = api
            .handle_request(&Request::new("GET", "/api/v1/stacks/demo/group"))
            .await;
        assert_eq!(resp.body["data"]["GroupID"], 2);
    }

    #[tokio::test]
    async fn test_registry_auth_header() {
        let cluster = MemoryCluster::single_node();
        let api = handler(&cluster, false);

        let resp = api
            .handle_request(
                &Request::new("POST", "/api/v1/stacks")
                    .with_header("X-Registry-Auth", "%%%")
                    .with_body(BUNDLE),
            )
            .await;
        assert_eq!(resp.status, 400);
        assert_eq!(resp.body["field"], "X-Registry-Auth");
        assert_eq!(cluster.service_count().unwrap(), 0);

        let auth = RegistryAuth {
            username: "bob".to_string(),
            password: "secret".to_string(),
            ..Default::default()
        };
        let resp = api
            .handle_request(
                &Request::new("POST", "/api/v1/stacks")
                    .with_header("X-Registry-Auth", &auth.encode().unwrap())
                    .with_body(BUNDLE),
            )
            .await;
        assert_eq!(resp.status, 200, "{}", resp.body);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let cluster = MemoryCluster::single_node();
        let resp = handler(&cluster, false)
            .handle_request(&Request::new("PUT", "/api/v1/stacks"))
            .await;
        assert_eq!(resp.status, 404);
        assert!(resp.body["message"]
            .as_str()
            .unwrap()
            .contains("Unknown endpoint"));
    }
}
