//! Collaborators the engine talks to: the HTTP client, the
//! authentication provider and the resource path builder.

use crate::error::{EngineError, EngineResult, TransportError};
use crate::model::{HttpMethod, ResourceKind, ResponseRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method as ReqMethod};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Token sent when a scenario asks for invalid credentials.
pub const INVALID_TOKEN: &str = "invalid-token-00000000";

/// Organization slug guaranteed not to exist on the API under test.
pub const NONEXISTENT_ORGANIZATION: &str = "nonexistent-organization";

/// A fully materialized request, ready to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingRequest {
    pub method: HttpMethod,
    /// Path below the API root, starting with `/`.
    pub path: String,
    pub query: HashMap<String, String>,
    pub token: Option<String>,
    pub body: Option<Value>,
}

/// Sends requests to the API under test.
///
/// Non-2xx responses are ordinary records; only failures that prevent
/// a response from being read are errors.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: &OutgoingRequest) -> Result<ResponseRecord, TransportError>;
}

/// [`HttpClient`] backed by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: Client,
    base_url: Url,
    auth_scheme: String,
    timeout: Duration,
}

impl ReqwestClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Self::with_client(Client::new(), base_url, timeout)
    }

    /// Create a client reusing an existing reqwest client
    pub fn with_client(client: Client, base_url: &str, timeout: Duration) -> Result<Self> {
        // Url::join drops the last segment unless the base ends in '/'.
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized)
            .context(format!("Invalid base_url provided: {base_url}"))?;
        Ok(Self {
            client,
            base_url,
            auth_scheme: "Bearer".to_string(),
            timeout,
        })
    }

    /// Scheme used in the `Authorization` header (`Bearer`, `Token`, ...).
    pub fn with_auth_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.auth_scheme = scheme.into();
        self
    }

    fn convert_method(method: HttpMethod) -> ReqMethod {
        match method {
            HttpMethod::Get => ReqMethod::GET,
            HttpMethod::Post => ReqMethod::POST,
            HttpMethod::Put => ReqMethod::PUT,
            HttpMethod::Delete => ReqMethod::DELETE,
            HttpMethod::Patch => ReqMethod::PATCH,
        }
    }

    fn url_for(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(path.trim_start_matches('/'))
    }
}

fn transport_error(request: &OutgoingRequest, message: impl ToString) -> TransportError {
    TransportError {
        method: request.method.to_string(),
        path: request.path.clone(),
        message: message.to_string(),
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    async fn send(&self, request: &OutgoingRequest) -> Result<ResponseRecord, TransportError> {
        let url = self
            .url_for(&request.path)
            .map_err(|e| transport_error(request, e))?;

        let mut builder = self
            .client
            .request(Self::convert_method(request.method), url.clone())
            .timeout(self.timeout);

        if let Some(token) = &request.token {
            builder = builder.header("Authorization", format!("{} {token}", self.auth_scheme));
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!("Sending request to {}", url);
        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(request, e))?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or("").to_string()))
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(request, e))?;
        debug!("Received response with status: {}", status);

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(ResponseRecord {
            status,
            body,
            headers,
        })
    }
}

/// Supplies the token used while a scenario is authenticated.
pub trait AuthProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// A token fixed for the whole run.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }
}

impl AuthProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Which organization requests are addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrganizationRef {
    #[default]
    Default,
    Nonexistent,
}

/// Maps logical organization / project / function references to
/// request paths.
#[derive(Debug, Clone)]
pub struct ResourcePaths {
    organization: String,
}

impl ResourcePaths {
    pub fn new(organization: impl Into<String>) -> Self {
        Self {
            organization: organization.into(),
        }
    }

    pub fn organization(&self, org: OrganizationRef) -> &str {
        match org {
            OrganizationRef::Default => &self.organization,
            OrganizationRef::Nonexistent => NONEXISTENT_ORGANIZATION,
        }
    }

    pub fn path_for(
        &self,
        kind: &ResourceKind,
        org: OrganizationRef,
        project: Option<&str>,
        function: Option<&str>,
    ) -> EngineResult<String> {
        let require = |value: Option<&str>, name: &str| {
            value
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| EngineError::InvalidStep(format!("'{kind}' request needs a {name}")))
        };
        let org_root = format!("/organizations/{}", self.organization(org));

        let path = match kind {
            ResourceKind::Organization => format!("{org_root}/"),
            ResourceKind::Projects => format!("{org_root}/projects/"),
            ResourceKind::Project => {
                format!("{org_root}/projects/{}/", require(project, "project")?)
            }
            ResourceKind::Functions => {
                format!("{org_root}/projects/{}/functions/", require(project, "project")?)
            }
            ResourceKind::Function => format!(
                "{org_root}/projects/{}/functions/{}/",
                require(project, "project")?,
                require(function, "function")?
            ),
            ResourceKind::Path(p) if p.starts_with('/') => p.clone(),
            ResourceKind::Path(p) => format!("/{p}"),
        };
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_paths() {
        let paths = ResourcePaths::new("acme");
        let d = OrganizationRef::Default;
        assert_eq!(
            paths.path_for(&ResourceKind::Projects, d, None, None).unwrap(),
            "/organizations/acme/projects/"
        );
        assert_eq!(
            paths
                .path_for(&ResourceKind::Functions, d, Some("p-1"), None)
                .unwrap(),
            "/organizations/acme/projects/p-1/functions/"
        );
        assert_eq!(
            paths
                .path_for(&ResourceKind::Function, d, Some("p-1"), Some("7"))
                .unwrap(),
            "/organizations/acme/projects/p-1/functions/7/"
        );
        assert_eq!(
            paths
                .path_for(&ResourceKind::Path("health".into()), d, None, None)
                .unwrap(),
            "/health"
        );
    }

    #[test]
    fn test_nonexistent_organization_sentinel() {
        let paths = ResourcePaths::new("acme");
        assert_eq!(
            paths
                .path_for(&ResourceKind::Organization, OrganizationRef::Nonexistent, None, None)
                .unwrap(),
            format!("/organizations/{NONEXISTENT_ORGANIZATION}/")
        );
    }

    #[test]
    fn test_missing_references_are_invalid() {
        let paths = ResourcePaths::new("acme");
        let d = OrganizationRef::Default;
        assert!(matches!(
            paths.path_for(&ResourceKind::Functions, d, None, None),
            Err(EngineError::InvalidStep(_))
        ));
        assert!(paths
            .path_for(&ResourceKind::Function, d, Some("p"), Some(""))
            .is_err());
    }

    #[test]
    fn test_base_url_join_keeps_prefix() {
        let client =
            ReqwestClient::new("http://localhost:8000/api/v1", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.url_for("/organizations/acme/").unwrap().as_str(),
            "http://localhost:8000/api/v1/organizations/acme/"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(ReqwestClient::new("not a url", Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_static_token() {
        assert_eq!(StaticToken::new("t").token().as_deref(), Some("t"));
        assert_eq!(StaticToken::default().token(), None);
    }
}
