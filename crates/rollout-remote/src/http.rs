use crate::{
    CertificateValidator, DeployEngine, DeployResult, EndpointGetter, EnvironmentDescriber,
    RedirectChecker, RemoteConfig, RemoteError, ServiceUpdater, StackPayload, TemplateGetter,
    VersionGetter,
};
use chrono::{DateTime, Utc};
use rollout_schema::{
    AppCapabilities, Arn, DeployOptions, EnvironmentCapabilities, StackName, WorkloadIdentity,
};
use rollout_store::{ObjectUploader, StoreError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Control-plane client scoped to one application and environment.
///
/// Expects a small JSON API:
/// - `GET  /apps/<app>`                                  application snapshot
/// - `GET  /apps/<app>/envs/<env>`                       environment snapshot
/// - `GET  /apps/<app>/envs/<env>/version`               `{"version": "v1.2.0"}`
/// - `GET  /apps/<app>/envs/<env>/service-discovery-endpoint`
/// - `GET  /apps/<app>/envs/<env>/public-cidr-blocks`    JSON array of strings
/// - `GET  /apps/<app>/envs/<env>/topics`                JSON array of ARNs
/// - `GET  /apps/<app>/envs/<env>/services`              JSON array of names
/// - `GET  /apps/<app>/envs/<env>/services/<svc>/redirect`
/// - `POST /apps/<app>/envs/<env>/services/<svc>/force-update`
/// - `GET  /apps/<app>/envs/<env>/services/<svc>/last-updated`
/// - `POST /certificates/validate`
/// - `PUT  /stacks/<name>`                               deploy, `{"status": ...}`
/// - `GET  /stacks/<name>/template`                      raw template text
/// - `PUT  /buckets/<bucket>/objects/<key>`              upload, `{"url": ...}`
///
/// Error statuses map onto [`RemoteError`]: 404 is `NotFound`, 408 and 504 are
/// `Timeout`, other 4xx are `Rejected` carrying the response body.
pub struct HttpBackend {
    config: RemoteConfig,
    agent: ureq::Agent,
    app: String,
    env: String,
}

#[derive(Clone, Copy)]
enum Verb {
    Put,
    Post,
}

#[derive(Deserialize)]
struct VersionBody {
    version: String,
}

#[derive(Deserialize)]
struct EndpointBody {
    endpoint: String,
}

#[derive(Deserialize)]
struct DeployBody {
    status: DeployResult,
}

#[derive(Deserialize)]
struct LastUpdatedBody {
    last_updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RedirectBody {
    redirects_http: bool,
}

#[derive(Deserialize)]
struct UploadBody {
    url: String,
}

#[derive(Serialize)]
struct CertificateRequest<'a> {
    aliases: &'a [String],
    certificates: &'a [Arn],
}

#[derive(Serialize)]
struct DeployRequest<'a> {
    stack: &'a StackPayload,
    bucket: &'a str,
    options: &'a DeployOptions,
}

impl HttpBackend {
    pub fn new(config: RemoteConfig, app: &str, env: &str) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(config.timeout()))
            .build();
        let agent = ureq::Agent::new_with_config(agent_config);
        Self {
            config,
            agent,
            app: app.to_owned(),
            env: env.to_owned(),
        }
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    fn app_url(&self) -> String {
        format!("{}/apps/{}", self.config.url, self.app)
    }

    fn env_url(&self, suffix: &str) -> String {
        format!("{}/apps/{}/envs/{}{suffix}", self.config.url, self.app, self.env)
    }

    fn service_url(&self, id: &WorkloadIdentity, suffix: &str) -> String {
        format!(
            "{}/apps/{}/envs/{}/services/{}/{suffix}",
            self.config.url, id.app, id.env, id.name
        )
    }

    fn read_response(
        url: &str,
        resp: ureq::http::Response<ureq::Body>,
    ) -> Result<Vec<u8>, RemoteError> {
        let code = resp.status().as_u16();
        let mut reader = resp.into_body().into_reader();
        let mut body = Vec::new();
        reader
            .read_to_end(&mut body)
            .map_err(|e| RemoteError::Http(e.to_string()))?;

        if code < 400 {
            return Ok(body);
        }
        let detail = String::from_utf8_lossy(&body).trim().to_owned();
        let message = if detail.is_empty() {
            format!("HTTP {code} for {url}")
        } else {
            detail
        };
        Err(match code {
            404 => RemoteError::NotFound(url.to_owned()),
            408 | 504 => RemoteError::Timeout(message),
            400..=499 => RemoteError::Rejected(message),
            _ => RemoteError::Http(message),
        })
    }

    fn transport_error(url: &str, err: ureq::Error) -> RemoteError {
        match err {
            ureq::Error::Timeout(_) => RemoteError::Timeout(url.to_owned()),
            e => RemoteError::Http(e.to_string()),
        }
    }

    fn do_send(
        &self,
        verb: Verb,
        url: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<Vec<u8>, RemoteError> {
        let req = match verb {
            Verb::Put => self.agent.put(url),
            Verb::Post => self.agent.post(url),
        };
        let mut req = req
            .header("Content-Type", content_type)
            .header("X-Rollout-Protocol", &crate::PROTOCOL_VERSION.to_string());
        if let Some(ref token) = self.config.auth_token {
            req = req.header("Authorization", &format!("Bearer {token}"));
        }
        let resp = req
            .send(data)
            .map_err(|e| Self::transport_error(url, e))?;
        Self::read_response(url, resp)
    }

    fn do_get(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        let mut req = self
            .agent
            .get(url)
            .header("X-Rollout-Protocol", &crate::PROTOCOL_VERSION.to_string());
        if let Some(ref token) = self.config.auth_token {
            req = req.header("Authorization", &format!("Bearer {token}"));
        }
        let resp = req.call().map_err(|e| Self::transport_error(url, e))?;
        Self::read_response(url, resp)
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, RemoteError> {
        tracing::debug!("GET {url}");
        let body = self.do_get(url)?;
        serde_json::from_slice(&body).map_err(|e| RemoteError::Serialization(e.to_string()))
    }

    fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        verb: Verb,
        url: &str,
        body: &B,
    ) -> Result<T, RemoteError> {
        let data =
            serde_json::to_vec(body).map_err(|e| RemoteError::Serialization(e.to_string()))?;
        tracing::debug!("send {url} ({} bytes)", data.len());
        let resp = self.do_send(verb, url, "application/json", &data)?;
        serde_json::from_slice(&resp).map_err(|e| RemoteError::Serialization(e.to_string()))
    }

    pub fn app_capabilities(&self) -> Result<AppCapabilities, RemoteError> {
        self.get_json(&self.app_url())
    }

    pub fn environment_capabilities(&self) -> Result<EnvironmentCapabilities, RemoteError> {
        self.get_json(&self.env_url(""))
    }
}

impl VersionGetter for HttpBackend {
    fn version(&self) -> Result<String, RemoteError> {
        let body: VersionBody = self.get_json(&self.env_url("/version"))?;
        Ok(body.version)
    }
}

impl EndpointGetter for HttpBackend {
    fn service_discovery_endpoint(&self) -> Result<String, RemoteError> {
        let body: EndpointBody = self.get_json(&self.env_url("/service-discovery-endpoint"))?;
        Ok(body.endpoint)
    }
}

impl EnvironmentDescriber for HttpBackend {
    fn public_cidr_blocks(&self) -> Result<Vec<String>, RemoteError> {
        self.get_json(&self.env_url("/public-cidr-blocks"))
    }

    fn topic_arns(&self) -> Result<Vec<Arn>, RemoteError> {
        let arns: Vec<String> = self.get_json(&self.env_url("/topics"))?;
        Ok(arns.into_iter().map(Arn::new).collect())
    }

    fn services(&self) -> Result<Vec<String>, RemoteError> {
        self.get_json(&self.env_url("/services"))
    }
}

impl CertificateValidator for HttpBackend {
    fn validate_cert_aliases(
        &self,
        aliases: &[String],
        certificates: &[Arn],
    ) -> Result<(), RemoteError> {
        let url = format!("{}/certificates/validate", self.config.url);
        let body = CertificateRequest {
            aliases,
            certificates,
        };
        let data =
            serde_json::to_vec(&body).map_err(|e| RemoteError::Serialization(e.to_string()))?;
        tracing::debug!("POST {url} ({} aliases)", aliases.len());
        self.do_send(Verb::Post, &url, "application/json", &data)?;
        Ok(())
    }
}

impl DeployEngine for HttpBackend {
    fn deploy_service(
        &self,
        stack: &StackPayload,
        bucket: &str,
        options: &DeployOptions,
    ) -> Result<DeployResult, RemoteError> {
        let url = format!("{}/stacks/{}", self.config.url, stack.name);
        let body: DeployBody = self.send_json(
            Verb::Put,
            &url,
            &DeployRequest {
                stack,
                bucket,
                options,
            },
        )?;
        Ok(body.status)
    }
}

impl ServiceUpdater for HttpBackend {
    fn force_update_service(&self, id: &WorkloadIdentity) -> Result<(), RemoteError> {
        let url = self.service_url(id, "force-update");
        tracing::debug!("POST {url}");
        self.do_send(Verb::Post, &url, "application/json", b"{}")?;
        Ok(())
    }

    fn last_updated_at(&self, id: &WorkloadIdentity) -> Result<DateTime<Utc>, RemoteError> {
        let body: LastUpdatedBody = self.get_json(&self.service_url(id, "last-updated"))?;
        Ok(body.last_updated_at)
    }
}

impl TemplateGetter for HttpBackend {
    fn template(&self, stack: &StackName) -> Result<Option<String>, RemoteError> {
        let url = format!("{}/stacks/{stack}/template", self.config.url);
        tracing::debug!("GET {url}");
        match self.do_get(&url) {
            Ok(body) => String::from_utf8(body)
                .map(Some)
                .map_err(|e| RemoteError::Serialization(e.to_string())),
            Err(RemoteError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl RedirectChecker for HttpBackend {
    fn redirects_http(&self, service: &str) -> Result<bool, RemoteError> {
        let url = self.env_url(&format!("/services/{service}/redirect"));
        let body: RedirectBody = self.get_json(&url)?;
        Ok(body.redirects_http)
    }
}

impl ObjectUploader for HttpBackend {
    fn upload(&self, bucket: &str, key: &str, data: &[u8]) -> Result<String, StoreError> {
        let url = format!("{}/buckets/{bucket}/objects/{key}", self.config.url);
        tracing::debug!("PUT {url} ({} bytes)", data.len());
        let resp = self
            .do_send(Verb::Put, &url, "application/octet-stream", data)
            .map_err(|e| StoreError::Upload(e.to_string()))?;
        let body: UploadBody =
            serde_json::from_slice(&resp).map_err(|e| StoreError::Upload(e.to_string()))?;
        Ok(body.url)
    }
}
