//! PAN-OS XML API client.
//!
//! Every call is a request against `https://<host>/api/` authenticated with
//! the `X-PAN-KEY` header. Responses are `<response status="success|error">`
//! documents except for successful exports, which return the archive body.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, StatusCode};
use zeroize::Zeroizing;

use certswap_common::redact::redact_key;

use crate::error::StoreError;
use crate::path::ConfigPath;
use crate::store::{
    CommitScope, CommitSubmission, ConfigStore, ExportCategory, ImportRequest, JobHandle,
    JobState, SystemInfo, WriteMode,
};
use crate::tree::ConfigNode;

/// Default timeout for ordinary API requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const API_PATH: &str = "/api/";
const API_KEY_HEADER: &str = "X-PAN-KEY";

/// Connection settings. No `Debug`: holds the API key.
#[derive(Clone)]
pub struct PanosConfig {
    pub host: String,
    pub api_key: Zeroizing<String>,
    /// Management interfaces usually present self-signed certificates.
    pub verify_tls: bool,
    pub request_timeout: Duration,
}

impl PanosConfig {
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            api_key: Zeroizing::new(api_key.into()),
            verify_tls: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

pub struct PanosClient {
    base_url: String,
    api_key: Zeroizing<String>,
    http: reqwest::Client,
    request_timeout: Duration,
}

impl PanosClient {
    pub fn new(config: PanosConfig) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| StoreError::Connectivity(format!("HTTP client setup failed: {e}")))?;

        let base_url = format!("https://{}{API_PATH}", config.host.trim_end_matches('/'));
        tracing::info!(
            url = %base_url,
            api_key = %redact_key(&config.api_key),
            verify_tls = config.verify_tls,
            "PAN-OS client initialized"
        );

        Ok(Self {
            base_url,
            api_key: config.api_key,
            http,
            request_timeout: config.request_timeout,
        })
    }

    fn get(&self, params: &[(&str, &str)]) -> RequestBuilder {
        self.http
            .get(&self.base_url)
            .header(API_KEY_HEADER, self.api_key.as_str())
            .query(params)
            .timeout(self.request_timeout)
    }

    async fn send(&self, request: RequestBuilder, timeout: Duration) -> Result<Vec<u8>, StoreError> {
        let response = request.send().await.map_err(|e| map_transport(e, timeout))?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(StoreError::Unauthorized);
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| map_transport(e, timeout))?
            .to_vec();
        if !status.is_success() {
            // Error bodies are still XML with a message when the API answered.
            let message = std::str::from_utf8(&body)
                .ok()
                .and_then(|xml| ConfigNode::parse(xml).ok())
                .map(|root| error_message(&root))
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(StoreError::Rejected { message });
        }
        tracing::trace!(status = %status, bytes = body.len(), "API response");
        Ok(body)
    }

    /// `action=get` reads the candidate configuration, `action=show` the
    /// running one.
    async fn read_config(
        &self,
        action: &str,
        path: &ConfigPath,
    ) -> Result<Option<ConfigNode>, StoreError> {
        let xpath = path.to_xpath();
        tracing::debug!(xpath = %xpath, action, "config read");
        let response = self
            .call(self.get(&[("type", "config"), ("action", action), ("xpath", xpath.as_str())]))
            .await?;
        Ok(configured_node(&response))
    }

    /// Send and decode a `<response>` document, returning it on success.
    async fn call(&self, request: RequestBuilder) -> Result<ConfigNode, StoreError> {
        let body = self.send(request, self.request_timeout).await?;
        let xml = std::str::from_utf8(&body)
            .map_err(|e| StoreError::Decode(format!("response is not UTF-8: {e}")))?;
        parse_response(xml)
    }
}

#[async_trait]
impl ConfigStore for PanosClient {
    async fn system_info(&self) -> Result<SystemInfo, StoreError> {
        let cmd = "<show><system><info></info></system></show>";
        let response = self.call(self.get(&[("type", "op"), ("cmd", cmd)])).await?;
        Ok(parse_system_info(&response))
    }

    async fn read(&self, path: &ConfigPath) -> Result<Option<ConfigNode>, StoreError> {
        self.read_config("get", path).await
    }

    async fn read_running(&self, path: &ConfigPath) -> Result<Option<ConfigNode>, StoreError> {
        self.read_config("show", path).await
    }

    async fn write(
        &self,
        path: &ConfigPath,
        element: &ConfigNode,
        mode: WriteMode,
    ) -> Result<(), StoreError> {
        let xpath = path.to_xpath();
        let action = match mode {
            WriteMode::Create => "set",
            WriteMode::Replace => "edit",
        };
        let element = element.to_xml();
        tracing::debug!(xpath = %xpath, action, "config write");
        self.call(self.get(&[
            ("type", "config"),
            ("action", action),
            ("xpath", xpath.as_str()),
            ("element", element.as_str()),
        ]))
        .await?;
        Ok(())
    }

    async fn import(&self, request: &ImportRequest) -> Result<(), StoreError> {
        let form = import_form(request)?;
        tracing::debug!(
            name = %request.name,
            category = request.category.as_str(),
            bytes = request.pem.len(),
            "import"
        );
        let builder = self
            .http
            .post(&self.base_url)
            .header(API_KEY_HEADER, self.api_key.as_str())
            .query(&import_query(request))
            .multipart(form)
            .timeout(self.request_timeout);
        self.call(builder).await?;
        Ok(())
    }

    async fn export(
        &self,
        category: ExportCategory,
        timeout: Duration,
    ) -> Result<Vec<u8>, StoreError> {
        tracing::debug!(category = category.as_str(), timeout_secs = timeout.as_secs(), "export");
        let request = self
            .get(&[("type", "export"), ("category", category.as_str())])
            .timeout(timeout);
        let body = self.send(request, timeout).await?;
        check_export_body(&body)?;
        Ok(body)
    }

    async fn commit(&self, scope: &CommitScope) -> Result<CommitSubmission, StoreError> {
        let cmd = partial_commit_cmd(scope);
        tracing::debug!(operator = scope.operator_name(), "commit");
        let response = self.call(self.get(&[("type", "commit"), ("cmd", cmd.as_str())])).await?;
        parse_commit_response(&response)
    }

    async fn job_status(&self, job: &JobHandle) -> Result<JobState, StoreError> {
        let cmd = format!(
            "<show><jobs><id>{}</id></jobs></show>",
            quick_xml::escape::escape(job.0.as_str())
        );
        let response = self.call(self.get(&[("type", "op"), ("cmd", cmd.as_str())])).await?;
        parse_job_state(&response)
    }
}

fn map_transport(e: reqwest::Error, timeout: Duration) -> StoreError {
    if e.is_timeout() {
        StoreError::Timeout {
            secs: timeout.as_secs(),
        }
    } else if e.is_connect() {
        StoreError::Connectivity(e.to_string())
    } else if e.is_decode() || e.is_body() {
        StoreError::Decode(e.to_string())
    } else {
        StoreError::Connectivity(e.to_string())
    }
}

/// Query parameters of an import. The passphrase travels in the form body.
fn import_query(request: &ImportRequest) -> [(&str, &str); 4] {
    [
        ("type", "import"),
        ("category", request.category.as_str()),
        ("certificate-name", request.name.as_str()),
        ("format", "pem"),
    ]
}

fn import_form(request: &ImportRequest) -> Result<Form, StoreError> {
    let part = Part::bytes(request.pem.clone())
        .file_name(format!("{}.pem", request.category.as_str()))
        .mime_str("application/x-pem-file")
        .map_err(|e| StoreError::Decode(format!("invalid multipart part: {e}")))?;
    let mut form = Form::new().part("file", part);
    if let Some(passphrase) = &request.passphrase {
        form = form.text("passphrase", passphrase.to_string());
    }
    Ok(form)
}

/// First element under `<result>`. An empty result (`<result/>` or a
/// result with only a count attribute) means nothing is configured.
fn configured_node(response: &ConfigNode) -> Option<ConfigNode> {
    response
        .child("result")
        .and_then(|result| result.children.first().cloned())
}

/// `<commit><partial><admin><member>NAME</member></admin></partial></commit>`
pub fn partial_commit_cmd(scope: &CommitScope) -> String {
    let member = ConfigNode::leaf("member", scope.operator_name());
    let cmd = ConfigNode::new("commit").with_child(
        ConfigNode::new("partial").with_child(ConfigNode::new("admin").with_child(member)),
    );
    cmd.to_xml()
}

/// Decode a `<response>` document, mapping `status="error"` to a store error.
pub fn parse_response(xml: &str) -> Result<ConfigNode, StoreError> {
    let root = ConfigNode::parse(xml)?;
    if root.tag != "response" {
        return Err(StoreError::Decode(format!(
            "expected <response>, got <{}>",
            root.tag
        )));
    }
    match root.attribute("status") {
        Some("success") => Ok(root),
        Some("error") => {
            if root.attribute("code") == Some("403") {
                return Err(StoreError::Unauthorized);
            }
            Err(StoreError::Rejected {
                message: error_message(&root),
            })
        }
        other => Err(StoreError::Decode(format!(
            "unexpected response status: {other:?}"
        ))),
    }
}

fn error_message(root: &ConfigNode) -> String {
    let lines = root
        .find_descendant("msg")
        .map(ConfigNode::collect_text)
        .unwrap_or_default();
    if lines.is_empty() {
        "unknown error".to_string()
    } else {
        lines.join("; ")
    }
}

fn parse_system_info(response: &ConfigNode) -> SystemInfo {
    let system = response
        .child("result")
        .and_then(|r| r.child("system"));
    let field = |tag: &str| {
        system
            .and_then(|s| s.child_text(tag))
            .unwrap_or("unknown")
            .to_string()
    };
    SystemInfo {
        hostname: field("hostname"),
        model: field("model"),
        sw_version: field("sw-version"),
    }
}

/// Exports answer with the archive itself, or with an error `<response>`.
fn check_export_body(body: &[u8]) -> Result<(), StoreError> {
    if body.is_empty() {
        return Err(StoreError::Decode("empty export".to_string()));
    }
    let head = &body[..body.len().min(256)];
    let head = String::from_utf8_lossy(head);
    if head.trim_start().starts_with("<response") {
        let xml = String::from_utf8_lossy(body);
        parse_response(&xml)?;
    }
    Ok(())
}

fn parse_commit_response(response: &ConfigNode) -> Result<CommitSubmission, StoreError> {
    if let Some(job) = response
        .child("result")
        .and_then(|r| r.child_text("job"))
    {
        return Ok(CommitSubmission::Queued {
            job: JobHandle(job.to_string()),
        });
    }
    let message = error_message(response);
    if message.to_ascii_lowercase().contains("no changes") {
        return Ok(CommitSubmission::NothingToCommit);
    }
    Err(StoreError::Decode(format!(
        "commit accepted without a job id: {message}"
    )))
}

fn parse_job_state(response: &ConfigNode) -> Result<JobState, StoreError> {
    let job = response
        .child("result")
        .and_then(|r| r.child("job"))
        .ok_or_else(|| StoreError::Decode("job status without <job>".to_string()))?;

    let status = job.child_text("status").unwrap_or("");
    let result = job.child_text("result").unwrap_or("");
    if status != "FIN" {
        let progress = job
            .child_text("progress")
            .and_then(|p| p.parse::<u8>().ok());
        return Ok(JobState::Running { progress });
    }
    if result == "OK" {
        return Ok(JobState::Succeeded);
    }
    let details = job
        .child("details")
        .map(ConfigNode::collect_text)
        .filter(|lines| !lines.is_empty())
        .map(|lines| lines.join("; "))
        .unwrap_or_else(|| format!("job finished with result {result:?}"));
    Ok(JobState::Failed { details })
}
