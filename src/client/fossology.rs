//! # FOSSology REST Client
//!
//! Thin wrapper over the FOSSology v1 REST API: folders, uploads, file search,
//! jobs and reports. Response bodies are decoded by the free `parse_*`
//! functions so the decoding rules can be tested without a server.
//!
//! All requests carry `Authorization: Bearer <token>`. Ids handed out by the
//! service are numeric; they travel through the orchestrator as strings.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, RETRY_AFTER};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{JobStatus, ReportStatusResponse, ScanStatusResponse, UnpackStatusResponse};
use crate::config::ToolConfig;
use crate::constants::fossology::{REPORT_FORMAT_SPDX2, UPLOAD_TYPE_FILE};
use crate::error::{ToolError, ToolResult};

/// Result of a report download attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportDownload {
    Ready(Vec<u8>),
    /// The service answered 503, the report is still being generated
    NotReady { retry_after: Option<Duration> },
}

/// REST operations of the scanning service used by the process handler
#[async_trait]
pub trait FossologyApi: Send + Sync {
    /// `GET folders` answered with 200
    async fn check_connection(&self) -> ToolResult<bool>;

    /// Newest earlier upload of the same archive that lives in the configured folder
    async fn find_existing_upload(&self, sha1: &str, filename: &str) -> ToolResult<Option<String>>;

    /// Upload an archive, returning the upload id
    async fn upload_file(
        &self,
        filename: &str,
        content: Vec<u8>,
        description: Option<&str>,
    ) -> ToolResult<String>;

    /// Start the scan job for an upload, returning the job id
    async fn start_scan(&self, upload_id: &str) -> ToolResult<String>;

    async fn scan_status(&self, job_id: &str) -> ToolResult<ScanStatusResponse>;

    async fn unpack_status(&self, upload_id: &str) -> ToolResult<UnpackStatusResponse>;

    /// Start SPDX report generation, returning the report id
    async fn start_report(&self, upload_id: &str) -> ToolResult<String>;

    /// Status of the report generation job, without downloading the report
    async fn report_status(&self, report_id: &str) -> ToolResult<ReportStatusResponse>;

    async fn download_report(&self, report_id: &str) -> ToolResult<ReportDownload>;
}

/// Generic `{code, message, type}` answer of the service
#[derive(Debug, Clone, Deserialize)]
pub struct FossologyResponse {
    pub code: u16,
    #[serde(default)]
    pub message: Value,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl FossologyResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Message as text; numeric messages are rendered without quotes
    pub fn message_text(&self) -> String {
        value_as_text(&self.message).unwrap_or_default()
    }
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Ids exchanged with the service must be non-negative integers
pub fn validate_id(field: &str, value: &str) -> ToolResult<u64> {
    value.trim().parse::<u64>().map_err(|_| {
        ToolError::Validation(format!("{field} must be a non-negative integer, got '{value}'"))
    })
}

/// Numeric id carried in the message of a successful response
pub fn parse_message_id(response: &FossologyResponse, field: &str) -> ToolResult<String> {
    if !response.is_success() {
        return Err(ToolError::api_error(response.code, response.message_text()));
    }

    let message = response.message_text();
    message
        .parse::<u64>()
        .map(|id| id.to_string())
        .map_err(|_| ToolError::invalid_response(field, format!("non-integer id '{message}'")))
}

/// Report id: last path segment of the message, e.g. `.../report/24`
pub fn parse_report_id(response: &FossologyResponse) -> ToolResult<String> {
    if !response.is_success() {
        return Err(ToolError::api_error(response.code, response.message_text()));
    }

    let message = response.message_text();
    let segment = message.rsplit('/').next().unwrap_or_default();
    segment
        .parse::<u64>()
        .map(|id| id.to_string())
        .map_err(|_| {
            ToolError::invalid_response("report_id", format!("no report id in '{message}'"))
        })
}

/// Status of the job entry belonging to `upload_id` in a `GET jobs?upload=` answer
pub fn parse_unpack_status(upload_id: &str, body: &Value) -> ToolResult<UnpackStatusResponse> {
    let jobs = body
        .as_array()
        .filter(|jobs| !jobs.is_empty())
        .ok_or_else(|| ToolError::invalid_response("jobs", "empty or non-array response"))?;

    let entry = jobs
        .iter()
        .find(|job| {
            job.get("uploadId")
                .and_then(value_as_text)
                .is_some_and(|id| id == upload_id.trim())
        })
        .ok_or_else(|| {
            ToolError::invalid_response("uploadId", format!("no job entry for upload {upload_id}"))
        })?;

    let status = entry
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::invalid_response("status", "missing in job entry"))?
        .parse::<JobStatus>()?;

    Ok(UnpackStatusResponse {
        status,
        raw: entry.clone(),
    })
}

/// Status and ETA of a `GET jobs/{id}` answer
pub fn parse_scan_status(body: &Value) -> ToolResult<ScanStatusResponse> {
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::invalid_response("status", "missing in scan job"))?
        .parse::<JobStatus>()?;

    let eta = body
        .get("eta")
        .and_then(Value::as_i64)
        .filter(|seconds| *seconds > 0)
        .map(|seconds| Duration::from_secs(seconds.unsigned_abs()));

    Ok(ScanStatusResponse {
        status,
        eta,
        raw: body.clone(),
    })
}

/// Upload ids of a `POST filesearch` answer, newest (highest) first
pub fn parse_filesearch_uploads(body: &Value) -> Vec<String> {
    let mut uploads: Vec<u64> = body
        .as_array()
        .and_then(|hits| hits.first())
        .and_then(|hit| hit.get("uploads"))
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(value_as_text)
                .filter_map(|id| id.parse::<u64>().ok())
                .collect()
        })
        .unwrap_or_default();

    uploads.sort_unstable_by(|a, b| b.cmp(a));
    uploads.into_iter().map(|id| id.to_string()).collect()
}

/// `folderid` of a `GET uploads/{id}` answer
pub fn parse_folder_id(body: &Value) -> Option<String> {
    body.get("folderid").and_then(value_as_text)
}

/// Request body of a scan job: every agent on, decider and reuse defaults
pub fn scan_job_body() -> Value {
    json!({
        "analysis": {
            "bucket": true,
            "copyright_email_author": true,
            "ecc": true,
            "keyword": true,
            "mime": true,
            "monk": true,
            "nomos": true,
            "ojo": true,
            "package": true
        },
        "decider": {
            "nomos_monk": true,
            "bulk_reused": true,
            "new_scanner": true
        },
        "reuse": {
            "reuse_upload": 0,
            "reuse_group": 0,
            "reuse_main": true,
            "reuse_enhanced": true
        }
    })
}

fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// HTTP client for the FOSSology REST API
#[derive(Clone)]
pub struct FossologyRestClient {
    client: Client,
    base_url: Url,
    config: ToolConfig,
}

impl std::fmt::Debug for FossologyRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FossologyRestClient")
            .field("base_url", &self.base_url.as_str())
            .field("folder_id", &self.config.folder_id)
            .field("timeout_ms", &self.config.request_timeout_ms)
            .field("token_configured", &!self.config.access_token.is_empty())
            .finish()
    }
}

impl FossologyRestClient {
    pub fn new(config: ToolConfig) -> ToolResult<Self> {
        if config.base_url.trim().is_empty() {
            return Err(ToolError::config_error("tool.base_url is not configured"));
        }

        let base_url = Url::parse(&config.base_url_with_slash())
            .map_err(|e| ToolError::config_error(format!("Invalid base URL: {e}")))?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(format!("scan-orchestrator/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ToolError::config_error(format!("Failed to create HTTP client: {e}")))?;

        info!(
            base_url = %base_url,
            timeout_ms = config.request_timeout_ms,
            "Created FOSSology REST client"
        );

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> ToolResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ToolError::config_error(format!("Failed to construct URL for {path}: {e}")))
    }

    fn token(&self) -> ToolResult<&str> {
        let token = self.config.access_token.trim();
        if token.is_empty() {
            return Err(ToolError::config_error("tool.access_token is not configured"));
        }
        Ok(token)
    }

    fn folder_id(&self) -> ToolResult<&str> {
        let folder_id = self.config.folder_id.trim();
        if folder_id.is_empty() {
            return Err(ToolError::config_error("tool.folder_id is not configured"));
        }
        Ok(folder_id)
    }

    async fn handle_response<T>(&self, response: reqwest::Response, operation: &str) -> ToolResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        if response.status().is_success() {
            let result = response.json::<T>().await.map_err(|e| {
                ToolError::invalid_response(operation, format!("failed to parse response: {e}"))
            })?;
            debug!("Successfully completed operation: {}", operation);
            Ok(result)
        } else {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, error = %error_text, "Failed operation: {}", operation);
            Err(ToolError::api_error(status.as_u16(), error_text))
        }
    }

    async fn upload_folder_id(&self, upload_id: &str) -> ToolResult<Option<String>> {
        let url = self.endpoint(&format!("uploads/{upload_id}"))?;
        let response = self.client.get(url).bearer_auth(self.token()?).send().await?;
        let body: Value = self.handle_response(response, "get_upload").await?;
        Ok(parse_folder_id(&body))
    }
}

fn same_folder(found: &str, configured: &str) -> bool {
    match (found.trim().parse::<u64>(), configured.trim().parse::<u64>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => found.trim() == configured.trim(),
    }
}

#[async_trait]
impl FossologyApi for FossologyRestClient {
    async fn check_connection(&self) -> ToolResult<bool> {
        let url = self.endpoint("folders")?;
        let response = self.client.get(url).bearer_auth(self.token()?).send().await?;
        let reachable = response.status() == StatusCode::OK;
        debug!(status = %response.status(), reachable, "Checked FOSSology connection");
        Ok(reachable)
    }

    async fn find_existing_upload(&self, sha1: &str, filename: &str) -> ToolResult<Option<String>> {
        let folder_id = self.folder_id()?.to_string();
        let url = self.endpoint("filesearch")?;

        debug!(sha1 = %sha1, filename = %filename, "Searching for earlier upload");
        let response = self
            .client
            .post(url)
            .bearer_auth(self.token()?)
            .json(&json!([{ "sha1": sha1 }]))
            .send()
            .await?;
        let body: Value = self.handle_response(response, "filesearch").await?;

        for upload_id in parse_filesearch_uploads(&body) {
            match self.upload_folder_id(&upload_id).await {
                Ok(Some(found)) if same_folder(&found, &folder_id) => {
                    debug!(upload_id = %upload_id, filename = %filename, "Found existing upload in target folder");
                    return Ok(Some(upload_id));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(upload_id = %upload_id, error = %e, "Could not resolve folder of earlier upload");
                }
            }
        }

        info!(sha1 = %sha1, filename = %filename, "No existing upload found in target folder");
        Ok(None)
    }

    async fn upload_file(
        &self,
        filename: &str,
        content: Vec<u8>,
        description: Option<&str>,
    ) -> ToolResult<String> {
        if filename.trim().is_empty() {
            return Err(ToolError::Validation("filename must not be empty".to_string()));
        }

        let url = self.endpoint("uploads")?;
        let part = Part::bytes(content).file_name(filename.to_string());
        let form = Form::new().part("fileInput", part);

        let mut request = self
            .client
            .post(url)
            .bearer_auth(self.token()?)
            .header("folderId", self.folder_id()?)
            .header("uploadType", UPLOAD_TYPE_FILE)
            .multipart(form);
        if let Some(description) = description.filter(|d| !d.trim().is_empty()) {
            request = request.header("uploadDescription", description);
        }

        debug!(filename = %filename, "Uploading archive to FOSSology");
        let response = request.send().await?;
        let body: FossologyResponse = self.handle_response(response, "upload").await?;
        let upload_id = parse_message_id(&body, "upload_id")?;
        info!(filename = %filename, upload_id = %upload_id, "Archive uploaded");
        Ok(upload_id)
    }

    async fn start_scan(&self, upload_id: &str) -> ToolResult<String> {
        validate_id("upload_id", upload_id)?;
        let url = self.endpoint("jobs")?;

        let response = self
            .client
            .post(url)
            .bearer_auth(self.token()?)
            .header("folderId", self.folder_id()?)
            .header("uploadId", upload_id.trim())
            .json(&scan_job_body())
            .send()
            .await?;
        let body: FossologyResponse = self.handle_response(response, "start_scan").await?;
        let job_id = parse_message_id(&body, "job_id")?;
        debug!(upload_id = %upload_id, job_id = %job_id, "Scan job started");
        Ok(job_id)
    }

    async fn scan_status(&self, job_id: &str) -> ToolResult<ScanStatusResponse> {
        validate_id("job_id", job_id)?;
        let url = self.endpoint(&format!("jobs/{}", job_id.trim()))?;
        let response = self.client.get(url).bearer_auth(self.token()?).send().await?;
        let body: Value = self.handle_response(response, "scan_status").await?;
        parse_scan_status(&body)
    }

    async fn unpack_status(&self, upload_id: &str) -> ToolResult<UnpackStatusResponse> {
        validate_id("upload_id", upload_id)?;
        let url = self.endpoint("jobs")?;
        let response = self
            .client
            .get(url)
            .query(&[("upload", upload_id.trim())])
            .bearer_auth(self.token()?)
            .send()
            .await?;
        let body: Value = self.handle_response(response, "unpack_status").await?;
        parse_unpack_status(upload_id, &body)
    }

    async fn start_report(&self, upload_id: &str) -> ToolResult<String> {
        validate_id("upload_id", upload_id)?;
        let url = self.endpoint("report")?;
        let response = self
            .client
            .get(url)
            .bearer_auth(self.token()?)
            .header("uploadId", upload_id.trim())
            .header("reportFormat", REPORT_FORMAT_SPDX2)
            .send()
            .await?;
        let body: FossologyResponse = self.handle_response(response, "start_report").await?;
        let report_id = parse_report_id(&body)?;
        debug!(upload_id = %upload_id, report_id = %report_id, "Report generation started");
        Ok(report_id)
    }

    async fn report_status(&self, report_id: &str) -> ToolResult<ReportStatusResponse> {
        validate_id("report_id", report_id)?;
        let url = self.endpoint(&format!("jobs/{}", report_id.trim()))?;
        let response = self.client.get(url).bearer_auth(self.token()?).send().await?;
        let body: Value = self.handle_response(response, "report_status").await?;
        parse_scan_status(&body)
    }

    async fn download_report(&self, report_id: &str) -> ToolResult<ReportDownload> {
        validate_id("report_id", report_id)?;
        let url = self.endpoint(&format!("report/{}", report_id.trim()))?;
        let response = self
            .client
            .get(url)
            .bearer_auth(self.token()?)
            .header(ACCEPT, "text/plain")
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            let retry_after = parse_retry_after(&response);
            info!(report_id = %report_id, ?retry_after, "Report not ready yet");
            return Ok(ReportDownload::NotReady { retry_after });
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, error = %error_text, report_id = %report_id, "Report download failed");
            return Err(ToolError::api_error(status.as_u16(), error_text));
        }

        let bytes = response.bytes().await?;
        debug!(report_id = %report_id, size = bytes.len(), "Report downloaded");
        Ok(ReportDownload::Ready(bytes.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(code: u16, message: Value) -> FossologyResponse {
        FossologyResponse {
            code,
            message,
            kind: "INFO".to_string(),
        }
    }

    #[test]
    fn test_message_id_accepts_numbers_and_strings() {
        assert_eq!(parse_message_id(&response(201, json!(19)), "upload_id").unwrap(), "19");
        assert_eq!(parse_message_id(&response(201, json!("23")), "job_id").unwrap(), "23");
        assert!(matches!(
            parse_message_id(&response(201, json!("abc")), "job_id"),
            Err(ToolError::InvalidResponse { .. })
        ));
        assert!(matches!(
            parse_message_id(&response(500, json!("boom")), "job_id"),
            Err(ToolError::Api { status: 500, .. })
        ));
    }

    #[test]
    fn test_report_id_is_last_path_segment() {
        let body = response(
            201,
            json!("http://fossology:8081/repo/api/v1/report/24"),
        );
        assert_eq!(parse_report_id(&body).unwrap(), "24");
        assert!(parse_report_id(&response(201, json!("http://host/report/"))).is_err());
    }

    #[test]
    fn test_unpack_status_picks_requested_upload() {
        let body = json!([
            {"id": 7, "uploadId": 18, "status": "Completed"},
            {"id": 8, "uploadId": "19", "status": "Processing"},
            {"id": 9, "uploadId": 19, "status": "Completed"}
        ]);

        let status = parse_unpack_status("19", &body).unwrap();
        assert_eq!(status.status, JobStatus::Processing);
        assert_eq!(status.raw["id"], 8);

        assert!(parse_unpack_status("20", &body).is_err());
        assert!(parse_unpack_status("19", &json!([])).is_err());
    }

    #[test]
    fn test_scan_status_reads_status_and_eta() {
        let status = parse_scan_status(&json!({"id": 23, "status": "Processing", "eta": 42})).unwrap();
        assert_eq!(status.status, JobStatus::Processing);
        assert_eq!(status.eta, Some(Duration::from_secs(42)));

        let done = parse_scan_status(&json!({"status": "Completed", "eta": 0})).unwrap();
        assert_eq!(done.eta, None);

        assert!(parse_scan_status(&json!({"eta": 3})).is_err());
    }

    #[test]
    fn test_filesearch_uploads_newest_first() {
        let body = json!([{"hash": {"sha1": "abc"}, "uploads": [3, "12", 7]}]);
        assert_eq!(parse_filesearch_uploads(&body), vec!["12", "7", "3"]);
        assert!(parse_filesearch_uploads(&json!([])).is_empty());
        assert!(parse_filesearch_uploads(&json!([{"message": "not found"}])).is_empty());
    }

    #[test]
    fn test_folder_helpers() {
        assert_eq!(parse_folder_id(&json!({"folderid": 1})), Some("1".to_string()));
        assert_eq!(parse_folder_id(&json!({})), None);
        assert!(same_folder("01", "1"));
        assert!(!same_folder("2", "1"));
    }

    #[test]
    fn test_scan_job_body_shape() {
        let body = scan_job_body();
        assert_eq!(body["analysis"].as_object().unwrap().len(), 9);
        assert_eq!(body["decider"]["bulk_reused"], true);
        assert_eq!(body["reuse"]["reuse_upload"], 0);
    }

    #[test]
    fn test_validate_id() {
        assert_eq!(validate_id("upload_id", " 19 ").unwrap(), 19);
        assert!(matches!(
            validate_id("upload_id", "-1"),
            Err(ToolError::Validation(_))
        ));
    }

    #[test]
    fn test_client_requires_base_url() {
        assert!(matches!(
            FossologyRestClient::new(ToolConfig::default()),
            Err(ToolError::Configuration(_))
        ));

        let client = FossologyRestClient::new(ToolConfig {
            base_url: "http://fossology:8081/repo/api/v1".to_string(),
            ..ToolConfig::default()
        })
        .unwrap();
        assert_eq!(
            client.endpoint("jobs/23").unwrap().as_str(),
            "http://fossology:8081/repo/api/v1/jobs/23"
        );
        assert!(client.token().is_err());
    }
}
