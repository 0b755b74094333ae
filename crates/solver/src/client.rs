//! HTTP client for the astrometry.net API.

use crate::error::{SolverError, SolverResult};
use crate::policy;
use crate::{JobStatus, PlateSolver, Session, SubmissionStatus};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE, REFERER};
use reqwest::multipart;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use skycat_core::{Calibration, ProviderKind, SolveHints};
use std::path::Path;
use std::time::Duration;

const NOVA_HOST: &str = "nova.astrometry.net";
const NOVA_ROOT_URL: &str = "https://nova.astrometry.net";
const NOVA_STATUS_ROOT: &str = "http://nova.astrometry.net";

#[derive(Debug, Deserialize)]
struct LoginResponse {
    status: String,
    session: Option<String>,
    #[serde(default)]
    errormessage: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    status: String,
    subid: Option<u64>,
    #[serde(default)]
    errormessage: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmissionResponse {
    #[serde(default)]
    jobs: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct JobResponse {
    status: Option<String>,
}

/// Client for one astrometry.net-compatible service.
#[derive(Clone)]
pub struct AstrometryClient {
    http: reqwest::Client,
    provider: ProviderKind,
    api_url: String,
    root_url: String,
    api_key: Option<String>,
}

impl AstrometryClient {
    pub fn new(
        provider: ProviderKind,
        api_url: &str,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> SolverResult<Self> {
        let api_url = api_url.trim_end_matches('/').to_string();
        if api_url.is_empty() {
            return Err(SolverError::Config("solver api_url is empty".to_string()));
        }
        // Cookies carry the human-check clearance between preview requests.
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .user_agent(concat!("skycat/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            provider,
            root_url: root_url_for(&api_url),
            api_url,
            api_key: api_key.map(str::to_string),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> SolverResult<T> {
        let response = self.http.get(&url).send().await?;
        decode_json(response).await
    }

    async fn get_bytes(&self, url: String) -> SolverResult<Bytes> {
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SolverError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.bytes().await?)
    }

    async fn clear_human_check(
        &self,
        page_url: &str,
        cookie_token: Option<String>,
        body: &str,
        job_id: &str,
    ) -> SolverResult<reqwest::Response> {
        let token = cookie_token
            .or_else(|| form_value(body, "csrfmiddlewaretoken"))
            .ok_or_else(|| SolverError::HumanCheck("no CSRF token on the check page".into()))?;
        let next = form_value(body, "next").unwrap_or_else(|| format!("/annotated_display/{job_id}"));

        let am_human = format!("{}/am_human", self.root_url);
        tracing::info!(url = %am_human, "Posting human-check bypass");
        let response = self
            .http
            .post(&am_human)
            .header(REFERER, page_url)
            .form(&[
                ("csrfmiddlewaretoken", token.as_str()),
                ("human", "yup"),
                ("next", next.as_str()),
            ])
            .send()
            .await?;
        Ok(response)
    }
}

async fn decode_json<T: DeserializeOwned>(response: reqwest::Response) -> SolverResult<T> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(SolverError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(serde_json::from_str(&body)?)
}

/// `https://nova.astrometry.net` for the public service, otherwise the API
/// URL without its trailing `/api`.
pub fn root_url_for(api_url: &str) -> String {
    let api_url = api_url.trim_end_matches('/');
    if api_url.contains(NOVA_HOST) {
        return NOVA_ROOT_URL.to_string();
    }
    api_url
        .strip_suffix("/api")
        .unwrap_or(api_url)
        .to_string()
}

fn content_type(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn is_human_check(url: &str, body: &str) -> bool {
    url.contains("ask_human")
        || url.contains("iocaine")
        || body.contains("Human check")
        || body.contains("am_human")
}

/// Value of a hidden form input, `name="{name}" value="..."`.
fn form_value(html: &str, name: &str) -> Option<String> {
    let marker = format!("name=\"{name}\" value=\"");
    let start = html.find(&marker)? + marker.len();
    let len = html[start..].find('"')?;
    Some(html[start..start + len].to_string())
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("tif" | "tiff") => "image/tiff",
        Some("fit" | "fits" | "fts") => "application/fits",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl PlateSolver for AstrometryClient {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    async fn login(&self) -> SolverResult<Session> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                SolverError::Config(format!("no api key configured for {}", self.provider))
            })?;

        let request_json = serde_json::json!({ "apikey": api_key });
        let response = self
            .http
            .post(format!("{}/login", self.api_url))
            .form(&[("request-json", request_json.to_string())])
            .send()
            .await?;
        let login: LoginResponse = decode_json(response).await?;

        if login.status != "success" {
            return Err(SolverError::Rejected(format!(
                "login failed: {}",
                login.errormessage.unwrap_or_else(|| "unknown error".to_string())
            )));
        }
        let session = login
            .session
            .ok_or_else(|| SolverError::Rejected("login response has no session".into()))?;
        tracing::debug!(provider = %self.provider, "Logged in to solver");
        Ok(Session::new(session))
    }

    async fn upload(
        &self,
        session: &Session,
        path: &Path,
        hints: &SolveHints,
    ) -> SolverResult<String> {
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let request = policy::upload_request(self.provider, session.as_str(), hints);
        tracing::info!(
            provider = %self.provider,
            file = %file_name,
            hinted = self.provider.accepts_hints() && !hints.is_empty(),
            "Uploading to solver"
        );

        let form = multipart::Form::new()
            .text("request-json", serde_json::Value::Object(request).to_string())
            .part(
                "file",
                multipart::Part::bytes(data)
                    .file_name(file_name)
                    .mime_str(mime_for(path))?,
            );

        let response = self
            .http
            .post(format!("{}/upload", self.api_url))
            .multipart(form)
            .send()
            .await?;
        let upload: UploadResponse = decode_json(response).await?;

        if upload.status != "success" {
            return Err(SolverError::Rejected(format!(
                "upload failed: {}",
                upload.errormessage.unwrap_or_else(|| "unknown error".to_string())
            )));
        }
        let subid = upload
            .subid
            .ok_or_else(|| SolverError::Rejected("upload response has no subid".into()))?;
        Ok(subid.to_string())
    }

    async fn submission_status(&self, submission_id: &str) -> SolverResult<SubmissionStatus> {
        let response: SubmissionResponse = self
            .get_json(format!("{}/submissions/{}", self.api_url, submission_id))
            .await?;
        Ok(SubmissionStatus {
            jobs: response.jobs,
        })
    }

    async fn job_status(&self, job_id: &str) -> SolverResult<JobStatus> {
        let response: JobResponse = self
            .get_json(format!("{}/jobs/{}", self.api_url, job_id))
            .await?;
        Ok(JobStatus::from_wire(response.status.as_deref().unwrap_or("")))
    }

    async fn calibration(&self, job_id: &str) -> SolverResult<Calibration> {
        self.get_json(format!("{}/jobs/{}/calibration/", self.api_url, job_id))
            .await
    }

    async fn distortion_header(&self, job_id: &str) -> SolverResult<Bytes> {
        self.get_bytes(format!("{}/wcs_file/{}", self.root_url, job_id))
            .await
    }

    async fn annotated_preview(&self, job_id: &str) -> SolverResult<Bytes> {
        let url = format!("{}/annotated_display/{}", self.root_url, job_id);
        tracing::info!(url = %url, "Downloading annotated preview");

        let mut response = self
            .http
            .get(&url)
            .header(ACCEPT, "image/*,text/html;q=0.8,*/*;q=0.5")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SolverError::Api {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        if content_type(&response).contains("text/html") {
            let page_url = response.url().to_string();
            let cookie_token = response
                .cookies()
                .find(|c| c.name() == "csrftoken")
                .map(|c| c.value().to_string());
            let body = response.text().await?;
            if !is_human_check(&page_url, &body) {
                return Err(SolverError::Rejected(format!(
                    "received HTML instead of an image from {page_url}"
                )));
            }

            tracing::info!(url = %page_url, "Human verification requested, attempting bypass");
            response = self
                .clear_human_check(&page_url, cookie_token, &body, job_id)
                .await?;
            if !content_type(&response).contains("image") {
                tracing::info!("Bypass sent, retrying preview download");
                response = self.http.get(&url).send().await?;
            }
        }

        let final_type = content_type(&response);
        if !final_type.contains("image") {
            let final_url = response.url().to_string();
            if final_type.contains("text/html") {
                return Err(SolverError::HumanCheck(format!(
                    "still redirected to {final_url}"
                )));
            }
            return Err(SolverError::Rejected(format!(
                "preview content-type is {final_type:?}, expected an image"
            )));
        }
        Ok(response.bytes().await?)
    }

    fn status_page_url(&self, submission_id: &str) -> String {
        match self.provider {
            ProviderKind::Nova => format!("{NOVA_STATUS_ROOT}/status/{submission_id}"),
            ProviderKind::Local => format!("{}/status/{}", self.root_url, submission_id),
        }
    }
}
