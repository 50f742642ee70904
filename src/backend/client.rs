//! reqwest implementation of [`BackendApi`].

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{
    Body, Client, RequestBuilder, Response, StatusCode,
    multipart::{Form, Part},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    api::{BackendApi, ProgressFn, UploadSource},
    auth::{Credentials, Session},
    token_store::{FileTokenStore, StoredToken},
};
use crate::{
    config::Config,
    models::{CancelAck, FilePreview, FileUploadResponse, ProcessingStarted, TaskStatus},
};

/// Upload body chunk size; progress is reported per chunk.
const UPLOAD_CHUNK: usize = 64 * 1024;

#[derive(Debug, Serialize)]
struct LoginReq<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResp {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
}

/// HTTP client for one backend.
#[derive(Debug)]
pub struct HttpBackend {
    http: Client,
    /// Base URL joined with the API prefix.
    api_root: String,
    session: Session,
}

impl HttpBackend {
    /// Build a client from the `[backend]` and `[auth]` config sections.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.backend.request_timeout_secs))
            .build()?;
        let store = FileTokenStore::new(&cfg.auth.token_path);
        Ok(Self {
            http,
            api_root: cfg.backend.api_root(),
            session: Session::new(cfg.backend.base_url.clone(), store),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_root, path)
    }

    async fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match self.session.bearer().await {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Send with the session token. A 401 drops the token and, when the
    /// password is known, logs in again and retries once.
    async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> Result<RequestBuilder> + Send + Sync,
    {
        let resp = self.authorized(build(&self.http)?).await.send().await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return ensure_success(resp).await;
        }
        tracing::warn!("token rejected by {}", self.api_root);
        let Some(credentials) = self.session.invalidate().await else {
            return ensure_success(resp).await;
        };
        self.obtain_token(credentials).await?;
        let retry = self.authorized(build(&self.http)?).await.send().await?;
        ensure_success(retry).await
    }

    async fn obtain_token(&self, credentials: Credentials) -> Result<()> {
        let body = LoginReq {
            username: &credentials.username,
            password: &credentials.password,
        };
        let resp = self
            .http
            .post(self.url("/auth/login"))
            .json(&body)
            .send()
            .await?;
        let resp = ensure_success(resp).await.context("login failed")?;
        let login = resp.json::<LoginResp>().await?;
        let token = StoredToken {
            access_token: login.access_token,
            token_type: login.token_type.unwrap_or_else(|| "bearer".into()),
            obtained_at: chrono::Utc::now().timestamp(),
        };
        tracing::info!("logged in as {}", credentials.username);
        self.session.remember(credentials, token).await;
        Ok(())
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn login(&self, username: &str, password: &str) -> Result<()> {
        self.obtain_token(Credentials {
            username: username.into(),
            password: password.into(),
        })
        .await
    }

    async fn upload_file(
        &self,
        source: UploadSource,
        progress: ProgressFn,
    ) -> Result<FileUploadResponse> {
        let url = self.url("/files/upload");
        let mime = spreadsheet_mime(&source.filename);
        tracing::info!(
            "uploading {} ({} bytes)",
            source.filename,
            source.bytes.len()
        );
        let resp = self
            .send(|http| {
                let len = source.bytes.len() as u64;
                let body = progress_body(source.bytes.clone(), progress.clone());
                let part = Part::stream_with_length(body, len)
                    .file_name(source.filename.clone())
                    .mime_str(mime)?;
                Ok(http.post(&url).multipart(Form::new().part("file", part)))
            })
            .await?;
        let uploaded = resp.json::<FileUploadResponse>().await?;
        progress(100);
        Ok(uploaded)
    }

    async fn get_preview(&self, file_id: &str) -> Result<FilePreview> {
        let url = self.url(&format!("/files/{}/preview", urlencoding::encode(file_id)));
        let resp = self.send(|http| Ok(http.get(&url))).await?;
        Ok(resp.json::<FilePreview>().await?)
    }

    async fn start_processing(
        &self,
        file_id: &str,
        options: &Map<String, Value>,
    ) -> Result<String> {
        let url = self.url(&format!("/files/{}/process", urlencoding::encode(file_id)));
        let resp = self.send(|http| Ok(http.post(&url).json(options))).await?;
        let started = resp.json::<ProcessingStarted>().await?;
        tracing::info!("processing {file_id} as task {}", started.task_id);
        Ok(started.task_id)
    }

    async fn get_task_status(&self, task_id: &str) -> Result<TaskStatus> {
        let url = self.url(&format!("/tasks/{}/status", urlencoding::encode(task_id)));
        let resp = self.send(|http| Ok(http.get(&url))).await?;
        Ok(resp.json::<TaskStatus>().await?)
    }

    async fn cancel_processing(&self, file_id: &str) -> Result<String> {
        let url = self.url(&format!("/files/{}/cancel", urlencoding::encode(file_id)));
        let resp = self.send(|http| Ok(http.post(&url))).await?;
        let text = resp.text().await?;
        // Some deployments answer with an empty body.
        let ack: CancelAck = serde_json::from_str(&text).unwrap_or_default();
        Ok(ack.message)
    }
}

/// Request body that reports the share of bytes handed to the transport.
fn progress_body(bytes: Vec<u8>, progress: ProgressFn) -> Body {
    let total = bytes.len().max(1);
    let chunks: Vec<Vec<u8>> = bytes.chunks(UPLOAD_CHUNK).map(<[u8]>::to_vec).collect();
    let mut sent = 0usize;
    let stream = futures::stream::iter(chunks.into_iter().map(move |chunk| {
        sent += chunk.len();
        // 100 is reported once the response arrives.
        progress(((sent * 99) / total) as u8);
        Ok::<_, std::io::Error>(chunk)
    }));
    Body::wrap_stream(stream)
}

fn spreadsheet_mime(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xlsm" => "application/vnd.ms-excel.sheet.macroEnabled.12",
        "xls" => "application/vnd.ms-excel",
        _ => "application/octet-stream",
    }
}

/// Turn non-2xx responses into errors, preferring the backend's `detail`.
async fn ensure_success(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_else(|_| "".into());
    Err(anyhow!("HTTP status {status} error: {}", error_detail(&body)))
}

/// FastAPI style `{"detail": "..."}` or `{"detail": [{"msg": "..."}]}`.
fn error_detail(body: &str) -> String {
    let Ok(v) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    match &v["detail"] {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|i| i["msg"].as_str())
            .collect::<Vec<_>>()
            .join("; "),
        _ => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::models::{RemoteTaskState, StatementType, TaskOutcome};

    fn backend(server: &MockServer, dir: &tempfile::TempDir) -> HttpBackend {
        let mut cfg = Config::default();
        cfg.backend.base_url = server.uri();
        cfg.auth.token_path = dir.path().join("token.json").display().to_string();
        HttpBackend::from_config(&cfg).unwrap()
    }

    async fn mount_login(server: &MockServer, token: &str) {
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/login"))
            .and(body_json(json!({"username": "analyst", "password": "pw"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": token, "token_type": "bearer"})),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_login_then_bearer_on_requests() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        mount_login(&server, "tok-1").await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tasks/t-9/status"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"status": "PROGRESS", "progress": 45, "current_step": "parsing"}),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let api = backend(&server, &dir);
        api.login("analyst", "pw").await.unwrap();
        let status = api.get_task_status("t-9").await.unwrap();
        assert_eq!(status.status, RemoteTaskState::Processing);
        assert_eq!(status.progress_percent(), 45);
        assert_eq!(status.current_step.as_deref(), Some("parsing"));

        // A second client for the same backend reuses the cached token.
        let cached = backend(&server, &dir);
        assert_eq!(cached.session.bearer().await.as_deref(), Some("tok-1"));
    }

    #[tokio::test]
    async fn test_unauthorized_relogs_once() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        mount_login(&server, "fresh").await;
        Mock::given(method("GET"))
            .and(path("/api/v1/files/f-1/preview"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sheets": [{"name": "P&L", "row_count": 10, "column_count": 2, "columns": ["a", "b"]}],
                "detected_statements": [
                    {"sheet_name": "P&L", "statement_type": "PROFIT_LOSS", "confidence": 0.9}
                ],
                "metadata": {}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/files/f-1/preview"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "expired"})))
            .mount(&server)
            .await;

        let api = backend(&server, &dir);
        api.login("analyst", "pw").await.unwrap();
        // Simulate the server revoking the token we hold.
        api.session
            .remember(
                Credentials {
                    username: "analyst".into(),
                    password: "pw".into(),
                },
                StoredToken {
                    access_token: "stale".into(),
                    token_type: "bearer".into(),
                    obtained_at: 0,
                },
            )
            .await;

        let preview = api.get_preview("f-1").await.unwrap();
        assert_eq!(preview.sheets[0].name, "P&L");
        assert_eq!(api.session.bearer().await.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_unauthorized_without_password_fails() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        Mock::given(method("POST"))
            .and(path("/api/v1/files/f-1/process"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"detail": "Not authenticated"})),
            )
            .mount(&server)
            .await;

        let err = backend(&server, &dir)
            .start_processing("f-1", &Map::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "HTTP status 401 Unauthorized error: Not authenticated"
        );
    }

    #[tokio::test]
    async fn test_start_processing_sends_options() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let options = json!({
            "currency": "USD",
            "statement_assignments": {"P&L": "PROFIT_LOSS"}
        });
        Mock::given(method("POST"))
            .and(path("/api/v1/files/f-1/process"))
            .and(body_json(options.clone()))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({"task_id": "t-1"})))
            .mount(&server)
            .await;

        let api = backend(&server, &dir);
        let Value::Object(map) = options else {
            unreachable!()
        };
        assert_eq!(api.start_processing("f-1", &map).await.unwrap(), "t-1");
    }

    #[tokio::test]
    async fn test_upload_reports_progress() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        Mock::given(method("POST"))
            .and(path("/api/v1/files/upload"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": 17,
                "original_filename": "report.xlsx",
                "file_size": 200000,
                "status": "uploaded"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressFn = Arc::new(move |p| sink.lock().unwrap().push(p));
        let source = UploadSource {
            filename: "report.xlsx".into(),
            bytes: vec![7u8; 200_000],
        };

        let resp = backend(&server, &dir)
            .upload_file(source, progress)
            .await
            .unwrap();
        assert_eq!(resp.id, "17");

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.last(), Some(&100));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!(seen.len() >= 4);

        let requests = server.received_requests().await.unwrap();
        let content_type = requests[0].headers.get("content-type").unwrap();
        assert!(
            content_type
                .to_str()
                .unwrap()
                .starts_with("multipart/form-data")
        );
    }

    #[tokio::test]
    async fn test_preview_and_terminal_status_parse() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        Mock::given(method("GET"))
            .and(path("/api/v1/files/f-1/preview"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sheets": [
                    {"name": "P&L", "row_count": 40, "column_count": 3, "columns": ["Line", "FY23", "FY24"]},
                    {"name": "BS", "row_count": 25, "column_count": 3, "columns": []}
                ],
                "detected_statements": [
                    {"sheet_name": "P&L", "statement_type": "PROFIT_LOSS", "confidence": 0.95}
                ],
                "metadata": {"workbook": "report.xlsx"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tasks/t-1/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "SUCCESS",
                "progress": 100,
                "current_step": "done",
                "result": {"statements": 2}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = backend(&server, &dir);
        let preview = api.get_preview("f-1").await.unwrap();
        assert_eq!(preview.sheets.len(), 2);
        assert_eq!(preview.sheets[0].row_count, 40);
        assert_eq!(preview.sheets[0].columns, vec!["Line", "FY23", "FY24"]);
        assert_eq!(preview.detected_statements[0].sheet_name, "P&L");
        assert_eq!(
            preview.detected_statements[0].statement_type,
            StatementType::ProfitLoss
        );
        assert_eq!(preview.detected_statements[0].confidence, 0.95);
        assert_eq!(preview.metadata["workbook"], "report.xlsx");

        let status = api.get_task_status("t-1").await.unwrap();
        assert_eq!(status.outcome(), TaskOutcome::Succeeded);
        assert_eq!(status.result, Some(json!({"statements": 2})));
    }

    #[tokio::test]
    async fn test_preview_not_found_reports_detail() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        Mock::given(method("GET"))
            .and(path("/api/v1/files/gone/preview"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"detail": "File not found"})),
            )
            .mount(&server)
            .await;

        let err = backend(&server, &dir).get_preview("gone").await.unwrap_err();
        assert_eq!(err.to_string(), "HTTP status 404 Not Found error: File not found");
    }

    #[tokio::test]
    async fn test_cancel_tolerates_empty_body() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        Mock::given(method("POST"))
            .and(path("/api/v1/files/f-1/cancel"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let msg = backend(&server, &dir).cancel_processing("f-1").await.unwrap();
        assert_eq!(msg, "");
    }

    #[test]
    fn test_error_detail_shapes() {
        assert_eq!(error_detail(r#"{"detail": "File not found"}"#), "File not found");
        assert_eq!(
            error_detail(r#"{"detail": [{"msg": "field required"}, {"msg": "bad type"}]}"#),
            "field required; bad type"
        );
        assert_eq!(error_detail("  upstream timeout \n"), "upstream timeout");
    }

    #[test]
    fn test_spreadsheet_mime() {
        assert_eq!(spreadsheet_mime("a.XLS"), "application/vnd.ms-excel");
        assert_eq!(spreadsheet_mime("noext"), "application/octet-stream");
    }
}
