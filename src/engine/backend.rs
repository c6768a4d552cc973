use crate::error::UploadError;
use crate::model::{PendingFile, RunConfig};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, COOKIE};
use reqwest::{multipart, Url};

/// Raw answer of the upload endpoint, before normalization.
#[derive(Debug, Clone)]
pub struct RawUploadResponse {
    pub status: u16,
    pub body: String,
}

/// HTTP client for the back-office ingredient endpoints.
#[derive(Clone, Debug)]
pub struct BackendClient {
    pub http: reqwest::Client,
    base_url: Url,
    upload_path: String,
    errors_path: String,
    history_path: String,
}

impl BackendClient {
    pub fn new(cfg: &RunConfig) -> Result<Self, UploadError> {
        let base_url = Url::parse(&cfg.base_url)
            .map_err(|e| UploadError::InvalidUrl(format!("{}: {e}", cfg.base_url)))?;

        let mut headers = HeaderMap::new();
        if let Some(token) = cfg.token.as_deref() {
            let v = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| UploadError::InvalidHeader { header: "authorization" })?;
            headers.insert(AUTHORIZATION, v);
        }
        if let Some(cookie) = cfg.cookie.as_deref() {
            let v = HeaderValue::from_str(cookie)
                .map_err(|_| UploadError::InvalidHeader { header: "cookie" })?;
            headers.insert(COOKIE, v);
        }

        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .default_headers(headers)
            .timeout(cfg.timeout)
            .build()?;

        Ok(Self {
            http,
            base_url,
            upload_path: cfg.upload_path.clone(),
            errors_path: cfg.errors_path.clone(),
            history_path: cfg.history_path.clone(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, UploadError> {
        self.base_url
            .join(path)
            .map_err(|e| UploadError::InvalidUrl(format!("{path}: {e}")))
    }

    pub fn upload_url(&self) -> Result<Url, UploadError> {
        self.url(&self.upload_path)
    }

    pub fn errors_url(&self, upload_id: &str) -> Result<Url, UploadError> {
        let mut url = self.url(&self.errors_path)?;
        url.path_segments_mut()
            .map_err(|_| UploadError::InvalidUrl(self.errors_path.clone()))?
            .pop_if_empty()
            .push(upload_id);
        Ok(url)
    }

    pub fn history_url(&self) -> Result<Url, UploadError> {
        self.url(&self.history_path)
    }

    /// POST one file as multipart form data under the `file` field.
    ///
    /// Only transport failures are errors; any HTTP status comes back as a
    /// response for the normalizer to classify.
    pub async fn upload(&self, file: &PendingFile) -> Result<RawUploadResponse, UploadError> {
        let data = tokio::fs::read(&file.path)
            .await
            .map_err(|source| UploadError::ReadFile {
                path: file.path.display().to_string(),
                source,
            })?;

        let mut part = multipart::Part::bytes(data).file_name(file.name.clone());
        if file.mime_or_extension.contains('/') {
            part = part.mime_str(&file.mime_or_extension)?;
        } else if let Some(mime) = mime_for_extension(&file.mime_or_extension) {
            part = part.mime_str(mime)?;
        }
        let form = multipart::Form::new().part("file", part);

        let resp = self
            .http
            .post(self.upload_url()?)
            .multipart(form)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        tracing::debug!(file = %file.name, status, bytes = body.len(), "upload response");
        Ok(RawUploadResponse { status, body })
    }

    /// Fetch the failed-rows spreadsheet for an upload.
    pub async fn download_error_file(&self, upload_id: &str) -> Result<Bytes, UploadError> {
        let resp = self
            .http
            .get(self.errors_url(upload_id)?)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.bytes().await?)
    }

    /// Past upload batches as the server reports them.
    pub async fn fetch_history(&self) -> Result<Vec<serde_json::Value>, UploadError> {
        let value: serde_json::Value = self
            .http
            .get(self.history_url()?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        history_entries(value).ok_or(UploadError::UnrecognizedShape)
    }
}

fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "xls" => Some("application/vnd.ms-excel"),
        "xlsx" => Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        _ => None,
    }
}

/// History comes as a bare array or wrapped in `history` / `data`.
pub fn history_entries(value: serde_json::Value) -> Option<Vec<serde_json::Value>> {
    match value {
        serde_json::Value::Array(items) => Some(items),
        serde_json::Value::Object(mut map) => ["history", "data", "uploads"]
            .iter()
            .find_map(|k| match map.remove(*k) {
                Some(serde_json::Value::Array(items)) => Some(items),
                _ => None,
            }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FailurePolicy;
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> RunConfig {
        RunConfig {
            base_url: base_url.to_string(),
            upload_path: "/api/ingredients/upload".into(),
            errors_path: "/api/ingredients/upload/errors".into(),
            history_path: "/api/ingredients/upload/history".into(),
            batch_id: "1".into(),
            token: Some("t0k".into()),
            cookie: None,
            timeout: Duration::from_secs(5),
            user_agent: "ingredient-upload/test".into(),
            policy: FailurePolicy::default(),
            max_error_messages: 5,
            download_dir: PathBuf::from("."),
        }
    }

    #[test]
    fn error_url_appends_upload_id() {
        let client = BackendClient::new(&config("http://localhost:8080")).unwrap();
        assert_eq!(
            client.errors_url("42").unwrap().as_str(),
            "http://localhost:8080/api/ingredients/upload/errors/42"
        );
    }

    #[test]
    fn header_values_with_newlines_are_rejected() {
        let mut cfg = config("http://localhost:8080");
        cfg.token = Some("bad\ntoken".into());
        assert!(matches!(
            BackendClient::new(&cfg),
            Err(UploadError::InvalidHeader { header: "authorization" })
        ));

        cfg.token = None;
        cfg.cookie = Some("session=1\r\n".into());
        assert!(matches!(
            BackendClient::new(&cfg),
            Err(UploadError::InvalidHeader { header: "cookie" })
        ));
    }

    #[test]
    fn history_accepts_wrapped_arrays() {
        assert_eq!(history_entries(json!([1, 2])).map(|v| v.len()), Some(2));
        assert_eq!(
            history_entries(json!({"history": [{"id": 1}]})).map(|v| v.len()),
            Some(1)
        );
        assert!(history_entries(json!({"count": 3})).is_none());
    }

    #[tokio::test]
    async fn upload_sends_file_part_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/ingredients/upload"))
            .and(header("Authorization", "Bearer t0k"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"success\":true}"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("stock.xlsx");
        std::fs::write(&p, b"PK\x03\x04").unwrap();
        let file = PendingFile {
            name: "stock.xlsx".into(),
            size_bytes: 4,
            mime_or_extension: "xlsx".into(),
            path: p,
        };

        let client = BackendClient::new(&config(&server.uri())).unwrap();
        let resp = client.upload(&file).await.unwrap();
        assert_eq!(resp.status, 200);

        let received = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&received[0].body);
        assert!(body.contains("name=\"file\""));
        assert!(body.contains("filename=\"stock.xlsx\""));
    }

    #[tokio::test]
    async fn missing_local_file_is_read_error() {
        let client = BackendClient::new(&config("http://127.0.0.1:9")).unwrap();
        let file = PendingFile {
            name: "gone.xlsx".into(),
            size_bytes: 1,
            mime_or_extension: "xlsx".into(),
            path: PathBuf::from("/definitely/not/here/gone.xlsx"),
        };
        assert!(matches!(
            client.upload(&file).await,
            Err(UploadError::ReadFile { .. })
        ));
    }

    #[tokio::test]
    async fn error_file_download_fails_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/ingredients/upload/errors/7"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let client = BackendClient::new(&config(&server.uri())).unwrap();
        assert!(client.download_error_file("7").await.is_err());
    }
}
