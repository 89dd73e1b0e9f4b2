//! Multipart form upload over HTTP
//!
//! One POST per file: a `file` part followed by a text field per metadata
//! entry, authenticated with a bearer token. The endpoint answers with
//!
//! ```json
//! { "success": true, "files": [{ "url": "https://...", "id": "abc" }] }
//! ```
//!
//! `uploadedFiles` is accepted in place of `files`, and `publicUrl` or
//! `path` in place of `url`.

use std::sync::Arc;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;
use crate::config::EndpointConfig;
use crate::core::{
    ProgressSink,
    RemoteReference,
    Result,
    StaticToken,
    TokenSupplier,
    TransferErrorKind,
    TransferRequest,
    UploadEndpoint,
    UploadError,
};
use crate::utils::{retry_with_config, RetryConfig};
use super::progress_stream::ProgressStream;

pub struct HttpUploadEndpoint {
    client: Client,
    url: Url,
    endpoint: EndpointConfig,
    token: Option<Arc<dyn TokenSupplier>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    success: bool,
    message: Option<String>,
    error: Option<String>,
    #[serde(alias = "uploadedFiles")]
    files: Option<Vec<UploadedFile>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedFile {
    url: Option<String>,
    public_url: Option<String>,
    path: Option<String>,
    id: Option<serde_json::Value>,
}

impl UploadedFile {
    fn into_reference(self) -> Option<RemoteReference> {
        let url = self.url.or(self.public_url).or(self.path)?;
        let id = self.id.map(|id| match id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        });
        Some(RemoteReference { url, id })
    }
}

impl HttpUploadEndpoint {
    pub fn new(config: &EndpointConfig) -> Result<Self> {
        let url = Url::parse(&config.url)
            .map_err(|err| UploadError::rejected(format!("invalid endpoint url {}: {err}", config.url)))?;

        let client = Client::builder().timeout(config.timeout()).build()?;

        let token = config
            .token
            .clone()
            .map(|token| Arc::new(StaticToken(token)) as Arc<dyn TokenSupplier>);

        Ok(Self {
            client,
            url,
            endpoint: config.clone(),
            token,
        })
    }

    pub fn with_token_supplier(mut self, supplier: Arc<dyn TokenSupplier>) -> Self {
        self.token = Some(supplier);
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn send_once(&self, request: &TransferRequest, progress: &ProgressSink) -> Result<RemoteReference> {
        if request.cancellation.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let payload = &request.payload;
        let body = ProgressStream::chunked(payload.data.clone(), self.endpoint.chunk_size, progress.clone());
        let file = Part::stream_with_length(Body::wrap_stream(body), payload.size())
            .file_name(payload.name.clone())
            .mime_str(&payload.media_type)?;

        let mut form = Form::new().part("file", file);
        for (key, value) in &request.metadata {
            form = form.text(key.clone(), value.clone());
        }

        let mut builder = self.client.post(self.url.clone()).multipart(form);
        if let Some(supplier) = &self.token {
            if let Some(token) = supplier.bearer_token().await? {
                builder = builder.bearer_auth(token);
            }
        }

        // Cancellation is only checked between attempts; a request on the wire finishes
        let response = builder
            .send()
            .await
            .map_err(|err| UploadError::from(err).classify())?;

        let status = response.status();
        let body = response.text().await.map_err(|err| UploadError::from(err).classify())?;

        if !status.is_success() {
            let message = serde_json::from_str::<UploadResponse>(&body)
                .ok()
                .and_then(|r| r.error.or(r.message))
                .unwrap_or_else(|| format!("upload failed with status {status}"));
            return Err(UploadError::from_status(status.as_u16(), message));
        }

        parse_response(&body)
    }
}

fn parse_response(body: &str) -> Result<RemoteReference> {
    let response: UploadResponse = serde_json::from_str(body).map_err(|err| {
        UploadError::transfer(TransferErrorKind::InvalidResponse, format!("malformed response: {err}"))
    })?;

    if !response.success {
        let message = response
            .error
            .or(response.message)
            .unwrap_or_else(|| "endpoint reported failure".to_string());
        return Err(UploadError::transfer(TransferErrorKind::Validation, message));
    }

    response
        .files
        .and_then(|files| files.into_iter().next())
        .and_then(UploadedFile::into_reference)
        .ok_or_else(|| UploadError::transfer(TransferErrorKind::InvalidResponse, "response carries no file reference"))
}

#[async_trait]
impl UploadEndpoint for HttpUploadEndpoint {
    async fn upload(&self, request: TransferRequest, progress: ProgressSink) -> Result<RemoteReference> {
        let cancellation = request.cancellation.clone();
        let retry = RetryConfig::from_endpoint(&self.endpoint)
            .should_retry(move |err: &UploadError| err.is_transient() && !cancellation.is_cancelled());

        debug!(item = %request.item_id, url = %self.url, size = request.payload.size(), "posting file");
        let result = retry_with_config(&retry, || self.send_once(&request, &progress)).await;

        if let Err(err) = &result {
            if !matches!(err, UploadError::Cancelled) {
                warn!(item = %request.item_id, file = %request.payload.name, error = %err, "upload attempt exhausted");
            }
        }
        result
    }
}
