//! reqwest implementation of the backend and part transport.

use bytes::Bytes;
use futures_util::StreamExt;
use partwise_protocol::constants::{
    CHECKSUM_HEADER, ETAG_HEADER, INITIATE_PATH, abort_path, complete_path, part_url_path,
};
use partwise_protocol::{
    CompleteRequest, CompleteResponse, CompletedPart, InitiateRequest, InitiateResponse,
    PartUrlResponse,
};
use reqwest::header::CONTENT_LENGTH;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::backend::{BackendFuture, PartFuture, PartTransport, ProgressFn, UploadBackend};
use crate::error::{TransportError, UploadError};

/// Bytes handed to the connection per progress event.
const UPLOAD_SLICE: usize = 64 * 1024;

/// HTTP client for the multipart backend and its presigned part URLs.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Creates a backend rooted at `base_url` (e.g. `https://api.example.com`).
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// Turns a non-2xx response into [`TransportError::Status`].
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(TransportError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, UploadError> {
    let resp = check_status(resp).await?;
    let body = resp.bytes().await.map_err(TransportError::from)?;
    Ok(serde_json::from_slice(&body)?)
}

impl UploadBackend for HttpBackend {
    fn initiate<'a>(&'a self, request: &'a InitiateRequest) -> BackendFuture<'a, InitiateResponse> {
        Box::pin(async move {
            debug!(file = %request.file_name, size = request.size, "initiating upload");
            let resp = self
                .http
                .post(self.url(INITIATE_PATH))
                .json(request)
                .send()
                .await
                .map_err(TransportError::from)?;
            read_json(resp).await
        })
    }

    fn part_url<'a>(&'a self, upload_id: &'a str, part_number: u32) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let resp = self
                .http
                .get(self.url(&part_url_path(upload_id)))
                .query(&[("partNumber", part_number)])
                .send()
                .await
                .map_err(TransportError::from)?;
            let body: PartUrlResponse = read_json(resp).await?;
            if body.url.is_empty() {
                let err = TransportError::Network("backend returned an empty part URL".into());
                return Err(err.into());
            }
            Ok(body.url)
        })
    }

    fn complete<'a>(
        &'a self,
        upload_id: &'a str,
        parts: &'a [CompletedPart],
    ) -> BackendFuture<'a, CompleteResponse> {
        Box::pin(async move {
            let request = CompleteRequest {
                parts: parts.to_vec(),
            };
            let resp = self
                .http
                .post(self.url(&complete_path(upload_id)))
                .json(&request)
                .send()
                .await
                .map_err(TransportError::from)?;
            read_json(resp).await
        })
    }

    fn abort<'a>(&'a self, upload_id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let resp = self
                .http
                .delete(self.url(&abort_path(upload_id)))
                .send()
                .await
                .map_err(TransportError::from)?;
            check_status(resp).await?;
            Ok(())
        })
    }
}

impl PartTransport for HttpBackend {
    fn put_part<'a>(
        &'a self,
        url: &'a str,
        body: Bytes,
        checksum: Option<String>,
        progress: ProgressFn,
    ) -> PartFuture<'a> {
        Box::pin(async move {
            let len = body.len();
            let slices = (0..len)
                .step_by(UPLOAD_SLICE)
                .map(move |off| body.slice(off..(off + UPLOAD_SLICE).min(len)));
            let mut sent = 0u64;
            let stream = futures_util::stream::iter(slices).map(move |slice| {
                sent += slice.len() as u64;
                progress(sent);
                Ok::<_, std::io::Error>(slice)
            });

            let mut req = self
                .http
                .put(url)
                .header(CONTENT_LENGTH, len)
                .body(reqwest::Body::wrap_stream(stream));
            if let Some(sum) = checksum {
                req = req.header(CHECKSUM_HEADER, sum);
            }

            let resp = check_status(req.send().await?).await?;
            let etag = resp
                .headers()
                .get(ETAG_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .ok_or(TransportError::MissingEtag)?;
            Ok(etag.to_string())
        })
    }
}
