//! The HTTP capability consumed by commands and authorities.
//!
//! Transport failures surface as [`SyncError::Network`]; HTTP status codes
//! are returned to the caller, which decides whether a response is usable.

use crate::auth::Credential;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::path::Path;
use url::Url;

/// A response carrying status, content type, and body bytes.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether a failed request is worth retrying.
    pub fn is_transient_failure(&self) -> bool {
        self.status >= 500 || self.status == 429
    }

    pub fn json<T: DeserializeOwned>(&self) -> SyncResult<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| SyncError::Network(format!("malformed response body: {e}")))
    }
}

/// Abstract HTTP client capability.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// GET a URL, returning the response whatever its status.
    async fn get(
        &self,
        url: &str,
        params: &[(String, String)],
        credential: Option<&Credential>,
    ) -> SyncResult<HttpResponse>;

    /// GET a URL and write the response body to a local file.
    async fn get_file(
        &self,
        url: &str,
        params: &[(String, String)],
        credential: Option<&Credential>,
        dest: &Path,
    ) -> SyncResult<HttpResponse>;

    /// POST a form-encoded body.
    async fn post(
        &self,
        url: &str,
        form: &[(String, String)],
        credential: Option<&Credential>,
    ) -> SyncResult<HttpResponse>;
}

/// reqwest-backed HTTP client.
pub struct ReqwestClient {
    http: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    fn build_url(url: &str, params: &[(String, String)]) -> SyncResult<Url> {
        let mut url =
            Url::parse(url).map_err(|e| SyncError::Network(format!("invalid URL {url}: {e}")))?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter().cloned());
        }
        Ok(url)
    }

    fn apply_auth(
        request: reqwest::RequestBuilder,
        credential: Option<&Credential>,
    ) -> reqwest::RequestBuilder {
        match credential {
            Some(c) => request.basic_auth(&c.username, Some(&c.secret)),
            None => request,
        }
    }

    async fn send(request: reqwest::RequestBuilder) -> SyncResult<HttpResponse> {
        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response
            .bytes()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

impl Default for ReqwestClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(
        &self,
        url: &str,
        params: &[(String, String)],
        credential: Option<&Credential>,
    ) -> SyncResult<HttpResponse> {
        let url = Self::build_url(url, params)?;
        let request = Self::apply_auth(self.http.get(url), credential);
        Self::send(request).await
    }

    async fn get_file(
        &self,
        url: &str,
        params: &[(String, String)],
        credential: Option<&Credential>,
        dest: &Path,
    ) -> SyncResult<HttpResponse> {
        let response = self.get(url, params, credential).await?;
        if response.is_success() {
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(dest, &response.body).await?;
        }
        Ok(response)
    }

    async fn post(
        &self,
        url: &str,
        form: &[(String, String)],
        credential: Option<&Credential>,
    ) -> SyncResult<HttpResponse> {
        let url = Self::build_url(url, &[])?;
        let request = Self::apply_auth(self.http.post(url).form(form), credential);
        Self::send(request).await
    }
}
