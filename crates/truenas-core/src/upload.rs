//! Multipart file upload over HTTP.
//!
//! File transfers do not go through DDP: the middleware accepts them as a
//! `multipart/form-data` POST with a JSON `data` field describing the method
//! call and a `file` part carrying the bytes.

use crate::config::HttpConfig;
use crate::session::Session;
use crate::{ClientError, Result};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

impl Session {
    /// Upload `content` to `endpoint` (e.g. `/_upload`) on the session's host.
    ///
    /// Returns the parsed JSON response body. Non-200 responses become
    /// [`ClientError::Http`].
    pub async fn upload_file(
        &self,
        endpoint: &str,
        data: &Value,
        content: Vec<u8>,
        filename: &str,
    ) -> Result<Value> {
        if !endpoint.starts_with('/') {
            return Err(ClientError::Config {
                message: format!("upload endpoint must start with '/': {}", endpoint),
            });
        }
        let url = self.config().http_url(endpoint)?;

        let client = reqwest::Client::builder()
            .timeout(HttpConfig::UPLOAD_TIMEOUT)
            .user_agent(HttpConfig::USER_AGENT)
            .danger_accept_invalid_certs(self.config().accept_invalid_certs)
            .build()
            .map_err(|e| ClientError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e),
            })?;

        let size = content.len();
        let form = Form::new()
            .text("data", serde_json::to_string(data)?)
            .part("file", Part::bytes(content).file_name(filename.to_string()));

        let response = client
            .post(url.clone())
            .bearer_auth(&self.config().api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ClientError::Network {
                message: format!("POST {} failed: {}", url, e),
                source: Some(e),
            })?;

        let status = response.status();
        let body = response.text().await?;
        debug!("Uploaded {} ({} bytes) to {}: {}", filename, size, url, status);

        if status != StatusCode::OK {
            return Err(ClientError::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| ClientError::Json {
            message: format!("Failed to parse upload response: {}", e),
            source: Some(e),
        })
    }
}
