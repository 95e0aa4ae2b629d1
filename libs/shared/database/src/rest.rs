use std::time::Duration;

use reqwest::{
    Client,
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method, StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use shared_config::AppConfig;

#[derive(Error, Debug)]
pub enum RestError {
    #[error("API error ({status}): {body}")]
    Status { status: StatusCode, body: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl RestError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            RestError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RestError::Timeout
        } else if err.is_decode() {
            RestError::Decode(err.to_string())
        } else {
            RestError::Transport(err.to_string())
        }
    }
}

/// Thin JSON client for the external calendar REST API.
pub struct RestClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestClient {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_base_url(&config.calendar_base_url, &config.calendar_api_key)
    }

    pub fn with_base_url(base_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn get_headers(&self) -> Result<HeaderMap, RestError> {
        let mut headers = HeaderMap::new();

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if !self.api_key.is_empty() {
            let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| RestError::InvalidHeader(e.to_string()))?;
            headers.insert(AUTHORIZATION, bearer);
        }

        Ok(headers)
    }

    pub async fn request<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        timeout: Duration,
    ) -> Result<T, RestError>
    where
        T: DeserializeOwned,
    {
        self.request_with_headers(method, path, body, &[], timeout).await
    }

    pub async fn request_with_headers<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        extra_headers: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<T, RestError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut headers = self.get_headers()?;
        for (name, value) in extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| RestError::InvalidHeader(e.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| RestError::InvalidHeader(e.to_string()))?;
            headers.insert(name, value);
        }

        let mut req = self.client.request(method, &url)
            .headers(headers)
            .timeout(timeout);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("API error ({}): {}", status, error_text);
            return Err(RestError::Status { status, body: error_text });
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}
