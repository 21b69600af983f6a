use bytes::Bytes;
use futures::Stream;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response, header};
use serde::Deserialize;
use std::env;
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result};
use crate::frames::decode_frames;
use crate::observability::{CLIENT_REQUEST_ERRORS, CLIENT_REQUESTS};
use crate::types::{ChatRequest, ConfigUpdate, GenerationConfig, StreamFrame, UsageStats};

const DEFAULT_BASE_URL: &str = "http://localhost:8000/";

/// Bounded wait for the chat endpoint to begin responding. Once the stream
/// is open no overall duration cap applies.
const ESTABLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded wait for the plain request/response endpoints.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for the chat backend.
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: ReqwestClient,
    base_url: String,
    establish_timeout: Duration,
    request_timeout: Duration,
}

impl BackendClient {
    /// Create a new backend client.
    ///
    /// The base URL can be provided directly or read from the CHATWIRE_URL
    /// environment variable; it defaults to a local backend.
    pub fn new(base_url: Option<String>) -> Result<Self> {
        Self::with_options(base_url, None, None)
    }

    /// Create a new client with custom timeouts.
    pub fn with_options(
        base_url: Option<String>,
        establish_timeout: Option<Duration>,
        request_timeout: Option<Duration>,
    ) -> Result<Self> {
        let base_url = base_url
            .or_else(|| env::var("CHATWIRE_URL").ok())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = if base_url.ends_with('/') {
            base_url
        } else {
            format!("{base_url}/")
        };

        let establish_timeout = establish_timeout.unwrap_or(ESTABLISH_TIMEOUT);
        // No client-wide timeout: it would cap an open response stream.
        // Establishment is bounded by the connect timeout plus a per-request
        // timeout on the non-streaming endpoints.
        let client = ReqwestClient::builder()
            .connect_timeout(establish_timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {}", e),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            client,
            base_url,
            establish_timeout,
            request_timeout: request_timeout.unwrap_or(REQUEST_TIMEOUT),
        })
    }

    /// The base URL requests are issued against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Derive the statistics socket URL from the base URL.
    ///
    /// `http` maps to `ws` and `https` to `wss`, with the `/ws` path.
    pub fn socket_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(Error::url(
                    format!("cannot derive a socket URL from scheme '{other}'"),
                    None,
                ));
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| Error::url("failed to set socket URL scheme", None))?;
        url.set_path("/ws");
        Ok(url)
    }

    /// Create and return default headers for API requests.
    fn default_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }

    /// Process API response errors and convert to our Error type
    async fn process_error_response(response: Response) -> Error {
        let status = response.status();
        let status_code = status.as_u16();

        // Try to parse error response body
        #[derive(Deserialize)]
        struct ErrorResponse {
            detail: Option<String>,
        }

        let error_body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::http_client(
                    format!("Failed to read error response: {}", e),
                    Some(Box::new(e)),
                );
            }
        };

        let message = serde_json::from_str::<ErrorResponse>(&error_body)
            .ok()
            .and_then(|e| e.detail)
            .unwrap_or_else(|| error_body.clone());

        match status_code {
            400 => Error::bad_request(message, None),
            408 => Error::timeout(message, None),
            500 => Error::internal_server(message),
            502..=504 => Error::service_unavailable(message),
            _ => Error::api(status_code, message),
        }
    }

    /// Map a reqwest send error into our Error type.
    fn map_send_error(&self, e: reqwest::Error) -> Error {
        CLIENT_REQUEST_ERRORS.click();
        if e.is_timeout() {
            Error::timeout(
                format!("Request timed out: {}", e),
                Some(self.establish_timeout.as_secs_f64()),
            )
        } else if e.is_connect() {
            Error::connection(format!("Connection error: {}", e), Some(Box::new(e)))
        } else {
            Error::http_client(format!("Request failed: {}", e), Some(Box::new(e)))
        }
    }

    /// Send a chat request and get the incremental frame stream.
    ///
    /// Establishment has a bounded wait; once the stream is open it may run
    /// indefinitely and is only ended by the completion marker, end of data,
    /// cancellation, or a transport error.
    pub async fn stream_chat(
        &self,
        request: &ChatRequest,
    ) -> Result<impl Stream<Item = Result<StreamFrame>> + Send + use<>> {
        let url = format!("{}chat", self.base_url);
        CLIENT_REQUESTS.click();

        let response = self
            .client
            .post(&url)
            .headers(self.default_headers())
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            CLIENT_REQUEST_ERRORS.click();
            return Err(Self::process_error_response(response).await);
        }

        Ok(decode_frames(response.bytes_stream()))
    }

    /// Fetch the backend's current generation configuration.
    pub async fn generation_config(&self) -> Result<GenerationConfig> {
        self.get_json("config").await
    }

    /// Apply a partial configuration update and return the new configuration.
    pub async fn update_config(&self, update: &ConfigUpdate) -> Result<GenerationConfig> {
        #[derive(Deserialize)]
        struct ConfigUpdated {
            config: GenerationConfig,
        }

        let url = format!("{}config", self.base_url);
        CLIENT_REQUESTS.click();

        let response = self
            .client
            .post(&url)
            .headers(self.default_headers())
            .timeout(self.request_timeout)
            .json(update)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            CLIENT_REQUEST_ERRORS.click();
            return Err(Self::process_error_response(response).await);
        }

        let updated: ConfigUpdated = response.json().await.map_err(|e| {
            Error::serialization(
                format!("Failed to parse response: {}", e),
                Some(Box::new(e)),
            )
        })?;
        Ok(updated.config)
    }

    /// Fetch aggregate usage statistics.
    pub async fn usage_stats(&self) -> Result<UsageStats> {
        self.get_json("stats").await
    }

    /// Reset aggregate usage statistics.
    pub async fn reset_stats(&self) -> Result<()> {
        let url = format!("{}reset-stats", self.base_url);
        CLIENT_REQUESTS.click();

        let response = self
            .client
            .post(&url)
            .headers(self.default_headers())
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            CLIENT_REQUEST_ERRORS.click();
            return Err(Self::process_error_response(response).await);
        }
        Ok(())
    }

    /// Upload a document for summarization and return the summary text.
    pub async fn summarize_document(
        &self,
        file_name: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Result<String> {
        #[derive(Deserialize)]
        struct Summary {
            summary: String,
        }

        let url = format!("{}upload-pdf", self.base_url);
        CLIENT_REQUESTS.click();

        let part = reqwest::multipart::Part::stream(reqwest::Body::from(bytes.into()))
            .file_name(file_name.into())
            .mime_str("application/pdf")
            .map_err(|e| {
                Error::http_client(format!("Invalid upload part: {}", e), Some(Box::new(e)))
            })?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            CLIENT_REQUEST_ERRORS.click();
            return Err(Self::process_error_response(response).await);
        }

        let summary: Summary = response.json().await.map_err(|e| {
            Error::serialization(
                format!("Failed to parse response: {}", e),
                Some(Box::new(e)),
            )
        })?;
        Ok(summary.summary)
    }

    /// Check backend liveness.
    pub async fn health(&self) -> Result<()> {
        let url = format!("{}health", self.base_url);

        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(Self::process_error_response(response).await);
        }
        Ok(())
    }

    /// GET a JSON body from a relative path with the bounded request wait.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        CLIENT_REQUESTS.click();

        let response = self
            .client
            .get(&url)
            .headers(self.default_headers())
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            CLIENT_REQUEST_ERRORS.click();
            return Err(Self::process_error_response(response).await);
        }

        response.json::<T>().await.map_err(|e| {
            Error::serialization(
                format!("Failed to parse response: {}", e),
                Some(Box::new(e)),
            )
        })
    }
}
