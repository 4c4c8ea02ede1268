//! Resolution of dynamic values against their sources.
//!
//! The `Resolver` holds the I/O backend (`ValueSource`) used to read
//! environment variables, files, and HTTP endpoints. Production code uses
//! `SystemSource`; tests substitute their own backends.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, Url};

use crate::decode::{decode_value, DynamicTarget};
use crate::dynamic::{DynamicValue, UrlConfig};
use crate::error::{ResolveError, Result};

/// A fully prepared HTTP request for a URL sourced value.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub basic_auth: Option<(String, String)>,
    pub bearer: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// I/O backend for value resolution.
#[async_trait]
pub trait ValueSource: Send + Sync {
    /// Read an environment variable. Missing variables are `None`.
    fn env_var(&self, name: &str) -> Option<String>;

    async fn read_file(&self, path: &Path) -> std::io::Result<Vec<u8>>;

    /// Perform the request and return the status with the full body.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Backend reading the real process environment, filesystem, and network.
#[derive(Debug, Clone, Default)]
pub struct SystemSource {
    client: reqwest::Client,
}

impl SystemSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ValueSource for SystemSource {
    fn env_var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    async fn read_file(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = request.url.to_string();
        let mut builder = self.client.request(request.method, request.url);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some((username, password)) = request.basic_auth {
            builder = builder.basic_auth(username, Some(password));
        }
        if let Some(token) = request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|source| ResolveError::Request {
            url: url.clone(),
            source,
        })?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|source| ResolveError::Request { url, source })?;

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// Resolves `DynamicValue`s through a `ValueSource`.
#[derive(Clone)]
pub struct Resolver {
    source: Arc<dyn ValueSource>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(SystemSource::default())
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}

impl Resolver {
    pub fn new(source: impl ValueSource + 'static) -> Self {
        Self {
            source: Arc::new(source),
        }
    }

    /// Resolve a value. A non-empty literal is returned without any I/O;
    /// an unset value resolves to the zero value.
    pub async fn resolve<T: DynamicTarget>(&self, value: &DynamicValue<T>) -> Result<T> {
        match value {
            DynamicValue::Literal(literal) if !literal.is_empty_value() => Ok(literal.clone()),
            DynamicValue::Env(name) if !name.is_empty() => self.load_env(name).await,
            DynamicValue::File(path) if !path.is_empty() => self.load_file(path).await,
            DynamicValue::Url { url, request } if !url.is_empty() => {
                self.load_url(url, request).await
            }
            _ => Ok(T::default()),
        }
    }

    /// Expand an `env://` or `file://` reference; anything else is returned as is.
    ///
    /// File contents are trimmed so secrets written with a trailing
    /// newline can be used directly.
    pub async fn load_indirect(&self, value: &str) -> Result<String> {
        match value.split_once("://") {
            Some(("env", name)) => Ok(self.source.env_var(name).unwrap_or_default()),
            Some(("file", path)) => {
                let data = self.read(path).await?;
                Ok(String::from_utf8_lossy(&data).trim().to_string())
            }
            _ => Ok(value.to_string()),
        }
    }

    async fn load_optional(&self, value: &Option<String>) -> Result<Option<String>> {
        match value {
            Some(v) => Ok(Some(self.load_indirect(v).await?).filter(|v| !v.is_empty())),
            None => Ok(None),
        }
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.source
            .read_file(Path::new(path))
            .await
            .map_err(|source| ResolveError::SourceUnavailable {
                kind: "file",
                reference: path.to_string(),
                source,
            })
    }

    async fn load_env<T: DynamicTarget>(&self, name: &str) -> Result<T> {
        let name = self.load_indirect(name).await?;
        let value = self.source.env_var(&name).unwrap_or_default();

        tracing::debug!(env = %name, bytes = value.len(), "Loaded dynamic value from environment");

        decode_value("env", &name, value.as_bytes())
    }

    async fn load_file<T: DynamicTarget>(&self, path: &str) -> Result<T> {
        let path = self.load_indirect(path).await?;
        let data = self.read(&path).await?;

        tracing::debug!(path = %path, bytes = data.len(), "Loaded dynamic value from file");

        decode_value("file", &path, &data)
    }

    async fn load_url<T: DynamicTarget>(&self, raw: &str, config: &UrlConfig) -> Result<T> {
        let raw = self.load_indirect(raw).await?;
        let url = parse_url(&raw)?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ResolveError::UnsupportedScheme {
                url: url.to_string(),
                scheme: url.scheme().to_string(),
            });
        }

        let request = self.build_request(url, config).await?;
        let url = request.url.to_string();
        let response = self.source.send(request).await?;

        if !(200..300).contains(&response.status) {
            return Err(ResolveError::HttpStatus {
                url,
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }

        tracing::debug!(url = %url, bytes = response.body.len(), "Loaded dynamic value from url");

        decode_value("url", &url, &response.body)
    }

    async fn build_request(&self, url: Url, config: &UrlConfig) -> Result<HttpRequest> {
        let method = match config.method.as_deref().filter(|m| !m.is_empty()) {
            Some(method) => Method::from_bytes(method.to_uppercase().as_bytes())
                .map_err(|_| ResolveError::InvalidMethod(method.to_string()))?,
            None => Method::GET,
        };

        let mut headers = Vec::with_capacity(config.headers.len());
        for (name, value) in &config.headers {
            headers.push((name.clone(), self.load_indirect(value).await?));
        }

        let username = self.load_optional(&config.auth.username).await?;
        let password = self.load_optional(&config.auth.password).await?;
        let basic_auth = match (username, password) {
            (None, None) => None,
            (username, password) => Some((username.unwrap_or_default(), password.unwrap_or_default())),
        };

        Ok(HttpRequest {
            method,
            url,
            headers,
            body: self.load_optional(&config.body).await?,
            basic_auth,
            bearer: self.load_optional(&config.auth.bearer).await?,
        })
    }
}

/// Parse a URL, assuming `https://` when the input carries no host.
fn parse_url(raw: &str) -> Result<Url> {
    match Url::parse(raw) {
        Ok(url) if url.has_host() => Ok(url),
        _ => Url::parse(&format!("https://{raw}")).map_err(|e| ResolveError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        }),
    }
}
