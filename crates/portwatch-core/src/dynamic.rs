//! Dynamically loaded configuration values.
//!
//! A `DynamicValue` is either a literal or a reference to where the value
//! should be read from at resolve time. In configuration files it may be
//! written in any of these forms:
//!
//! ```yaml
//! ranges: ["10.0.0.0/24", "10.0.1.0/24"]   # literal list
//! ranges: "10.0.0.0/24,10.0.1.0/24"        # literal, decoded as a list
//! ranges: "env://SCAN_RANGES"              # environment variable
//! ranges: "file:///etc/portwatch/ranges"   # file
//! ranges: "https://cmdb.local/ranges"      # HTTP(S) endpoint
//! ranges:
//!   url: "https://cmdb.local/ranges"
//!   url_config:
//!     method: POST
//!     auth:
//!       bearer: "file:///run/secrets/cmdb-token"
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer};

use crate::decode::DynamicTarget;
use crate::error::Result;
use crate::resolver::Resolver;

/// A configuration value with exactly one active resolution source.
#[derive(Debug, Clone, PartialEq)]
pub enum DynamicValue<T> {
    Unset,
    Literal(T),
    Env(String),
    File(String),
    Url { url: String, request: UrlConfig },
}

impl<T> Default for DynamicValue<T> {
    fn default() -> Self {
        Self::Unset
    }
}

impl<T: DynamicTarget> DynamicValue<T> {
    pub fn literal(value: T) -> Self {
        Self::Literal(value)
    }

    pub fn env(name: impl Into<String>) -> Self {
        Self::Env(name.into())
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self::File(path.into())
    }

    pub fn url(url: impl Into<String>, request: UrlConfig) -> Self {
        Self::Url {
            url: url.into(),
            request,
        }
    }

    /// Returns true if a non-empty literal or any indirection is set.
    ///
    /// An explicitly empty list literal is not configured.
    pub fn configured(&self) -> bool {
        match self {
            Self::Unset => false,
            Self::Literal(value) => !value.is_empty_value(),
            Self::Env(name) => !name.is_empty(),
            Self::File(path) => !path.is_empty(),
            Self::Url { url, .. } => !url.is_empty(),
        }
    }

    /// Short name of the active source, for log fields.
    pub fn source_kind(&self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Literal(_) => "literal",
            Self::Env(_) => "env",
            Self::File(_) => "file",
            Self::Url { .. } => "url",
        }
    }

    /// Build a value from a bare configuration string.
    ///
    /// `env://NAME`, `file://path`, `http://…` and `https://…` select the
    /// matching indirection; any other text, including unknown schemes,
    /// is a literal.
    pub fn from_config_text(text: &str) -> serde_json::Result<Self> {
        if let Some((scheme, remain)) = text.split_once("://") {
            match scheme {
                "env" => return Ok(Self::Env(remain.to_string())),
                "file" => return Ok(Self::File(remain.to_string())),
                "http" | "https" => {
                    return Ok(Self::Url {
                        url: text.to_string(),
                        request: UrlConfig::default(),
                    })
                }
                _ => {}
            }
        }

        T::from_literal(text).map(Self::Literal)
    }

    /// Resolve the value. Performs I/O only when no literal is set.
    pub async fn resolve(&self, resolver: &Resolver) -> Result<T> {
        resolver.resolve(self).await
    }
}

// ── Configuration decoding ───────────────────────────────────────

/// The map form of a dynamic value.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Fields<T> {
    value: Option<T>,
    env: Option<String>,
    file: Option<String>,
    url: Option<String>,
    #[serde(default)]
    url_config: UrlConfig,
}

/// Every shape a dynamic value may take in configuration.
#[derive(Deserialize)]
#[serde(untagged)]
enum Repr<T> {
    Text(String),
    Literal(T),
    Fields(Fields<T>),
}

impl<T: DynamicTarget> TryFrom<Repr<T>> for DynamicValue<T> {
    type Error = serde_json::Error;

    fn try_from(repr: Repr<T>) -> serde_json::Result<Self> {
        match repr {
            Repr::Text(text) => Self::from_config_text(&text),
            Repr::Literal(value) => Ok(Self::Literal(value)),
            Repr::Fields(fields) => Ok(fields.into_value()),
        }
    }
}

impl<T: DynamicTarget> Fields<T> {
    /// Pick the active source: literal, then env, file, url.
    fn into_value(self) -> DynamicValue<T> {
        let non_empty = |s: Option<String>| s.filter(|s| !s.is_empty());

        if let Some(value) = self.value.filter(|v| !v.is_empty_value()) {
            return DynamicValue::Literal(value);
        }
        if let Some(env) = non_empty(self.env) {
            return DynamicValue::Env(env);
        }
        if let Some(file) = non_empty(self.file) {
            return DynamicValue::File(file);
        }
        if let Some(url) = non_empty(self.url) {
            return DynamicValue::Url {
                url,
                request: self.url_config,
            };
        }
        DynamicValue::Unset
    }
}

impl<'de, T> Deserialize<'de> for DynamicValue<T>
where
    T: DynamicTarget + Deserialize<'de>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let repr = Repr::<T>::deserialize(deserializer)?;
        Self::try_from(repr).map_err(serde::de::Error::custom)
    }
}

// ── Request configuration ────────────────────────────────────────

/// HTTP request options for URL sourced values.
///
/// Every string may use the `env://` or `file://` prefix to load its
/// value dynamically.
#[derive(Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct UrlConfig {
    pub method: Option<String>,
    pub auth: AuthConfig,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

/// Basic and bearer authorization.
#[derive(Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub bearer: Option<String>,
}

impl fmt::Debug for UrlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlConfig")
            .field("method", &self.method)
            .field("auth", &self.auth)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("body", &self.body.as_ref().map(|_| "<set>"))
            .finish()
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("bearer", &redact(&self.bearer))
            .finish()
    }
}
