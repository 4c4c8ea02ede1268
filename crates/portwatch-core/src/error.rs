//! Error types for dynamic value resolution.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Source unavailable: error reading {kind} '{reference}': {source}")]
    SourceUnavailable {
        kind: &'static str,
        reference: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Unsupported url scheme '{scheme}' for '{url}'")]
    UnsupportedScheme { url: String, scheme: String },

    #[error("Invalid request method: {0}")]
    InvalidMethod(String),

    #[error("Error requesting '{url}': {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Unexpected status code for '{url}': status: {status} body: {body}")]
    HttpStatus {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Error decoding {decoder} {kind} response for '{reference}': {source}")]
    Decode {
        decoder: &'static str,
        kind: &'static str,
        reference: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Payload from {kind} '{reference}' is not valid UTF-8")]
    InvalidUtf8 { kind: &'static str, reference: String },
}

pub type Result<T> = std::result::Result<T, ResolveError>;
