//! Content-addressed decoding of dynamic value payloads.
//!
//! The decoder is chosen by the target shape and the first byte of the
//! trimmed payload, not by any declared content type:
//!
//! | target        | payload starts with | decoder                     |
//! |---------------|---------------------|-----------------------------|
//! | `String`      | `"`                 | JSON string                 |
//! | `String`      | anything else       | raw text                    |
//! | `Vec<String>` | `[`                 | JSON array of strings       |
//! | `Vec<String>` | contains `,`        | comma separated             |
//! | `Vec<String>` | contains `\n`       | newline separated           |
//! | `Vec<String>` | anything else       | single value                |

use crate::error::{ResolveError, Result};

mod sealed {
    pub trait Sealed {}

    impl Sealed for String {}
    impl Sealed for Vec<String> {}
}

/// A shape a `DynamicValue` can be decoded into.
///
/// Sealed: only `String` and `Vec<String>` are supported targets.
pub trait DynamicTarget: sealed::Sealed + Clone + Default + Send + Sync + 'static {
    /// Name of the decoder `decode_text` picks for `text`.
    fn decoder_name(text: &str) -> &'static str;

    /// Decode an already trimmed, non-empty payload.
    fn decode_text(text: &str) -> serde_json::Result<Self>;

    /// Interpret a configuration literal that carried no scheme prefix.
    fn from_literal(text: &str) -> serde_json::Result<Self>;

    /// Whether the value counts as absent (`""` or an empty list).
    fn is_empty_value(&self) -> bool;
}

impl DynamicTarget for String {
    fn decoder_name(text: &str) -> &'static str {
        if text.starts_with('"') {
            "json"
        } else {
            "raw"
        }
    }

    fn decode_text(text: &str) -> serde_json::Result<Self> {
        if text.starts_with('"') {
            serde_json::from_str(text)
        } else {
            Ok(text.to_string())
        }
    }

    fn from_literal(text: &str) -> serde_json::Result<Self> {
        Ok(text.to_string())
    }

    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl DynamicTarget for Vec<String> {
    fn decoder_name(text: &str) -> &'static str {
        if text.starts_with('[') {
            "json"
        } else if text.contains(',') {
            "comma-separated"
        } else if text.contains('\n') {
            "newline-separated"
        } else {
            "raw"
        }
    }

    fn decode_text(text: &str) -> serde_json::Result<Self> {
        if text.starts_with('[') {
            return serde_json::from_str(text);
        }

        let values = if text.contains(',') {
            split_trimmed(text, ',')
        } else if text.contains('\n') {
            split_trimmed(text, '\n')
        } else {
            vec![text.to_string()]
        };

        Ok(values)
    }

    fn from_literal(text: &str) -> serde_json::Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        Self::decode_text(text)
    }

    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

fn split_trimmed(text: &str, separator: char) -> Vec<String> {
    text.split(separator)
        .map(str::trim)
        .filter(|elem| !elem.is_empty())
        .map(str::to_string)
        .collect()
}

/// Decode a raw payload fetched from `kind` (`env`, `file`, `url`) at `reference`.
///
/// Surrounding whitespace is trimmed first; an empty payload decodes to
/// the target's zero value.
pub fn decode_value<T: DynamicTarget>(kind: &'static str, reference: &str, data: &[u8]) -> Result<T> {
    let text = std::str::from_utf8(data).map_err(|_| ResolveError::InvalidUtf8 {
        kind,
        reference: reference.to_string(),
    })?;

    let text = text.trim();
    if text.is_empty() {
        return Ok(T::default());
    }

    T::decode_text(text).map_err(|source| ResolveError::Decode {
        decoder: T::decoder_name(text),
        kind,
        reference: reference.to_string(),
        source,
    })
}
