//! portwatch-core: Shared types for the portwatch scan exporter.
//!
//! This crate provides the pieces used by every other portwatch crate:
//! - `DynamicValue` configuration fields resolvable from a literal, the
//!   environment, a file, or an HTTP(S) endpoint
//! - The `Resolver` and its pluggable `ValueSource` backends
//! - Scan report types produced by a scan runner
//! - Duration helpers for serde-based configuration

pub mod decode;
pub mod duration;
pub mod dynamic;
pub mod error;
pub mod report;
pub mod resolver;

pub use decode::DynamicTarget;
pub use dynamic::{AuthConfig, DynamicValue, UrlConfig};
pub use error::ResolveError;
pub use report::{HostResult, PortResult, RawResult, ScanReport};
pub use resolver::{HttpRequest, HttpResponse, Resolver, SystemSource, ValueSource};
