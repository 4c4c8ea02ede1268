//! Configuration for a masscan scan target.

use std::path::PathBuf;
use std::time::Duration;

use portwatch_core::{DynamicValue, ResolveError, Resolver};
use serde::Deserialize;

use crate::runner::{ScanRequest, ToolConfig};

pub const DEFAULT_BIN_PATH: &str = "/usr/bin/masscan";
pub const DEFAULT_TEMP_DIR: &str = "/tmp";
pub const DEFAULT_WAIT_DELAY: Duration = Duration::from_secs(20);

/// Masscan settings for one scan target.
///
/// `ranges`, `ports`, and `config` are dynamic values and are resolved at
/// the start of every scan.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Path to the masscan binary (default: "/usr/bin/masscan").
    #[serde(default = "default_bin_path")]
    pub bin_path: PathBuf,

    /// Directory for the report and config temp files (default: "/tmp").
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// How long to wait for masscan to exit after it has been killed.
    #[serde(
        default = "default_wait_delay",
        deserialize_with = "portwatch_core::duration::deserialize"
    )]
    pub wait_delay: Duration,

    /// Maximum packets per second, 0 for masscan's default.
    #[serde(default)]
    pub max_rate: u32,

    #[serde(default)]
    pub ranges: DynamicValue<Vec<String>>,

    #[serde(default)]
    pub ports: DynamicValue<Vec<String>>,

    /// Inline masscan configuration. Ignored when `config_path` is set.
    #[serde(default)]
    pub config: DynamicValue<String>,

    /// Static masscan configuration file.
    #[serde(default)]
    pub config_path: Option<PathBuf>,
}

fn default_bin_path() -> PathBuf {
    PathBuf::from(DEFAULT_BIN_PATH)
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from(DEFAULT_TEMP_DIR)
}

fn default_wait_delay() -> Duration {
    DEFAULT_WAIT_DELAY
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            bin_path: default_bin_path(),
            temp_dir: default_temp_dir(),
            wait_delay: default_wait_delay(),
            max_rate: 0,
            ranges: DynamicValue::Unset,
            ports: DynamicValue::Unset,
            config: DynamicValue::Unset,
            config_path: None,
        }
    }
}

impl ScanConfig {
    /// Append literal ranges, keeping any existing literal ranges.
    pub fn with_ranges<I, S>(mut self, ranges: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ranges = append_literal(self.ranges, ranges);
        self
    }

    /// Append literal ports, keeping any existing literal ports.
    pub fn with_ports<I, S>(mut self, ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ports = append_literal(self.ports, ports);
        self
    }

    /// Whether there is anything to scan.
    pub fn has_targets(&self) -> bool {
        self.ranges.configured() || self.config_path.is_some() || self.config.configured()
    }

    /// Resolve all dynamic inputs into a `ScanRequest`.
    pub async fn resolve(&self, resolver: &Resolver) -> Result<ScanRequest, ResolveError> {
        let tool_config = match &self.config_path {
            Some(path) if !path.as_os_str().is_empty() => ToolConfig::Path(path.clone()),
            _ if self.config.configured() => {
                let text = resolver.resolve(&self.config).await?;
                if text.is_empty() {
                    ToolConfig::None
                } else {
                    ToolConfig::Inline(text)
                }
            }
            _ => ToolConfig::None,
        };

        Ok(ScanRequest {
            ranges: resolver.resolve(&self.ranges).await?,
            ports: resolver.resolve(&self.ports).await?,
            tool_config,
            max_rate: self.max_rate,
        })
    }
}

fn append_literal<I, S>(value: DynamicValue<Vec<String>>, extra: I) -> DynamicValue<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut values = match value {
        DynamicValue::Literal(values) => values,
        _ => Vec::new(),
    };
    values.extend(extra.into_iter().map(Into::into));
    DynamicValue::Literal(values)
}
