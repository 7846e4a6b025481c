//! Layered configuration for komi.
//!
//! Sources, lowest precedence first:
//!
//! 1. Built-in defaults ([`Config::default`]).
//! 2. A configuration file: either an explicit path, or any of `komi.toml`,
//!    `komi.yaml`, `komi.yml` and `komi.json` in the platform configuration
//!    directory.
//! 3. Environment variables prefixed with `KOMI_`, using `__` to reach nested
//!    keys (`KOMI_FETCH__MAX_RETRIES=5`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use komi_fetch::transport::HttpOptions;
use komi_fetch::{DEFAULT_MAX_BACKOFF, DEFAULT_MAX_RETRIES, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "KOMI_";
/// File name of the container when no cache path is configured.
pub const DEFAULT_CACHE_FILE: &str = "cache.komi";
const FILE_NAMES: [&str; 4] = ["komi.toml", "komi.yaml", "komi.yml", "komi.json"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Container read by `list`, `get` and `info`, and written by `build`.
    pub cache_path: PathBuf,
    pub fetch: FetchConfig,
}

impl Default for Config {
    fn default() -> Self {
        let cache_path = project_dirs()
            .map(|dirs| dirs.cache_dir().join(DEFAULT_CACHE_FILE))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_FILE));
        Self { cache_path, fetch: FetchConfig::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Retries per page after its first attempt.
    pub max_retries: u32,
    /// Pages in flight at once; unset means no limit.
    pub concurrency: Option<usize>,
    /// Delay before the first retry, doubled for each one after.
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let http = HttpOptions::default();
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            concurrency: None,
            backoff_ms: 0,
            max_backoff_ms: u64::try_from(DEFAULT_MAX_BACKOFF.as_millis()).unwrap_or(u64::MAX),
            timeout_secs: http.timeout.as_secs(),
            user_agent: http.user_agent,
        }
    }
}

impl FetchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: Duration::from_millis(self.backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }

    pub fn http_options(&self) -> HttpOptions {
        HttpOptions { timeout: Duration::from_secs(self.timeout_secs), user_agent: self.user_agent.clone() }
    }

    /// Concurrency cap; a validated config never holds `Some(0)`.
    pub fn concurrency(&self) -> Option<NonZeroUsize> {
        self.concurrency.and_then(NonZeroUsize::new)
    }
}

impl Config {
    /// Load configuration from every source.
    ///
    /// An explicit `path` replaces the configuration directory lookup and must
    /// exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let directory = project_dirs().map(|dirs| dirs.config_dir().to_path_buf());
        Self::from_figment(Self::figment(path, directory.as_deref())?)
    }

    /// Build the layered figment without extracting it.
    pub fn figment(path: Option<&Path>, config_dir: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        match path {
            Some(path) => {
                if !path.is_file() {
                    exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
                }
                tracing::debug!(path = %path.display(), "Loading configuration file");
                figment = merge_file(figment, path)?;
            },
            None => {
                for candidate in config_dir.into_iter().flat_map(|dir| FILE_NAMES.map(|name| dir.join(name))) {
                    if candidate.is_file() {
                        tracing::debug!(path = %candidate.display(), "Loading configuration file");
                        figment = merge_file(figment, &candidate)?;
                    }
                }
            },
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch.timeout_secs == 0 {
            exn::bail!(ErrorKind::Invalid("fetch.timeout_secs must be greater than zero"));
        }
        if self.fetch.concurrency == Some(0) {
            exn::bail!(ErrorKind::Invalid("fetch.concurrency must be greater than zero when set"));
        }
        if self.fetch.max_backoff_ms < self.fetch.backoff_ms {
            exn::bail!(ErrorKind::Invalid("fetch.max_backoff_ms must not be less than fetch.backoff_ms"));
        }
        if self.cache_path.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("cache_path must not be empty"));
        }
        Ok(())
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "komi")
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);
    Ok(match extension.as_deref() {
        Some("toml") => figment.merge(Toml::file_exact(path)),
        Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
        Some("json") => figment.merge(Json::file_exact(path)),
        _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
    })
}
