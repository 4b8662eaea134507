//! Service configuration and backend factory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use examdesk_core::controller::SessionConfig;
use examdesk_core::model::StudentId;
use examdesk_core::paper::parse_paper;
use examdesk_core::traits::{Clock, GraderService, SessionService};

use crate::http::{HttpExamService, DEFAULT_TIMEOUT_SECS};
use crate::memory::InMemoryBackend;

/// Where sessions, answers and scores are stored.
///
/// Note: Custom Debug impl masks the API token to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServiceConfig {
    Http {
        base_url: String,
        #[serde(default)]
        api_token: String,
        #[serde(default = "default_timeout")]
        timeout_secs: u64,
    },
    Memory {
        /// Paper file seeding the in-memory store.
        paper: PathBuf,
    },
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceConfig::Http {
                base_url,
                api_token: _,
                timeout_secs,
            } => f
                .debug_struct("Http")
                .field("base_url", base_url)
                .field("api_token", &"***")
                .field("timeout_secs", timeout_secs)
                .finish(),
            ServiceConfig::Memory { paper } => {
                f.debug_struct("Memory").field("paper", paper).finish()
            }
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig::Http {
            base_url: default_base_url(),
            api_token: String::new(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Top-level examdesk configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamdeskConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    /// Quiet period before a typed answer is written, in milliseconds.
    #[serde(default = "default_quiet_period")]
    pub quiet_period_ms: u64,
    /// Countdown tick length in milliseconds.
    #[serde(default = "default_tick")]
    pub tick_interval_ms: u64,
    /// Status and attendance polling interval in seconds.
    #[serde(default = "default_poll")]
    pub poll_interval_secs: u64,
    /// Fixed seed for matching pool shuffles (reproducible runs).
    #[serde(default)]
    pub shuffle_seed: Option<u64>,
    /// Output directory for grade reports.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_quiet_period() -> u64 {
    1000
}
fn default_tick() -> u64 {
    1000
}
fn default_poll() -> u64 {
    5
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./examdesk-reports")
}

impl Default for ExamdeskConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            quiet_period_ms: default_quiet_period(),
            tick_interval_ms: default_tick(),
            poll_interval_secs: default_poll(),
            shuffle_seed: None,
            output_dir: default_output_dir(),
        }
    }
}

impl ExamdeskConfig {
    /// Timing knobs for a session controller.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            quiet_period: Duration::from_millis(self.quiet_period_ms),
            tick_interval: Duration::from_millis(self.tick_interval_ms.max(1)),
            status_poll_interval: self.poll_interval(),
            shuffle_seed: self.shuffle_seed,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

fn resolve_service_config(config: &ServiceConfig) -> ServiceConfig {
    match config {
        ServiceConfig::Http {
            base_url,
            api_token,
            timeout_secs,
        } => ServiceConfig::Http {
            base_url: resolve_env_vars(base_url),
            api_token: resolve_env_vars(api_token),
            timeout_secs: *timeout_secs,
        },
        ServiceConfig::Memory { paper } => ServiceConfig::Memory {
            paper: PathBuf::from(resolve_env_vars(&paper.to_string_lossy())),
        },
    }
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `examdesk.toml` in the current directory
/// 2. `~/.config/examdesk/config.toml`
///
/// Environment variable overrides: `EXAMDESK_BASE_URL`, `EXAMDESK_API_TOKEN`.
pub fn load_config() -> Result<ExamdeskConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<ExamdeskConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("examdesk.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<ExamdeskConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => ExamdeskConfig::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config.service = resolve_service_config(&config.service);

    Ok(config)
}

/// A base URL override switches an in-memory config to HTTP.
fn apply_env_overrides(config: &mut ExamdeskConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(url) = var("EXAMDESK_BASE_URL") {
        if let ServiceConfig::Http { base_url, .. } = &mut config.service {
            *base_url = url;
        } else {
            config.service = ServiceConfig::Http {
                base_url: url,
                api_token: String::new(),
                timeout_secs: default_timeout(),
            };
        }
    }

    if let Some(token) = var("EXAMDESK_API_TOKEN") {
        if let ServiceConfig::Http { api_token, .. } = &mut config.service {
            *api_token = token;
        }
    }
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("examdesk"))
}

/// A constructed service backend.
#[derive(Clone)]
pub enum Backend {
    Http(Arc<HttpExamService>),
    Memory(Arc<InMemoryBackend>),
}

impl Backend {
    pub fn grader(&self) -> Arc<dyn GraderService> {
        match self {
            Backend::Http(service) => service.clone() as Arc<dyn GraderService>,
            Backend::Memory(backend) => backend.clone(),
        }
    }

    /// Student-facing service. Over HTTP the student is implied by the API
    /// token, so `student_id` only selects a session in memory.
    pub fn student(&self, student_id: StudentId) -> Arc<dyn SessionService> {
        match self {
            Backend::Http(service) => service.clone() as Arc<dyn SessionService>,
            Backend::Memory(backend) => backend.as_student(student_id),
        }
    }
}

/// Create a backend from its configuration.
pub fn create_backend(config: &ServiceConfig, clock: Arc<dyn Clock>) -> Result<Backend> {
    match config {
        ServiceConfig::Http {
            base_url,
            api_token,
            timeout_secs,
        } => {
            let service = HttpExamService::new(base_url, api_token, *timeout_secs)
                .context("failed to create HTTP exam service")?;
            Ok(Backend::Http(Arc::new(service)))
        }
        ServiceConfig::Memory { paper } => {
            let paper = parse_paper(paper)?;
            Ok(Backend::Memory(InMemoryBackend::new(paper, clock)))
        }
    }
}
