//! Layered configuration.
//!
//! Sources, lowest priority first: built-in defaults, an optional TOML file,
//! environment variables prefixed `RULEBOOK_` (with `.env` loaded via
//! dotenvy). Built once at startup through `Config::builder()` and passed by
//! reference into the components that need it.

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct SandboxConfig {
    /// Base URL of the remote execution sandbox.
    pub base_url: String,
    /// Per-request timeout. A timeout is an execution error, never an
    /// automatic retry.
    pub request_timeout_secs: u64,
    /// Bounded retry attempts for transient transport failures.
    pub max_retries: u32,
    /// Base backoff between retries; doubles per attempt.
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompilerConfig {
    /// Indent unit of the generated script, in spaces.
    pub indent_width: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub sandbox: SandboxConfig,
    pub compiler: CompilerConfig,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    sandbox_url: Option<String>,
    config_path: Option<PathBuf>,
}

impl ConfigBuilder {
    /// Override the sandbox URL regardless of file/env settings.
    pub fn sandbox_url(mut self, url: Option<String>) -> Self {
        self.sandbox_url = url;
        self
    }

    /// Optional TOML config file.
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn build(self) -> Result<Config, config::ConfigError> {
        // .env is optional; ignore a missing file.
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder()
            .set_default("sandbox.base_url", "http://localhost:8787")?
            .set_default("sandbox.request_timeout_secs", 30_i64)?
            .set_default("sandbox.max_retries", 2_i64)?
            .set_default("sandbox.retry_backoff_ms", 250_i64)?
            .set_default("compiler.indent_width", 4_i64)?;

        if let Some(path) = &self.config_path {
            builder = builder.add_source(config::File::from(path.clone()).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("RULEBOOK")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(url) = self.sandbox_url {
            builder = builder.set_override("sandbox.base_url", url)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;

        if config.compiler.indent_width == 0 {
            return Err(config::ConfigError::Message(
                "compiler.indent_width must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder()
            .build()
            .expect("built-in defaults are valid")
    }
}
