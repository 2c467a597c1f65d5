use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use conduit_engine::EngineConfig;
use serde::Deserialize;
use tracing::debug;

use crate::{
    error::{Error, Result},
    request::{Request, driver},
    value::HostValue,
};

const DEFAULT_MAX_DEPTH: usize = 256;

/// Settings shared by every request of a [`Runtime`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// `SERVER_SOFTWARE` and the server signature.
    pub server_software: String,
    /// Whether responses carry `X-Powered-By`.
    pub expose: bool,
    pub default_mimetype: String,
    pub default_charset: String,
    pub document_root: String,
    pub server_admin: String,
    /// Maximum nesting of script function calls.
    pub max_depth: usize,
    /// Declarations loaded into every request before its script.
    pub startup_file: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            server_software: concat!("Conduit ", env!("CARGO_PKG_VERSION")).to_string(),
            expose: true,
            default_mimetype: "text/html".to_string(),
            default_charset: "UTF-8".to_string(),
            document_root: "/var/www".to_string(),
            server_admin: "webmaster@localhost".to_string(),
            max_depth: DEFAULT_MAX_DEPTH,
            startup_file: None,
        }
    }
}

impl RuntimeConfig {
    pub(crate) fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            expose: self
                .expose
                .then(|| concat!("Conduit/", env!("CARGO_PKG_VERSION")).to_string()),
            default_mimetype: self.default_mimetype.clone(),
            default_charset: self.default_charset.clone(),
            max_depth: self.max_depth,
        }
    }
}

#[derive(Debug, Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    #[must_use]
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides [`RuntimeConfig::startup_file`].
    #[must_use]
    pub fn startup_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.startup_file = Some(path.into());
        self
    }

    /// # Errors
    ///
    /// [`Error::Io`] if the startup file cannot be read.
    pub fn build(self) -> Result<Runtime> {
        let startup = self
            .config
            .startup_file
            .as_deref()
            .map(load_startup)
            .transpose()?;
        Ok(Runtime {
            config: self.config,
            startup,
            next_request: AtomicU64::new(1),
        })
    }
}

/// Reads a startup file, dropping its open and close tags.
fn load_startup(path: &Path) -> Result<Arc<str>> {
    let source = std::fs::read_to_string(path).map_err(Error::Io)?;
    debug!(path = %path.display(), len = source.len(), "loaded startup file");
    let source = source.trim();
    let source = source.strip_prefix("<?php").unwrap_or(source);
    let source = source.strip_suffix("?>").unwrap_or(source);
    Ok(Arc::from(source.trim()))
}

/// Executes requests, each on its own engine thread with fresh state.
///
/// The runtime itself holds only configuration, so one instance can serve
/// any number of concurrent requests.
#[derive(Debug)]
pub struct Runtime {
    config: RuntimeConfig,
    startup: Option<Arc<str>>,
    next_request: AtomicU64,
}

impl Runtime {
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub(crate) fn startup(&self) -> Option<Arc<str>> {
        self.startup.clone()
    }

    /// Runs a request to completion and returns the script's result.
    ///
    /// Output is fully flushed when this returns. Proxies in the result stop
    /// working at the same point and report [`Error::Detached`].
    ///
    /// # Errors
    ///
    /// Uncaught script exceptions and parse errors, host errors the script
    /// did not catch, and output failures.
    pub async fn execute(&self, request: Request) -> Result<HostValue> {
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        driver::run(self, request, id).await
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn config_fills_in_defaults() {
        let config: RuntimeConfig = serde_json::from_str(r#"{"expose": false, "document_root": "/srv"}"#).unwrap();
        assert!(!config.expose);
        assert_eq!(config.document_root, "/srv");
        assert_eq!(config.default_charset, "UTF-8");
        assert!(config.engine_config().expose.is_none());
    }

    #[test]
    fn startup_file_tags_are_stripped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "<?php\nfunction greet() {{ return 'hi'; }}\n?>").unwrap();
        let runtime = Runtime::builder().startup_file(file.path()).build().unwrap();
        let startup = runtime.startup().unwrap();
        assert_eq!(&*startup, "function greet() { return 'hi'; }");
    }

    #[test]
    fn missing_startup_file_is_an_io_error() {
        let err = Runtime::builder()
            .startup_file("/nonexistent/startup.php")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
