//! CLI context - shared state for all commands

use crate::bus::InMemoryBus;
use crate::config::RouterConfig;
use crate::error::{RouterError, RouterResult};
use crate::inference::{LlamaServerConfig, LlamaServerEngine};
use crate::router::Router;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Probed in order when `--config` is not given
const DEFAULT_CONFIG_PATHS: &[&str] = &["router.toml", "config/router.toml"];

pub struct CliContext {
    pub config_path: PathBuf,
    pub config: RouterConfig,
    /// Saved interface documents to seed the registry with
    pub interfaces_path: Option<PathBuf>,
    pub output_format: super::OutputFormat,
    pub quiet: bool,
    pub verbose: bool,
    /// In-process bus; records what commands would have been sent
    bus: Arc<InMemoryBus>,
    router: Option<Arc<Router>>,
}

impl CliContext {
    pub fn new(config_path: PathBuf) -> RouterResult<Self> {
        let config = RouterConfig::load(&config_path)?;
        Ok(Self::from_config(config_path, config))
    }

    /// First existing default config file, or defaults
    pub fn with_defaults() -> RouterResult<Self> {
        for path in DEFAULT_CONFIG_PATHS.iter().map(PathBuf::from) {
            if path.exists() {
                return Self::new(path);
            }
        }
        Ok(Self::from_config(
            PathBuf::from(DEFAULT_CONFIG_PATHS[0]),
            RouterConfig::default(),
        ))
    }

    fn from_config(config_path: PathBuf, config: RouterConfig) -> Self {
        Self {
            config_path,
            config,
            interfaces_path: None,
            output_format: super::OutputFormat::Table,
            quiet: false,
            verbose: false,
            bus: Arc::new(InMemoryBus::new()),
            router: None,
        }
    }

    pub fn bus(&self) -> &Arc<InMemoryBus> {
        &self.bus
    }

    /// Router seeded from the interfaces file, built on first use
    pub fn router(&mut self) -> RouterResult<Arc<Router>> {
        if let Some(ref router) = self.router {
            return Ok(Arc::clone(router));
        }

        let engine = LlamaServerEngine::new(LlamaServerConfig {
            endpoint: self.config.llm.endpoint.clone(),
            request_timeout: Duration::from_secs(self.config.llm.request_timeout_secs),
        })?;
        let router = Arc::new(Router::new(
            self.bus.clone(),
            Arc::new(engine),
            &self.config,
        ));

        match &self.interfaces_path {
            Some(path) => {
                let loaded = router.registry().load_snapshot_file(path)?;
                self.debug(&format!("Loaded {} interfaces from {:?}", loaded, path));
                if loaded == 0 {
                    return Err(RouterError::Config(format!(
                        "No usable interface documents in {:?}",
                        path
                    )));
                }
            }
            None => self.status(
                "No --interfaces file given; the registry is empty and every query will be unanswered",
            ),
        }

        self.router = Some(Arc::clone(&router));
        Ok(router)
    }

    /// Print status message (respects quiet mode)
    pub fn status(&self, message: &str) {
        if !self.quiet {
            eprintln!("{}", message);
        }
    }

    /// Print verbose message (only in verbose mode)
    pub fn debug(&self, message: &str) {
        if self.verbose {
            eprintln!("[DEBUG] {}", message);
        }
    }
}
