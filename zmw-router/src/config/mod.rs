//! Configuration for the command router
//!
//! Loaded from TOML. A missing file means defaults; a file that exists but
//! cannot be read or parsed is an error.

pub mod types;

pub use types::*;

use crate::error::{RouterError, RouterResult};
use std::path::Path;
use tracing::debug;

impl RouterConfig {
    pub fn load(path: &Path) -> RouterResult<Self> {
        if !path.exists() {
            debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            RouterError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        toml::from_str(&content).map_err(|e| {
            RouterError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })
    }

    pub fn from_toml(content: &str) -> RouterResult<Self> {
        toml::from_str(content)
            .map_err(|e| RouterError::Config(format!("Failed to parse config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = RouterConfig::from_toml(
            r#"
            [router]
            max_services = 5

            [llm]
            endpoint = "http://gpu-box:8080"
            "#,
        )
        .unwrap();
        assert_eq!(config.router.max_services, 5);
        assert!(config.router.use_grammar);
        assert_eq!(config.router.skip_services.len(), 5);
        assert_eq!(config.llm.endpoint, "http://gpu-box:8080");
        assert_eq!(config.llm.max_tokens, 256);
        assert_eq!(config.devices.cache_ttl_secs, 30);
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = RouterConfig::load(&dir.path().join("router.toml")).unwrap();
        assert_eq!(config, RouterConfig::default());
    }

    #[test]
    fn broken_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[router\nmax_services = ").unwrap();
        assert!(matches!(
            RouterConfig::load(file.path()),
            Err(RouterError::Config(_))
        ));
    }
}
