//! The `tern.toml` configuration file.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tern_smtp::{EndpointDefinition, ServerOptions, error::TlsError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("No endpoints configured")]
    NoEndpoints,

    #[error(transparent)]
    Tls(#[from] TlsError),
}

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerOptions,
    #[serde(alias = "endpoint", default)]
    pub endpoints: Vec<EndpointDefinition>,
}

impl Config {
    /// Read and parse the file at `path`.
    ///
    /// # Errors
    /// [`ConfigError::Io`] if the file cannot be read, [`ConfigError::Parse`]
    /// if it is not a valid configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml(&content)
    }

    /// # Errors
    /// [`ConfigError::Parse`] if `content` is not a valid configuration.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load every endpoint's certificate and check the result is servable.
    ///
    /// # Errors
    /// [`ConfigError::NoEndpoints`] if there is nothing to listen on, or the
    /// first endpoint's TLS failure.
    pub fn init(&mut self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }

        for endpoint in &mut self.endpoints {
            endpoint.init()?;
        }

        Ok(())
    }
}
