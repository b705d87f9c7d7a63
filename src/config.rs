//! Host configuration.
//!
//! ```toml
//! allow_chunked_encoding = false
//! rewrite_localhost = true
//! maximum_connection_count = 512
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::Error;

/// Receives every failure the host swallows to keep serving: engine errors,
/// panics, render failures.
#[derive(Clone)]
pub struct ErrorCallback(Arc<dyn Fn(&(dyn std::error::Error + 'static)) + Send + Sync>);

impl ErrorCallback {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&(dyn std::error::Error + 'static)) + Send + Sync + 'static,
    {
        Self(Arc::new(callback))
    }

    pub fn call(&self, error: &(dyn std::error::Error + 'static)) {
        (self.0)(error)
    }
}

impl Default for ErrorCallback {
    fn default() -> Self {
        Self::new(|error| tracing::error!("unhandled error while serving request: {error}"))
    }
}

impl fmt::Debug for ErrorCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ErrorCallback(..)")
    }
}

/// Options read once when a [`Host`](crate::Host) is built.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HostConfiguration {
    /// Stream responses with chunked framing. When `false` every body is
    /// buffered and sent with `Content-Length`.
    pub allow_chunked_encoding: bool,

    /// Bind dot-less host names such as `localhost` to the wildcard host `+`.
    pub rewrite_localhost: bool,

    /// Cap on concurrently open connections per bound socket.
    pub maximum_connection_count: Option<usize>,

    #[serde(skip)]
    pub unhandled_error_callback: ErrorCallback,
}

impl Default for HostConfiguration {
    fn default() -> Self {
        Self {
            allow_chunked_encoding: true,
            rewrite_localhost: true,
            maximum_connection_count: None,
            unhandled_error_callback: ErrorCallback::default(),
        }
    }
}

impl HostConfiguration {
    pub fn from_toml_str(source: &str) -> Result<Self, Error> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }
}
