//! Unified error types.

/// Boxed error used for render failures and handler failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by the host's fallible operations.
///
/// Authorization outcomes (401, 403, redirects) are expressed as
/// [`Response`](crate::Response) values produced by pipeline hooks, not as
/// `Error`s. This type surfaces infrastructure failures: parsing base URLs,
/// binding prefixes, loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Another socket already owns the address behind `prefix`.
    #[error("failed to listen on prefix {prefix}: conflicts with an existing registration")]
    BindConflict {
        prefix: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to listen on prefix {prefix}: {source}")]
    Bind {
        prefix: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid base url `{0}`: scheme and host are required")]
    InvalidBaseUrl(String),

    #[error("host is already started")]
    AlreadyStarted,

    #[error("host has been disposed")]
    Disposed,

    #[error("invalid host configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure raised by an [`Engine`](crate::Engine) while handling one request.
///
/// The host never propagates these; they reach the unhandled-error callback
/// and turn into a `500` response.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("request was cancelled")]
    Cancelled,

    #[error("handler failed: {0}")]
    Handler(#[source] BoxError),

    #[error("failed to read request body: {0}")]
    BodyRead(#[from] hyper::Error),

    #[error("engine produced no response")]
    MissingResponse,

    #[error("request handling panicked")]
    Panicked,
}
