//! Self-hosted listener: prefixes, lifecycle, and the accept loop.
//!
//! # Lifecycle
//!
//! ```text
//! NotStarted ──start()──▶ Running ──stop()/dispose()──▶ Stopped
//!                            ▲                            │
//!                            └───────────start()──────────┘
//! ```
//!
//! Sockets are owned by the accept loops and released when the loops exit.
//! The bootstrapper is disposed exactly once, by the first `dispose()` (or by
//! `Drop`), whether or not the host was ever started.
//!
//! # Graceful shutdown
//!
//! Stopping cancels the host's shutdown token. Accept loops stop taking new
//! connections, every open connection is asked to finish its in-flight
//! request, and `stop()` returns once all of them are done.
//!
//! Request tokens hang off a separate parent that `stop()` leaves alone, so
//! in-flight handlers run to completion. Only a client disconnect or
//! `dispose()` cancels them.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use http::StatusCode;
use http::header::HOST;
use http::uri::Authority;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use crate::cancel::CancellationToken;
use crate::config::HostConfiguration;
use crate::engine::{Bootstrapper, DefaultBootstrapper, Engine};
use crate::error::{EngineError, Error};
use crate::request::Request;
use crate::response::Response;
use crate::url::Url;
use crate::writer::{ResponseBody, internal_error, write_response};

/// Host name that binds every interface.
const WILDCARD: &str = "+";

enum HostState {
    NotStarted,
    Starting,
    Running(Running),
    Stopped,
}

struct Running {
    shutdown: CancellationToken,
    requests: CancellationToken,
    accept_loops: Vec<JoinHandle<()>>,
    local_addrs: Vec<SocketAddr>,
}

/// A self-hosted HTTP front end bound to one or more base URLs.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use vestibule::{DefaultBootstrapper, Host, HostConfiguration, Request, Router, RouterEngine};
///
/// # async fn home(_: Request) -> &'static str { "" }
/// # async fn run() -> Result<(), vestibule::Error> {
/// let engine = RouterEngine::new(Router::new().get("/", home));
/// let host = Host::new(
///     Arc::new(DefaultBootstrapper::new(engine)),
///     HostConfiguration::default(),
///     ["http://localhost:1234/base/"],
/// )?;
/// host.start().await?;
/// # Ok(()) }
/// ```
pub struct Host {
    bootstrapper: Arc<dyn Bootstrapper>,
    config: Arc<HostConfiguration>,
    base_urls: Vec<Url>,
    state: Mutex<HostState>,
    bootstrapper_disposed: AtomicBool,
}

impl Host {
    /// Builds a host for `base_urls`. Each must be an absolute http or https
    /// URL with a host; the port defaults to the scheme's.
    pub fn new<I>(
        bootstrapper: Arc<dyn Bootstrapper>,
        config: HostConfiguration,
        base_urls: I,
    ) -> Result<Self, Error>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let base_urls = base_urls
            .into_iter()
            .map(|raw| parse_base_url(raw.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            bootstrapper,
            config: Arc::new(config),
            base_urls,
            state: Mutex::new(HostState::NotStarted),
            bootstrapper_disposed: AtomicBool::new(false),
        })
    }

    /// A host with the default bootstrapper and configuration.
    pub fn with_defaults<I>(base_urls: I) -> Result<Self, Error>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        Self::new(Arc::new(DefaultBootstrapper::default()), HostConfiguration::default(), base_urls)
    }

    /// The prefixes this host binds, one per base URL, in binding order.
    ///
    /// The port is always explicit: `http://localhost/` yields `http://+:80/`.
    pub fn prefixes(&self) -> impl Iterator<Item = String> + '_ {
        self.base_urls.iter().map(|url| {
            let (host, port) = self.bind_target(url);
            format!("{}://{}:{}{}", url.scheme, host, port, url.path)
        })
    }

    /// Socket addresses actually bound. Empty unless running.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        match &*self.lock_state() {
            HostState::Running(running) => running.local_addrs.clone(),
            _ => Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lock_state(), HostState::Running(_))
    }

    /// Binds every prefix and starts serving.
    ///
    /// Fails with [`Error::BindConflict`] when another socket already owns an
    /// address; nothing stays bound in that case.
    pub async fn start(&self) -> Result<(), Error> {
        if self.bootstrapper_disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed);
        }
        let previous = {
            let mut state = self.lock_state();
            match *state {
                HostState::Starting | HostState::Running(_) => return Err(Error::AlreadyStarted),
                HostState::NotStarted => {
                    *state = HostState::Starting;
                    HostState::NotStarted
                }
                HostState::Stopped => {
                    *state = HostState::Starting;
                    HostState::Stopped
                }
            }
        };

        match self.bind_all().await {
            Ok(listeners) => {
                *self.lock_state() = HostState::Running(self.spawn_accept_loops(listeners));
                Ok(())
            }
            Err(e) => {
                *self.lock_state() = previous;
                Err(e)
            }
        }
    }

    /// Stops accepting, drains open connections, and releases the sockets.
    ///
    /// Does nothing if the host is not running.
    pub async fn stop(&self) {
        let Some(running) = self.take_running() else { return };
        running.shutdown.cancel();
        for accept_loop in running.accept_loops {
            if let Err(e) = accept_loop.await {
                error!("accept loop failed: {e}");
            }
        }
        info!("host stopped");
    }

    /// Signals shutdown without waiting, cancels in-flight requests and
    /// disposes the bootstrapper. The host cannot be started again.
    ///
    /// Safe to call any number of times, started or not.
    pub fn dispose(&self) {
        if let Some(running) = self.take_running() {
            running.shutdown.cancel();
            running.requests.cancel();
            debug!("host disposed while running");
        }
        if !self.bootstrapper_disposed.swap(true, Ordering::AcqRel) {
            self.bootstrapper.dispose();
        }
    }

    /// Starts, serves until SIGTERM or Ctrl-C, then stops gracefully.
    pub async fn run_until_shutdown_signal(&self) -> Result<(), Error> {
        self.start().await?;
        shutdown_signal().await;
        info!("shutdown signal received, draining connections");
        self.stop().await;
        Ok(())
    }

    // ── internals ────────────────────────────────────────────────────────────

    fn lock_state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_running(&self) -> Option<Running> {
        let mut state = self.lock_state();
        if !matches!(*state, HostState::Running(_)) {
            return None;
        }
        match std::mem::replace(&mut *state, HostState::Stopped) {
            HostState::Running(running) => Some(running),
            _ => None,
        }
    }

    fn bind_target(&self, url: &Url) -> (String, u16) {
        let rewrite = self.config.rewrite_localhost && url.host_name.eq_ignore_ascii_case("localhost");
        let host = if rewrite {
            WILDCARD.to_owned()
        } else if url.host_name.contains(':') {
            format!("[{}]", url.host_name)
        } else {
            url.host_name.clone()
        };
        // Base URLs are validated to http/https, which always have a default.
        (host, url.effective_port().unwrap_or(80))
    }

    /// One listener per distinct socket; base URLs sharing a socket are
    /// told apart by base path.
    async fn bind_all(&self) -> Result<Vec<(TcpListener, Vec<Url>)>, Error> {
        let mut order: Vec<(String, u16)> = Vec::new();
        let mut groups: HashMap<(String, u16), (String, Vec<Url>)> = HashMap::new();
        for (url, prefix) in self.base_urls.iter().zip(self.prefixes()) {
            let target = self.bind_target(url);
            let entry = groups.entry(target.clone()).or_insert_with(|| {
                order.push(target);
                (prefix, Vec::new())
            });
            entry.1.push(url.clone());
        }

        let mut listeners = Vec::with_capacity(order.len());
        for target in order {
            let Some((prefix, urls)) = groups.remove(&target) else { continue };
            let (host, port) = target;
            let host = match host.as_str() {
                WILDCARD | "*" => "0.0.0.0",
                other => other.trim_start_matches('[').trim_end_matches(']'),
            };

            let listener = TcpListener::bind((host, port)).await.map_err(|source| {
                if source.kind() == std::io::ErrorKind::AddrInUse {
                    Error::BindConflict { prefix: prefix.clone(), source }
                } else {
                    Error::Bind { prefix: prefix.clone(), source }
                }
            })?;

            info!(%prefix, addr = %listener.local_addr()?, "listening");
            listeners.push((listener, urls));
        }
        Ok(listeners)
    }

    fn spawn_accept_loops(&self, listeners: Vec<(TcpListener, Vec<Url>)>) -> Running {
        let shutdown = CancellationToken::new();
        let requests = CancellationToken::new();
        let engine = self.bootstrapper.engine();
        let mut accept_loops = Vec::with_capacity(listeners.len());
        let mut local_addrs = Vec::with_capacity(listeners.len());

        for (listener, base_urls) in listeners {
            if let Ok(addr) = listener.local_addr() {
                local_addrs.push(addr);
            }
            let site = Arc::new(Site {
                engine: Arc::clone(&engine),
                config: Arc::clone(&self.config),
                base_urls,
            });
            let limit = self.config.maximum_connection_count.map(|n| Arc::new(Semaphore::new(n)));
            accept_loops.push(tokio::spawn(accept_loop(
                listener,
                site,
                shutdown.clone(),
                requests.clone(),
                limit,
            )));
        }

        Running { shutdown, requests, accept_loops, local_addrs }
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn parse_base_url(raw: &str) -> Result<Url, Error> {
    let mut url: Url = raw.parse()?;
    if url.default_port().is_none() {
        return Err(Error::InvalidBaseUrl(raw.to_owned()));
    }
    if !url.path.ends_with('/') {
        url.path.push('/');
    }
    url.query.clear();
    Ok(url)
}

// ── Accept loop ──────────────────────────────────────────────────────────────

async fn accept_loop(
    listener: TcpListener,
    site: Arc<Site>,
    shutdown: CancellationToken,
    requests: CancellationToken,
    limit: Option<Arc<Semaphore>>,
) {
    let mut connections = JoinSet::new();

    loop {
        let permit = match &limit {
            Some(limit) => tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                permit = Arc::clone(limit).acquire_owned() => permit.ok(),
            },
            None => None,
        };

        tokio::select! {
            biased;

            () = shutdown.cancelled() => break,

            res = listener.accept() => {
                let (stream, remote_addr) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };
                debug!(peer = %remote_addr, "connection accepted");
                connections.spawn(serve_connection(
                    stream,
                    remote_addr,
                    Arc::clone(&site),
                    shutdown.clone(),
                    requests.clone(),
                    permit,
                ));
            }

            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
}

async fn serve_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    site: Arc<Site>,
    shutdown: CancellationToken,
    requests: CancellationToken,
    _permit: Option<OwnedSemaphorePermit>,
) {
    let local_addr = stream.local_addr().ok();
    let io = TokioIo::new(stream);

    let svc = service_fn(move |req| {
        let site = Arc::clone(&site);
        let token = requests.child_token();
        async move { Ok::<_, Infallible>(site.handle(req, remote_addr, local_addr, token).await) }
    });

    let builder = ConnBuilder::new(TokioExecutor::new());
    let conn = builder.serve_connection(io, svc);
    tokio::pin!(conn);

    tokio::select! {
        res = conn.as_mut() => {
            if let Err(e) = res {
                error!(peer = %remote_addr, "connection error: {e}");
            }
        }
        () = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.await {
                error!(peer = %remote_addr, "connection error during shutdown: {e}");
            }
        }
    }
}

// ── Request handling ─────────────────────────────────────────────────────────

/// Everything one bound socket needs to answer requests.
struct Site {
    engine: Arc<dyn Engine>,
    config: Arc<HostConfiguration>,
    base_urls: Vec<Url>,
}

impl Site {
    async fn handle(
        &self,
        req: hyper::Request<Incoming>,
        remote_addr: SocketAddr,
        local_addr: Option<SocketAddr>,
        token: CancellationToken,
    ) -> http::Response<ResponseBody> {
        // Dropped early when hyper abandons the request.
        let _disconnect = token.clone().drop_guard();

        let outcome = AssertUnwindSafe(self.respond(req, remote_addr, local_addr, token))
            .catch_unwind()
            .await;

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                self.config.unhandled_error_callback.call(&e);
                internal_error()
            }
            Err(_) => {
                self.config.unhandled_error_callback.call(&EngineError::Panicked);
                internal_error()
            }
        };

        write_response(response, &self.config).await
    }

    async fn respond(
        &self,
        req: hyper::Request<Incoming>,
        remote_addr: SocketAddr,
        local_addr: Option<SocketAddr>,
        token: CancellationToken,
    ) -> Result<Response, EngineError> {
        let Some(request) = self.adapt(req, remote_addr, local_addr).await? else {
            return Ok(Response::status(StatusCode::NOT_FOUND));
        };
        let ctx = self.engine.handle_request(request, None, token).await?;
        ctx.response.ok_or(EngineError::MissingResponse)
    }

    /// Builds the pipeline's view of a raw request. `None` when the path is
    /// outside every base URL served on this socket.
    async fn adapt(
        &self,
        req: hyper::Request<Incoming>,
        remote_addr: SocketAddr,
        local_addr: Option<SocketAddr>,
    ) -> Result<Option<Request>, EngineError> {
        let (parts, body) = req.into_parts();
        let raw_path = parts.uri.path();

        let Some((base, relative)) = self.match_base(raw_path) else {
            return Ok(None);
        };

        let authority = parts
            .headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<Authority>().ok())
            .or_else(|| parts.uri.authority().cloned());
        let (host_name, port) = match (&authority, local_addr) {
            (Some(authority), _) => (authority.host().to_owned(), authority.port_u16()),
            (None, Some(local)) => (local.ip().to_string(), Some(local.port())),
            (None, None) => (base.host_name.clone(), base.port),
        };

        let url = Url {
            scheme: base.scheme.clone(),
            host_name: host_name.trim_start_matches('[').trim_end_matches(']').to_owned(),
            port,
            base_path: base.path.trim_end_matches('/').to_owned(),
            path: relative.to_owned(),
            query: parts.uri.query().unwrap_or_default().to_owned(),
        };

        let body = body.collect().await?.to_bytes();

        Ok(Some(
            Request::new(parts.method, url)
                .with_headers(parts.headers)
                .with_body(body)
                .with_remote_addr(remote_addr),
        ))
    }

    /// Longest base path that prefixes `raw_path` on a segment boundary,
    /// plus the remainder (`/` when empty).
    fn match_base<'a>(&self, raw_path: &'a str) -> Option<(&Url, &'a str)> {
        self.base_urls
            .iter()
            .filter_map(|base| {
                let base_path = base.path.trim_end_matches('/');
                let rest = raw_path.strip_prefix(base_path)?;
                if rest.is_empty() {
                    Some((base, "/"))
                } else if rest.starts_with('/') {
                    Some((base, rest))
                } else {
                    None
                }
            })
            .max_by_key(|(base, _)| base.path.len())
    }
}

// ── Shutdown signal ──────────────────────────────────────────────────────────

/// Resolves on SIGTERM or Ctrl-C. A handler that fails to install never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}
