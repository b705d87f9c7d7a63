//! # vestibule
//!
//! A self-hosted HTTP front end with a pluggable request pipeline.
//!
//! ## The contract
//!
//! vestibule binds one or more base URLs, turns each incoming request into a
//! [`Request`], runs it through ordered [before](BeforePipeline) and
//! [after](AfterPipeline) hook chains, and writes the resulting [`Response`]
//! with either chunked or fixed-length framing.
//!
//! What vestibule owns:
//!
//! - **Listener lifecycle**: prefixes, bind conflicts, graceful stop, idempotent dispose
//! - **Hook chains**: insertion-ordered, first response wins
//! - **Security guards**: authentication, claims, HTTPS enforcement
//! - **Framing**: `Transfer-Encoding: chunked` or `Content-Length`, never both
//!
//! What it leaves to collaborators behind [`Engine`] and [`Bootstrapper`]:
//! routing, views, model binding, dependency wiring. A small radix-tree
//! [`RouterEngine`] ships for the common case.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vestibule::{
//!     DefaultBootstrapper, Host, HostConfiguration, Module, Request, Router, RouterEngine,
//!     SecurityExt,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), vestibule::Error> {
//!     let mut admin = Module::new().get("/admin", admin_home);
//!     admin.before_mut().requires_authentication();
//!
//!     let mut engine = RouterEngine::new(Router::new().get("/", home).mount(admin));
//!     engine.before_mut().requires_https(true, None);
//!
//!     let host = Host::new(
//!         Arc::new(DefaultBootstrapper::new(engine)),
//!         HostConfiguration::default(),
//!         ["http://localhost:8080/"],
//!     )?;
//!     host.run_until_shutdown_signal().await
//! }
//!
//! async fn home(_req: Request) -> &'static str {
//!     "This is the site home"
//! }
//!
//! async fn admin_home(_req: Request) -> &'static str {
//!     "admins only"
//! }
//! ```

mod binding;
mod cancel;
mod config;
mod context;
mod engine;
mod error;
mod handler;
mod host;
mod pipeline;
mod request;
mod response;
mod router;
mod url;
mod user;
mod writer;

pub mod security;

pub use binding::{BindingResult, ModelBindingError, PropertyBindingError};
pub use cancel::{CancelOnDrop, CancellationToken};
pub use config::{ErrorCallback, HostConfiguration};
pub use context::{Context, RouteContext};
pub use engine::{Bootstrapper, ContextMutator, DefaultBootstrapper, Engine, RouterEngine};
pub use error::{BoxError, EngineError, Error};
pub use handler::{FromContext, Handler};
pub use host::Host;
pub use pipeline::{
    AfterHook, AfterPipeline, BeforeHook, BeforePipeline, BoxFuture, Pipeline, PipelineItem,
};
pub use request::{Query, Request};
pub use response::{Body, IntoResponse, RenderFn, Response, ResponseBuilder};
pub use router::{Module, ModuleHooks, Router};
pub use security::{ClaimPredicate, SecurityExt};
pub use self::url::Url;
pub use user::{Claim, NAME_IDENTIFIER, User};
