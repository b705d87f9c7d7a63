//! Collaborator interfaces the host drives, plus a router-backed default.
//!
//! The host only knows [`Bootstrapper`] and [`Engine`]. It hands each adapted
//! [`Request`] to the engine and writes whatever response ends up in the
//! returned [`Context`].
//!
//! [`RouterEngine`] is the stock engine. It runs the stages in this order:
//!
//! ```text
//! app before → route lookup → module before → handler → module after → app after
//! ```
//!
//! A response from any before hook skips straight to the after pipelines.

use std::sync::Arc;

use http::StatusCode;

use crate::cancel::CancellationToken;
use crate::context::Context;
use crate::error::EngineError;
use crate::pipeline::{AfterPipeline, BeforePipeline, BoxFuture};
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;

/// Runs once on a freshly created context, before any pipeline.
pub type ContextMutator = Box<dyn FnOnce(&mut Context) + Send>;

/// Turns a request into a context carrying a response.
pub trait Engine: Send + Sync {
    fn handle_request(
        &self,
        request: Request,
        preprocess: Option<ContextMutator>,
        token: CancellationToken,
    ) -> BoxFuture<'_, Result<Context, EngineError>>;
}

/// Supplies the engine and owns whatever it was built from.
pub trait Bootstrapper: Send + Sync {
    fn engine(&self) -> Arc<dyn Engine>;

    /// Releases bootstrapper resources. The host calls this exactly once.
    fn dispose(&self) {}
}

// ── RouterEngine ─────────────────────────────────────────────────────────────

/// The default engine: application pipelines around a [`Router`].
#[derive(Default)]
pub struct RouterEngine {
    before: BeforePipeline,
    after: AfterPipeline,
    router: Router,
}

impl RouterEngine {
    pub fn new(router: Router) -> Self {
        Self { before: BeforePipeline::new(), after: AfterPipeline::new(), router }
    }

    /// Application-wide before pipeline, run ahead of route lookup.
    pub fn before_mut(&mut self) -> &mut BeforePipeline { &mut self.before }

    /// Application-wide after pipeline, run last.
    pub fn after_mut(&mut self) -> &mut AfterPipeline { &mut self.after }

    async fn run(
        &self,
        request: Request,
        preprocess: Option<ContextMutator>,
        token: CancellationToken,
    ) -> Result<Context, EngineError> {
        let mut ctx = Context::new(request);
        if let Some(preprocess) = preprocess {
            preprocess(&mut ctx);
        }

        if let Some(response) = self.before.invoke(&mut ctx, &token).await {
            ctx.response = Some(response);
        } else {
            self.dispatch(&mut ctx, &token).await?;
        }

        self.after.invoke(&mut ctx, &token).await;
        Ok(ctx)
    }

    async fn dispatch(&self, ctx: &mut Context, token: &CancellationToken) -> Result<(), EngineError> {
        let path = route_path(ctx.request.path());
        let Some((route, params)) = self.router.lookup(ctx.request.method(), path) else {
            ctx.response = Some(Response::status(StatusCode::NOT_FOUND));
            return Ok(());
        };
        ctx.request.set_params(params);

        if let Some(response) = route.hooks.before.invoke(ctx, token).await {
            ctx.response = Some(response);
        } else {
            let response = tokio::select! {
                biased;
                () = token.cancelled() => return Err(EngineError::Cancelled),
                response = route.handler.invoke(ctx, token) => response,
            };
            ctx.response = Some(response);
        }

        route.hooks.after.invoke(ctx, token).await;
        Ok(())
    }
}

/// `/users/` and `/users` resolve to the same route.
fn route_path(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

impl Engine for RouterEngine {
    fn handle_request(
        &self,
        request: Request,
        preprocess: Option<ContextMutator>,
        token: CancellationToken,
    ) -> BoxFuture<'_, Result<Context, EngineError>> {
        Box::pin(self.run(request, preprocess, token))
    }
}

// ── DefaultBootstrapper ──────────────────────────────────────────────────────

/// Hands out one shared engine and never needs cleanup.
pub struct DefaultBootstrapper {
    engine: Arc<dyn Engine>,
}

impl DefaultBootstrapper {
    pub fn new(engine: impl Engine + 'static) -> Self {
        Self { engine: Arc::new(engine) }
    }
}

impl Default for DefaultBootstrapper {
    fn default() -> Self {
        Self::new(RouterEngine::default())
    }
}

impl Bootstrapper for DefaultBootstrapper {
    fn engine(&self) -> Arc<dyn Engine> {
        Arc::clone(&self.engine)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use http::Method;

    use super::*;
    use crate::router::Module;
    use crate::security::SecurityExt;
    use crate::url::Url;
    use crate::user::{Claim, User};

    fn request(method: Method, path: &str) -> Request {
        Request::new(method, Url::new("http", "localhost").with_path(path))
    }

    async fn handle(engine: &RouterEngine, req: Request, preprocess: Option<ContextMutator>) -> Context {
        engine.handle_request(req, preprocess, CancellationToken::new()).await.unwrap()
    }

    async fn site(_: Request) -> &'static str { "This is the site route" }

    async fn user(req: Request) -> String {
        format!("user {}", req.param("id").unwrap_or("?"))
    }

    #[tokio::test]
    async fn routes_to_handler() {
        let engine = RouterEngine::new(Router::new().get("/rel", site).get("/users/{id}", user));

        let ctx = handle(&engine, request(Method::GET, "/users/7"), None).await;
        let res = ctx.response.unwrap();
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(ctx.request.param("id"), Some("7"));
    }

    #[tokio::test]
    async fn trailing_slash_resolves_to_same_route() {
        let engine = RouterEngine::new(Router::new().get("/rel", site).get("/", site));
        for path in ["/rel/", "/", ""] {
            let ctx = handle(&engine, request(Method::GET, path), None).await;
            assert_eq!(ctx.response.unwrap().status_code(), StatusCode::OK, "path {path:?}");
        }
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let engine = RouterEngine::new(Router::new().get("/rel", site));
        let ctx = handle(&engine, request(Method::GET, "/missing"), None).await;
        assert_eq!(ctx.response.unwrap().status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn module_guard_short_circuits_but_after_hooks_still_run() {
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut module = Module::new().get("/secret", site);
        module.before_mut().requires_authentication();
        let s = Arc::clone(&seen);
        module.after_mut().add_item_to_end_of_pipeline(move |ctx| {
            let status = ctx.response.as_ref().map(|r| r.status_code().as_u16());
            s.lock().unwrap().push(status);
        });
        let engine = RouterEngine::new(Router::new().mount(module));

        let ctx = handle(&engine, request(Method::GET, "/secret"), None).await;
        assert_eq!(ctx.response.unwrap().status_code(), StatusCode::UNAUTHORIZED);

        let authenticate: ContextMutator = Box::new(|ctx| {
            ctx.current_user = Some(User::new("bob", [Claim::new("role", "admin")]));
        });
        let ctx = handle(&engine, request(Method::GET, "/secret"), Some(authenticate)).await;
        assert_eq!(ctx.response.unwrap().status_code(), StatusCode::OK);

        assert_eq!(*seen.lock().unwrap(), [Some(401), Some(200)]);
    }

    #[tokio::test]
    async fn handler_sees_state_left_by_before_hooks() {
        #[derive(Clone)]
        struct TraceId(u32);

        async fn traced(ctx: crate::context::RouteContext) -> String {
            let user = ctx.current_user.as_ref().and_then(User::identifier).unwrap_or("-");
            let trace = ctx.items.get::<TraceId>().map_or(0, |t| t.0);
            format!("{user}:{trace}")
        }

        let mut module = Module::new().get("/traced", traced);
        module.before_mut().add_item_to_end_of_pipeline(|ctx| {
            ctx.items.insert(TraceId(7));
            None
        });
        let mut engine = RouterEngine::new(Router::new().mount(module));
        engine.before_mut().add_item_to_end_of_pipeline(|ctx| {
            ctx.current_user = Some(User::new("carol", []));
            None
        });

        let ctx = handle(&engine, request(Method::GET, "/traced"), None).await;
        let res = ctx.response.unwrap();
        assert!(matches!(res.body(), crate::response::Body::Bytes(b) if b.as_ref() == b"carol:7"));
    }

    #[tokio::test]
    async fn app_before_pipeline_runs_ahead_of_routing() {
        let mut engine = RouterEngine::new(Router::new().get("/rel", site));
        engine.before_mut().requires_https(true, None);

        let ctx = handle(&engine, request(Method::GET, "/rel"), None).await;
        let res = ctx.response.unwrap();
        assert_eq!(res.status_code(), StatusCode::SEE_OTHER);
        assert_eq!(res.header("location"), Some("https://localhost/rel"));
    }

    #[tokio::test]
    async fn app_after_pipeline_can_amend_response() {
        let mut engine = RouterEngine::new(Router::new().get("/rel", site));
        engine.after_mut().add_item_to_end_of_pipeline(|ctx| {
            if let Some(res) = ctx.response.as_mut() {
                res.headers_mut().insert("x-after", http::HeaderValue::from_static("1"));
            }
        });

        let ctx = handle(&engine, request(Method::GET, "/rel"), None).await;
        assert_eq!(ctx.response.unwrap().header("x-after"), Some("1"));
    }

    #[tokio::test]
    async fn cancelled_token_aborts_handler() {
        async fn slow(_: Request) -> &'static str {
            std::future::pending::<()>().await;
            "never"
        }
        let engine = RouterEngine::new(Router::new().get("/slow", slow));
        let token = CancellationToken::new();
        token.cancel();

        let result = engine.handle_request(request(Method::GET, "/slow"), None, token).await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
