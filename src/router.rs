//! Radix-tree route table for the default engine.
//!
//! One tree per HTTP method. Routes are grouped in [`Module`]s; each module
//! owns a before and an after pipeline that run around its own routes only.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use matchit::Router as MatchitRouter;

use crate::handler::{BoxedHandler, Handler};
use crate::pipeline::{AfterPipeline, BeforePipeline};

/// A group of routes sharing before/after pipelines.
///
/// ```rust
/// use vestibule::{Module, Request, SecurityExt};
///
/// # async fn secret(_: Request) -> &'static str { "" }
/// let mut admin = Module::new();
/// admin.before_mut().requires_authentication();
/// let admin = admin.get("/admin/secret", secret);
/// ```
#[derive(Default)]
pub struct Module {
    before: BeforePipeline,
    after: AfterPipeline,
    routes: Vec<(Method, String, BoxedHandler)>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<T>(mut self, method: Method, path: &str, handler: impl Handler<T>) -> Self {
        self.routes.push((method, path.to_owned(), handler.into_route_handler()));
        self
    }

    pub fn get<T>(self, path: &str, handler: impl Handler<T>) -> Self {
        self.on(Method::GET, path, handler)
    }

    pub fn post<T>(self, path: &str, handler: impl Handler<T>) -> Self {
        self.on(Method::POST, path, handler)
    }

    pub fn before(&self) -> &BeforePipeline { &self.before }
    pub fn after(&self) -> &AfterPipeline { &self.after }
    pub fn before_mut(&mut self) -> &mut BeforePipeline { &mut self.before }
    pub fn after_mut(&mut self) -> &mut AfterPipeline { &mut self.after }
}

/// Pipelines of the module a route came from.
#[derive(Debug, Default)]
pub struct ModuleHooks {
    pub before: BeforePipeline,
    pub after: AfterPipeline,
}

#[derive(Clone)]
pub(crate) struct Route {
    pub(crate) handler: BoxedHandler,
    pub(crate) hooks: Arc<ModuleHooks>,
}

/// The application route table. Build it once at startup.
#[derive(Default)]
pub struct Router {
    routes: HashMap<Method, MatchitRouter<Route>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route with no module pipelines.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or clashes with an existing one.
    pub fn on<T>(self, method: Method, path: &str, handler: impl Handler<T>) -> Self {
        self.mount(Module::new().on(method, path, handler))
    }

    pub fn get<T>(self, path: &str, handler: impl Handler<T>) -> Self {
        self.on(Method::GET, path, handler)
    }

    pub fn post<T>(self, path: &str, handler: impl Handler<T>) -> Self {
        self.on(Method::POST, path, handler)
    }

    /// Registers every route of `module`.
    ///
    /// # Panics
    ///
    /// Panics if a path is not a valid route or clashes with an existing one.
    pub fn mount(mut self, module: Module) -> Self {
        let hooks = Arc::new(ModuleHooks { before: module.before, after: module.after });
        for (method, path, handler) in module.routes {
            let route = Route { handler, hooks: Arc::clone(&hooks) };
            self.routes
                .entry(method)
                .or_default()
                .insert(path.as_str(), route)
                .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        }
        self
    }

    pub(crate) fn lookup(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(Route, HashMap<String, String>)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((matched.value.clone(), params))
    }
}
