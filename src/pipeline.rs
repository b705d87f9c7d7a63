//! Ordered, short-circuiting hook chains.
//!
//! # How hooks run
//!
//! ```text
//! BeforePipeline: [auth] → [claims] → [https] → …   first Some(Response) wins
//!        ↓ None
//! route handler (engine)
//!        ↓
//! AfterPipeline:  [hook] → [hook] → …               every hook runs
//! ```
//!
//! Hooks are stored behind `Arc<dyn Fn … + Send + Sync>`, so one pipeline is
//! shared by every in-flight request. A hook must only capture configuration
//! (predicates, flags); all request state lives in the [`Context`] it is
//! handed. Pipelines are built before the host starts and are not mutated
//! while traffic flows.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::cancel::CancellationToken;
use crate::context::Context;
use crate::response::Response;

/// A boxed, `Send` future borrowing from the request context.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type SyncBefore = dyn Fn(&mut Context) -> Option<Response> + Send + Sync;
type AsyncBefore = dyn for<'a> Fn(&'a mut Context, &'a CancellationToken) -> BoxFuture<'a, Option<Response>>
    + Send
    + Sync;
type SyncAfter = dyn Fn(&mut Context) + Send + Sync;
type AsyncAfter =
    dyn for<'a> Fn(&'a mut Context, &'a CancellationToken) -> BoxFuture<'a, ()> + Send + Sync;

/// A hook that may end the request early by returning a response.
#[derive(Clone)]
pub enum BeforeHook {
    Sync(Arc<SyncBefore>),
    Async(Arc<AsyncBefore>),
}

impl BeforeHook {
    pub fn new<F>(hook: F) -> Self
    where
        F: Fn(&mut Context) -> Option<Response> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(hook))
    }

    pub fn from_async<F>(hook: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context, &'a CancellationToken) -> BoxFuture<'a, Option<Response>>
            + Send
            + Sync
            + 'static,
    {
        Self::Async(Arc::new(hook))
    }

    pub async fn call(&self, ctx: &mut Context, token: &CancellationToken) -> Option<Response> {
        match self {
            Self::Sync(hook) => hook(ctx),
            Self::Async(hook) => hook(ctx, token).await,
        }
    }
}

/// A hook that observes or amends the context after the handler ran.
#[derive(Clone)]
pub enum AfterHook {
    Sync(Arc<SyncAfter>),
    Async(Arc<AsyncAfter>),
}

impl AfterHook {
    pub fn new<F>(hook: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(hook))
    }

    pub fn from_async<F>(hook: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context, &'a CancellationToken) -> BoxFuture<'a, ()>
            + Send
            + Sync
            + 'static,
    {
        Self::Async(Arc::new(hook))
    }

    pub async fn call(&self, ctx: &mut Context, token: &CancellationToken) {
        match self {
            Self::Sync(hook) => hook(ctx),
            Self::Async(hook) => hook(ctx, token).await,
        }
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

/// One entry of a pipeline. Names are optional and need not be unique.
#[derive(Clone)]
pub struct PipelineItem<H> {
    pub name: Option<String>,
    pub hook: H,
}

impl<H> PipelineItem<H> {
    pub fn new(hook: H) -> Self {
        Self { name: None, hook }
    }

    pub fn named(name: impl Into<String>, hook: H) -> Self {
        Self { name: Some(name.into()), hook }
    }
}

/// An ordered list of hooks. See [`BeforePipeline`] and [`AfterPipeline`].
#[derive(Clone)]
pub struct Pipeline<H> {
    items: Vec<PipelineItem<H>>,
}

pub type BeforePipeline = Pipeline<BeforeHook>;
pub type AfterPipeline = Pipeline<AfterHook>;

impl<H> Pipeline<H> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn push(&mut self, item: PipelineItem<H>) {
        self.items.push(item);
    }

    /// Inserts at `index`, clamped to the end of the pipeline.
    pub fn insert(&mut self, index: usize, item: PipelineItem<H>) {
        let index = index.min(self.items.len());
        self.items.insert(index, item);
    }

    /// Removes every item named `name`. Returns how many were removed.
    pub fn remove_by_name(&mut self, name: &str) -> usize {
        let before = self.items.len();
        self.items.retain(|item| item.name.as_deref() != Some(name));
        before - self.items.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(|item| item.name.as_deref())
    }

    pub fn items(&self) -> &[PipelineItem<H>] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<H> Default for Pipeline<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> fmt::Debug for Pipeline<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("len", &self.items.len())
            .field("names", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

impl Pipeline<BeforeHook> {
    pub fn add_item_to_end_of_pipeline<F>(&mut self, hook: F)
    where
        F: Fn(&mut Context) -> Option<Response> + Send + Sync + 'static,
    {
        self.push(PipelineItem::new(BeforeHook::new(hook)));
    }

    pub fn add_item_to_start_of_pipeline<F>(&mut self, hook: F)
    where
        F: Fn(&mut Context) -> Option<Response> + Send + Sync + 'static,
    {
        self.insert(0, PipelineItem::new(BeforeHook::new(hook)));
    }

    pub fn insert_item_at_pipeline_index<F>(&mut self, index: usize, hook: F)
    where
        F: Fn(&mut Context) -> Option<Response> + Send + Sync + 'static,
    {
        self.insert(index, PipelineItem::new(BeforeHook::new(hook)));
    }

    pub fn add_named_item_to_end_of_pipeline<F>(&mut self, name: impl Into<String>, hook: F)
    where
        F: Fn(&mut Context) -> Option<Response> + Send + Sync + 'static,
    {
        self.push(PipelineItem::named(name, BeforeHook::new(hook)));
    }

    /// Appends a hook that needs to await. It is handed the request's
    /// cancellation token.
    pub fn add_async_item_to_end_of_pipeline<F>(&mut self, hook: F)
    where
        F: for<'a> Fn(&'a mut Context, &'a CancellationToken) -> BoxFuture<'a, Option<Response>>
            + Send
            + Sync
            + 'static,
    {
        self.push(PipelineItem::new(BeforeHook::from_async(hook)));
    }

    /// Runs hooks in insertion order. The first hook that returns a response
    /// ends the chain and its response is returned; `None` means carry on.
    pub async fn invoke(&self, ctx: &mut Context, token: &CancellationToken) -> Option<Response> {
        for item in &self.items {
            if let Some(response) = item.hook.call(ctx, token).await {
                tracing::debug!(
                    hook = item.name.as_deref().unwrap_or("<unnamed>"),
                    status = response.status_code().as_u16(),
                    "before pipeline short-circuited"
                );
                return Some(response);
            }
        }
        None
    }
}

impl Pipeline<AfterHook> {
    pub fn add_item_to_end_of_pipeline<F>(&mut self, hook: F)
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.push(PipelineItem::new(AfterHook::new(hook)));
    }

    pub fn add_item_to_start_of_pipeline<F>(&mut self, hook: F)
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.insert(0, PipelineItem::new(AfterHook::new(hook)));
    }

    pub fn insert_item_at_pipeline_index<F>(&mut self, index: usize, hook: F)
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.insert(index, PipelineItem::new(AfterHook::new(hook)));
    }

    pub fn add_named_item_to_end_of_pipeline<F>(&mut self, name: impl Into<String>, hook: F)
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.push(PipelineItem::named(name, AfterHook::new(hook)));
    }

    pub fn add_async_item_to_end_of_pipeline<F>(&mut self, hook: F)
    where
        F: for<'a> Fn(&'a mut Context, &'a CancellationToken) -> BoxFuture<'a, ()>
            + Send
            + Sync
            + 'static,
    {
        self.push(PipelineItem::new(AfterHook::from_async(hook)));
    }

    /// Runs every hook in insertion order.
    pub async fn invoke(&self, ctx: &mut Context, token: &CancellationToken) {
        for item in &self.items {
            item.hook.call(ctx, token).await;
        }
    }
}
