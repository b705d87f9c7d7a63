//! Route handlers and what they can ask for.
//!
//! A handler is any `async fn` taking one argument that implements
//! [`FromContext`]:
//!
//! - [`Request`] when only the request matters
//! - [`RouteContext`] to also see the user, the items left by before hooks,
//!   and the request's cancellation token
//!
//! The argument is built from the pipeline's [`Context`] right before the
//! handler runs, so anything a before hook attached is visible. Route tables
//! store handlers as [`BoxedHandler`], which fixes the argument type at
//! registration.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::cancel::CancellationToken;
use crate::context::{Context, RouteContext};
use crate::pipeline::BoxFuture;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// Builds a handler argument from the request's pipeline state.
pub trait FromContext: Sized + Send + 'static {
    fn from_context(ctx: &Context, token: &CancellationToken) -> Self;
}

impl FromContext for Request {
    fn from_context(ctx: &Context, _token: &CancellationToken) -> Self {
        ctx.request.clone()
    }
}

impl FromContext for RouteContext {
    fn from_context(ctx: &Context, token: &CancellationToken) -> Self {
        RouteContext {
            request: ctx.request.clone(),
            current_user: ctx.current_user.clone(),
            items: ctx.items.clone(),
            token: token.clone(),
        }
    }
}

#[doc(hidden)]
pub trait RouteHandler: Send + Sync {
    /// Extracts the argument from `ctx` and starts the handler. The returned
    /// future no longer borrows the context.
    fn invoke(&self, ctx: &Context, token: &CancellationToken) -> BoxFuture<'static, Response>;
}

#[doc(hidden)]
pub type BoxedHandler = Arc<dyn RouteHandler>;

/// Implemented for `async fn(T) -> impl IntoResponse` where `T: FromContext`.
///
/// `T` only exists to pick the argument type; callers never name it.
pub trait Handler<T>: Send + Sync + 'static {
    #[doc(hidden)]
    fn into_route_handler(self) -> BoxedHandler;
}

impl<F, T, Fut, R> Handler<T> for F
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: FromContext,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + 'static,
{
    fn into_route_handler(self) -> BoxedHandler {
        Arc::new(Extracting { handler: self, arg: PhantomData })
    }
}

struct Extracting<F, T> {
    handler: F,
    arg: PhantomData<fn() -> T>,
}

impl<F, T, Fut, R> RouteHandler for Extracting<F, T>
where
    F: Fn(T) -> Fut + Send + Sync,
    T: FromContext,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + 'static,
{
    fn invoke(&self, ctx: &Context, token: &CancellationToken) -> BoxFuture<'static, Response> {
        let pending = (self.handler)(T::from_context(ctx, token));
        Box::pin(async move { pending.await.into_response() })
    }
}
