//! Per-request execution state.

use http::Extensions;

use crate::cancel::CancellationToken;
use crate::request::Request;
use crate::response::Response;
use crate::user::User;

/// Everything one request's trip through the pipeline produces.
///
/// Created when the host accepts a request, dropped once the response is
/// written. Owned by exactly one request; hooks get `&mut` access in turn.
#[derive(Debug)]
pub struct Context {
    pub request: Request,
    pub current_user: Option<User>,
    pub response: Option<Response>,
    /// Typed scratch space for hooks to hand data downstream.
    pub items: Extensions,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self { request, current_user: None, response: None, items: Extensions::new() }
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.current_user = Some(user);
        self
    }

    /// True when a user with at least one claim is attached.
    pub fn is_authenticated(&self) -> bool {
        self.current_user.as_ref().is_some_and(User::is_authenticated)
    }
}

/// What a route handler taking this type sees: the request plus whatever
/// the before hooks attached to it.
#[derive(Clone, Debug)]
pub struct RouteContext {
    pub request: Request,
    pub current_user: Option<User>,
    pub items: Extensions,
    /// Cancelled when the client disconnects or the host is disposed.
    pub token: CancellationToken,
}
