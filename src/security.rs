//! Authentication, claim and transport guards.
//!
//! Each guard is a [`BeforeHook`] built from captured configuration only, so
//! a secured pipeline can be shared across concurrent requests:
//!
//! ```rust
//! use vestibule::{BeforePipeline, SecurityExt};
//!
//! let mut before = BeforePipeline::new();
//! before.requires_authentication();
//! before.requires_claims([|c: &vestibule::Claim| c.kind == "admin"]);
//! before.requires_https(true, None);
//! ```

use std::sync::Arc;

use http::StatusCode;
use tracing::debug;

use crate::context::Context;
use crate::pipeline::{BeforeHook, BeforePipeline, PipelineItem};
use crate::response::Response;
use crate::user::Claim;

/// A shareable claim predicate.
pub type ClaimPredicate = Arc<dyn Fn(&Claim) -> bool + Send + Sync>;

/// Installs security guards on a before pipeline.
pub trait SecurityExt {
    /// `401 Unauthorized` unless a user with an identity is attached.
    fn requires_authentication(&mut self);

    /// `403 Forbidden` unless every predicate matches at least one claim.
    ///
    /// Adds one hook per predicate.
    fn requires_claims<I, P>(&mut self, predicates: I)
    where
        I: IntoIterator<Item = P>,
        P: Fn(&Claim) -> bool + Send + Sync + 'static;

    /// `403 Forbidden` unless some predicate matches some claim.
    ///
    /// Adds a single hook.
    fn requires_any_claim<I, P>(&mut self, predicates: I)
    where
        I: IntoIterator<Item = P>,
        P: Fn(&Claim) -> bool + Send + Sync + 'static;

    /// Rejects plain-http requests: a `GET` is redirected to the https URL
    /// when `redirect` is set, everything else gets `403 Forbidden`.
    fn requires_https(&mut self, redirect: bool, forced_port: Option<u16>);
}

impl SecurityExt for BeforePipeline {
    fn requires_authentication(&mut self) {
        self.push(PipelineItem::named("requires-authentication", authentication_hook()));
    }

    fn requires_claims<I, P>(&mut self, predicates: I)
    where
        I: IntoIterator<Item = P>,
        P: Fn(&Claim) -> bool + Send + Sync + 'static,
    {
        for predicate in predicates {
            self.push(PipelineItem::named("requires-claims", claim_hook(Arc::new(predicate))));
        }
    }

    fn requires_any_claim<I, P>(&mut self, predicates: I)
    where
        I: IntoIterator<Item = P>,
        P: Fn(&Claim) -> bool + Send + Sync + 'static,
    {
        let predicates = predicates
            .into_iter()
            .map(|p| Arc::new(p) as ClaimPredicate)
            .collect();
        self.push(PipelineItem::named("requires-any-claim", any_claim_hook(predicates)));
    }

    fn requires_https(&mut self, redirect: bool, forced_port: Option<u16>) {
        self.push(PipelineItem::named("requires-https", https_hook(redirect, forced_port)));
    }
}

// ── Hook constructors ────────────────────────────────────────────────────────

pub fn authentication_hook() -> BeforeHook {
    BeforeHook::new(|ctx| {
        if ctx.is_authenticated() {
            None
        } else {
            debug!(path = ctx.request.path(), "rejecting unauthenticated request");
            Some(Response::status(StatusCode::UNAUTHORIZED))
        }
    })
}

pub fn claim_hook(predicate: ClaimPredicate) -> BeforeHook {
    BeforeHook::new(move |ctx| {
        if user_has_claim(ctx, |claim| predicate(claim)) {
            None
        } else {
            debug!(path = ctx.request.path(), "rejecting request missing a required claim");
            Some(Response::status(StatusCode::FORBIDDEN))
        }
    })
}

pub fn any_claim_hook(predicates: Vec<ClaimPredicate>) -> BeforeHook {
    BeforeHook::new(move |ctx| {
        if user_has_claim(ctx, |claim| predicates.iter().any(|p| p(claim))) {
            None
        } else {
            debug!(path = ctx.request.path(), "rejecting request matching none of the claims");
            Some(Response::status(StatusCode::FORBIDDEN))
        }
    })
}

pub fn https_hook(redirect: bool, forced_port: Option<u16>) -> BeforeHook {
    BeforeHook::new(move |ctx| {
        let request = &ctx.request;
        if request.url().is_secure() {
            return None;
        }

        if redirect && request.is_method("GET") {
            let mut target = request.url().clone();
            target.scheme = "https".to_owned();
            target.port = forced_port;
            return Some(Response::redirect(target.to_string()));
        }

        debug!(method = %request.method(), url = %request.url(), "rejecting insecure request");
        Some(Response::status(StatusCode::FORBIDDEN))
    })
}

// An absent user and a user without claims fail the same way.
fn user_has_claim(ctx: &Context, predicate: impl Fn(&Claim) -> bool) -> bool {
    ctx.current_user
        .as_ref()
        .is_some_and(|user| user.claims().iter().any(predicate))
}
