//! Outgoing response model and the [`IntoResponse`] conversion trait.
//!
//! A [`Response`] carries a status, headers, and a [`Body`]. The body is either
//! already buffered or produced on demand; the [writer](crate::writer) decides
//! how it goes on the wire.

use std::fmt;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

use crate::error::BoxError;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Closure that writes a body into a buffer. May fail part-way through.
pub type RenderFn = Box<dyn FnOnce(&mut Vec<u8>) -> Result<(), BoxError> + Send + 'static>;

// ── Body ─────────────────────────────────────────────────────────────────────

/// The body contract of a [`Response`].
#[derive(Default)]
pub enum Body {
    #[default]
    Empty,
    /// Fully buffered bytes.
    Bytes(Bytes),
    /// Produced by a closure when the response is written.
    Render(RenderFn),
    /// Produced chunk by chunk.
    Stream(BoxStream<'static, Result<Bytes, BoxError>>),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::Render(_) => f.write_str("Render(..)"),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// ```rust
/// use http::StatusCode;
/// use vestibule::Response;
///
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
/// Response::redirect("https://localhost/");
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header("location", "/users/42")
///     .text("created");
/// ```
#[derive(Debug)]
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Body,
}

impl Response {
    /// `200 OK` with a `text/plain; charset=utf-8` body.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self { status: code, headers: HeaderMap::new(), body: Body::Empty }
    }

    /// `303 See Other` pointing at `location`.
    pub fn redirect(location: impl AsRef<str>) -> Self {
        Self::builder()
            .status(StatusCode::SEE_OTHER)
            .header(LOCATION.as_str(), location.as_ref())
            .no_body()
    }

    /// `200 OK` whose body is written by `render` when the response goes out.
    pub fn render<F>(render: F) -> Self
    where
        F: FnOnce(&mut Vec<u8>) -> Result<(), BoxError> + Send + 'static,
    {
        Self::builder().body(Body::Render(Box::new(render)))
    }

    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { status: StatusCode::OK, headers: HeaderMap::new() }
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &Body { &self.body }

    pub fn set_status(&mut self, code: StatusCode) {
        self.status = code;
    }

    /// First value of a header, if it is valid visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    pub(crate) fn into_parts(self) -> (StatusCode, HeaderMap, Body) {
        (self.status, self.headers, self.body)
    }
}

// ── ResponseBuilder ──────────────────────────────────────────────────────────

/// Fluent builder for [`Response`]. Defaults to `200 OK`.
///
/// Headers that fail to parse are dropped with a warning; a header is never
/// worth a panic on the request path.
pub struct ResponseBuilder {
    status: StatusCode,
    headers: HeaderMap,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    /// Appends a header value; repeated names keep every value.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => tracing::warn!(header = name, "dropping invalid response header"),
        }
        self
    }

    pub fn text(self, body: impl Into<String>) -> Response {
        let body = Bytes::from(body.into());
        self.content_type(TEXT_PLAIN).body(Body::Bytes(body))
    }

    pub fn bytes(self, content_type: &str, body: impl Into<Bytes>) -> Response {
        self.content_type(content_type).body(Body::Bytes(body.into()))
    }

    pub fn no_body(self) -> Response {
        self.body(Body::Empty)
    }

    pub fn body(self, body: Body) -> Response {
        Response { status: self.status, headers: self.headers, body }
    }

    fn content_type(mut self, value: &str) -> Self {
        if let Ok(value) = HeaderValue::try_from(value) {
            self.headers.insert(CONTENT_TYPE, value);
        }
        self
    }
}

// ── IntoResponse ─────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
///
/// Implement on your own types to return them directly from route handlers.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

/// Return a status directly from a handler: `return StatusCode::NOT_FOUND`
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}
