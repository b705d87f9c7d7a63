//! Puts a [`Response`] on the wire.
//!
//! # Framing
//!
//! With `allow_chunked_encoding` the body is handed to hyper as a stream of
//! unknown length; hyper frames it with `Transfer-Encoding: chunked` on
//! HTTP/1.1. Without it the body is materialised first and sent with an exact
//! `Content-Length`. The two headers are never both present.
//!
//! # Render failures
//!
//! A body closure or stream that fails part-way does not take the connection
//! down. The failure goes to the unhandled-error callback and whatever was
//! produced before it becomes the body.

use std::convert::Infallible;
use std::panic::{AssertUnwindSafe, catch_unwind};

use bytes::{Bytes, BytesMut};
use futures_util::{StreamExt, future, stream};
use http::StatusCode;
use http::header::{CONTENT_LENGTH, HeaderValue, TRANSFER_ENCODING};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;

use crate::config::{ErrorCallback, HostConfiguration};
use crate::response::{Body, RenderFn, Response};

/// Body type the host serves.
pub(crate) type ResponseBody = UnsyncBoxBody<Bytes, Infallible>;

#[derive(Debug, thiserror::Error)]
#[error("response body render panicked")]
struct RenderPanicked;

/// Converts `response` into a hyper response framed per `config`.
pub(crate) async fn write_response(
    response: Response,
    config: &HostConfiguration,
) -> http::Response<ResponseBody> {
    let (status, mut headers, body) = response.into_parts();
    let on_error = &config.unhandled_error_callback;

    let body = if config.allow_chunked_encoding {
        headers.remove(CONTENT_LENGTH);
        chunked(body, on_error)
    } else {
        headers.remove(TRANSFER_ENCODING);
        let bytes = materialise(body, on_error).await;
        if permits_body(status) {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
        }
        Full::new(bytes).boxed_unsync()
    };

    let mut res = http::Response::new(body);
    *res.status_mut() = status;
    *res.headers_mut() = headers;
    res
}

/// Fallback when the response could not be produced at all.
pub(crate) fn internal_error() -> Response {
    Response::status(StatusCode::INTERNAL_SERVER_ERROR)
}

fn chunked(body: Body, on_error: &ErrorCallback) -> ResponseBody {
    let chunks = match body {
        Body::Empty => stream::empty::<Bytes>().boxed(),
        Body::Bytes(bytes) => stream::once(future::ready(bytes)).boxed(),
        Body::Render(render_fn) => stream::once(future::ready(render(render_fn, on_error))).boxed(),
        Body::Stream(s) => {
            let on_error = on_error.clone();
            s.scan((), move |_, item| {
                future::ready(match item {
                    Ok(chunk) => Some(chunk),
                    Err(e) => {
                        on_error.call(&*e);
                        None
                    }
                })
            })
            .boxed()
        }
    };

    // A zero-length chunk would read as the terminating chunk.
    let frames = chunks
        .filter(|chunk| future::ready(!chunk.is_empty()))
        .map(|chunk| Ok::<_, Infallible>(Frame::data(chunk)));
    StreamBody::new(frames).boxed_unsync()
}

async fn materialise(body: Body, on_error: &ErrorCallback) -> Bytes {
    match body {
        Body::Empty => Bytes::new(),
        Body::Bytes(bytes) => bytes,
        Body::Render(render_fn) => render(render_fn, on_error),
        Body::Stream(mut s) => {
            let mut buf = BytesMut::new();
            while let Some(item) = s.next().await {
                match item {
                    Ok(chunk) => buf.extend_from_slice(&chunk),
                    Err(e) => {
                        on_error.call(&*e);
                        break;
                    }
                }
            }
            buf.freeze()
        }
    }
}

fn render(render_fn: RenderFn, on_error: &ErrorCallback) -> Bytes {
    let mut buf = Vec::new();
    match catch_unwind(AssertUnwindSafe(|| render_fn(&mut buf))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => on_error.call(&*e),
        Err(_) => on_error.call(&RenderPanicked),
    }
    Bytes::from(buf)
}

fn permits_body(status: StatusCode) -> bool {
    !(status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED)
}
