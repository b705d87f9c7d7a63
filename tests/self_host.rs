//! End-to-end tests: a real host on a loopback port, driven by a hyper client.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use vestibule::{
    Bootstrapper, BoxError, BoxFuture, CancellationToken, Context, ContextMutator,
    DefaultBootstrapper, Engine, EngineError, Error, Host, HostConfiguration, Request, Response,
    RouteContext, Router, RouterEngine, SecurityExt,
};

const BASE: &str = "http://localhost:0/base/";

// ── App ──────────────────────────────────────────────────────────────────────

async fn home(_: Request) -> &'static str {
    "This is the site home"
}

async fn site_route(_: Request) -> &'static str {
    "This is the site route"
}

async fn echo(req: Request) -> String {
    String::from_utf8_lossy(req.body()).into_owned()
}

async fn with_header(_: Request) -> Response {
    Response::builder().header("X-Some-Header", "Some value").text("header")
}

async fn render_exception(_: Request) -> Response {
    Response::render(|out| {
        out.extend_from_slice(b"Content");
        Err::<(), BoxError>("render failed".into())
    })
}

async fn explode(_: Request) -> &'static str {
    panic!("handler exploded")
}

fn app() -> RouterEngine {
    RouterEngine::new(
        Router::new()
            .get("/", home)
            .get("/rel", site_route)
            .post("/rel", echo)
            .get("/rel/header", with_header)
            .get("/exception", render_exception)
            .get("/panic", explode),
    )
}

// ── Harness ──────────────────────────────────────────────────────────────────

async fn start(engine: impl Engine + 'static, config: HostConfiguration) -> (Host, SocketAddr) {
    let host = Host::new(Arc::new(DefaultBootstrapper::new(engine)), config, [BASE]).unwrap();
    host.start().await.unwrap();
    let port = host.local_addrs()[0].port();
    (host, SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
}

struct Reply {
    status: StatusCode,
    headers: http::HeaderMap,
    body: String,
}

async fn send(addr: SocketAddr, method: Method, path: &str, body: &'static str) -> Reply {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .unwrap();
    tokio::spawn(conn);

    let req = http::Request::builder()
        .method(method)
        .uri(path)
        .header("host", format!("localhost:{}", addr.port()))
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap();
    let res = sender.send_request(req).await.unwrap();
    let (parts, body) = res.into_parts();
    let bytes = body.collect().await.unwrap().to_bytes();

    Reply {
        status: parts.status,
        headers: parts.headers,
        body: String::from_utf8(bytes.to_vec()).unwrap(),
    }
}

async fn get(addr: SocketAddr, path: &str) -> Reply {
    send(addr, Method::GET, path, "").await
}

fn get_request(addr: SocketAddr, path: &str) -> http::Request<Full<Bytes>> {
    http::Request::builder()
        .uri(path)
        .header("host", format!("localhost:{}", addr.port()))
        .body(Full::new(Bytes::new()))
        .unwrap()
}

// ── Serving ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn serves_site_route_chunked_by_default() {
    let (_host, addr) = start(app(), HostConfiguration::default()).await;

    let reply = get(addr, "/base/rel").await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.headers.get("transfer-encoding").unwrap(), "chunked");
    assert!(reply.headers.get("content-length").is_none());
    assert_eq!(reply.body, "This is the site route");
}

#[tokio::test]
async fn serves_content_length_when_chunking_disabled() {
    let config = HostConfiguration { allow_chunked_encoding: false, ..HostConfiguration::default() };
    let (_host, addr) = start(app(), config).await;

    let reply = get(addr, "/base/rel").await;

    assert!(reply.headers.get("transfer-encoding").is_none());
    assert_eq!(reply.headers.get("content-length").unwrap(), "22");
    assert_eq!(reply.body, "This is the site route");
}

#[tokio::test]
async fn echoes_posted_body() {
    let (_host, addr) = start(app(), HostConfiguration::default()).await;

    let reply = send(addr, Method::POST, "/base/rel", "This is the body of the request").await;

    assert_eq!(reply.body, "This is the body of the request");
}

#[tokio::test]
async fn returns_custom_headers() {
    let (_host, addr) = start(app(), HostConfiguration::default()).await;

    let reply = get(addr, "/base/rel/header/?query=value").await;
    let values: Vec<_> = reply.headers.get_all("x-some-header").iter().collect();
    assert_eq!(values, ["Some value"]);
}

#[tokio::test]
async fn slashless_base_reaches_site_home() {
    let (_host, addr) = start(app(), HostConfiguration::default()).await;

    assert_eq!(get(addr, "/base").await.body, "This is the site home");
}

#[tokio::test]
async fn paths_outside_the_base_are_not_found() {
    let (_host, addr) = start(app(), HostConfiguration::default()).await;

    assert_eq!(get(addr, "/elsewhere").await.status, StatusCode::NOT_FOUND);
    assert_eq!(get(addr, "/baseline").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn recovers_from_rendering_exception() {
    for chunked in [true, false] {
        let config = HostConfiguration { allow_chunked_encoding: chunked, ..HostConfiguration::default() };
        let (_host, addr) = start(app(), config).await;

        assert_eq!(get(addr, "/base/exception").await.body, "Content");
    }
}

#[tokio::test]
async fn handler_panic_becomes_500_and_host_keeps_serving() {
    let errors = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&errors);
    let config = HostConfiguration {
        unhandled_error_callback: vestibule::ErrorCallback::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
        ..HostConfiguration::default()
    };
    let (_host, addr) = start(app(), config).await;

    assert_eq!(get(addr, "/base/panic").await.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(get(addr, "/base/rel").await.body, "This is the site route");
}

#[tokio::test]
async fn https_guard_redirects_to_rewritten_url() {
    let mut engine = app();
    engine.before_mut().requires_https(true, None);
    let (_host, addr) = start(engine, HostConfiguration::default()).await;

    let reply = get(addr, "/base/rel?x=1").await;

    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    assert_eq!(reply.headers.get("location").unwrap(), "https://localhost/base/rel?x=1");

    let reply = send(addr, Method::POST, "/base/rel", "body").await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
}

// ── Request adaptation ───────────────────────────────────────────────────────

#[derive(Default)]
struct CapturingEngine {
    seen: Mutex<Option<Request>>,
}

impl Engine for CapturingEngine {
    fn handle_request(
        &self,
        request: Request,
        _preprocess: Option<ContextMutator>,
        _token: CancellationToken,
    ) -> BoxFuture<'_, Result<Context, EngineError>> {
        *self.seen.lock().unwrap() = Some(request.clone());
        Box::pin(async move {
            let mut ctx = Context::new(request);
            ctx.response = Some(Response::text(""));
            Ok(ctx)
        })
    }
}

struct SharedEngine(Arc<CapturingEngine>);

impl Engine for SharedEngine {
    fn handle_request(
        &self,
        request: Request,
        preprocess: Option<ContextMutator>,
        token: CancellationToken,
    ) -> BoxFuture<'_, Result<Context, EngineError>> {
        self.0.handle_request(request, preprocess, token)
    }
}

#[tokio::test]
async fn sets_query_string_and_url() {
    let engine = Arc::new(CapturingEngine::default());
    let (_host, addr) = start(SharedEngine(Arc::clone(&engine)), HostConfiguration::default()).await;

    get(addr, "/base/test/stuff?query=value&query2=value2").await;

    let request = engine.seen.lock().unwrap().take().expect("engine was not called");
    assert_eq!(request.path(), "/test/stuff");
    assert_eq!(request.url().base_path, "/base");
    assert_eq!(request.url().host_name, "localhost");
    assert_eq!(request.url().port, Some(addr.port()));
    assert_eq!(request.query().get("query"), Some("value"));
    assert_eq!(request.query().get("query2"), Some("value2"));
    assert!(request.remote_addr().is_some());
}

// ── Lifecycle ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn second_host_on_used_prefix_reports_conflict() {
    let (_first, addr) = start(app(), HostConfiguration::default()).await;

    let second = Host::with_defaults([format!("http://localhost:{}/base/", addr.port())]).unwrap();
    let err = second.start().await.unwrap_err();

    assert!(matches!(err, Error::BindConflict { .. }));
    assert!(err.to_string().contains("conflict"));
    assert!(!second.is_running());
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let (host, _) = start(app(), HostConfiguration::default()).await;
    assert!(matches!(host.start().await, Err(Error::AlreadyStarted)));
}

#[tokio::test]
async fn stop_releases_the_port_and_host_can_restart() {
    let config = HostConfiguration::default();
    let host = Host::new(Arc::new(DefaultBootstrapper::new(app())), config, [BASE]).unwrap();
    host.start().await.unwrap();
    let port = host.local_addrs()[0].port();

    host.stop().await;
    host.stop().await;
    assert!(!host.is_running());
    assert!(host.local_addrs().is_empty());

    let rebound = Host::with_defaults([format!("http://localhost:{port}/base/")]).unwrap();
    rebound.start().await.unwrap();
    rebound.stop().await;

    host.start().await.unwrap();
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, host.local_addrs()[0].port()));
    assert_eq!(get(addr, "/base/rel").await.body, "This is the site route");
}

#[derive(Default)]
struct CountingBootstrapper {
    disposed: AtomicUsize,
}

impl Bootstrapper for CountingBootstrapper {
    fn engine(&self) -> Arc<dyn Engine> {
        Arc::new(app())
    }

    fn dispose(&self) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn dispose_without_start_disposes_bootstrapper_once() {
    let bootstrapper = Arc::new(CountingBootstrapper::default());
    let host = Host::new(
        Arc::clone(&bootstrapper) as Arc<dyn Bootstrapper>,
        HostConfiguration::default(),
        ["http://localhost/"],
    )
    .unwrap();

    host.dispose();
    host.dispose();
    drop(host);

    assert_eq!(bootstrapper.disposed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dispose_after_start_stops_serving() {
    let bootstrapper = Arc::new(CountingBootstrapper::default());
    let host = Host::new(
        Arc::clone(&bootstrapper) as Arc<dyn Bootstrapper>,
        HostConfiguration::default(),
        [BASE],
    )
    .unwrap();
    host.start().await.unwrap();

    host.dispose();

    assert!(!host.is_running());
    assert_eq!(bootstrapper.disposed.load(Ordering::SeqCst), 1);
    drop(host);
    assert_eq!(bootstrapper.disposed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn connection_limit_still_serves_sequential_requests() {
    let config = HostConfiguration { maximum_connection_count: Some(1), ..HostConfiguration::default() };
    let (_host, addr) = start(app(), config).await;

    for _ in 0..3 {
        assert_eq!(get(addr, "/base/rel").await.body, "This is the site route");
    }
}

#[tokio::test]
async fn start_after_dispose_is_rejected() {
    let host = Host::with_defaults([BASE]).unwrap();
    host.dispose();
    assert!(matches!(host.start().await, Err(Error::Disposed)));
    assert!(!host.is_running());
}

#[tokio::test]
async fn stop_lets_in_flight_requests_finish() {
    async fn slow(_: Request) -> &'static str {
        tokio::time::sleep(Duration::from_millis(300)).await;
        "finished after stop"
    }
    let host = Host::new(
        Arc::new(DefaultBootstrapper::new(RouterEngine::new(Router::new().get("/slow", slow)))),
        HostConfiguration::default(),
        [BASE],
    )
    .unwrap();
    host.start().await.unwrap();
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, host.local_addrs()[0].port()));

    let in_flight = tokio::spawn(get(addr, "/base/slow"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    host.stop().await;

    let reply = in_flight.await.unwrap();
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, "finished after stop");
}

#[tokio::test]
async fn client_disconnect_cancels_the_request_token() {
    let (started_tx, mut started) = mpsc::unbounded_channel::<()>();
    let (cancelled_tx, mut cancelled) = mpsc::unbounded_channel::<()>();

    let wait_for_cancel = move |ctx: RouteContext| {
        let started_tx = started_tx.clone();
        let cancelled_tx = cancelled_tx.clone();
        async move {
            let token = ctx.token.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                let _ = cancelled_tx.send(());
            });
            let _ = started_tx.send(());
            std::future::pending::<()>().await;
            "unreachable"
        }
    };
    let (_host, addr) =
        start(RouterEngine::new(Router::new().get("/wait", wait_for_cancel)), HostConfiguration::default())
            .await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .unwrap();
    let conn = tokio::spawn(conn);
    let request = get_request(addr, "/base/wait");
    let response = tokio::spawn(async move { sender.send_request(request).await });

    tokio::time::timeout(Duration::from_secs(5), started.recv())
        .await
        .expect("handler never started");
    response.abort();
    conn.abort();

    tokio::time::timeout(Duration::from_secs(5), cancelled.recv())
        .await
        .expect("request token was not cancelled after disconnect")
        .expect("handler dropped its sender");
}
