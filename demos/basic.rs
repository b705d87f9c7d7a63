//! Minimal vestibule example: a public site, a guarded admin module, and an
//! optional TOML configuration file.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example basic [vestibule.toml]
//!
//! Try:
//!   curl -i http://localhost:8080/site/
//!   curl -i http://localhost:8080/site/users/42
//!   curl -i -X POST http://localhost:8080/site/echo -d 'hello'
//!   curl -i http://localhost:8080/site/admin
//!   curl -i -H 'x-demo-user: alice' http://localhost:8080/site/admin

use std::sync::Arc;

use vestibule::{
    Claim, DefaultBootstrapper, Host, HostConfiguration, Module, Request, Response, Router,
    RouterEngine, SecurityExt, User,
};

#[tokio::main]
async fn main() -> Result<(), vestibule::Error> {
    tracing_subscriber::fmt::init();

    let config = match std::env::args().nth(1) {
        Some(path) => HostConfiguration::load(path)?,
        None => HostConfiguration::default(),
    };

    let mut admin = Module::new().get("/admin", admin_home);
    admin.before_mut().requires_authentication();
    admin.before_mut().requires_claims([|c: &Claim| c.kind == "role" && c.value == "admin"]);

    let mut engine = RouterEngine::new(
        Router::new()
            .get("/", home)
            .get("/users/{id}", get_user)
            .post("/echo", echo)
            .mount(admin),
    );
    // Stand-in for a real authentication layer.
    engine.before_mut().add_item_to_start_of_pipeline(|ctx| {
        let name = ctx.request.header("x-demo-user")?.to_owned();
        ctx.current_user = Some(User::new(name, [Claim::new("role", "admin")]));
        None
    });

    let host = Host::new(
        Arc::new(DefaultBootstrapper::new(engine)),
        config,
        ["http://localhost:8080/site/"],
    )?;
    host.run_until_shutdown_signal().await
}

async fn home(_req: Request) -> &'static str {
    "This is the site home"
}

// GET /users/{id}
async fn get_user(req: Request) -> String {
    format!("user {}", req.param("id").unwrap_or("unknown"))
}

// POST /echo
async fn echo(req: Request) -> Response {
    if req.body().is_empty() {
        return Response::status(http::StatusCode::BAD_REQUEST);
    }
    Response::builder().bytes("text/plain", req.body().clone())
}

async fn admin_home(_req: Request) -> &'static str {
    "admins only"
}
