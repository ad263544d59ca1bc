//! Minimal waypoint demo: a guarded API group, failure handlers and an
//! event sink.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/api/users/42 -H 'authorization: t'
//!   curl http://localhost:3000/api/users/abc -H 'authorization: t'   → 500, bad id
//!   curl http://localhost:3000/api/users/42                          → 401
//!   curl -X DELETE http://localhost:3000/api/users/42                → 405
//!   curl http://localhost:3000/boom                                  → 500, panic
//!   curl http://localhost:3000/nowhere                               → 404

use http::StatusCode;
use waypoint::{BoxFuture, Context, Dispatcher, EventConfig, HandlerResult, Server, handler, middleware};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let mut app = Dispatcher::new();
    app.event_config(EventConfig { enable_trace: true, short_caller: true, ..EventConfig::default() })
        .on_event(|event| {
            tracing::warn!(
                status = event.status.as_u16(),
                path = event.request.path(),
                trace = ?event.trace,
                "{}",
                event.message
            );
        })
        .on_not_found(|ctx| {
            Box::pin(async move {
                ctx.response_mut().write_header(StatusCode::NOT_FOUND);
                ctx.response_mut().json(br#"{"error":"not found"}"#.to_vec());
                Ok(())
            })
        })
        .on_server_error(|ctx| {
            Box::pin(async move {
                let message = ctx.event().map(|e| e.message.clone()).unwrap_or_default();
                ctx.response_mut().write_header(StatusCode::INTERNAL_SERVER_ERROR);
                ctx.response_mut().text(message);
                Ok(())
            })
        });

    let require_token = handler(|ctx| {
        Box::pin(async move {
            if ctx.request().header("authorization").is_some() {
                ctx.next(true);
            } else {
                ctx.response_mut().write_header(StatusCode::UNAUTHORIZED);
            }
            Ok(())
        })
    });

    app.group("/api", [middleware::trace(), require_token])
        .get("/users/{id}", get_user)
        .post("/users", create_user);

    app.router()
        .get("/", home)
        .get("/boom", |_ctx| {
            Box::pin(async move {
                if true {
                    panic!("the demo panicked on purpose");
                }
                Ok(())
            })
        });

    Server::bind("0.0.0.0:3000")
        .serve(app)
        .await
        .expect("server error");
}

// GET / → 302 to a sample user
fn home(ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        ctx.redirect(302, "/api/users/1")?;
        Ok(())
    })
}

// GET /api/users/{id}
fn get_user(ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        let id = ctx.route_value("id").int64()?;
        ctx.response_mut().json(format!(r#"{{"id":{id},"name":"alice"}}"#).into_bytes());
        Ok(())
    })
}

// POST /api/users, urlencoded or multipart
fn create_user(ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        let name = ctx.form_value("name").await.string(true)?;
        if name.is_empty() {
            ctx.response_mut().write_header(StatusCode::BAD_REQUEST);
            return Ok(());
        }
        ctx.set_header(http::header::LOCATION, "/api/users/99");
        ctx.response_mut().write_header(StatusCode::CREATED);
        ctx.response_mut().json(format!(r#"{{"id":99,"name":"{name}"}}"#).into_bytes());
        Ok(())
    })
}
