use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::{Method, StatusCode, header};
use http_body_util::BodyExt;
use waypoint::{
    BoxFuture, BoxedHandler, Context, Dispatcher, Event, EventConfig, EventKind, HandlerError,
    HandlerResult, handler,
};

type Seen = Arc<Mutex<Vec<Event>>>;

fn get(path: &str) -> http::Request<Bytes> {
    http::Request::get(path).body(Bytes::new()).unwrap()
}

async fn body_string(res: http::Response<http_body_util::Full<Bytes>>) -> String {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn recording(app: &mut Dispatcher) -> Seen {
    let seen: Seen = Arc::default();
    let sink = Arc::clone(&seen);
    app.on_event(move |e: &Event| sink.lock().unwrap().push(e.clone()));
    seen
}

fn push(ctx: &mut Context, name: &'static str) {
    let mut order = ctx.value::<Vec<&'static str>>("order").cloned().unwrap_or_default();
    order.push(name);
    ctx.set_value("order", order);
}

/// Middleware that records its name and continues.
fn mark(name: &'static str) -> BoxedHandler {
    handler(move |ctx| {
        Box::pin(async move {
            push(ctx, name);
            ctx.next(true);
            Ok(())
        })
    })
}

/// Terminal handler that writes the order the chain ran in.
fn finish(ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        push(ctx, "H");
        let order = ctx.value::<Vec<&'static str>>("order").cloned().unwrap_or_default();
        ctx.response_mut().text(order.join(","));
        Ok(())
    })
}

/// Server-error handler echoing the event message.
fn echo_event(ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        let message = ctx.event().map(|e| e.message.clone()).unwrap_or_default();
        ctx.response_mut().write_header(StatusCode::INTERNAL_SERVER_ERROR);
        ctx.response_mut().text(message);
        Ok(())
    })
}

// ── Chains ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn inherited_then_local_middleware_then_handler() {
    let mut app = Dispatcher::new();
    {
        let mut api = app.group("/api", [mark("A")]);
        api.group("/v1", [mark("B")]).get("/x", finish);
        api.group("/v2", []).get("/x", finish);
        api.get_with("/local", [mark("L")], finish);
    }

    assert_eq!(body_string(app.handle(get("/api/v1/x"), None).await).await, "A,B,H");
    assert_eq!(body_string(app.handle(get("/api/v2/x"), None).await).await, "A,H");
    assert_eq!(body_string(app.handle(get("/api/local"), None).await).await, "A,L,H");
}

#[tokio::test]
async fn middleware_error_skips_handler_and_reports_once() {
    let mut app = Dispatcher::new();
    let seen = recording(&mut app);
    app.on_server_error(echo_event);

    let deny = handler(|_ctx| Box::pin(async move { Err(HandlerError::msg("denied")) }));
    app.group("/api", [mark("A"), deny]).get("/x", finish);

    let res = app.handle(get("/api/x"), None).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_string(res).await, "denied");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].kind, EventKind::ServerError);
    assert_eq!(seen[0].message, "denied");
    assert!(seen[0].trace.is_empty());
}

#[tokio::test]
async fn middleware_without_next_halts_quietly() {
    let mut app = Dispatcher::new();
    let seen = recording(&mut app);

    let gate = handler(|ctx| {
        Box::pin(async move {
            ctx.response_mut().write_header(StatusCode::UNAUTHORIZED);
            ctx.response_mut().text("halt");
            Ok(())
        })
    });
    app.group("/api", [gate]).get("/x", finish);

    let res = app.handle(get("/api/x"), None).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_string(res).await, "halt");
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn panics_become_server_errors() {
    let mut app = Dispatcher::new();
    let seen = recording(&mut app);
    app.on_server_error(echo_event);
    app.router().get("/boom", |_ctx| {
        Box::pin(async move {
            if true {
                panic!("kaboom");
            }
            Ok(())
        })
    });

    let res = app.handle(get("/boom"), None).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_string(res).await, "kaboom");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].message, "kaboom");
    assert_eq!(seen[0].request.path(), "/boom");
}

#[tokio::test]
async fn panic_trace_is_captured_when_enabled() {
    let mut app = Dispatcher::new();
    app.event_config(EventConfig { enable_trace: true, ..EventConfig::default() });
    let seen = recording(&mut app);
    app.router().get("/boom", |_ctx| {
        Box::pin(async move {
            if true {
                panic!("traced");
            }
            Ok(())
        })
    });

    let res = app.handle(get("/boom"), None).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!seen.lock().unwrap()[0].trace.is_empty());
}

fn fails_here(_ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move { Err(HandlerError::msg("explicit")) })
}

#[tokio::test]
async fn returned_error_traces_to_its_origin() {
    let mut app = Dispatcher::new();
    app.event_config(EventConfig { enable_trace: true, short_caller: true, ..EventConfig::default() });
    let seen = recording(&mut app);
    app.router().get("/fail", fails_here);

    app.handle(get("/fail"), None).await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].trace.len(), 1);
    assert!(seen[0].trace[0].starts_with("dispatch.rs:"), "{:?}", seen[0].trace);
}

#[tokio::test]
async fn report_emits_without_touching_the_response() {
    let mut app = Dispatcher::new();
    let seen = recording(&mut app);
    app.router().get("/soft", |ctx| {
        Box::pin(async move {
            ctx.report(HandlerError::msg("cache miss"));
            ctx.response_mut().text("ok");
            Ok(())
        })
    });

    let res = app.handle(get("/soft"), None).await;
    assert_eq!(res.status(), StatusCode::OK);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].message, "cache miss");
}

// ── Lookup failures ─────────────────────────────────────────────────────────

#[tokio::test]
async fn unmatched_path_is_a_bare_404_without_handler() {
    let mut app = Dispatcher::new();
    let seen = recording(&mut app);

    let res = app.handle(get("/nope"), None).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_string(res).await, "");
    assert_eq!(seen.lock().unwrap()[0].kind, EventKind::NotFound);
}

#[tokio::test]
async fn not_found_handler_sees_the_event() {
    let mut app = Dispatcher::new();
    app.on_not_found(|ctx| {
        Box::pin(async move {
            let path = ctx.event().map(|e| e.request.path().to_owned()).unwrap_or_default();
            ctx.response_mut().text(format!("no route for {path}"));
            Ok(())
        })
    });

    let res = app.handle(get("/missing"), None).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_string(res).await, "no route for /missing");
}

#[tokio::test]
async fn wrong_method_is_405_with_allow() {
    let mut app = Dispatcher::new();
    let seen = recording(&mut app);
    app.router().get("/users", finish).put("/users", finish);

    let req = http::Request::post("/users").body(Bytes::new()).unwrap();
    let res = app.handle(req, None).await;
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(res.headers()[header::ALLOW], "GET, PUT");
    assert_eq!(seen.lock().unwrap()[0].kind, EventKind::MethodNotAllowed);
}

#[tokio::test]
async fn gates_silence_the_sink_but_not_the_response() {
    let mut app = Dispatcher::new();
    app.event_config(EventConfig { not_found: false, ..EventConfig::default() });
    let seen = recording(&mut app);

    let res = app.handle(get("/nope"), None).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failing_failure_handler_falls_back_to_status() {
    let mut app = Dispatcher::new();
    app.on_not_found(|_ctx| Box::pin(async move { Err(HandlerError::msg("broken")) }));

    let res = app.handle(get("/nope"), None).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

// ── Context helpers ─────────────────────────────────────────────────────────

fn show_user(ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        let id = ctx.route_value("id").int64()?;
        let verbose = ctx.query_value("verbose").await.bool_or(false);
        let ip = ctx.real_ip();
        ctx.response_mut().text(format!("{id} {verbose} {ip}"));
        Ok(())
    })
}

#[tokio::test]
async fn route_and_query_values() {
    let mut app = Dispatcher::new();
    app.router().get("/users/{id}", show_user);
    let peer: SocketAddr = "10.0.0.7:5000".parse().unwrap();

    let res = app.handle(get("/users/42?verbose=true"), Some(peer)).await;
    assert_eq!(body_string(res).await, "42 true 10.0.0.7");

    // a non-numeric id fails the handler
    let res = app.handle(get("/users/abc"), Some(peer)).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

fn create(ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        let name = ctx.form_value("name").await.string(true)?;
        let source = ctx.form_value("source").await.string_or("none", false);
        ctx.response_mut().write_header(StatusCode::CREATED);
        ctx.response_mut().text(format!("{name}/{source}"));
        Ok(())
    })
}

#[tokio::test]
async fn urlencoded_form_falls_back_to_query() {
    let mut app = Dispatcher::new();
    app.router().post("/users", create);

    let req = http::Request::post("/users?source=query")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Bytes::from_static(b"name=+alice+"))
        .unwrap();
    let res = app.handle(req, None).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(body_string(res).await, "alice/query");
}

fn moved(ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        ctx.redirect(301, "/new")?;
        Ok(())
    })
}

fn bad_redirect(ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        ctx.redirect(200, "/new")?;
        Ok(())
    })
}

#[tokio::test]
async fn redirects() {
    let mut app = Dispatcher::new();
    app.router().get("/old", moved).get("/bad", bad_redirect);

    let res = app.handle(get("/old"), None).await;
    assert_eq!(res.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(res.headers()[header::LOCATION], "/new");

    let res = app.handle(get("/bad"), None).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn any_method_route() {
    let mut app = Dispatcher::new();
    app.router().handle(Method::from_bytes(b"PURGE").unwrap(), "/cache", [], finish);

    let req = http::Request::builder().method("PURGE").uri("/cache").body(Bytes::new()).unwrap();
    assert_eq!(body_string(app.handle(req, None).await).await, "H");
}

// ── Static files ────────────────────────────────────────────────────────────

#[tokio::test]
async fn static_directory_and_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("app.css"), "body{}").unwrap();
    std::fs::write(dir.path().join("robots.txt"), "User-agent: *").unwrap();

    let mut app = Dispatcher::new();
    let seen = recording(&mut app);
    app.router()
        .path("/static", dir.path(), false)
        .file("/robots.txt", dir.path().join("robots.txt"));

    let res = app.handle(get("/static/app.css"), None).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CONTENT_TYPE], "text/css");

    let res = app.handle(get("/robots.txt"), None).await;
    assert_eq!(body_string(res).await, "User-agent: *");

    assert_eq!(app.handle(get("/static/"), None).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.handle(get("/static/missing.js"), None).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn encoded_static_paths_are_decoded_before_lookup_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let public = dir.path().join("public");
    std::fs::create_dir(&public).unwrap();
    std::fs::write(public.join("my file.txt"), "spaced").unwrap();
    std::fs::write(dir.path().join("secret.txt"), "secret").unwrap();

    let mut app = Dispatcher::new();
    app.router().path("/static", &public, false);

    let res = app.handle(get("/static/my%20file.txt"), None).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_string(res).await, "spaced");

    for path in ["/static/%2e%2e/secret.txt", "/static/%2E%2E%2Fsecret.txt", "/static/..%2fsecret.txt"] {
        let res = app.handle(get(path), None).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND, "{path}");
    }
}

// ── Percent-decoding and failure-handler status ─────────────────────────────

fn echo_name(ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        let name = ctx.route_value("name").string(false)?;
        ctx.response_mut().text(name);
        Ok(())
    })
}

#[tokio::test]
async fn route_values_are_percent_decoded() {
    let mut app = Dispatcher::new();
    let seen = recording(&mut app);
    app.router().get("/u/{name}", echo_name);

    let res = app.handle(get("/u/john%20doe"), None).await;
    assert_eq!(body_string(res).await, "john doe");

    // an encoded slash stays inside the segment
    let res = app.handle(get("/u/a%2Fb"), None).await;
    assert_eq!(body_string(res).await, "a/b");

    let res = app.handle(get("/u/%C3%28"), None).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(seen.lock().unwrap()[0].kind, EventKind::NotFound);
}

#[tokio::test]
async fn body_only_failure_handlers_keep_the_outcome_status() {
    let mut app = Dispatcher::new();
    app.on_method_not_allowed(|ctx| {
        Box::pin(async move {
            ctx.response_mut().text("use GET");
            Ok(())
        })
    })
    .on_server_error(|ctx| {
        Box::pin(async move {
            ctx.response_mut().json(br#"{"error":"internal"}"#.to_vec());
            Ok(())
        })
    });
    app.router().get("/only-get", finish).get("/fail", fails_here);

    let req = http::Request::delete("/only-get").body(Bytes::new()).unwrap();
    let res = app.handle(req, None).await;
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body_string(res).await, "use GET");

    let res = app.handle(get("/fail"), None).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_string(res).await, r#"{"error":"internal"}"#);
}
