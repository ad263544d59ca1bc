//! Route table, chain execution and failure paths.
//!
//! # Lifecycle
//!
//! A [`Dispatcher`] is built and registered into during setup, through
//! `&mut self` methods. [`Server::serve`](crate::Server::serve) then takes it
//! by value and shares it behind an `Arc`; from that point only
//! [`handle`](Dispatcher::handle), which takes `&self`, is reachable, so the
//! route table cannot change while requests are being served.
//!
//! # Chain protocol
//!
//! For a matched route the inherited middleware, then the route's own
//! middleware, then the terminal handler run in order on one [`Context`]:
//!
//! 1. the continuation flag is cleared before each middleware;
//! 2. `Err(_)` from any step goes to the server-error path and stops the chain;
//! 3. `Ok(())` from a middleware that did not call `next(true)` stops the
//!    chain quietly, keeping whatever it wrote;
//! 4. a panic anywhere in the chain is caught here and handled like an error.
//!
//! # Failure paths
//!
//! Not-found, method-not-allowed and server-error each build one [`Event`].
//! The event goes to the sink when that kind's gate is on, and the
//! registered handler for the outcome, if any, runs on a fresh context whose
//! [`event`](Context::event) returns it. Without a handler the response is
//! the bare status code.

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use http::header::{self, HeaderValue};
use http::{Method, StatusCode};
use http_body_util::Full;
use matchit::Router as MatchitRouter;
use percent_encoding::percent_decode_str;
use tracing::{debug, error, warn};

use crate::context::{Context, Params};
use crate::error::{BoxError, Error, HandlerError};
use crate::event::{Event, EventConfig, EventKind, EventReporter, TraceSource};
use crate::form::{BodyError, DEFAULT_MAX_FORM_BYTES};
use crate::fs;
use crate::handler::{BoxFuture, BoxedHandler, HandlerResult, handler};
use crate::param::ParamError;
use crate::request::Request;
use crate::response::ResponseWriter;
use crate::router::Group;
use crate::trace;

type HttpResponse = http::Response<Full<Bytes>>;

/// What a registered route resolves to.
pub(crate) enum Endpoint {
    /// Middleware (inherited then route-local) followed by a terminal handler.
    Chain {
        middleware: Arc<[BoxedHandler]>,
        handler: BoxedHandler,
    },
    /// A directory subtree; the tail comes from the `filepath` parameter.
    Dir { root: PathBuf, list: bool },
    /// One file.
    File(PathBuf),
}

enum Lookup<'a> {
    Found(&'a Endpoint, Params),
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

enum Failure {
    Error(HandlerError),
    Panic(Box<dyn Any + Send>),
}

/// The request dispatcher.
///
/// ```rust
/// use waypoint::{BoxFuture, Context, Dispatcher, HandlerResult, handler};
///
/// fn list_users(ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
///     Box::pin(async move {
///         ctx.response_mut().json(b"[]".to_vec());
///         Ok(())
///     })
/// }
///
/// let mut app = Dispatcher::new();
/// let require_token = handler(|ctx| Box::pin(async move {
///     if ctx.request().header("authorization").is_some() {
///         ctx.next(true);
///     } else {
///         ctx.response_mut().write_header(http::StatusCode::UNAUTHORIZED);
///     }
///     Ok(())
/// }));
///
/// app.group("/api", [require_token]).get("/users", list_users);
/// ```
pub struct Dispatcher {
    routes: HashMap<Method, MatchitRouter<Endpoint>>,
    reporter: Arc<EventReporter>,
    not_found: Option<BoxedHandler>,
    method_not_allowed: Option<BoxedHandler>,
    server_error: Option<BoxedHandler>,
    max_form_bytes: usize,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            reporter: Arc::new(EventReporter::default()),
            not_found: None,
            method_not_allowed: None,
            server_error: None,
            max_form_bytes: DEFAULT_MAX_FORM_BYTES,
        }
    }

    // ── Setup ───────────────────────────────────────────────────────────────

    pub fn event_config(&mut self, config: EventConfig) -> &mut Self {
        if config.enable_trace {
            trace::install_panic_hook();
        }
        Arc::make_mut(&mut self.reporter).set_config(config);
        self
    }

    /// Sets the sink that receives every emitted [`Event`].
    pub fn on_event<F>(&mut self, sink: F) -> &mut Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.reporter).set_sink(Arc::new(sink));
        self
    }

    pub fn on_not_found<H>(&mut self, h: H) -> &mut Self
    where
        H: for<'c> Fn(&'c mut Context) -> BoxFuture<'c, HandlerResult> + Send + Sync + 'static,
    {
        self.not_found = Some(handler(h));
        self
    }

    pub fn on_method_not_allowed<H>(&mut self, h: H) -> &mut Self
    where
        H: for<'c> Fn(&'c mut Context) -> BoxFuture<'c, HandlerResult> + Send + Sync + 'static,
    {
        self.method_not_allowed = Some(handler(h));
        self
    }

    pub fn on_server_error<H>(&mut self, h: H) -> &mut Self
    where
        H: for<'c> Fn(&'c mut Context) -> BoxFuture<'c, HandlerResult> + Send + Sync + 'static,
    {
        self.server_error = Some(handler(h));
        self
    }

    /// Largest body `query_value` / `form_value` will decode.
    pub fn max_form_bytes(&mut self, limit: usize) -> &mut Self {
        self.max_form_bytes = limit;
        self
    }

    /// The root route group: empty base path, no middleware.
    pub fn router(&mut self) -> Group<'_> {
        Group::new(self, String::new(), Vec::new().into())
    }

    /// A top-level route group.
    pub fn group(
        &mut self,
        path: &str,
        middleware: impl IntoIterator<Item = BoxedHandler>,
    ) -> Group<'_> {
        let middleware: Vec<BoxedHandler> = middleware.into_iter().collect();
        Group::new(self, path.to_owned(), middleware.into())
    }

    /// Inserts a route into the method's tree.
    ///
    /// # Panics
    ///
    /// On a malformed or conflicting pattern. A broken route table must not
    /// serve traffic, so this aborts setup.
    pub(crate) fn register(&mut self, method: Method, path: &str, endpoint: Endpoint) {
        let inserted = self.routes.entry(method.clone()).or_default().insert(path, endpoint);
        if let Err(e) = inserted {
            error!(%method, path, "route registration failed: {e}");
            panic!("invalid route `{method} {path}`: {e}");
        }
        debug!(%method, path, "route registered");
    }

    fn lookup(&self, method: &Method, path: &str) -> Lookup<'_> {
        if let Some(matched) = self.routes.get(method).and_then(|tree| tree.at(path).ok()) {
            let params: Option<Params> = matched
                .params
                .iter()
                .map(|(k, v)| Some((k.to_owned(), decode(v)?)))
                .collect();
            return match params {
                Some(params) => Lookup::Found(matched.value, params),
                None => {
                    debug!(path, "route parameter is not valid percent-encoded UTF-8");
                    Lookup::NotFound
                }
            };
        }

        let mut allowed: Vec<Method> = self
            .routes
            .iter()
            .filter(|(m, tree)| *m != method && tree.at(path).is_ok())
            .map(|(m, _)| m.clone())
            .collect();
        if allowed.is_empty() {
            return Lookup::NotFound;
        }
        allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Lookup::MethodNotAllowed(allowed)
    }

    fn context(&self, request: Arc<Request>, params: Params) -> Context {
        Context::new(request, params, Arc::clone(&self.reporter), self.max_form_bytes)
    }

    // ── Serving ─────────────────────────────────────────────────────────────

    /// Dispatches one request with a fully buffered body.
    pub async fn handle(
        &self,
        req: http::Request<Bytes>,
        remote_addr: Option<SocketAddr>,
    ) -> HttpResponse {
        let request = Arc::new(Request::new(req, remote_addr));
        let method = request.method().clone();

        match self.lookup(&method, request.path()) {
            Lookup::Found(Endpoint::Chain { middleware, handler: terminal }, params) => {
                self.run_chain(request, params, middleware, terminal).await
            }
            Lookup::Found(Endpoint::Dir { root, list }, params) => {
                let tail = params.iter().find(|(k, _)| k == "filepath").map_or("", |(_, v)| v.as_str());
                let served = fs::serve_dir(root, tail, *list, request.headers()).await;
                match served {
                    Some(res) => res,
                    None => self.not_found(request).await,
                }
            }
            Lookup::Found(Endpoint::File(path), _) => {
                let served = fs::serve_file(path, request.headers()).await;
                match served {
                    Some(res) => res,
                    None => self.not_found(request).await,
                }
            }
            Lookup::MethodNotAllowed(allowed) => self.method_not_allowed(request, &allowed).await,
            Lookup::NotFound => self.not_found(request).await,
        }
    }

    async fn run_chain(
        &self,
        request: Arc<Request>,
        params: Params,
        middleware: &[BoxedHandler],
        terminal: &BoxedHandler,
    ) -> HttpResponse {
        let mut ctx = self.context(Arc::clone(&request), params);
        let config = self.reporter.config();

        let chain = execute(&mut ctx, middleware, terminal);
        let outcome = if config.enable_trace {
            AssertUnwindSafe(trace::armed(chain, config.short_caller)).catch_unwind().await
        } else {
            AssertUnwindSafe(chain).catch_unwind().await
        };

        let failure = match outcome {
            Ok(Ok(())) => return ctx.into_response().into_response(),
            Ok(Err(err)) => Failure::Error(err),
            Err(payload) => Failure::Panic(payload),
        };
        let params = ctx.take_params();
        self.server_error(request, params, failure).await
    }

    // ── Failure paths ───────────────────────────────────────────────────────

    async fn not_found(&self, request: Arc<Request>) -> HttpResponse {
        let event = self.reporter.build(
            EventKind::NotFound,
            "Not Found".to_owned(),
            request,
            TraceSource::None,
        );
        self.fail(event, Params::new(), self.not_found.as_ref()).await
    }

    async fn method_not_allowed(&self, request: Arc<Request>, allowed: &[Method]) -> HttpResponse {
        let event = self.reporter.build(
            EventKind::MethodNotAllowed,
            "Method Not Allowed".to_owned(),
            request,
            TraceSource::None,
        );
        let mut res = self.fail(event, Params::new(), self.method_not_allowed.as_ref()).await;

        let allow = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
        if let Ok(value) = HeaderValue::from_str(&allow) {
            res.headers_mut().entry(header::ALLOW).or_insert(value);
        }
        res
    }

    async fn server_error(&self, request: Arc<Request>, params: Params, failure: Failure) -> HttpResponse {
        let (message, source) = match failure {
            Failure::Error(err) => (err.to_string(), TraceSource::Origin(err.location())),
            Failure::Panic(payload) => {
                // Taken unconditionally so a stale trace never leaks into a
                // later event on this thread.
                let captured = trace::take_panic_trace();
                let source = captured.map_or(TraceSource::None, TraceSource::Captured);
                (panic_message(payload), source)
            }
        };
        error!(method = %request.method(), path = request.path(), "server error: {message}");

        let event = self.reporter.build(EventKind::ServerError, message, request, source);
        self.fail(event, params, self.server_error.as_ref()).await
    }

    async fn fail(&self, event: Event, params: Params, slot: Option<&BoxedHandler>) -> HttpResponse {
        self.reporter.emit(&event);
        let status = event.status;

        let Some(handler) = slot else {
            debug!(status = status.as_u16(), path = event.request.path(), "no failure handler registered");
            return ResponseWriter::new().into_response_or(status);
        };

        let mut ctx = self.context(Arc::clone(&event.request), params).with_event(event);
        match AssertUnwindSafe(handler.call(&mut ctx)).catch_unwind().await {
            Ok(Ok(())) => ctx.into_response().into_response_or(status),
            Ok(Err(err)) => {
                warn!(status = status.as_u16(), "failure handler returned an error: {err}");
                ResponseWriter::new().into_response_or(status)
            }
            Err(payload) => {
                warn!(status = status.as_u16(), "failure handler panicked: {}", panic_message(payload));
                ResponseWriter::new().into_response_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self { Self::new() }
}

async fn execute(ctx: &mut Context, middleware: &[BoxedHandler], terminal: &BoxedHandler) -> HandlerResult {
    for (step, m) in middleware.iter().enumerate() {
        ctx.reset_next();
        m.call(ctx).await?;
        if !ctx.is_next() {
            debug!(step, path = ctx.request().path(), "chain stopped by middleware");
            return Ok(());
        }
    }
    terminal.call(ctx).await
}

/// Percent-decodes a matched parameter. Matching runs on the raw path, so
/// an encoded `/` stays inside one segment.
fn decode(raw: &str) -> Option<String> {
    percent_decode_str(raw).decode_utf8().ok().map(Cow::into_owned)
}

/// Coerces a panic payload into an event message. Strings are taken as
/// they are; error values known to this crate or `std` use their `Display`.
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    macro_rules! displayed {
        ($($ty:ty),* $(,)?) => {
            $(
                if let Some(e) = payload.downcast_ref::<$ty>() {
                    return e.to_string();
                }
            )*
        };
    }

    if let Some(s) = payload.downcast_ref::<&'static str>() {
        return (*s).to_owned();
    }
    displayed!(String, HandlerError, BoxError, Error, ParamError, BodyError, io::Error);
    "unknown error".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_coerced() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(HandlerError::msg("typed"))), "typed");
        let boxed: BoxError = "boxed".into();
        assert_eq!(panic_message(Box::new(boxed)), "boxed");
        assert_eq!(
            panic_message(Box::new(Error::InvalidArgument("port".into()))),
            "invalid argument: port"
        );
        assert_eq!(
            panic_message(Box::new(io::Error::new(io::ErrorKind::NotFound, "gone"))),
            "gone"
        );
        assert_eq!(
            panic_message(Box::new(BodyError::TooLarge { limit: 8 })),
            "body exceeds the 8 byte form limit"
        );
        assert_eq!(panic_message(Box::new(42_u8)), "unknown error");
    }

    #[test]
    fn method_mismatch_is_distinguished_from_missing_route() {
        let mut app = Dispatcher::new();
        app.router().post("/users", |_ctx| Box::pin(async move { Ok(()) }));

        assert!(matches!(app.lookup(&Method::POST, "/users"), Lookup::Found(..)));
        match app.lookup(&Method::GET, "/users") {
            Lookup::MethodNotAllowed(allowed) => assert_eq!(allowed, [Method::POST]),
            _ => panic!("expected method-not-allowed"),
        }
        assert!(matches!(app.lookup(&Method::GET, "/nope"), Lookup::NotFound));
    }

    #[test]
    fn route_parameters_are_percent_decoded() {
        let mut app = Dispatcher::new();
        app.router().get("/u/{name}", |_ctx| Box::pin(async move { Ok(()) }));

        match app.lookup(&Method::GET, "/u/john%20doe") {
            Lookup::Found(_, params) => assert_eq!(params, [("name".to_owned(), "john doe".to_owned())]),
            _ => panic!("expected a match"),
        }
        match app.lookup(&Method::GET, "/u/a%2Fb") {
            Lookup::Found(_, params) => assert_eq!(params[0].1, "a/b"),
            _ => panic!("expected a match"),
        }
        // invalid UTF-8 once decoded
        assert!(matches!(app.lookup(&Method::GET, "/u/%FF"), Lookup::NotFound));
    }

    #[test]
    #[should_panic(expected = "invalid route")]
    fn conflicting_routes_abort_setup() {
        let mut app = Dispatcher::new();
        app.router()
            .get("/users/{id}", |_ctx| Box::pin(async move { Ok(()) }))
            .get("/users/{name}", |_ctx| Box::pin(async move { Ok(()) }));
    }
}
