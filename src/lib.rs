//! # waypoint
//!
//! The request-dispatch layer of an HTTP service: route groups with
//! inherited middleware, a per-request [`Context`], and one reporting
//! channel for everything that goes wrong.
//!
//! ## The model
//!
//! - **Routing**: radix-tree lookup per method via [`matchit`]. A path that
//!   matches under another method is a 405 with an `Allow` header, not a 404.
//! - **Chains**: inherited middleware, route middleware, then the terminal
//!   handler, all sharing one signature. Middleware opt in to continuing
//!   with [`Context::next`].
//! - **Failures**: not-found, method-not-allowed, returned errors and panics
//!   each produce an [`Event`], delivered to the sink registered with
//!   [`Dispatcher::on_event`] and to the matching failure handler.
//! - **Serving**: [`Server`] runs hyper over tokio and drains in-flight
//!   requests on SIGTERM / Ctrl-C.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use waypoint::{BoxFuture, Context, Dispatcher, EventConfig, HandlerResult, Server, middleware};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut app = Dispatcher::new();
//!     app.event_config(EventConfig { enable_trace: true, ..EventConfig::default() })
//!         .on_event(|event| eprintln!("{} {}: {}", event.status, event.request.path(), event.message));
//!
//!     app.group("/api", [middleware::trace()])
//!         .get("/users/{id}", get_user)
//!         .post("/users", create_user);
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//!
//! fn get_user(ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
//!     Box::pin(async move {
//!         let id = ctx.route_value("id").int64()?;
//!         ctx.response_mut().json(format!(r#"{{"id":{id}}}"#).into_bytes());
//!         Ok(())
//!     })
//! }
//!
//! fn create_user(ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
//!     Box::pin(async move {
//!         let name = ctx.form_value("name").await.string(true)?;
//!         if name.is_empty() {
//!             ctx.response_mut().write_header(http::StatusCode::BAD_REQUEST);
//!             return Ok(());
//!         }
//!         ctx.redirect(303, "/api/users/99")?;
//!         Ok(())
//!     })
//! }
//! ```

mod context;
mod dispatcher;
mod error;
mod event;
mod form;
mod fs;
mod handler;
mod param;
mod request;
mod response;
mod router;
mod server;
mod trace;

pub mod middleware;

pub use context::{Context, Params};
pub use dispatcher::Dispatcher;
pub use error::{BoxError, Error, HandlerError};
pub use event::{Event, EventConfig, EventKind, EventReporter};
pub use form::{BodyError, FormFile};
pub use handler::{BoxFuture, BoxedHandler, EventSink, HandlerResult, handler};
pub use param::{ParamError, ParamValue};
pub use request::Request;
pub use response::{ContentType, ResponseWriter};
pub use router::Group;
pub use server::Server;
