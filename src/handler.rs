//! Handler type and type erasure.
//!
//! # One signature for everything
//!
//! Terminal handlers, middleware, hooks and failure handlers all share one
//! shape: they borrow the request [`Context`] mutably and return a boxed
//! future resolving to [`HandlerResult`].
//!
//! ```text
//! fn load_user(ctx: &mut Context) -> BoxFuture<'_, HandlerResult>  ← user writes this
//!        ↓ group.get("/users/{id}", load_user)
//! Arc::new(FnHandler(load_user))                                   ← heap-allocated wrapper
//!        ↓  stored as BoxedHandler = Arc<dyn ErasedHandler>
//! handler.call(&mut ctx)  at request time                          ← one vtable dispatch
//! ```
//!
//! The future borrows the context, so it must be boxed: the lifetime of the
//! borrow is chosen per call, which `impl Future` in a trait-object world
//! cannot express. Closures work too, as long as they are passed straight to
//! a registration method or to [`handler`]:
//!
//! ```rust
//! use waypoint::handler;
//!
//! let auth = handler(|ctx| Box::pin(async move {
//!     if ctx.request().header("authorization").is_some() {
//!         ctx.next(true);
//!     }
//!     Ok(())
//! }));
//! # let _ = auth;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::HandlerError;
use crate::event::Event;

/// A heap-allocated, type-erased future that borrows for `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What every chain step returns. `Err` escalates to the server-error path.
pub type HandlerResult = Result<(), HandlerError>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// public [`BoxedHandler`] alias.
#[doc(hidden)]
pub trait ErasedHandler: Send + Sync + 'static {
    fn call<'c>(&'c self, ctx: &'c mut Context) -> BoxFuture<'c, HandlerResult>;
}

/// A type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn ErasedHandler>;

/// Sink receiving every emitted [`Event`].
pub type EventSink = Arc<dyn Fn(&Event) + Send + Sync + 'static>;

/// Boxes a function or closure into a [`BoxedHandler`].
///
/// Use it to build middleware lists for [`Group::group`](crate::Group::group)
/// and the `*_with` registration methods.
pub fn handler<F>(f: F) -> BoxedHandler
where
    F: for<'c> Fn(&'c mut Context) -> BoxFuture<'c, HandlerResult> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// Newtype wrapper that holds a concrete handler `F` and implements
/// [`ErasedHandler`], bridging the typed world to the trait-object world.
struct FnHandler<F>(F);

impl<F> ErasedHandler for FnHandler<F>
where
    F: for<'c> Fn(&'c mut Context) -> BoxFuture<'c, HandlerResult> + Send + Sync + 'static,
{
    fn call<'c>(&'c self, ctx: &'c mut Context) -> BoxFuture<'c, HandlerResult> {
        (self.0)(ctx)
    }
}
