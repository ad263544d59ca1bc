//! Built-in middleware.
//!
//! Middleware share the handler signature and are registered on a group or a
//! route. Anything written here applies to every route below the group it is
//! attached to.

use tracing::debug;

use crate::handler::{BoxedHandler, handler};

/// Logs each request at `debug` level and lets the chain continue.
///
/// ```rust
/// use waypoint::{Dispatcher, middleware};
///
/// let mut app = Dispatcher::new();
/// app.group("/api", [middleware::trace()]);
/// ```
pub fn trace() -> BoxedHandler {
    handler(|ctx| {
        Box::pin(async move {
            debug!(
                method = %ctx.request().method(),
                path = ctx.request().path(),
                client = %ctx.real_ip(),
                "request"
            );
            ctx.next(true);
            Ok(())
        })
    })
}
