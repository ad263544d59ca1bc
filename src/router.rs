//! Route groups.
//!
//! A [`Group`] is a node in the tree of route prefixes. It carries a base
//! path and the middleware every route registered through it inherits.
//!
//! ```text
//! app.group("/api", [a])            → base "/api",    middleware [a]
//!    .group("/v1", [b])             → base "/api/v1", middleware [a, b]
//!    .get("/users", h)              → GET /api/v1/users runs a, b, h
//! ```
//!
//! Each child gets its own copy of the parent's middleware with its entries
//! appended. Siblings never share storage, so registering through one group
//! can never change what another group's routes run.

use std::path::PathBuf;
use std::sync::Arc;

use http::Method;

use crate::context::Context;
use crate::dispatcher::{Dispatcher, Endpoint};
use crate::handler::{BoxFuture, BoxedHandler, HandlerResult, handler};

/// A route group. Obtain one from [`Dispatcher::router`] or
/// [`Dispatcher::group`].
pub struct Group<'d> {
    dispatcher: &'d mut Dispatcher,
    base_path: String,
    middleware: Arc<[BoxedHandler]>,
}

macro_rules! verbs {
    ($($name:ident, $name_with:ident => $method:ident;)*) => {
        $(
            #[doc = concat!("Registers a `", stringify!($method), "` route.")]
            pub fn $name<H>(&mut self, path: &str, h: H) -> &mut Self
            where
                H: for<'c> Fn(&'c mut Context) -> BoxFuture<'c, HandlerResult> + Send + Sync + 'static,
            {
                self.add(Method::$method, path, Vec::new(), handler(h))
            }

            #[doc = concat!("Registers a `", stringify!($method), "` route with route-local middleware.")]
            pub fn $name_with<H>(
                &mut self,
                path: &str,
                middleware: impl IntoIterator<Item = BoxedHandler>,
                h: H,
            ) -> &mut Self
            where
                H: for<'c> Fn(&'c mut Context) -> BoxFuture<'c, HandlerResult> + Send + Sync + 'static,
            {
                self.add(Method::$method, path, middleware, handler(h))
            }
        )*
    };
}

impl<'d> Group<'d> {
    pub(crate) fn new(
        dispatcher: &'d mut Dispatcher,
        base_path: String,
        middleware: Arc<[BoxedHandler]>,
    ) -> Self {
        Self { dispatcher, base_path, middleware }
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// The middleware every route of this group runs, in order.
    pub fn middleware(&self) -> &[BoxedHandler] {
        &self.middleware
    }

    /// Creates a child group. The parent is left unchanged.
    pub fn group(
        &mut self,
        path: &str,
        middleware: impl IntoIterator<Item = BoxedHandler>,
    ) -> Group<'_> {
        let mut inherited = self.middleware.to_vec();
        inherited.extend(middleware);
        Group {
            dispatcher: &mut *self.dispatcher,
            base_path: format!("{}{path}", self.base_path),
            middleware: inherited.into(),
        }
    }

    verbs! {
        get, get_with => GET;
        post, post_with => POST;
        put, put_with => PUT;
        patch, patch_with => PATCH;
        delete, delete_with => DELETE;
        head, head_with => HEAD;
        options, options_with => OPTIONS;
    }

    /// Registers a route for any method.
    pub fn handle<H>(
        &mut self,
        method: Method,
        path: &str,
        middleware: impl IntoIterator<Item = BoxedHandler>,
        h: H,
    ) -> &mut Self
    where
        H: for<'c> Fn(&'c mut Context) -> BoxFuture<'c, HandlerResult> + Send + Sync + 'static,
    {
        self.add(method, path, middleware, handler(h))
    }

    /// Serves the directory `local` under `url`. Bypasses all middleware.
    ///
    /// Requests for a directory (an empty tail or one ending in `/`) go to
    /// the not-found path unless `list` is set. Missing files always do.
    pub fn path(&mut self, url: &str, local: impl Into<PathBuf>, list: bool) -> &mut Self {
        let mut base = format!("{}{url}", self.base_path);
        if !base.starts_with('/') {
            base.insert(0, '/');
        }
        if !base.ends_with('/') {
            base.push('/');
        }
        let root = local.into();

        self.dispatcher.register(Method::GET, &base, Endpoint::Dir { root: root.clone(), list });
        self.dispatcher.register(Method::GET, &format!("{base}{{*filepath}}"), Endpoint::Dir { root, list });
        self
    }

    /// Serves the single file `local` at `url`. Bypasses all middleware.
    pub fn file(&mut self, url: &str, local: impl Into<PathBuf>) -> &mut Self {
        let path = format!("{}{url}", self.base_path);
        self.dispatcher.register(Method::GET, &path, Endpoint::File(local.into()));
        self
    }

    fn add(
        &mut self,
        method: Method,
        path: &str,
        local: impl IntoIterator<Item = BoxedHandler>,
        terminal: BoxedHandler,
    ) -> &mut Self {
        let mut middleware = self.middleware.to_vec();
        middleware.extend(local);
        let full_path = format!("{}{path}", self.base_path);
        self.dispatcher.register(
            method,
            &full_path,
            Endpoint::Chain { middleware: middleware.into(), handler: terminal },
        );
        self
    }
}
