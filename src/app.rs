//! Application handle: the configured chain plus error dispatch.
//!
//! The app is built once at startup and shared by every request through an
//! `Arc`. Each [`Context`] finds it under the [`APP`](crate::APP) key, which
//! is how [`Context::status`] reaches the error handler.

use std::fmt;

use http::StatusCode;
use tracing::debug;

use crate::context::Context;
use crate::error::Error;
use crate::handler::{Chain, Handler};
use crate::store::SharedStore;

/// Application-defined reaction to a status code being written.
///
/// Runs synchronously inside [`Context::status`], after the status line has
/// been written: it may add a body but cannot change the code.
///
/// Implemented for closures `Fn(StatusCode, &mut Context)`.
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle_error(&self, code: StatusCode, ctx: &mut Context);
}

impl<F> ErrorHandler for F
where
    F: Fn(StatusCode, &mut Context) + Send + Sync + 'static,
{
    fn handle_error(&self, code: StatusCode, ctx: &mut Context) {
        self(code, ctx)
    }
}

/// An [`ErrorHandler`] that only records client and server errors with `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ErrorLog;

impl ErrorHandler for ErrorLog {
    fn handle_error(&self, code: StatusCode, ctx: &mut Context) {
        if code.is_client_error() || code.is_server_error() {
            let path = ctx.request().map(|r| r.path().to_owned()).unwrap_or_default();
            debug!(status = code.as_u16(), %path, "error status written");
        }
    }
}

/// The application: a handler chain, the error handler it reports to and
/// the values every request can read.
pub struct App {
    chain: Chain,
    errors: Box<dyn ErrorHandler>,
    store: SharedStore,
}

impl App {
    pub fn builder() -> AppBuilder {
        AppBuilder { chain: Chain::new(), errors: None, store: SharedStore::new() }
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Application-wide values registered with [`AppBuilder::value`].
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub(crate) fn handle_error(&self, code: StatusCode, ctx: &mut Context) {
        self.errors.handle_error(code, ctx);
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("chain", &self.chain)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

/// Fluent builder for [`App`]. An error handler is mandatory.
///
/// ```rust
/// use strand::{App, Context, ErrorLog};
///
/// fn hello(ctx: &mut Context) { let _ = ctx.write_string("hello"); }
///
/// let app = App::builder().handler(hello).on_error(ErrorLog).build().unwrap();
/// assert_eq!(app.chain().len(), 1);
///
/// assert!(App::builder().handler(hello).build().is_err());
/// ```
pub struct AppBuilder {
    chain: Chain,
    errors: Option<Box<dyn ErrorHandler>>,
    store: SharedStore,
}

impl AppBuilder {
    /// Appends a handler to the application chain.
    pub fn handler(mut self, handler: impl Handler) -> Self {
        self.chain = self.chain.with(handler);
        self
    }

    /// Replaces the whole chain.
    pub fn chain(mut self, chain: Chain) -> Self {
        self.chain = chain;
        self
    }

    /// Registers an application-wide value, readable from every request
    /// through [`Context::app_store`].
    pub fn value<T: Send + Sync + 'static>(mut self, key: impl Into<String>, value: T) -> Self {
        self.store.set(key, value);
        self
    }

    pub fn on_error(mut self, handler: impl ErrorHandler) -> Self {
        self.errors = Some(Box::new(handler));
        self
    }

    pub fn build(self) -> Result<App, Error> {
        let errors = self.errors.ok_or(Error::Config("no error handler configured"))?;
        Ok(App { chain: self.chain, errors, store: self.store })
    }
}
